//! Shared test fixtures: a local HTTP server, a fake Go toolchain and small
//! archive builders.

use crate::error::{StagehandError, StagehandResult};
use crate::lifecycle::Toolchain;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use tiny_http::{Header, Response, Server};

/// A request as seen by [`TestServer`]
#[derive(Debug, Clone)]
pub(crate) struct SeenRequest {
    pub path: String,
    pub headers: HashMap<String, String>,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Canned response returned by a [`TestServer`] handler
pub(crate) struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// HTTP server on a random local port, one thread per request
pub(crate) struct TestServer {
    pub url: String,
    requests: Arc<Mutex<Vec<SeenRequest>>>,
    _handle: thread::JoinHandle<()>,
}

impl TestServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&SeenRequest) -> Reply + Send + Sync + 'static,
    {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let url = format!("http://{addr}");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(handler);

        let seen_log = Arc::clone(&requests);
        let handle = thread::spawn(move || {
            for request in server.incoming_requests() {
                let seen = SeenRequest {
                    path: request.url().to_string(),
                    headers: request
                        .headers()
                        .iter()
                        .map(|h| {
                            (
                                h.field.as_str().as_str().to_ascii_lowercase(),
                                h.value.as_str().to_string(),
                            )
                        })
                        .collect(),
                };
                seen_log.lock().unwrap().push(seen.clone());

                let handler = Arc::clone(&handler);
                thread::spawn(move || {
                    let reply = handler(&seen);
                    let mut response =
                        Response::from_data(reply.body).with_status_code(reply.status);
                    for (name, value) in reply.headers {
                        response.add_header(
                            Header::from_bytes(name.as_bytes(), value.as_bytes()).unwrap(),
                        );
                    }
                    let _ = request.respond(response);
                });
            }
        });

        Self {
            url,
            requests,
            _handle: handle,
        }
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests whose path starts with `prefix`
    pub fn hits(&self, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.path.starts_with(prefix))
            .count()
    }
}

/// Build a zip archive from `(path, contents)` pairs
pub(crate) fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
    for (path, contents) in files {
        writer.start_file(*path, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Build an uncompressed tar stream holding one regular file
pub(crate) fn tar_with_entry(name: &str, contents: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, name, contents).unwrap();
    builder.into_inner().unwrap()
}

/// Records toolchain invocations and writes placeholder executables
#[derive(Default)]
pub(crate) struct FakeToolchain {
    pub calls: Mutex<Vec<String>>,
    pub fail_build: bool,
}

impl FakeToolchain {
    pub fn failing() -> Self {
        Self {
            fail_build: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn builds(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("build"))
            .count()
    }
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn init_module(&self, _dir: &Path, module: &str) -> StagehandResult<()> {
        self.calls.lock().unwrap().push(format!("init {module}"));
        Ok(())
    }

    async fn tidy(&self, _dir: &Path) -> StagehandResult<()> {
        self.calls.lock().unwrap().push("tidy".to_string());
        Ok(())
    }

    async fn build(&self, _dir: &Path, package: &str, output: &Path) -> StagehandResult<()> {
        self.calls.lock().unwrap().push(format!("build {package}"));
        if self.fail_build {
            return Err(StagehandError::LifecycleBuild {
                step: format!("go build {package}"),
                output: "undefined: main".to_string(),
            });
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(output, format!("#!/bin/sh\n# {package}\n")).unwrap();
        Ok(())
    }
}

/// A directory with a trivial static app
pub(crate) fn sample_app(root: &Path) -> PathBuf {
    let app = root.join("app");
    std::fs::create_dir_all(&app).unwrap();
    std::fs::write(app.join("index.html"), "<h1>hello</h1>").unwrap();
    std::fs::write(app.join("Staticfile"), "").unwrap();
    app
}
