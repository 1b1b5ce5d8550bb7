//! Lifecycle executables
//!
//! The `builder` and `launcher` executables that stage and run apps inside
//! the stack image are compiled from source. A conditional GET against the
//! source archive decides whether the previously packed tarball is still
//! current; the etag is only persisted once a build fully succeeds.

use crate::archive::{self, Archiver};
use crate::config::schema::LifecycleConfig;
use crate::error::{StagehandError, StagehandResult};
use crate::process;
use async_trait::async_trait;
use std::fs::File;
use std::io::{self, Seek};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// In-container directory holding `builder` and `launcher`
pub const LIFECYCLE_PREFIX: &str = "/tmp/lifecycle";

/// Module path used when the source archive carries no go.mod
pub const LIFECYCLE_MODULE: &str = "code.cloudfoundry.org/buildpackapplifecycle";

/// Executables compiled out of the lifecycle source
pub const EXECUTABLES: [&str; 2] = ["builder", "launcher"];

/// Compiles Go packages
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Create a module manifest in `dir`
    async fn init_module(&self, dir: &Path, module: &str) -> StagehandResult<()>;

    /// Resolve and pin dependencies
    async fn tidy(&self, dir: &Path) -> StagehandResult<()>;

    /// Compile `./<package>` into a static executable at `output`
    async fn build(&self, dir: &Path, package: &str, output: &Path) -> StagehandResult<()>;
}

/// The `go` command line, cross-compiling for the stack
pub struct GoToolchain {
    go: String,
    goos: String,
    goarch: String,
}

impl GoToolchain {
    pub fn new(config: &LifecycleConfig) -> Self {
        Self {
            go: config.go.clone(),
            goos: config.goos.clone(),
            goarch: config.goarch.clone(),
        }
    }

    async fn exec(&self, dir: &Path, args: &[&str]) -> StagehandResult<()> {
        let step = format!("{} {}", self.go, args.join(" "));
        debug!("Executing in {}: {}", dir.display(), step);

        let output = Command::new(&self.go)
            .args(args)
            .current_dir(dir)
            .env("GOOS", &self.goos)
            .env("GOARCH", &self.goarch)
            .env("CGO_ENABLED", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StagehandError::command_failed(&step, e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(StagehandError::LifecycleBuild {
                step,
                output: process::error_output(
                    &String::from_utf8_lossy(&output.stdout),
                    &String::from_utf8_lossy(&output.stderr),
                ),
            })
        }
    }
}

#[async_trait]
impl Toolchain for GoToolchain {
    async fn init_module(&self, dir: &Path, module: &str) -> StagehandResult<()> {
        self.exec(dir, &["mod", "init", module]).await
    }

    async fn tidy(&self, dir: &Path) -> StagehandResult<()> {
        self.exec(dir, &["mod", "tidy"]).await
    }

    async fn build(&self, dir: &Path, package: &str, output: &Path) -> StagehandResult<()> {
        let output = output.to_string_lossy();
        let package = format!("./{package}");
        self.exec(dir, &["build", "-ldflags", "-s -w", "-o", &output, &package])
            .await
    }
}

enum Fetched {
    NotModified,
    Modified { body: File, etag: Option<String> },
}

/// Builds and caches the lifecycle tarball.
///
/// One build runs at a time per manager; the artifact is shared by every app.
pub struct LifecycleManager {
    archiver: Archiver,
    agent: ureq::Agent,
    toolchain: Arc<dyn Toolchain>,
    lock: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            archiver: Archiver::new().with_prefix(LIFECYCLE_PREFIX),
            agent: ureq::Agent::new_with_defaults(),
            toolchain,
            lock: Mutex::new(()),
        }
    }

    /// Return `<dir>/lifecycle.tar.gz`, rebuilding it when the source changed
    pub async fn build(&self, source_uri: &str, dir: &Path) -> StagehandResult<PathBuf> {
        let _guard = self.lock.lock().await;

        let tarball = dir.join("lifecycle.tar.gz");
        let etag_path = dir.join("etag");
        let known_etag = if tarball.is_file() {
            tokio::fs::read_to_string(&etag_path)
                .await
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        } else {
            None
        };

        let agent = self.agent.clone();
        let uri = source_uri.to_string();
        let fetched =
            tokio::task::spawn_blocking(move || fetch(&agent, &uri, known_etag.as_deref()))
                .await??;

        let (body, etag) = match fetched {
            Fetched::NotModified => {
                debug!("Lifecycle source unchanged, reusing {}", tarball.display());
                return Ok(tarball);
            }
            Fetched::Modified { body, etag } => (body, etag),
        };

        info!("Building lifecycle from {}", source_uri);
        let repo = dir.join("repo");
        let output = dir.join("output");
        {
            let dir = dir.to_path_buf();
            let repo = repo.clone();
            tokio::task::spawn_blocking(move || reset_and_extract(body, &dir, &repo)).await??;
        }

        if !repo.join("go.mod").is_file() {
            debug!("No go.mod in lifecycle source, initializing {}", LIFECYCLE_MODULE);
            self.toolchain.init_module(&repo, LIFECYCLE_MODULE).await?;
        }
        self.toolchain.tidy(&repo).await?;
        for exe in EXECUTABLES {
            self.toolchain.build(&repo, exe, &output.join(exe)).await?;
        }

        {
            let archiver = self.archiver.clone();
            let output = output.clone();
            let tarball = tarball.clone();
            tokio::task::spawn_blocking(move || archiver.compress(&output, &tarball)).await??;
        }

        if let Some(etag) = etag {
            tokio::fs::write(&etag_path, etag).await.map_err(|e| {
                StagehandError::io(format!("writing {}", etag_path.display()), e)
            })?;
        }

        info!("Lifecycle packed at {}", tarball.display());
        Ok(tarball)
    }
}

fn fetch(agent: &ureq::Agent, uri: &str, known_etag: Option<&str>) -> StagehandResult<Fetched> {
    match Url::parse(uri) {
        Ok(url) if url.scheme() == "file" => {
            let path = url.to_file_path().map_err(|()| StagehandError::InvalidUri {
                uri: uri.to_string(),
                reason: "not a local file path".to_string(),
            })?;
            fetch_local(&path, known_etag)
        }
        Ok(_) => fetch_remote(agent, uri, known_etag),
        Err(_) => fetch_local(Path::new(uri), known_etag),
    }
}

fn fetch_remote(
    agent: &ureq::Agent,
    uri: &str,
    known_etag: Option<&str>,
) -> StagehandResult<Fetched> {
    let mut request = agent.get(uri);
    if let Some(etag) = known_etag {
        request = request.header("If-None-Match", etag);
    }

    let response = match request.call() {
        Ok(response) => response,
        Err(ureq::Error::StatusCode(304)) => return Ok(Fetched::NotModified),
        Err(ureq::Error::StatusCode(status)) => {
            return Err(StagehandError::HttpStatus {
                url: uri.to_string(),
                status,
            })
        }
        Err(e) => {
            return Err(StagehandError::Http {
                url: uri.to_string(),
                reason: e.to_string(),
            })
        }
    };

    if response.status().as_u16() == 304 {
        return Ok(Fetched::NotModified);
    }

    let etag = response
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let mut body = tempfile::tempfile()
        .map_err(|e| StagehandError::io("creating download buffer", e))?;
    io::copy(&mut response.into_body().into_reader(), &mut body).map_err(|e| {
        StagehandError::Http {
            url: uri.to_string(),
            reason: e.to_string(),
        }
    })?;
    body.rewind()
        .map_err(|e| StagehandError::io("rewinding download buffer", e))?;

    Ok(Fetched::Modified { body, etag })
}

/// Local sources are tagged by size and modification time
fn fetch_local(path: &Path, known_etag: Option<&str>) -> StagehandResult<Fetched> {
    let file = File::open(path)
        .map_err(|e| StagehandError::io(format!("opening {}", path.display()), e))?;
    let meta = file
        .metadata()
        .map_err(|e| StagehandError::io(format!("reading metadata of {}", path.display()), e))?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let etag = format!("\"{}-{}\"", meta.len(), mtime);

    if known_etag == Some(etag.as_str()) {
        return Ok(Fetched::NotModified);
    }
    Ok(Fetched::Modified {
        body: file,
        etag: Some(etag),
    })
}

fn reset_and_extract(body: File, dir: &Path, repo: &Path) -> StagehandResult<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)
            .map_err(|e| StagehandError::io(format!("clearing {}", dir.display()), e))?;
    }
    std::fs::create_dir_all(dir)
        .map_err(|e| StagehandError::io(format!("creating {}", dir.display()), e))?;
    archive::decompress(io::BufReader::new(body), repo, 1)
}
