//! Content-addressed download cache for buildpack artifacts
//!
//! Remote URIs are keyed by the SHA256 of the URI itself. A lock per cache
//! path serializes the stat-or-download sequence, so concurrent deployments
//! that reference the same buildpack download it once while different
//! buildpacks download in parallel.

use crate::error::{StagehandError, StagehandResult};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};
use url::Url;

/// Download cache rooted at a workspace directory
pub struct BuildpacksCache {
    root: PathBuf,
    agent: ureq::Agent,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl BuildpacksCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            agent: ureq::Agent::new_with_defaults(),
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache file for a remote URI
    pub fn path_for(&self, uri: &str) -> PathBuf {
        self.root.join(hex::encode(Sha256::digest(uri.as_bytes())))
    }

    /// Open the artifact behind `uri`, downloading it on first use.
    ///
    /// Anything that is not an absolute URI (and `file://` URIs) is opened
    /// straight from the local filesystem.
    pub fn fetch(&self, uri: &str) -> StagehandResult<File> {
        let url = match Url::parse(uri) {
            Ok(url) if url.scheme() == "file" => {
                let path = url.to_file_path().map_err(|()| StagehandError::InvalidUri {
                    uri: uri.to_string(),
                    reason: "not a local file path".to_string(),
                })?;
                return open_local(&path);
            }
            Ok(url) => url,
            Err(_) => return open_local(Path::new(uri)),
        };

        let path = self.path_for(uri);
        let lock = self
            .locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if path.is_file() {
            debug!("Buildpack cache hit: {} -> {}", uri, path.display());
            return open_local(&path);
        }

        info!("Downloading buildpack {}", url);
        self.download(url.as_str(), &path)?;
        open_local(&path)
    }

    fn download(&self, url: &str, path: &Path) -> StagehandResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            StagehandError::io(format!("creating directory {}", self.root.display()), e)
        })?;

        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(status)) => {
                return Err(StagehandError::HttpStatus {
                    url: url.to_string(),
                    status,
                })
            }
            Err(e) => {
                return Err(StagehandError::Http {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let partial = path.with_extension("partial");
        let mut file = File::create(&partial)
            .map_err(|e| StagehandError::io(format!("creating {}", partial.display()), e))?;
        let mut body = response.into_body().into_reader();
        let written = io::copy(&mut body, &mut file).map_err(|e| StagehandError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        });
        let written = match written {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(e);
            }
        };
        file.sync_all()
            .map_err(|e| StagehandError::io(format!("flushing {}", partial.display()), e))?;
        fs::rename(&partial, path)
            .map_err(|e| StagehandError::io(format!("moving {}", path.display()), e))?;

        debug!("Cached {} bytes from {} at {}", written, url, path.display());
        Ok(())
    }
}

fn open_local(path: &Path) -> StagehandResult<File> {
    File::open(path).map_err(|e| StagehandError::io(format!("opening {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, TestServer};
    use std::io::Read;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn read_all(mut file: File) -> Vec<u8> {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn second_fetch_is_served_from_disk() {
        let server = TestServer::start(|_| Reply::ok("buildpack-bytes"));
        let dir = TempDir::new().unwrap();
        let cache = BuildpacksCache::new(dir.path().join("cache"));
        let uri = format!("{}/go_buildpack.zip", server.url);

        let first = read_all(cache.fetch(&uri).unwrap());
        let second = read_all(cache.fetch(&uri).unwrap());

        assert_eq!(first, b"buildpack-bytes");
        assert_eq!(first, second);
        assert_eq!(server.hits("/go_buildpack.zip"), 1);
        assert!(cache.path_for(&uri).is_file());
    }

    #[test]
    fn concurrent_fetches_download_once() {
        let server = TestServer::start(|_| {
            std::thread::sleep(Duration::from_millis(100));
            Reply::ok("shared-bytes")
        });
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(BuildpacksCache::new(dir.path().join("cache")));
        let uri = format!("{}/ruby_buildpack.zip", server.url);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let uri = uri.clone();
                std::thread::spawn(move || read_all(cache.fetch(&uri).unwrap()))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), b"shared-bytes");
        }
        assert_eq!(server.hits("/ruby_buildpack.zip"), 1);
    }

    #[test]
    fn distinct_uris_do_not_block_each_other() {
        let released = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&released);
        let server = TestServer::start(move |req| {
            if req.path.starts_with("/slow") {
                while !gate.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(10));
                }
                return Reply::ok("slow-bytes");
            }
            Reply::ok("fast-bytes")
        });
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(BuildpacksCache::new(dir.path().join("cache")));

        let slow = {
            let cache = Arc::clone(&cache);
            let uri = format!("{}/slow_buildpack.zip", server.url);
            std::thread::spawn(move || read_all(cache.fetch(&uri).unwrap()))
        };
        while server.hits("/slow") == 0 {
            std::thread::sleep(Duration::from_millis(10));
        }

        let (tx, rx) = mpsc::channel();
        {
            let cache = Arc::clone(&cache);
            let uri = format!("{}/fast_buildpack.zip", server.url);
            std::thread::spawn(move || {
                let _ = tx.send(read_all(cache.fetch(&uri).unwrap()));
            });
        }
        let fast = rx.recv_timeout(Duration::from_secs(10));

        assert!(!slow.is_finished(), "slow download finished before release");
        released.store(true, Ordering::SeqCst);
        assert_eq!(fast.unwrap(), b"fast-bytes");
        assert_eq!(slow.join().unwrap(), b"slow-bytes");
    }

    #[test]
    fn distinct_uris_use_distinct_paths() {
        let dir = TempDir::new().unwrap();
        let cache = BuildpacksCache::new(dir.path());
        assert_ne!(
            cache.path_for("https://example.com/a.zip"),
            cache.path_for("https://example.com/b.zip")
        );
    }

    #[test]
    fn local_paths_bypass_the_cache() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("local.zip");
        fs::write(&local, "local-bytes").unwrap();
        let cache = BuildpacksCache::new(dir.path().join("cache"));

        let by_path = read_all(cache.fetch(local.to_str().unwrap()).unwrap());
        let by_url = read_all(
            cache
                .fetch(Url::from_file_path(&local).unwrap().as_str())
                .unwrap(),
        );

        assert_eq!(by_path, b"local-bytes");
        assert_eq!(by_url, b"local-bytes");
        assert!(!dir.path().join("cache").exists());
    }

    #[test]
    fn http_errors_are_not_cached() {
        let server = TestServer::start(|_| Reply::status(404));
        let dir = TempDir::new().unwrap();
        let cache = BuildpacksCache::new(dir.path());
        let uri = format!("{}/missing.zip", server.url);

        let err = cache.fetch(&uri).unwrap_err();
        assert!(matches!(err, StagehandError::HttpStatus { status: 404, .. }));
        assert!(!cache.path_for(&uri).exists());
    }

    #[test]
    fn missing_local_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cache = BuildpacksCache::new(dir.path());
        let err = cache.fetch("/definitely/not/here.zip").unwrap_err();
        assert!(matches!(err, StagehandError::Io { .. }));
    }
}
