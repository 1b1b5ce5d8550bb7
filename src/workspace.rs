//! On-disk workspace layout
//!
//! ```text
//! <root>/
//!   lifecycle/               source checkout, build output, etag, lifecycle.tar.gz
//!   buildpacks-cache/<sha>   cached buildpack downloads
//!   buildpacks/<app>/<md5>/  extracted buildpack bundle
//!   buildpacks/<app>.tar.gz
//!   source/<app>.tar.gz
//!   droplets/<app>.tar.gz
//!   build-cache/<app>.tar.gz
//! ```

use std::path::{Path, PathBuf};

/// Paths of every artifact a backend instance keeps on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lifecycle_dir(&self) -> PathBuf {
        self.root.join("lifecycle")
    }

    pub fn lifecycle_tarball(&self) -> PathBuf {
        self.lifecycle_dir().join("lifecycle.tar.gz")
    }

    pub fn buildpacks_cache_dir(&self) -> PathBuf {
        self.root.join("buildpacks-cache")
    }

    pub fn buildpacks_dir(&self) -> PathBuf {
        self.root.join("buildpacks")
    }

    pub fn buildpacks_bundle(&self, app: &str) -> PathBuf {
        self.buildpacks_dir().join(app)
    }

    pub fn buildpacks_tarball(&self, app: &str) -> PathBuf {
        self.buildpacks_dir().join(tarball_name(app))
    }

    pub fn source_tarball(&self, app: &str) -> PathBuf {
        self.root.join("source").join(tarball_name(app))
    }

    pub fn droplet(&self, app: &str) -> PathBuf {
        self.root.join("droplets").join(tarball_name(app))
    }

    pub fn build_cache(&self, app: &str) -> PathBuf {
        self.root.join("build-cache").join(tarball_name(app))
    }

    /// Per-app files removed on teardown
    pub fn app_files(&self, app: &str) -> [PathBuf; 4] {
        [
            self.droplet(app),
            self.source_tarball(app),
            self.buildpacks_tarball(app),
            self.build_cache(app),
        ]
    }
}

fn tarball_name(app: &str) -> String {
    format!("{app}.tar.gz")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_keyed_by_app() {
        let ws = Workspace::new("/ws");
        assert_eq!(ws.droplet("web"), PathBuf::from("/ws/droplets/web.tar.gz"));
        assert_eq!(ws.source_tarball("web"), PathBuf::from("/ws/source/web.tar.gz"));
        assert_eq!(
            ws.buildpacks_tarball("web"),
            PathBuf::from("/ws/buildpacks/web.tar.gz")
        );
        assert_eq!(ws.buildpacks_bundle("web"), PathBuf::from("/ws/buildpacks/web"));
        assert_eq!(
            ws.build_cache("web"),
            PathBuf::from("/ws/build-cache/web.tar.gz")
        );
        assert_eq!(
            ws.lifecycle_tarball(),
            PathBuf::from("/ws/lifecycle/lifecycle.tar.gz")
        );
    }
}
