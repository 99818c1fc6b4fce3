//! Per-instance staging directory.
//!
//! `<root>/<instance_id>/` is wiped and rebuilt before every upload so no
//! file from an earlier deployment can leak into the next one. Callers hold
//! the instance lock while staging.

use std::fs;
use std::path::{Path, PathBuf};

use flowgate_state::ServiceInstance;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{DeployError, DeployResult};
use crate::render::render_nginx_conf;

pub const NGINX_CONF: &str = "nginx.conf";
/// Marker file that selects the static-file buildpack.
pub const STATICFILE: &str = "Staticfile";

#[derive(Debug, Clone)]
pub struct Stager {
    root: PathBuf,
    assets_dir: Option<PathBuf>,
}

impl Stager {
    pub fn new(root: impl Into<PathBuf>, assets_dir: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            assets_dir,
        }
    }

    pub fn directory(&self, instance_id: &str) -> PathBuf {
        self.root.join(instance_id)
    }

    /// Rebuild the staging directory for `instance` and return its path.
    pub fn prepare(&self, instance: &ServiceInstance) -> DeployResult<PathBuf> {
        let dir = self.directory(&instance.id);
        self.remove(&instance.id)?;
        fs::create_dir_all(&dir).map_err(|e| DeployError::staging(&dir, e))?;

        if let Some(assets) = &self.assets_dir {
            copy_tree(assets, &dir)?;
        }

        let conf = render_nginx_conf(instance)?;
        let conf_path = dir.join(NGINX_CONF);
        fs::write(&conf_path, conf).map_err(|e| DeployError::staging(&conf_path, e))?;

        let marker = dir.join(STATICFILE);
        if !marker.exists() {
            fs::write(&marker, "").map_err(|e| DeployError::staging(&marker, e))?;
        }

        debug!(instance_id = %instance.id, dir = %dir.display(), "staged content");
        Ok(dir)
    }

    /// Delete the staging directory. Absent directories are fine.
    pub fn remove(&self, instance_id: &str) -> DeployResult<()> {
        let dir = self.directory(instance_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::staging(dir, e)),
        }
    }
}

fn copy_tree(from: &Path, to: &Path) -> DeployResult<()> {
    for entry in WalkDir::new(from).follow_links(true) {
        let entry = entry.map_err(|e| DeployError::staging(from, e.into()))?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| DeployError::staging(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| DeployError::staging(&target, e))?;
        }
    }
    Ok(())
}
