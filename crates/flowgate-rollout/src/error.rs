//! Deployment workflow error types.

use std::path::PathBuf;
use std::time::Duration;

use flowgate_platform::PlatformError;
use thiserror::Error;

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("staging directory {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render nginx.conf: {0}")]
    Render(#[from] askama::Error),

    #[error("application {app} crashed while starting")]
    Crashed { app: String },

    #[error("application {app} was not running within {timeout:?}")]
    Timeout { app: String, timeout: Duration },

    /// The candidate could not be removed after a failed update. Both
    /// applications may now exist on the platform.
    #[error("rollback of {app} failed after `{cause}`: {source}; manual intervention required")]
    RollbackFailed {
        app: String,
        cause: String,
        #[source]
        source: PlatformError,
    },

    /// The candidate was healthy but could not take over the original's
    /// name. The original may already be gone.
    #[error("promotion of {candidate} to {app} failed: {source}; manual intervention required")]
    PromoteFailed {
        app: String,
        candidate: String,
        #[source]
        source: PlatformError,
    },
}

impl DeployError {
    pub(crate) fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Staging {
            path: path.into(),
            source,
        }
    }
}
