//! Platform gateway error types.

use thiserror::Error;

pub type PlatformResult<T> = Result<T, PlatformError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// The control plane refused or failed the call.
    #[error("platform call {operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    #[error("content upload failed: {0}")]
    Upload(String),
}

impl PlatformError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn api(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Api {
            operation,
            message: message.into(),
        }
    }
}
