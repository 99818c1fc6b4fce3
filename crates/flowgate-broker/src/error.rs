//! Broker error types and the kind taxonomy callers switch on.

use flowgate_platform::PlatformError;
use flowgate_rollout::DeployError;
use flowgate_state::StateError;
use thiserror::Error;

pub type BrokerResult<T> = Result<T, BrokerError>;

/// What went wrong, independent of where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    Validation,
    PolicyDisabled,
    PoolExhausted,
    Platform,
    Timeout,
    Persistence,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("service {0} not found in catalog")]
    ServiceNotFound(String),

    #[error("plan {plan} not found for service {service}")]
    PlanNotFound { service: String, plan: String },

    #[error("service instance {0} does not exist")]
    InstanceNotFound(String),

    #[error("service instance {0} already exists")]
    InstanceExists(String),

    #[error("binding {binding} already exists on instance {instance}")]
    BindingExists { instance: String, binding: String },

    #[error("{0}")]
    Conflict(String),

    #[error("invalid parameters: {0}")]
    Validation(String),

    #[error("user-supplied {0} parameters are disabled")]
    PolicyDisabled(&'static str),

    #[error("no free backend port in {base}..{end}")]
    PoolExhausted { base: u32, end: u32 },

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    State(#[from] StateError),

    /// The platform was changed but the store write failed. The record and
    /// the deployed application now disagree.
    #[error(
        "instance {instance_id}: platform updated but the store write failed ({source}); manual reconciliation required"
    )]
    Inconsistent {
        instance_id: String,
        #[source]
        source: StateError,
    },
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ServiceNotFound(_) | Self::PlanNotFound { .. } | Self::InstanceNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::InstanceExists(_) | Self::BindingExists { .. } => ErrorKind::AlreadyExists,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::PolicyDisabled(_) => ErrorKind::PolicyDisabled,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::Deploy(DeployError::Timeout { .. }) => ErrorKind::Timeout,
            Self::Deploy(_) | Self::Platform(_) => ErrorKind::Platform,
            Self::State(StateError::NotFound(_)) => ErrorKind::NotFound,
            Self::State(StateError::AlreadyExists(_)) => ErrorKind::AlreadyExists,
            Self::State(_) | Self::Inconsistent { .. } => ErrorKind::Persistence,
        }
    }
}
