//! flowgate-broker: the broker protocol handler.
//!
//! [`Broker`] maps the lifecycle verbs onto the instance store, the backend
//! allocator, and the deployment orchestrator:
//!
//! ```text
//! Absent ──provision──▶ Active ──deprovision──▶ Absent
//!                        │  ▲
//!          update/bind/unbind
//! ```
//!
//! Every mutating verb holds the instance's lock from the first read to the
//! final store write, so operations on one instance never interleave.

pub mod allocator;
pub mod broker;
pub mod error;
pub mod locks;
pub mod params;

pub use allocator::{allocate, reserve, validate_unique};
pub use broker::{
    BindRequest, Broker, Credentials, OperationState, ProvisionRequest, UpdateRequest,
};
pub use error::{BrokerError, BrokerResult, ErrorKind};
pub use locks::InstanceLocks;
pub use params::{BackendParams, BindParams, InstanceParams};
