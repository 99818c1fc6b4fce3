//! flowgate-state: the system of record for provisioned instances.
//!
//! Backed by [redb](https://docs.rs/redb). Each instance is stored as an
//! opaque JSON blob keyed by its instance id, next to the owner-space
//! reference it was provisioned into.
//!
//! # Architecture
//!
//! The store never looks inside a blob. [`ServiceInstance`] is the typed
//! view the broker encodes into and decodes out of that blob.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
