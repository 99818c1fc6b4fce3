//! flowgate-platform: the narrow contract used to drive the application
//! platform.
//!
//! The orchestrator only ever talks to a [`PlatformGateway`] trait object.
//! [`MemoryPlatform`] implements it in-process: it backs the daemon's
//! standalone mode and every orchestrator and broker test.
//!
//! # Contract
//!
//! ```text
//! applications  ensure / get / delete / rename / set state / runtime state
//! routes        ensure / delete / map / unmap / list per application,
//!               applications per route
//! content       upload a staging directory to an application
//! lookups       scope by reference, domain by guid or name
//! ```
//!
//! Deletes and unmaps of absent resources succeed, so teardown paths can be
//! re-run safely.

pub mod error;
pub mod gateway;
pub mod memory;

pub use error::{PlatformError, PlatformResult};
pub use gateway::{
    AppSpec, AppState, Application, Domain, GatewayFuture, PlatformGateway, ROUTE_MAPPING_PORT,
    Route, RuntimeState, Scope,
};
pub use memory::MemoryPlatform;
