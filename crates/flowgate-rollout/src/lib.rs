//! flowgate deployment orchestrator.
//!
//! Drives the platform gateway through the three workflows an instance
//! goes through:
//!
//! - **create**: get-or-create application, route, and mapping, upload the
//!   staged content, start. Safe to re-run after a partial failure.
//! - **blue-green update**: stand up a `-blue` candidate next to the live
//!   application, poll it until it runs or the deadline passes, then swap
//!   it in. Any failure rolls the candidate back before returning.
//! - **delete**: best-effort teardown of routes, staging directory, and
//!   application.
//!
//! Bind and unbind use [`Orchestrator::resync`], which refreshes the
//! running application in place.
//!
//! # Components
//!
//! - **`task`**: per-workflow phase tracking
//! - **`staging`**: per-instance upload directory
//! - **`render`**: `nginx.conf` generation
//! - **`poller`**: runtime-state polling with a deadline
//! - **`orchestrator`**: the workflows

pub mod error;
pub mod orchestrator;
pub mod poller;
pub mod render;
pub mod staging;
pub mod task;

pub use error::{DeployError, DeployResult};
pub use orchestrator::{Orchestrator, candidate_name};
pub use render::render_nginx_conf;
pub use staging::Stager;
pub use task::{DeployPhase, DeploymentTask};
