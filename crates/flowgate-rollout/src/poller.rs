//! Runtime-state polling with a deadline.
//!
//! The poll loop runs on its own task and reports a single result over a
//! oneshot channel. The caller races that result against the deadline and
//! aborts the loop if the deadline wins.

use std::sync::Arc;
use std::time::Duration;

use flowgate_platform::{PlatformGateway, RuntimeState};
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, warn};

use crate::error::{DeployError, DeployResult};

/// Wait until `app_guid` reports `Running`.
///
/// `Crashed` fails immediately. Any other state is polled again after
/// `interval`. Returns `Timeout` once `deadline` passes.
pub async fn wait_until_running(
    gateway: Arc<dyn PlatformGateway>,
    app_name: &str,
    app_guid: &str,
    interval: Duration,
    deadline: Instant,
    timeout: Duration,
) -> DeployResult<()> {
    let (tx, rx) = oneshot::channel();
    let poll = {
        let app_name = app_name.to_string();
        let app_guid = app_guid.to_string();
        tokio::spawn(async move {
            let result =
                poll_loop(gateway.as_ref(), &app_name, &app_guid, interval, deadline, timeout)
                    .await;
            let _ = tx.send(result);
        })
    };

    tokio::select! {
        result = rx => match result {
            Ok(result) => result,
            Err(_) => Err(DeployError::Timeout { app: app_name.to_string(), timeout }),
        },
        _ = sleep_until(deadline) => {
            poll.abort();
            warn!(app = %app_name, ?timeout, "health deadline elapsed");
            Err(DeployError::Timeout { app: app_name.to_string(), timeout })
        }
    }
}

async fn poll_loop(
    gateway: &dyn PlatformGateway,
    app_name: &str,
    app_guid: &str,
    interval: Duration,
    deadline: Instant,
    timeout: Duration,
) -> DeployResult<()> {
    let mut attempts = 0u32;
    while Instant::now() < deadline {
        attempts += 1;
        let state = gateway.get_application_runtime_state(app_guid).await?;
        debug!(app = %app_name, ?state, attempts, "polled runtime state");
        match state {
            RuntimeState::Running => return Ok(()),
            RuntimeState::Crashed => {
                return Err(DeployError::Crashed {
                    app: app_name.to_string(),
                });
            }
            RuntimeState::Starting | RuntimeState::Down | RuntimeState::Unknown => {
                sleep(interval).await;
            }
        }
    }
    Err(DeployError::Timeout {
        app: app_name.to_string(),
        timeout,
    })
}
