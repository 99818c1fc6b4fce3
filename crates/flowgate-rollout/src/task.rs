//! Deployment task: tracks one workflow run through its phases.
//!
//! Tasks are transient. They exist for the duration of a workflow call and
//! make the progress visible in logs.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Current phase of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployPhase {
    /// Staging content and ensuring the application exists.
    Preparing,
    /// Ensuring the route and its mapping.
    RouteBinding,
    Uploading,
    Starting,
    /// Waiting for the application to report `Running`.
    Polling,
    Succeeded,
    Failed { reason: String },
    /// Failed, and the candidate application was removed again.
    RolledBack { reason: String },
}

#[derive(Debug, Clone)]
pub struct DeploymentTask {
    pub instance_id: String,
    pub target_app: String,
    pub content_dir: PathBuf,
    pub phase: DeployPhase,
    pub deadline: Option<Instant>,
}

impl DeploymentTask {
    pub fn new(instance_id: &str, target_app: &str, content_dir: PathBuf) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            target_app: target_app.to_string(),
            content_dir,
            phase: DeployPhase::Preparing,
            deadline: None,
        }
    }

    /// Move to the next non-terminal phase.
    pub fn advance(&mut self, phase: DeployPhase) {
        if self.is_terminal() {
            return;
        }
        debug!(
            instance_id = %self.instance_id,
            app = %self.target_app,
            from = ?self.phase,
            to = ?phase,
            "deployment phase"
        );
        self.phase = phase;
    }

    /// Enter `Polling` with a deadline `timeout` from now.
    pub fn start_polling(&mut self, timeout: Duration) -> Instant {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(deadline);
        self.advance(DeployPhase::Polling);
        deadline
    }

    pub fn succeed(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.phase = DeployPhase::Succeeded;
        info!(
            instance_id = %self.instance_id,
            app = %self.target_app,
            "deployment succeeded"
        );
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        let reason = reason.into();
        warn!(
            instance_id = %self.instance_id,
            app = %self.target_app,
            %reason,
            "deployment failed"
        );
        self.phase = DeployPhase::Failed { reason };
    }

    /// Record that a failed deployment was rolled back.
    pub fn rolled_back(&mut self) {
        if let DeployPhase::Failed { reason } = &self.phase {
            warn!(
                instance_id = %self.instance_id,
                app = %self.target_app,
                "rolled back candidate application"
            );
            self.phase = DeployPhase::RolledBack {
                reason: reason.clone(),
            };
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase,
            DeployPhase::Succeeded | DeployPhase::Failed { .. } | DeployPhase::RolledBack { .. }
        )
    }
}
