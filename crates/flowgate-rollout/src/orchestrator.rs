//! Deployment orchestrator: create, blue-green update, resync, delete.

use std::sync::Arc;

use flowgate_core::{DeploymentConfig, PlanResources};
use flowgate_platform::{
    AppSpec, AppState, Application, PlatformError, PlatformGateway, Route, RuntimeState, Scope,
};
use flowgate_state::ServiceInstance;
use tracing::{debug, error, info};

use crate::error::{DeployError, DeployResult};
use crate::poller::wait_until_running;
use crate::staging::Stager;
use crate::task::{DeployPhase, DeploymentTask};

/// Name of the blue-green candidate for `app_name`.
pub fn candidate_name(app_name: &str) -> String {
    format!("{app_name}-blue")
}

/// A new application named `name` in `scope_guid`, sized by `resources`.
fn sized_spec(name: &str, scope_guid: &str, resources: &PlanResources) -> AppSpec {
    AppSpec {
        name: name.to_string(),
        scope_guid: scope_guid.to_string(),
        instances: resources.instances,
        memory_mb: resources.memory_mb,
        disk_mb: resources.disk_mb,
        buildpack: resources.buildpack.clone(),
    }
}

pub struct Orchestrator {
    gateway: Arc<dyn PlatformGateway>,
    stager: Stager,
    settings: DeploymentConfig,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn PlatformGateway>, stager: Stager, settings: DeploymentConfig) -> Self {
        Self {
            gateway,
            stager,
            settings,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn PlatformGateway> {
        &self.gateway
    }

    pub fn app_name(&self, instance_id: &str) -> String {
        self.settings.app_name(instance_id)
    }

    pub async fn application(&self, instance_id: &str) -> DeployResult<Option<Application>> {
        Ok(self.gateway.get_application(&self.app_name(instance_id)).await?)
    }

    /// Runtime state of the instance's application, `None` if it does not
    /// exist.
    pub async fn runtime_state(&self, instance_id: &str) -> DeployResult<Option<RuntimeState>> {
        let Some(app) = self.application(instance_id).await? else {
            return Ok(None);
        };
        Ok(Some(
            self.gateway.get_application_runtime_state(&app.guid).await?,
        ))
    }

    // ── Create ─────────────────────────────────────────────────────

    /// Get-or-create the application, route, and mapping, upload, start.
    pub async fn create(
        &self,
        instance: &ServiceInstance,
        scope: &Scope,
        resources: &PlanResources,
    ) -> DeployResult<Application> {
        let name = self.app_name(&instance.id);
        let mut task = DeploymentTask::new(&instance.id, &name, self.stager.directory(&instance.id));
        info!(instance_id = %instance.id, app = %name, scope = %scope.name, "creating application");

        let result = async {
            task.content_dir = self.stager.prepare(instance)?;
            let app = self
                .gateway
                .ensure_application(&sized_spec(&name, &scope.guid, resources))
                .await?;
            self.converge(&mut task, &app, instance, scope).await?;
            Ok::<_, DeployError>(app)
        }
        .await;

        finish(&mut task, result)
    }

    // ── Resync ─────────────────────────────────────────────────────

    /// Refresh the running application in place after the backend set
    /// changed.
    pub async fn resync(&self, instance: &ServiceInstance, scope: &Scope) -> DeployResult<()> {
        let name = self.app_name(&instance.id);
        let mut task = DeploymentTask::new(&instance.id, &name, self.stager.directory(&instance.id));
        debug!(instance_id = %instance.id, app = %name, backends = instance.backends.len(), "resyncing");

        let result = async {
            let app = self
                .gateway
                .get_application(&name)
                .await?
                .ok_or_else(|| PlatformError::not_found("application", &name))?;
            task.content_dir = self.stager.prepare(instance)?;
            self.converge(&mut task, &app, instance, scope).await
        }
        .await;

        finish(&mut task, result)
    }

    // ── Blue-green update ──────────────────────────────────────────

    /// Deploy `desired` to a `-blue` candidate, wait for it to run, and swap
    /// it in under the original name.
    ///
    /// The candidate is sized like the original unless `resources` is given,
    /// which is the case when the plan changed.
    ///
    /// On any failure after the candidate exists, its exclusive routes and
    /// the candidate itself are removed and the original is left untouched.
    /// A failure while swapping a healthy candidate in cannot be undone and
    /// is reported as [`DeployError::PromoteFailed`].
    pub async fn blue_green_update(
        &self,
        desired: &ServiceInstance,
        scope: &Scope,
        resources: Option<&PlanResources>,
    ) -> DeployResult<Application> {
        let name = self.app_name(&desired.id);
        let original = self
            .gateway
            .get_application(&name)
            .await?
            .ok_or_else(|| PlatformError::not_found("application", &name))?;
        let original_routes = self.gateway.list_routes(&original.guid).await?;

        let blue = candidate_name(&name);
        let mut task = DeploymentTask::new(&desired.id, &blue, self.stager.directory(&desired.id));
        info!(instance_id = %desired.id, app = %name, candidate = %blue, "starting blue-green update");

        let spec = match resources {
            Some(resources) => sized_spec(&blue, &original.scope_guid, resources),
            None => AppSpec::cloned_from(&original, &blue),
        };
        let candidate = match self.gateway.ensure_application(&spec).await {
            Ok(app) => app,
            Err(e) => return finish(&mut task, Err(e.into())),
        };

        if let Err(err) = self.deploy_candidate(&mut task, &candidate, desired, scope).await {
            task.fail(err.to_string());
            self.roll_back(&candidate)
                .await
                .map_err(|source| DeployError::RollbackFailed {
                    app: blue.clone(),
                    cause: err.to_string(),
                    source,
                })?;
            task.rolled_back();
            return Err(err);
        }

        let result = self
            .promote(&original, &original_routes, &candidate)
            .await
            .map_err(|source| {
                error!(
                    app = %name,
                    candidate = %blue,
                    error = %source,
                    "promotion failed; manual intervention required"
                );
                DeployError::PromoteFailed {
                    app: name.clone(),
                    candidate: blue.clone(),
                    source,
                }
            });
        finish(&mut task, result)
    }

    async fn deploy_candidate(
        &self,
        task: &mut DeploymentTask,
        candidate: &Application,
        desired: &ServiceInstance,
        scope: &Scope,
    ) -> DeployResult<()> {
        task.content_dir = self.stager.prepare(desired)?;
        self.converge(task, candidate, desired, scope).await?;

        let timeout = self.settings.health_timeout();
        let deadline = task.start_polling(timeout);
        wait_until_running(
            self.gateway.clone(),
            &candidate.name,
            &candidate.guid,
            self.settings.poll_interval(),
            deadline,
            timeout,
        )
        .await
    }

    /// Drop the candidate and the routes only it used.
    async fn roll_back(&self, candidate: &Application) -> Result<(), PlatformError> {
        for route in self.gateway.list_routes(&candidate.guid).await? {
            self.release_route(&candidate.guid, &route).await?;
        }
        self.gateway.delete_application(&candidate.name).await
    }

    /// Retire the original and give the candidate its name.
    async fn promote(
        &self,
        original: &Application,
        original_routes: &[Route],
        candidate: &Application,
    ) -> Result<Application, PlatformError> {
        for route in original_routes {
            self.release_route(&original.guid, route).await?;
        }
        self.gateway.delete_application(&original.name).await?;
        let renamed = self
            .gateway
            .rename_application(&candidate.guid, &original.name)
            .await?;
        info!(app = %renamed.name, guid = %renamed.guid, "blue-green swap complete");
        Ok(renamed)
    }

    // ── Delete ─────────────────────────────────────────────────────

    /// Best-effort teardown. Absent resources are skipped.
    pub async fn delete(&self, instance_id: &str) -> DeployResult<()> {
        let name = self.app_name(instance_id);
        info!(instance_id, app = %name, "deleting application");

        if let Some(app) = self.gateway.get_application(&name).await? {
            self.delete_routes(&app).await?;
        }
        self.stager.remove(instance_id)?;
        self.gateway.delete_application(&name).await?;

        // Leftover from an update whose rollback failed.
        let blue = candidate_name(&name);
        if let Some(app) = self.gateway.get_application(&blue).await? {
            self.delete_routes(&app).await?;
            self.gateway.delete_application(&blue).await?;
        }
        Ok(())
    }

    async fn delete_routes(&self, app: &Application) -> DeployResult<()> {
        for route in self.gateway.list_routes(&app.guid).await? {
            self.release_route(&app.guid, &route).await?;
        }
        Ok(())
    }

    /// Unmap `route` from the application and delete it once no other
    /// application is mapped to it.
    async fn release_route(&self, app_guid: &str, route: &Route) -> Result<(), PlatformError> {
        self.gateway.unmap_route(app_guid, &route.guid).await?;
        let users = self.gateway.list_route_applications(&route.guid).await?;
        if users.is_empty() {
            self.gateway.delete_route(&route.guid).await
        } else {
            debug!(route = %route.guid, apps = users.len(), "route still mapped, keeping it");
            Ok(())
        }
    }

    // ── Shared steps ───────────────────────────────────────────────

    async fn converge(
        &self,
        task: &mut DeploymentTask,
        app: &Application,
        instance: &ServiceInstance,
        scope: &Scope,
    ) -> DeployResult<()> {
        task.advance(DeployPhase::RouteBinding);
        let route = self
            .gateway
            .ensure_route(&instance.host, &instance.domain, &scope.guid)
            .await?;
        let mapped = self.gateway.list_routes(&app.guid).await?;
        if !contains_route(&mapped, &route) {
            self.gateway.map_route(&app.guid, &route.guid).await?;
        }

        task.advance(DeployPhase::Uploading);
        self.gateway.upload_content(&app.guid, &task.content_dir).await?;

        task.advance(DeployPhase::Starting);
        self.gateway
            .set_application_state(&app.guid, AppState::Started)
            .await?;
        Ok(())
    }
}

fn contains_route(routes: &[Route], route: &Route) -> bool {
    routes.iter().any(|r| r.guid == route.guid)
}

fn finish<T>(task: &mut DeploymentTask, result: DeployResult<T>) -> DeployResult<T> {
    match &result {
        Ok(_) => task.succeed(),
        Err(e) => task.fail(e.to_string()),
    }
    result
}
