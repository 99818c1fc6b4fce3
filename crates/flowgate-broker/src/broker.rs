//! Broker protocol handler.
//!
//! Request flow for every mutating verb: take the instance lock, validate
//! against the catalog and the parameter policy, read the current record,
//! compute the new backend set, realise it through the orchestrator, and
//! only then write the record back.

use std::sync::Arc;

use flowgate_core::{BackendPoolConfig, BrokerConfig, Catalog, DeploymentConfig, Plan, PolicyConfig};
use flowgate_platform::{PlatformGateway, RuntimeState, Scope};
use flowgate_rollout::{Orchestrator, Stager};
use flowgate_state::{Backend, ServiceInstance, StateError, StateResult, StateStore};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::allocator::{allocate, reserve, validate_unique};
use crate::error::{BrokerError, BrokerResult};
use crate::locks::InstanceLocks;
use crate::params::{self, BackendParams, BindParams, InstanceParams};

#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    pub service_id: String,
    pub plan_id: String,
    pub parameters: Option<Value>,
    /// Space reference from the request context.
    pub space_guid: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub service_id: Option<String>,
    /// `None` keeps the current plan.
    pub plan_id: Option<String>,
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct BindRequest {
    pub service_id: Option<String>,
    pub plan_id: Option<String>,
    /// Application being bound. Its first route becomes the backend url
    /// unless `parameters.url` is given.
    pub app_guid: Option<String>,
    pub parameters: Option<Value>,
}

/// Returned from a successful bind.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub domain: String,
    pub nginxs: Vec<Backend>,
}

/// Outcome reported by a status poll.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum OperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

pub struct Broker {
    catalog: Catalog,
    policy: PolicyConfig,
    pool: BackendPoolConfig,
    deployment: DeploymentConfig,
    store: StateStore,
    orchestrator: Orchestrator,
    locks: InstanceLocks,
}

impl Broker {
    pub fn new(config: &BrokerConfig, store: StateStore, gateway: Arc<dyn PlatformGateway>) -> Self {
        let stager = Stager::new(config.staging_root(), config.broker.assets_dir.clone());
        Self {
            catalog: config.catalog.clone(),
            policy: config.policy.clone(),
            pool: config.backends,
            deployment: config.deployment.clone(),
            store,
            orchestrator: Orchestrator::new(gateway, stager, config.deployment.clone()),
            locks: InstanceLocks::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // ── Provision ──────────────────────────────────────────────────

    pub async fn provision(
        &self,
        instance_id: &str,
        request: ProvisionRequest,
    ) -> BrokerResult<ServiceInstance> {
        let _guard = self.locks.acquire(instance_id).await;
        let plan = self.plan(&request.service_id, &request.plan_id)?;
        if self.store.exists(instance_id)? {
            return Err(BrokerError::InstanceExists(instance_id.to_string()));
        }
        if !self.policy.allow_user_provision_parameters {
            return Err(BrokerError::PolicyDisabled("provision"));
        }

        let params: InstanceParams = params::parse(request.parameters.as_ref())?;
        let host = required(params.host.as_deref(), "host")?;
        let domain = required(params.domain.as_deref(), "domain")?;

        let mut instance =
            ServiceInstance::new(instance_id, &request.service_id, &plan.id, host, domain);
        instance.session_sticky = params.enable_session_sticky.unwrap_or(false);
        if let Some(entries) = params.nginxs {
            instance.backends = self.backends_from_params(entries)?;
        }

        let owner = if plan.use_system_space {
            self.deployment.system_scope.clone()
        } else {
            request
                .space_guid
                .filter(|s| !s.is_empty())
                .ok_or_else(|| BrokerError::Validation("space_guid is required".to_string()))?
        };
        let scope = self.resolve_scope(&owner).await?;

        info!(
            instance_id,
            fqdn = %instance.fqdn(),
            scope = %scope.name,
            "provisioning instance"
        );
        self.orchestrator
            .create(&instance, &scope, &plan.resources)
            .await?;

        let blob = instance.to_blob()?;
        persisted(instance_id, self.store.create(instance_id, &blob, &owner))?;
        Ok(instance)
    }

    // ── Update ─────────────────────────────────────────────────────

    /// Blue-green redeploy with merged parameters. The record is written
    /// only after the candidate is live.
    pub async fn update(
        &self,
        instance_id: &str,
        request: UpdateRequest,
    ) -> BrokerResult<ServiceInstance> {
        let _guard = self.locks.acquire(instance_id).await;
        let current = self.load(instance_id)?;

        let service_id = request.service_id.as_deref().unwrap_or(&current.service_id);
        let plan_id = request.plan_id.as_deref().unwrap_or(&current.plan_id);
        let plan = self.plan(service_id, plan_id)?;
        let plan_changed = !plan.id.eq_ignore_ascii_case(&current.plan_id);

        let params: InstanceParams = params::parse(request.parameters.as_ref())?;
        if params.is_empty() && !plan_changed {
            return Err(BrokerError::Validation("no parameters to update".to_string()));
        }
        if !params.is_empty() && !self.policy.allow_user_update_parameters {
            return Err(BrokerError::PolicyDisabled("update"));
        }

        let mut desired = current.clone();
        desired.plan_id = plan.id.clone();
        if let Some(host) = params.host {
            desired.host = required(Some(host.as_str()), "host")?.to_string();
        }
        if let Some(domain) = params.domain {
            desired.domain = required(Some(domain.as_str()), "domain")?.to_string();
        }
        if let Some(sticky) = params.enable_session_sticky {
            desired.session_sticky = sticky;
        }
        if let Some(entries) = params.nginxs {
            desired.backends = self.backends_from_params(entries)?;
        }

        let scope = self.owner_scope(instance_id).await?;
        info!(instance_id, host = %desired.host, domain = %desired.domain, "updating instance");
        let resources = plan_changed.then_some(&plan.resources);
        self.orchestrator
            .blue_green_update(&desired, &scope, resources)
            .await?;

        let blob = desired.to_blob()?;
        persisted(instance_id, self.store.update(instance_id, &blob))?;
        Ok(desired)
    }

    // ── Bind / Unbind ──────────────────────────────────────────────

    pub async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        request: BindRequest,
    ) -> BrokerResult<Credentials> {
        let _guard = self.locks.acquire(instance_id).await;
        self.check_catalog(request.service_id.as_deref(), request.plan_id.as_deref())?;
        let current = self.load(instance_id)?;

        let params: BindParams = params::parse(request.parameters.as_ref())?;
        if !params.is_empty() && !self.policy.allow_user_bind_parameters {
            return Err(BrokerError::PolicyDisabled("bind"));
        }
        if current.backend(binding_id).is_some() {
            return Err(BrokerError::BindingExists {
                instance: instance_id.to_string(),
                binding: binding_id.to_string(),
            });
        }

        let url = match params.url.filter(|u| !u.is_empty()) {
            Some(url) => url,
            None => self.bound_app_url(request.app_guid.as_deref()).await?,
        };
        validate_unique(&current.backends, &url)?;
        let backend = allocate(
            &current.backends,
            &self.pool,
            binding_id,
            &url,
            params.weight.unwrap_or(0),
        )?;

        let mut desired = current;
        desired.backends.push(backend);
        let scope = self.owner_scope(instance_id).await?;
        info!(instance_id, binding_id, %url, "binding backend");
        self.orchestrator.resync(&desired, &scope).await?;

        let blob = desired.to_blob()?;
        persisted(instance_id, self.store.update(instance_id, &blob))?;
        Ok(Credentials {
            host: desired.host,
            domain: desired.domain,
            nginxs: desired.backends,
        })
    }

    /// Remove the backend named `binding_id`. Unknown bindings are a no-op.
    pub async fn unbind(
        &self,
        instance_id: &str,
        binding_id: &str,
        service_id: Option<&str>,
        plan_id: Option<&str>,
    ) -> BrokerResult<()> {
        let _guard = self.locks.acquire(instance_id).await;
        self.check_catalog(service_id, plan_id)?;
        let current = self.load(instance_id)?;
        if current.backend(binding_id).is_none() {
            return Ok(());
        }

        let mut desired = current;
        desired.backends.retain(|b| b.name != binding_id);
        let scope = self.owner_scope(instance_id).await?;
        info!(instance_id, binding_id, "unbinding backend");
        self.orchestrator.resync(&desired, &scope).await?;

        let blob = desired.to_blob()?;
        persisted(instance_id, self.store.update(instance_id, &blob))
    }

    // ── Deprovision ────────────────────────────────────────────────

    /// Tear down whatever exists. Fails only when neither the record nor
    /// the application is there.
    pub async fn deprovision(
        &self,
        instance_id: &str,
        service_id: Option<&str>,
        plan_id: Option<&str>,
    ) -> BrokerResult<()> {
        let _guard = self.locks.acquire(instance_id).await;
        self.check_catalog(service_id, plan_id)?;

        let recorded = self.store.exists(instance_id)?;
        let deployed = self.orchestrator.application(instance_id).await?.is_some();
        match (recorded, deployed) {
            (false, false) => return Err(BrokerError::InstanceNotFound(instance_id.to_string())),
            (true, false) => warn!(instance_id, "no application deployed, removing record only"),
            (false, true) => warn!(instance_id, "application has no record, tearing down"),
            (true, true) => info!(instance_id, "deprovisioning instance"),
        }

        self.orchestrator.delete(instance_id).await?;
        if recorded {
            persisted(instance_id, self.store.delete(instance_id))?;
        }
        Ok(())
    }

    // ── PollStatus ─────────────────────────────────────────────────

    pub async fn poll_status(&self, instance_id: &str) -> BrokerResult<OperationState> {
        let state = self
            .orchestrator
            .runtime_state(instance_id)
            .await?
            .ok_or_else(|| BrokerError::InstanceNotFound(instance_id.to_string()))?;
        Ok(match state {
            RuntimeState::Running => OperationState::Succeeded,
            RuntimeState::Starting => OperationState::InProgress,
            RuntimeState::Crashed | RuntimeState::Down | RuntimeState::Unknown => {
                OperationState::Failed
            }
        })
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn plan(&self, service_id: &str, plan_id: &str) -> BrokerResult<&Plan> {
        if self.catalog.find_service(service_id).is_none() {
            return Err(BrokerError::ServiceNotFound(service_id.to_string()));
        }
        self.catalog
            .find_plan(service_id, plan_id)
            .ok_or_else(|| BrokerError::PlanNotFound {
                service: service_id.to_string(),
                plan: plan_id.to_string(),
            })
    }

    /// Validate whichever catalog ids the caller supplied.
    fn check_catalog(&self, service_id: Option<&str>, plan_id: Option<&str>) -> BrokerResult<()> {
        match (service_id, plan_id) {
            (Some(service), Some(plan)) => self.plan(service, plan).map(|_| ()),
            (Some(service), None) if self.catalog.find_service(service).is_none() => {
                Err(BrokerError::ServiceNotFound(service.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn load(&self, instance_id: &str) -> BrokerResult<ServiceInstance> {
        match self.store.get(instance_id) {
            Ok(blob) => Ok(ServiceInstance::from_blob(&blob)?),
            Err(StateError::NotFound(_)) => {
                Err(BrokerError::InstanceNotFound(instance_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_scope(&self, reference: &str) -> BrokerResult<Scope> {
        Ok(self
            .orchestrator
            .gateway()
            .get_scope_by_reference(reference)
            .await?)
    }

    async fn owner_scope(&self, instance_id: &str) -> BrokerResult<Scope> {
        let owner = self.store.get_owner_space(instance_id)?;
        self.resolve_scope(&owner).await
    }

    /// `host.domain` of the first route of the bound application.
    async fn bound_app_url(&self, app_guid: Option<&str>) -> BrokerResult<String> {
        let app_guid = app_guid.filter(|g| !g.is_empty()).ok_or_else(|| {
            BrokerError::Validation("either a url parameter or app_guid is required".to_string())
        })?;
        let gateway = self.orchestrator.gateway();
        let routes = gateway.list_routes(app_guid).await?;
        let route = routes.first().ok_or_else(|| {
            BrokerError::Validation(format!(
                "application {app_guid} has no route; supply a url parameter"
            ))
        })?;
        let domain = gateway.resolve_domain(&route.domain_guid).await?;
        Ok(if route.host.is_empty() {
            domain.name
        } else {
            format!("{}.{}", route.host, domain.name)
        })
    }

    /// Build a backend set from `nginxs`. Explicit ports are reserved
    /// first so automatic assignment cannot take them.
    fn backends_from_params(&self, entries: Vec<BackendParams>) -> BrokerResult<Vec<Backend>> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.name.is_empty() || entry.url.is_empty() {
                return Err(BrokerError::Validation(
                    "every nginxs entry needs a name and a url".to_string(),
                ));
            }
            if entries[..i].iter().any(|e| e.name == entry.name) {
                return Err(BrokerError::Conflict(format!(
                    "backend name {} is used twice",
                    entry.name
                )));
            }
        }

        let mut assigned: Vec<Backend> = Vec::with_capacity(entries.len());
        for entry in &entries {
            let Some(port) = entry.port else {
                continue;
            };
            validate_unique(&assigned, &entry.url)?;
            let backend = reserve(
                &assigned,
                &self.pool,
                &entry.name,
                &entry.url,
                port,
                entry.weight.unwrap_or(0),
            )?;
            assigned.push(backend);
        }
        for entry in entries.iter().filter(|e| e.port.is_none()) {
            validate_unique(&assigned, &entry.url)?;
            let backend = allocate(
                &assigned,
                &self.pool,
                &entry.name,
                &entry.url,
                entry.weight.unwrap_or(0),
            )?;
            assigned.push(backend);
        }

        // Back to request order.
        let mut ordered = Vec::with_capacity(assigned.len());
        for entry in &entries {
            if let Some(i) = assigned.iter().position(|b| b.name == entry.name) {
                ordered.push(assigned.swap_remove(i));
            }
        }
        Ok(ordered)
    }
}

fn required<'a>(value: Option<&'a str>, key: &str) -> BrokerResult<&'a str> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| BrokerError::Validation(format!("{key} is required")))
}

/// Surface a store failure that follows a platform change as an
/// inconsistency.
fn persisted(instance_id: &str, result: StateResult<()>) -> BrokerResult<()> {
    result.map_err(|source| {
        error!(
            instance_id,
            error = %source,
            "platform updated but store write failed; manual reconciliation required"
        );
        BrokerError::Inconsistent {
            instance_id: instance_id.to_string(),
            source,
        }
    })
}
