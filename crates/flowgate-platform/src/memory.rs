//! In-process simulated platform.
//!
//! Keeps applications, routes, and route mappings in memory and follows the
//! same get-or-create and idempotent-delete rules as the real control plane.
//! Tests can script the runtime states an application reports after it is
//! started, and make named operations fail.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{PlatformError, PlatformResult};
use crate::gateway::{
    AppSpec, AppState, Application, Domain, GatewayFuture, PlatformGateway, ROUTE_MAPPING_PORT,
    Route, RuntimeState, Scope,
};

#[derive(Clone, Default)]
pub struct MemoryPlatform {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    scopes: Vec<Scope>,
    domains: Vec<Domain>,
    apps: HashMap<String, AppRecord>,
    routes: HashMap<String, Route>,
    /// `(app_guid, route_guid)` pairs.
    mappings: BTreeSet<(String, String)>,
    /// Runtime states reported after start, keyed by application name.
    scripts: HashMap<String, Vec<RuntimeState>>,
    /// Remaining injected failures per operation name.
    failures: HashMap<&'static str, u32>,
    calls: Vec<String>,
}

struct AppRecord {
    app: Application,
    runtime: VecDeque<RuntimeState>,
    content: BTreeMap<String, String>,
}

impl Inner {
    fn next_guid(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-{:04}", self.next_id)
    }

    /// Log the call and consume an injected failure if one is pending.
    fn enter(&mut self, operation: &'static str, detail: &str) -> PlatformResult<()> {
        debug!(operation, detail, "simulated platform call");
        self.calls.push(format!("{operation}:{detail}"));
        if let Some(remaining) = self.failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PlatformError::api(operation, "injected failure"));
            }
        }
        Ok(())
    }

    fn app_by_name(&self, name: &str) -> Option<&AppRecord> {
        self.apps.values().find(|r| r.app.name == name)
    }

    fn app_mut(&mut self, guid: &str) -> PlatformResult<&mut AppRecord> {
        self.apps
            .get_mut(guid)
            .ok_or_else(|| PlatformError::not_found("application", guid))
    }

    fn domain(&self, reference: &str) -> Option<&Domain> {
        self.domains
            .iter()
            .find(|d| d.guid == reference || d.name == reference)
    }

    fn route_fqdn(&self, route: &Route) -> String {
        let domain = self
            .domain(&route.domain_guid)
            .map_or(route.domain_guid.as_str(), |d| d.name.as_str());
        format!("{}.{}", route.host, domain)
    }

    fn ensure_route(&mut self, host: &str, domain: &str, scope_guid: &str) -> PlatformResult<Route> {
        let domain_guid = self
            .domain(domain)
            .map(|d| d.guid.clone())
            .ok_or_else(|| PlatformError::not_found("domain", domain))?;
        if let Some(route) = self
            .routes
            .values()
            .find(|r| r.host == host && r.domain_guid == domain_guid)
        {
            return Ok(route.clone());
        }
        let route = Route {
            guid: self.next_guid("route"),
            host: host.to_string(),
            domain_guid,
            scope_guid: scope_guid.to_string(),
        };
        self.routes.insert(route.guid.clone(), route.clone());
        Ok(route)
    }

    fn create_app(&mut self, spec: &AppSpec) -> PlatformResult<Application> {
        if !self.scopes.iter().any(|s| s.guid == spec.scope_guid) {
            return Err(PlatformError::not_found("scope", &spec.scope_guid));
        }
        let app = Application {
            guid: self.next_guid("app"),
            name: spec.name.clone(),
            scope_guid: spec.scope_guid.clone(),
            instances: spec.instances,
            memory_mb: spec.memory_mb,
            disk_mb: spec.disk_mb,
            buildpack: spec.buildpack.clone(),
            state: AppState::Stopped,
        };
        self.apps.insert(
            app.guid.clone(),
            AppRecord {
                app: app.clone(),
                runtime: VecDeque::from([RuntimeState::Down]),
                content: BTreeMap::new(),
            },
        );
        Ok(app)
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn with_shared_domain(self, name: &str) -> Self {
        {
            let mut inner = self.lock();
            let guid = inner.next_guid("domain");
            inner.domains.push(Domain {
                guid,
                name: name.to_string(),
            });
        }
        self
    }

    #[must_use]
    pub fn with_scope(self, guid: &str, name: &str) -> Self {
        self.lock().scopes.push(Scope {
            guid: guid.to_string(),
            name: name.to_string(),
        });
        self
    }

    /// Register a running client application reachable at `host.domain`.
    /// Returns its guid.
    pub fn add_client_app(
        &self,
        name: &str,
        scope_guid: &str,
        host: Option<(&str, &str)>,
    ) -> PlatformResult<String> {
        let mut inner = self.lock();
        let app = inner.create_app(&AppSpec {
            name: name.to_string(),
            scope_guid: scope_guid.to_string(),
            instances: 1,
            memory_mb: 256,
            disk_mb: 256,
            buildpack: "binary_buildpack".to_string(),
        })?;
        if let Some((host, domain)) = host {
            let route = inner.ensure_route(host, domain, scope_guid)?;
            inner.mappings.insert((app.guid.clone(), route.guid));
        }
        Ok(app.guid)
    }

    /// Runtime states reported, in order, once an application with this
    /// name is started. The last state repeats.
    pub fn script_runtime(&self, app_name: &str, states: Vec<RuntimeState>) {
        self.lock().scripts.insert(app_name.to_string(), states);
    }

    /// Make the next `times` calls of `operation` fail.
    pub fn fail_next(&self, operation: &'static str, times: u32) {
        self.lock().failures.insert(operation, times);
    }

    pub fn application(&self, name: &str) -> Option<Application> {
        self.lock().app_by_name(name).map(|r| r.app.clone())
    }

    pub fn application_count(&self) -> usize {
        self.lock().apps.len()
    }

    /// `host.domain` of every route mapped to the named application, sorted.
    pub fn route_urls(&self, app_name: &str) -> Vec<String> {
        let inner = self.lock();
        let Some(record) = inner.app_by_name(app_name) else {
            return Vec::new();
        };
        let mut urls: Vec<String> = inner
            .mappings
            .iter()
            .filter(|(app, _)| *app == record.app.guid)
            .filter_map(|(_, route)| inner.routes.get(route))
            .map(|r| inner.route_fqdn(r))
            .collect();
        urls.sort();
        urls
    }

    pub fn route_exists(&self, host: &str, domain: &str) -> bool {
        let inner = self.lock();
        let Some(domain_guid) = inner.domain(domain).map(|d| d.guid.clone()) else {
            return false;
        };
        inner
            .routes
            .values()
            .any(|r| r.host == host && r.domain_guid == domain_guid)
    }

    /// Contents of a file from the last upload to the named application.
    pub fn uploaded_file(&self, app_name: &str, file: &str) -> Option<String> {
        self.lock()
            .app_by_name(app_name)
            .and_then(|r| r.content.get(file).cloned())
    }

    /// Every call made so far, as `operation:detail`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }
}

fn read_directory(directory: &Path) -> PlatformResult<BTreeMap<String, String>> {
    let entries = std::fs::read_dir(directory)
        .map_err(|e| PlatformError::Upload(format!("{}: {e}", directory.display())))?;
    let mut files = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| PlatformError::Upload(e.to_string()))?;
        let path = entry.path();
        if path.is_file() {
            let bytes = std::fs::read(&path).map_err(|e| PlatformError::Upload(e.to_string()))?;
            files.insert(
                entry.file_name().to_string_lossy().into_owned(),
                String::from_utf8_lossy(&bytes).into_owned(),
            );
        }
    }
    if files.is_empty() {
        return Err(PlatformError::Upload(format!(
            "{} contains no files",
            directory.display()
        )));
    }
    Ok(files)
}

impl PlatformGateway for MemoryPlatform {
    fn ensure_application<'a>(&'a self, spec: &'a AppSpec) -> GatewayFuture<'a, Application> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("ensure_application", &spec.name)?;
            if let Some(record) = inner.app_by_name(&spec.name) {
                return Ok(record.app.clone());
            }
            inner.create_app(spec)
        })
    }

    fn get_application<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, Option<Application>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("get_application", name)?;
            Ok(inner.app_by_name(name).map(|r| r.app.clone()))
        })
    }

    fn delete_application<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("delete_application", name)?;
            let Some(guid) = inner.app_by_name(name).map(|r| r.app.guid.clone()) else {
                return Ok(());
            };
            inner.apps.remove(&guid);
            inner.mappings.retain(|(app, _)| *app != guid);
            Ok(())
        })
    }

    fn rename_application<'a>(
        &'a self,
        app_guid: &'a str,
        new_name: &'a str,
    ) -> GatewayFuture<'a, Application> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("rename_application", new_name)?;
            if inner
                .app_by_name(new_name)
                .is_some_and(|r| r.app.guid != app_guid)
            {
                return Err(PlatformError::api(
                    "rename_application",
                    format!("name {new_name} is taken"),
                ));
            }
            let record = inner.app_mut(app_guid)?;
            record.app.name = new_name.to_string();
            Ok(record.app.clone())
        })
    }

    fn ensure_route<'a>(
        &'a self,
        host: &'a str,
        domain: &'a str,
        scope_guid: &'a str,
    ) -> GatewayFuture<'a, Route> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("ensure_route", &format!("{host}.{domain}"))?;
            inner.ensure_route(host, domain, scope_guid)
        })
    }

    fn delete_route<'a>(&'a self, route_guid: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("delete_route", route_guid)?;
            inner.routes.remove(route_guid);
            inner.mappings.retain(|(_, route)| route != route_guid);
            Ok(())
        })
    }

    fn map_route<'a>(&'a self, app_guid: &'a str, route_guid: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter(
                "map_route",
                &format!("{app_guid}->{route_guid}:{ROUTE_MAPPING_PORT}"),
            )?;
            if !inner.apps.contains_key(app_guid) {
                return Err(PlatformError::not_found("application", app_guid));
            }
            if !inner.routes.contains_key(route_guid) {
                return Err(PlatformError::not_found("route", route_guid));
            }
            inner
                .mappings
                .insert((app_guid.to_string(), route_guid.to_string()));
            Ok(())
        })
    }

    fn unmap_route<'a>(
        &'a self,
        app_guid: &'a str,
        route_guid: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("unmap_route", &format!("{app_guid}->{route_guid}"))?;
            inner
                .mappings
                .remove(&(app_guid.to_string(), route_guid.to_string()));
            Ok(())
        })
    }

    fn list_routes<'a>(&'a self, app_guid: &'a str) -> GatewayFuture<'a, Vec<Route>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("list_routes", app_guid)?;
            if !inner.apps.contains_key(app_guid) {
                return Err(PlatformError::not_found("application", app_guid));
            }
            Ok(inner
                .mappings
                .iter()
                .filter(|(app, _)| app == app_guid)
                .filter_map(|(_, route)| inner.routes.get(route).cloned())
                .collect())
        })
    }

    fn list_route_applications<'a>(
        &'a self,
        route_guid: &'a str,
    ) -> GatewayFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("list_route_applications", route_guid)?;
            Ok(inner
                .mappings
                .iter()
                .filter(|(_, route)| route == route_guid)
                .map(|(app, _)| app.clone())
                .collect())
        })
    }

    fn upload_content<'a>(
        &'a self,
        app_guid: &'a str,
        directory: &'a Path,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let files = read_directory(directory)?;
            let mut inner = self.lock();
            inner.enter("upload_content", app_guid)?;
            inner.app_mut(app_guid)?.content = files;
            Ok(())
        })
    }

    fn set_application_state<'a>(
        &'a self,
        app_guid: &'a str,
        state: AppState,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("set_application_state", &format!("{app_guid}={state:?}"))?;
            let name = inner.app_mut(app_guid)?.app.name.clone();
            let script = match state {
                AppState::Started => inner
                    .scripts
                    .get(&name)
                    .cloned()
                    .unwrap_or_else(|| vec![RuntimeState::Running]),
                AppState::Stopped => vec![RuntimeState::Down],
            };
            let record = inner.app_mut(app_guid)?;
            record.app.state = state;
            record.runtime = script.into();
            Ok(())
        })
    }

    fn get_application_runtime_state<'a>(
        &'a self,
        app_guid: &'a str,
    ) -> GatewayFuture<'a, RuntimeState> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("get_application_runtime_state", app_guid)?;
            let record = inner.app_mut(app_guid)?;
            let state = if record.runtime.len() > 1 {
                record.runtime.pop_front()
            } else {
                record.runtime.front().copied()
            };
            Ok(state.unwrap_or(RuntimeState::Unknown))
        })
    }

    fn get_scope_by_reference<'a>(&'a self, reference: &'a str) -> GatewayFuture<'a, Scope> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("get_scope_by_reference", reference)?;
            inner
                .scopes
                .iter()
                .find(|s| s.guid == reference || s.name == reference)
                .cloned()
                .ok_or_else(|| PlatformError::not_found("scope", reference))
        })
    }

    fn resolve_domain<'a>(&'a self, reference: &'a str) -> GatewayFuture<'a, Domain> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.enter("resolve_domain", reference)?;
            inner
                .domain(reference)
                .cloned()
                .ok_or_else(|| PlatformError::not_found("domain", reference))
        })
    }
}
