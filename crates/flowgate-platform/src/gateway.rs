//! The platform gateway trait and the resource types it exchanges.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::error::PlatformResult;

/// Application port every route mapping targets.
pub const ROUTE_MAPPING_PORT: u16 = 8080;

/// Boxed future returned by every gateway call.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = PlatformResult<T>> + Send + 'a>>;

/// Tenancy scope (a platform space) that owns applications and routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub guid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub guid: String,
    pub name: String,
}

/// Desired state of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Started,
    Stopped,
}

/// Observed runtime state of an application's first instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Starting,
    Running,
    Crashed,
    Down,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub guid: String,
    pub name: String,
    pub scope_guid: String,
    pub instances: u32,
    pub memory_mb: u32,
    pub disk_mb: u32,
    pub buildpack: String,
    pub state: AppState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub guid: String,
    pub host: String,
    pub domain_guid: String,
    pub scope_guid: String,
}

/// Everything needed to create an application if it does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSpec {
    pub name: String,
    pub scope_guid: String,
    pub instances: u32,
    pub memory_mb: u32,
    pub disk_mb: u32,
    pub buildpack: String,
}

impl AppSpec {
    /// A new application named `name`, sized like `app`.
    pub fn cloned_from(app: &Application, name: &str) -> Self {
        Self {
            name: name.to_string(),
            scope_guid: app.scope_guid.clone(),
            instances: app.instances,
            memory_mb: app.memory_mb,
            disk_mb: app.disk_mb,
            buildpack: app.buildpack.clone(),
        }
    }
}

/// Narrow contract over the platform control plane.
///
/// `ensure_*` calls are get-or-create. `delete_*` and `unmap_route` succeed
/// when the target is already gone.
pub trait PlatformGateway: Send + Sync {
    fn ensure_application<'a>(&'a self, spec: &'a AppSpec) -> GatewayFuture<'a, Application>;

    fn get_application<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, Option<Application>>;

    fn delete_application<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, ()>;

    fn rename_application<'a>(
        &'a self,
        app_guid: &'a str,
        new_name: &'a str,
    ) -> GatewayFuture<'a, Application>;

    fn ensure_route<'a>(
        &'a self,
        host: &'a str,
        domain: &'a str,
        scope_guid: &'a str,
    ) -> GatewayFuture<'a, Route>;

    fn delete_route<'a>(&'a self, route_guid: &'a str) -> GatewayFuture<'a, ()>;

    /// Map the route onto [`ROUTE_MAPPING_PORT`] of the application.
    fn map_route<'a>(&'a self, app_guid: &'a str, route_guid: &'a str) -> GatewayFuture<'a, ()>;

    fn unmap_route<'a>(&'a self, app_guid: &'a str, route_guid: &'a str)
    -> GatewayFuture<'a, ()>;

    fn list_routes<'a>(&'a self, app_guid: &'a str) -> GatewayFuture<'a, Vec<Route>>;

    /// Guids of every application the route is mapped to.
    fn list_route_applications<'a>(&'a self, route_guid: &'a str)
    -> GatewayFuture<'a, Vec<String>>;

    fn upload_content<'a>(&'a self, app_guid: &'a str, directory: &'a Path)
    -> GatewayFuture<'a, ()>;

    fn set_application_state<'a>(
        &'a self,
        app_guid: &'a str,
        state: AppState,
    ) -> GatewayFuture<'a, ()>;

    fn get_application_runtime_state<'a>(
        &'a self,
        app_guid: &'a str,
    ) -> GatewayFuture<'a, RuntimeState>;

    fn get_scope_by_reference<'a>(&'a self, reference: &'a str) -> GatewayFuture<'a, Scope>;

    /// Look a domain up by guid or by name.
    fn resolve_domain<'a>(&'a self, reference: &'a str) -> GatewayFuture<'a, Domain>;
}
