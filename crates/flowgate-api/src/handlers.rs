//! Open Service Broker v2 handlers.
//!
//! Each handler decodes the request, calls one broker verb, and maps the
//! result onto a status code. Errors always carry a `description`.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use flowgate_broker::{
    BindRequest, BrokerError, ErrorKind, OperationState, ProvisionRequest, UpdateRequest,
};
use flowgate_core::{Catalog, Plan, Service};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::ApiState;

#[derive(Serialize)]
pub(crate) struct ErrorBody {
    description: String,
}

pub(crate) fn error_body(description: &str) -> Json<ErrorBody> {
    Json(ErrorBody {
        description: description.to_string(),
    })
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists | ErrorKind::Conflict | ErrorKind::PoolExhausted => {
            StatusCode::CONFLICT
        }
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::PolicyDisabled => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Platform => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &BrokerError) -> Response {
    let status = status_for(err.kind());
    if status.is_server_error() {
        warn!(error = %err, %status, "request failed");
    }
    (status, error_body(&err.to_string())).into_response()
}

fn rejection_response(rejection: JsonRejection) -> Response {
    (StatusCode::BAD_REQUEST, error_body(&rejection.body_text())).into_response()
}

fn empty(status: StatusCode) -> Response {
    (status, Json(json!({}))).into_response()
}

// ── Catalog ────────────────────────────────────────────────────

#[derive(Serialize)]
struct CatalogView<'a> {
    services: Vec<ServiceView<'a>>,
}

#[derive(Serialize)]
struct ServiceView<'a> {
    id: &'a str,
    name: &'a str,
    description: &'a str,
    bindable: bool,
    tags: &'a [String],
    requires: &'a [String],
    plan_updateable: bool,
    metadata: ServiceMetadataView<'a>,
    plans: Vec<PlanView<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceMetadataView<'a> {
    display_name: &'a str,
    image_url: &'a str,
    long_description: &'a str,
    provider_display_name: &'a str,
    documentation_url: &'a str,
    support_url: &'a str,
}

#[derive(Serialize)]
struct PlanView<'a> {
    id: &'a str,
    name: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    free: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bindable: Option<bool>,
    metadata: PlanMetadataView<'a>,
}

#[derive(Serialize)]
struct PlanMetadataView<'a> {
    bullets: &'a [String],
}

impl<'a> From<&'a Plan> for PlanView<'a> {
    fn from(plan: &'a Plan) -> Self {
        Self {
            id: &plan.id,
            name: &plan.name,
            description: &plan.description,
            free: plan.free,
            bindable: plan.bindable,
            metadata: PlanMetadataView {
                bullets: &plan.bullets,
            },
        }
    }
}

impl<'a> From<&'a Service> for ServiceView<'a> {
    fn from(service: &'a Service) -> Self {
        let meta = &service.metadata;
        Self {
            id: &service.id,
            name: &service.name,
            description: &service.description,
            bindable: service.bindable,
            tags: &service.tags,
            requires: &service.requires,
            plan_updateable: service.plan_updateable,
            metadata: ServiceMetadataView {
                display_name: &meta.display_name,
                image_url: &meta.image_url,
                long_description: &meta.long_description,
                provider_display_name: &meta.provider_display_name,
                documentation_url: &meta.documentation_url,
                support_url: &meta.support_url,
            },
            plans: service.plans.iter().map(PlanView::from).collect(),
        }
    }
}

impl<'a> From<&'a Catalog> for CatalogView<'a> {
    fn from(catalog: &'a Catalog) -> Self {
        Self {
            services: catalog.services().iter().map(ServiceView::from).collect(),
        }
    }
}

/// GET /v2/catalog
pub async fn catalog(State(state): State<ApiState>) -> Response {
    Json(CatalogView::from(state.broker.catalog())).into_response()
}

// ── Service instances ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProvisionBody {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub space_guid: Option<String>,
    #[serde(default)]
    pub context: Option<RequestContext>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub space_guid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

/// `service_id` and `plan_id` query parameters sent with deletes.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogQuery {
    pub service_id: Option<String>,
    pub plan_id: Option<String>,
}

/// PUT /v2/service_instances/{instance_id}
pub async fn provision(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    body: Result<Json<ProvisionBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };
    let space_guid = body
        .context
        .and_then(|c| c.space_guid)
        .or(body.space_guid);
    let request = ProvisionRequest {
        service_id: body.service_id,
        plan_id: body.plan_id,
        parameters: body.parameters,
        space_guid,
    };
    match state.broker.provision(&instance_id, request).await {
        Ok(_) => empty(StatusCode::CREATED),
        Err(e) => error_response(&e),
    }
}

/// PATCH /v2/service_instances/{instance_id}
pub async fn update(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    body: Result<Json<UpdateBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };
    let request = UpdateRequest {
        service_id: body.service_id,
        plan_id: body.plan_id,
        parameters: body.parameters,
    };
    match state.broker.update(&instance_id, request).await {
        Ok(_) => empty(StatusCode::OK),
        Err(e) => error_response(&e),
    }
}

/// DELETE /v2/service_instances/{instance_id}
pub async fn deprovision(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    Query(query): Query<CatalogQuery>,
) -> Response {
    let result = state
        .broker
        .deprovision(
            &instance_id,
            query.service_id.as_deref(),
            query.plan_id.as_deref(),
        )
        .await;
    match result {
        Ok(()) => empty(StatusCode::OK),
        Err(e @ BrokerError::InstanceNotFound(_)) => {
            (StatusCode::GONE, error_body(&e.to_string())).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// GET /v2/service_instances/{instance_id}/last_operation
pub async fn last_operation(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
) -> Response {
    match state.broker.poll_status(&instance_id).await {
        Ok(op) => {
            let description = match op {
                OperationState::Succeeded => "application is running",
                OperationState::InProgress => "application is starting",
                OperationState::Failed => "application is not running",
            };
            Json(json!({ "state": op, "description": description })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

// ── Bindings ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BindBody {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub app_guid: Option<String>,
    #[serde(default)]
    pub bind_resource: Option<BindResource>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BindResource {
    #[serde(default)]
    pub app_guid: Option<String>,
}

/// PUT /v2/service_instances/{instance_id}/service_bindings/{binding_id}
pub async fn bind(
    State(state): State<ApiState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    body: Result<Json<BindBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };
    let app_guid = body
        .bind_resource
        .and_then(|r| r.app_guid)
        .or(body.app_guid);
    let request = BindRequest {
        service_id: body.service_id,
        plan_id: body.plan_id,
        app_guid,
        parameters: body.parameters,
    };
    match state.broker.bind(&instance_id, &binding_id, request).await {
        Ok(credentials) => (
            StatusCode::CREATED,
            Json(json!({ "credentials": credentials })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// DELETE /v2/service_instances/{instance_id}/service_bindings/{binding_id}
pub async fn unbind(
    State(state): State<ApiState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Query(query): Query<CatalogQuery>,
) -> Response {
    let result = state
        .broker
        .unbind(
            &instance_id,
            &binding_id,
            query.service_id.as_deref(),
            query.plan_id.as_deref(),
        )
        .await;
    match result {
        Ok(()) => empty(StatusCode::OK),
        Err(e) => error_response(&e),
    }
}

// ── Liveness ───────────────────────────────────────────────────

/// GET /liveness
pub async fn liveness() -> Json<Value> {
    Json(json!({}))
}
