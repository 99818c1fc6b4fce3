//! flowgate-api: HTTP surface of the broker.
//!
//! Open Service Broker v2 routes over axum. Every route except the
//! liveness probe requires HTTP basic auth.
//!
//! # Routes
//!
//! | Method | Path | Verb |
//! |---|---|---|
//! | GET | `/v2/catalog` | GetCatalog |
//! | PUT | `/v2/service_instances/{id}` | Provision |
//! | PATCH | `/v2/service_instances/{id}` | Update |
//! | DELETE | `/v2/service_instances/{id}` | Deprovision |
//! | GET | `/v2/service_instances/{id}/last_operation` | PollStatus |
//! | PUT | `/v2/service_instances/{id}/service_bindings/{binding_id}` | Bind |
//! | DELETE | `/v2/service_instances/{id}/service_bindings/{binding_id}` | Unbind |
//! | GET | `/liveness` | liveness probe, no auth |

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, put};
use flowgate_broker::Broker;

pub use auth::BasicAuth;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub broker: Arc<Broker>,
}

/// Build the complete router.
pub fn build_router(broker: Arc<Broker>, auth: BasicAuth) -> Router {
    let state = ApiState { broker };

    let broker_routes = Router::new()
        .route("/catalog", get(handlers::catalog))
        .route(
            "/service_instances/{instance_id}",
            put(handlers::provision)
                .patch(handlers::update)
                .delete(handlers::deprovision),
        )
        .route(
            "/service_instances/{instance_id}/last_operation",
            get(handlers::last_operation),
        )
        .route(
            "/service_instances/{instance_id}/service_bindings/{binding_id}",
            put(handlers::bind).delete(handlers::unbind),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::new(auth),
            auth::require_basic_auth,
        ))
        .with_state(state);

    Router::new()
        .nest("/v2", broker_routes)
        .route("/liveness", get(handlers::liveness))
}
