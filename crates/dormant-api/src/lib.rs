//! dormant-api — HTTP surface for the lifecycle controller.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/api/v1/resources` | Status of every configured resource |
//! | GET | `/api/v1/resources/{id}` | Status of one resource |
//! | POST | `/api/v1/resources/{id}/report` | Record activity now |
//! | POST | `/api/v1/resources/{id}/activate` | Ensure running (may wait up to the readiness timeout) |
//! | GET | `/api/v1/classifications` | `{resource: classification}` |
//! | POST | `/api/v1/events` | Submit a raw activity event |
//! | GET | `/api/v1/activations` | Activations in progress |
//!
//! The starter router (see [`starter_router`]) is served on its own
//! listener: any path is matched against the rules and the matching
//! resource is started; it answers 504 once ready so the caller's
//! upstream retries.

pub mod handlers;
pub mod starter;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use dormant_controller::LifecycleController;

pub use starter::starter_router;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<LifecycleController>,
}

/// Build the query/report router.
pub fn build_router(controller: Arc<LifecycleController>) -> Router {
    let state = ApiState { controller };

    let api_routes = Router::new()
        .route("/resources", get(handlers::list_resources))
        .route("/resources/{id}", get(handlers::get_resource))
        .route("/resources/{id}/report", post(handlers::report_activity))
        .route("/resources/{id}/activate", post(handlers::activate))
        .route("/classifications", get(handlers::classifications))
        .route("/events", post(handlers::submit_event))
        .route("/activations", get(handlers::list_activations))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
