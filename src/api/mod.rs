// HTTP API surface for the automation core

//! # Automation API
//!
//! Thin JSON endpoints over the engine, versioned under `/api/v1`:
//!
//! | Method + path | Effect |
//! |---|---|
//! | `POST /api/v1/groups/{id}/calculate` | Run the evaluator synchronously |
//! | `GET /api/v1/groups/{id}/results` | Last COMPLETED membership |
//! | `POST /api/v1/orchestration/trigger/workflow/{id}` | Manual workflow trigger |
//!
//! Plus `GET /health` for liveness. Errors use the `{"error": "..."}`
//! envelope; see [`types::ApiError`] for the status mapping.

pub mod handlers;
pub mod types;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

pub use handlers::AppState;
pub use types::{CalculateResponse, ErrorBody, ResultsResponse, TriggerResponse};

/// Assemble the service router
pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/groups/:id/calculate", post(handlers::calculate_group))
        .route("/groups/:id/results", get(handlers::group_results))
        .route(
            "/orchestration/trigger/workflow/:id",
            post(handlers::trigger_workflow),
        );

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", v1)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
