// HTTP handlers for the automation API

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use tracing::{debug, info};

use super::types::{ApiError, CalculateResponse, ResultsResponse, TriggerResponse};
use crate::engine::evaluator::GroupEvaluator;
use crate::engine::orchestrator::WorkflowOrchestrator;
use crate::engine::storage::{GroupStore, MembershipReader};
use crate::models::CalculationStatus;

/// Shared application state injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub evaluator: Arc<GroupEvaluator>,
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub groups: Arc<GroupStore>,
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cohort-automation",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
    }))
}

/// `POST /api/v1/groups/{id}/calculate` - run the evaluator synchronously
///
/// Rerunning simply replaces the group's membership; the endpoint is
/// idempotent in that sense.
pub async fn calculate_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<CalculateResponse>, ApiError> {
    info!("calculating group {}", group_id);

    let outcome = state.evaluator.calculate(&group_id).await?;

    Ok(Json(CalculateResponse {
        group_id: outcome.group_id,
        member_count: outcome.member_count,
        calculated_at: outcome.calculated_at,
    }))
}

/// `GET /api/v1/groups/{id}/results` - last COMPLETED membership
///
/// 404 when the group was never calculated; 500 when the last calculation
/// did not complete.
pub async fn group_results(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<ResultsResponse>, ApiError> {
    debug!("reading results for group {}", group_id);

    let log = state
        .groups
        .calculation_log(&group_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no calculation found for group '{}'", group_id)))?;

    if log.status != CalculationStatus::Completed {
        return Err(ApiError::internal(format!(
            "group calculation not successful (status: {})",
            log.status
        )));
    }

    let member_ids = state.groups.members(&group_id).await?;

    Ok(Json(ResultsResponse {
        group_id,
        member_ids,
        calculated_at: log.calculated_at,
        member_count: log.member_count,
    }))
}

/// `POST /api/v1/orchestration/trigger/workflow/{id}` - manual trigger
pub async fn trigger_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<TriggerResponse>, ApiError> {
    info!("manual trigger for workflow {}", workflow_id);

    let published = state.orchestrator.trigger_workflow(&workflow_id).await?;

    Ok(Json(TriggerResponse {
        message: format!(
            "workflow '{}' triggered, {} task(s) published",
            workflow_id, published
        ),
    }))
}
