// Request/response envelopes for the automation API

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CohortError;

/// JSON error envelope: `{"error": "..."}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Response for `POST /groups/{id}/calculate`
#[derive(Debug, Serialize, Deserialize)]
pub struct CalculateResponse {
    pub group_id: String,
    pub member_count: i32,
    pub calculated_at: DateTime<Utc>,
}

/// Response for `GET /groups/{id}/results`
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub group_id: String,
    pub member_ids: Vec<Uuid>,
    pub calculated_at: DateTime<Utc>,
    pub member_count: i32,
}

/// Response for `POST /orchestration/trigger/workflow/{id}`
#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub message: String,
}

/// Error as the HTTP layer reports it
///
/// Internal errors map to 500 with the `{error}` envelope; the results
/// endpoint uses [`ApiError::not_found`] to distinguish a group that was
/// never calculated.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<CohortError> for ApiError {
    fn from(err: CohortError) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_map_to_500() {
        let api_err: ApiError = CohortError::Validation("bad tree".to_string()).into();
        assert_eq!(api_err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(api_err.message.contains("bad tree"));
    }

    #[test]
    fn not_found_keeps_404() {
        let api_err = ApiError::not_found("no calculation for group 'g'");
        assert_eq!(api_err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn error_body_serializes_to_the_error_envelope() {
        let body = serde_json::to_value(ErrorBody {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"error": "boom"}));
    }
}
