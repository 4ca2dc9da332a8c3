//! REST API handlers
//!
//! | Route                                      | Purpose                        |
//! |--------------------------------------------|--------------------------------|
//! | `GET /health`                              | Liveness and uptime            |
//! | `GET /metrics`                             | Prometheus text format         |
//! | `GET /channels[?tenant=]`                  | Channel definitions            |
//! | `GET /channels/{channel_id}/schedule`      | Upcoming or historical events  |
//! | `GET /scheduler/channels`                  | Scheduler state snapshot       |
//! | `POST /scheduler/channels/{channel_id}/reset` | Operator recovery           |

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::server::AppState;
use crate::error::{Error, OnairErrorTrait};
use crate::models::{Channel, ChannelId, ScheduleEvent, TenantId, TimeRange};
use crate::query::{channel_schedule, ScheduleWindow};
use crate::scheduler::{ChannelState, ChannelStatus};

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// Map a backend failure to a response
///
/// Recoverable failures are 503 so clients retry; the rest are 500.
fn failure_response(err: impl Into<Error>, message: &str) -> Response {
    let err = err.into();
    let status = if err.is_recoverable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    tracing::error!(error = %err, category = %err.category(), "{message}");
    error_response(status, message)
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Schedule response
#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub channel_id: ChannelId,
    pub range: TimeRange,
    pub events: Vec<ScheduleEvent>,
}

/// Channel list query
#[derive(Debug, Deserialize)]
pub struct ChannelsQuery {
    pub tenant: Option<String>,
}

/// Schedule query: nothing, `date`, or `start` + `end`
#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub date: Option<NaiveDate>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Reset response
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub channel_id: ChannelId,
    pub previous: ChannelState,
    pub reset: bool,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/channels", get(list_channels))
        .route("/channels/{channel_id}/schedule", get(get_schedule))
        .route("/scheduler/channels", get(scheduler_channels))
        .route("/scheduler/channels/{channel_id}/reset", post(reset_channel))
        .with_state(state)
}

// ============================================================================
// Health Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

async fn metrics_endpoint() -> Response {
    match crate::metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Channel Handlers
// ============================================================================

async fn list_channels(
    State(state): State<AppState>,
    Query(query): Query<ChannelsQuery>,
) -> Response {
    let result = match query.tenant {
        Some(tenant) => state.channels.list_by_tenant(&TenantId::new(tenant)).await,
        None => state.channels.list_all().await,
    };

    match result {
        Ok(channels) => (StatusCode::OK, Json(ApiResponse::<Vec<Channel>>::success(channels)))
            .into_response(),
        Err(e) => failure_response(e, "channel store unavailable"),
    }
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Query(query): Query<ScheduleQuery>,
) -> Response {
    let window = match ScheduleWindow::from_params(query.date, query.start, query.end) {
        Ok(window) => window,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    let channel_id = ChannelId::new(channel_id);
    let schedule = channel_schedule(
        state.channels.as_ref(),
        state.events.as_ref(),
        &channel_id,
        window,
        Utc::now(),
        state.default_horizon,
    )
    .await;

    match schedule {
        Ok(Some(schedule)) => (
            StatusCode::OK,
            Json(ApiResponse::success(ScheduleResponse {
                channel_id,
                range: schedule.range,
                events: schedule.events,
            })),
        )
            .into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("Channel not found: {channel_id}"),
        ),
        Err(e) => failure_response(e, "schedule store unavailable"),
    }
}

// ============================================================================
// Scheduler Handlers
// ============================================================================

async fn scheduler_channels(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::<Vec<ChannelStatus>>::success(
        state.orchestrator.statuses().await,
    ))
}

async fn reset_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Response {
    let channel_id = ChannelId::new(channel_id);
    match state.orchestrator.reset_channel(&channel_id).await {
        Some(previous) => {
            let reset = matches!(previous, ChannelState::Failed | ChannelState::Starved);
            (
                StatusCode::OK,
                Json(ApiResponse::success(ResetResponse {
                    channel_id,
                    previous,
                    reset,
                })),
            )
                .into_response()
        }
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Channel not tracked by scheduler: {channel_id}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreError;

    #[test]
    fn test_failure_status_follows_recoverability() {
        let response = failure_response(StoreError::unavailable("reset"), "store unavailable");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = failure_response(
            StoreError::Corrupt("bad status".to_string()),
            "store unavailable",
        );
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert!(response.data.is_some());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_error_response() {
        let response = ErrorResponse::new("test error");
        assert!(!response.success);
        assert_eq!(response.error, "test error");
    }
}
