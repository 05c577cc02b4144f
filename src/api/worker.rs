//! Worker nudge route
//!
//! External schedulers can POST here to trigger a processing pass
//! without waiting for the supervisor's next poll tick.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::Utc;

use crate::events::Event;

use super::{ApiResponse, AppState};

/// Create worker routes
pub fn worker_routes() -> Router<AppState> {
    Router::new().route("/", post(nudge_worker))
}

async fn nudge_worker(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<serde_json::Value>>) {
    state.event_bus.publish(Event::WorkerNudged {
        timestamp: Utc::now(),
    });
    tracing::debug!("worker nudged");

    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::new(serde_json::json!({ "status": "scheduled" }))),
    )
}
