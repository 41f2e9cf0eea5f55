use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use crate::polls;
use crate::realtime::{sse, ws};
use crate::startup::AppState;

/// Every route, with the state layered on. Session, CORS and tracing layers
/// are added by the binary.
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route("/polls", get(polls::list_polls).post(polls::create_poll))
        .route("/polls/my-polls", get(polls::my_polls))
        .route("/polls/stream", get(sse::all_polls_sse))
        .route(
            "/polls/:poll_id",
            get(polls::get_poll).delete(polls::delete_poll),
        )
        .route("/polls/:poll_id/stream", get(sse::poll_updates_sse))
        .route("/polls/:poll_id/vote", post(polls::cast_vote))
        .route(
            "/polls/:poll_id/comments",
            get(polls::list_comments).post(polls::add_comment),
        )
        .route(
            "/polls/:poll_id/comments/:comment_id/heart",
            post(polls::toggle_heart),
        )
        .layer(Extension(app_state))
}

async fn health(Extension(app_state): Extension<AppState>) -> impl IntoResponse {
    match app_state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            warn!("health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
