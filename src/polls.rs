use crate::auth::AuthUser;
use crate::commit::PollDraft;
use crate::error::PollError;
use crate::startup::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub option_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AddCommentRequest {
    pub text: String,
}

fn parse_id(raw: &str, kind: &'static str) -> Result<Uuid, PollError> {
    Uuid::parse_str(raw.trim()).map_err(|_| PollError::InvalidIdentifier(kind))
}

/// All polls, newest first
pub async fn list_polls(
    Extension(app_state): Extension<AppState>,
) -> Result<impl IntoResponse, PollError> {
    let polls = app_state.store.list_polls().await?;
    Ok((StatusCode::OK, Json(json!({ "success": true, "polls": polls }))))
}

/// Polls created by the caller
pub async fn my_polls(
    Extension(app_state): Extension<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, PollError> {
    let polls = app_state.store.list_polls_by_creator(user_id).await?;
    Ok((StatusCode::OK, Json(json!({ "success": true, "polls": polls }))))
}

pub async fn get_poll(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, PollError> {
    let poll_id = parse_id(&poll_id, "poll")?;
    let poll = app_state
        .store
        .get_poll(poll_id)
        .await?
        .ok_or(PollError::PollNotFound)?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "totalVotes": poll.total_votes(),
            "poll": poll,
        })),
    ))
}

pub async fn create_poll(
    Extension(app_state): Extension<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<PollDraft>,
) -> Result<impl IntoResponse, PollError> {
    let poll = app_state.engine.create_poll(user_id, payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Poll created successfully",
            "poll": poll,
        })),
    ))
}

/// Delete a poll (creator only)
pub async fn delete_poll(
    Extension(app_state): Extension<AppState>,
    AuthUser(user_id): AuthUser,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, PollError> {
    let poll_id = parse_id(&poll_id, "poll")?;
    app_state.engine.delete_poll(poll_id, user_id).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Poll deleted successfully",
        })),
    ))
}

pub async fn cast_vote(
    Extension(app_state): Extension<AppState>,
    AuthUser(user_id): AuthUser,
    Path(poll_id): Path<String>,
    Json(payload): Json<CastVoteRequest>,
) -> Result<impl IntoResponse, PollError> {
    let poll_id = parse_id(&poll_id, "poll")?;
    let option_id = parse_id(&payload.option_id, "option")?;

    let receipt = app_state
        .engine
        .cast_vote(poll_id, option_id, user_id)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Vote recorded successfully",
            "poll": receipt.poll,
            "totalVotes": receipt.total_votes,
        })),
    ))
}

pub async fn list_comments(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, PollError> {
    let poll_id = parse_id(&poll_id, "poll")?;
    if !app_state.store.poll_exists(poll_id).await? {
        return Err(PollError::PollNotFound);
    }
    let comments = app_state.store.list_comments(poll_id).await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "comments": comments })),
    ))
}

pub async fn add_comment(
    Extension(app_state): Extension<AppState>,
    AuthUser(user_id): AuthUser,
    Path(poll_id): Path<String>,
    Json(payload): Json<AddCommentRequest>,
) -> Result<impl IntoResponse, PollError> {
    let poll_id = parse_id(&poll_id, "poll")?;
    let receipt = app_state
        .engine
        .add_comment(poll_id, user_id, &payload.text)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "comment": receipt.comment,
            "totalComments": receipt.total_comments,
        })),
    ))
}

pub async fn toggle_heart(
    Extension(app_state): Extension<AppState>,
    AuthUser(user_id): AuthUser,
    Path((poll_id, comment_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, PollError> {
    let poll_id = parse_id(&poll_id, "poll")?;
    let comment_id = parse_id(&comment_id, "comment")?;

    let receipt = app_state
        .engine
        .toggle_heart(poll_id, comment_id, user_id)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "hasHearted": receipt.has_hearted,
            "hearts": receipt.comment.hearts,
            "comment": receipt.comment,
        })),
    ))
}
