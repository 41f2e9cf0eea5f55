use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::db::StoreError;

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Only the poll creator may do that")]
    Forbidden,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid {0} id")]
    InvalidIdentifier(&'static str),
    #[error("Poll not found")]
    PollNotFound,
    #[error("Poll option not found")]
    OptionNotFound,
    #[error("Comment not found")]
    CommentNotFound,
    #[error("Poll has expired")]
    PollExpired,
    #[error("You have already voted on this poll")]
    AlreadyVoted,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PollError {
    pub fn status(&self) -> StatusCode {
        match self {
            PollError::Unauthorized => StatusCode::UNAUTHORIZED,
            PollError::Forbidden => StatusCode::FORBIDDEN,
            PollError::InvalidRequest(_)
            | PollError::InvalidIdentifier(_)
            | PollError::PollExpired
            | PollError::AlreadyVoted => StatusCode::BAD_REQUEST,
            PollError::PollNotFound | PollError::OptionNotFound | PollError::CommentNotFound => {
                StatusCode::NOT_FOUND
            }
            PollError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            PollError::Unauthorized => "Unauthorized",
            PollError::Forbidden => "Forbidden",
            PollError::InvalidRequest(_) => "Invalid request",
            PollError::InvalidIdentifier(_) => "Invalid identifier",
            PollError::PollNotFound => "Poll not found",
            PollError::OptionNotFound => "Option not found",
            PollError::CommentNotFound => "Comment not found",
            PollError::PollExpired => "Poll has expired",
            PollError::AlreadyVoted => "Already voted",
            PollError::Store(_) => "Internal server error",
        };

        // store failures are logged here and never echoed to the client
        let details = match &self {
            PollError::Store(e) => {
                error!("store operation failed: {}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "details": details
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for PollError {
    fn from(error: sqlx::Error) -> Self {
        PollError::Store(StoreError::Database(error))
    }
}
