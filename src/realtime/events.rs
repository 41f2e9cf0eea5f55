use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{Comment, Poll};

/// Normalized change event. Every payload carries the full current state
/// of what changed, so a receiver can overwrite its copy by id.
///
/// Serializes as `{"event": "pollUpdated", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum PollEvent {
    PollCreated(PollCreated),
    PollUpdated(PollUpdated),
    PollDeleted(PollDeleted),
    CommentAdded(CommentAdded),
    CommentHearted(CommentHearted),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCreated {
    pub poll: Poll,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollUpdated {
    pub poll_id: Uuid,
    pub poll: Poll,
    pub total_votes: i64,
    pub poll_title: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollDeleted {
    pub poll_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentAdded {
    pub poll_id: Uuid,
    pub comment: Comment,
    pub total_comments: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentHearted {
    pub poll_id: Uuid,
    pub comment_id: Uuid,
    pub hearts: i64,
    pub comment: Comment,
    pub updated_at: DateTime<Utc>,
}

impl PollEvent {
    pub fn poll_created(poll: Poll) -> Self {
        PollEvent::PollCreated(PollCreated {
            poll,
            created_at: Utc::now(),
        })
    }

    pub fn poll_updated(poll: Poll) -> Self {
        PollEvent::PollUpdated(PollUpdated {
            poll_id: poll.id,
            total_votes: poll.total_votes(),
            poll_title: poll.title_preview(),
            poll,
            updated_at: Utc::now(),
        })
    }

    pub fn poll_deleted(poll_id: Uuid) -> Self {
        PollEvent::PollDeleted(PollDeleted {
            poll_id,
            updated_at: Utc::now(),
        })
    }

    pub fn comment_added(comment: Comment, total_comments: i64) -> Self {
        PollEvent::CommentAdded(CommentAdded {
            poll_id: comment.poll_id,
            comment,
            total_comments,
            created_at: Utc::now(),
        })
    }

    pub fn comment_hearted(comment: Comment) -> Self {
        PollEvent::CommentHearted(CommentHearted {
            poll_id: comment.poll_id,
            comment_id: comment.id,
            hearts: comment.hearts,
            comment,
            updated_at: Utc::now(),
        })
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            PollEvent::PollCreated(_) => "pollCreated",
            PollEvent::PollUpdated(_) => "pollUpdated",
            PollEvent::PollDeleted(_) => "pollDeleted",
            PollEvent::CommentAdded(_) => "commentAdded",
            PollEvent::CommentHearted(_) => "commentHearted",
        }
    }

    pub fn poll_id(&self) -> Uuid {
        match self {
            PollEvent::PollCreated(e) => e.poll.id,
            PollEvent::PollUpdated(e) => e.poll_id,
            PollEvent::PollDeleted(e) => e.poll_id,
            PollEvent::CommentAdded(e) => e.poll_id,
            PollEvent::CommentHearted(e) => e.poll_id,
        }
    }

    /// The `data` half of the wire message.
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            PollEvent::PollCreated(e) => serde_json::to_value(e),
            PollEvent::PollUpdated(e) => serde_json::to_value(e),
            PollEvent::PollDeleted(e) => serde_json::to_value(e),
            PollEvent::CommentAdded(e) => serde_json::to_value(e),
            PollEvent::CommentHearted(e) => serde_json::to_value(e),
        }
    }
}
