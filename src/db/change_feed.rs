//! Normalized change notifications emitted by the store.
//!
//! The Postgres store publishes these through `pg_notify` on
//! [`CHANGE_CHANNEL`]; the in-memory store sends them on a broadcast channel.

use serde::Deserialize;
use uuid::Uuid;

use crate::db::store::StoreError;

pub const CHANGE_CHANNEL: &str = "poll_changes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeTarget {
    Poll { poll_id: Uuid },
    Comment { poll_id: Uuid, comment_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub target: ChangeTarget,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotifyPayload {
    table: String,
    op: ChangeKind,
    poll_id: Uuid,
    comment_id: Option<Uuid>,
}

impl ChangeRecord {
    pub fn poll(kind: ChangeKind, poll_id: Uuid) -> Self {
        Self {
            kind,
            target: ChangeTarget::Poll { poll_id },
        }
    }

    pub fn comment(kind: ChangeKind, poll_id: Uuid, comment_id: Uuid) -> Self {
        Self {
            kind,
            target: ChangeTarget::Comment {
                poll_id,
                comment_id,
            },
        }
    }

    pub fn poll_id(&self) -> Uuid {
        match self.target {
            ChangeTarget::Poll { poll_id } | ChangeTarget::Comment { poll_id, .. } => poll_id,
        }
    }

    /// Parses the JSON payload built by the `notify_poll_change` trigger.
    pub fn from_notification(payload: &str) -> Result<Self, StoreError> {
        let payload: NotifyPayload =
            serde_json::from_str(payload).map_err(|e| StoreError::Decode(e.to_string()))?;

        match (payload.table.as_str(), payload.comment_id) {
            ("polls", _) => Ok(Self::poll(payload.op, payload.poll_id)),
            ("comments", Some(comment_id)) => {
                Ok(Self::comment(payload.op, payload.poll_id, comment_id))
            }
            ("comments", None) => Err(StoreError::Decode(
                "comment notification without commentId".to_string(),
            )),
            (other, _) => Err(StoreError::Decode(format!("unexpected table {other}"))),
        }
    }
}
