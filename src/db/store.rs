use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use uuid::Uuid;

use crate::db::change_feed::ChangeRecord;
use crate::db::models::{Comment, NewPoll, Poll, User};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Change feed error: {0}")]
    ChangeFeed(String),
    #[error("Malformed change notification: {0}")]
    Decode(String),
}

pub type ChangeStream = BoxStream<'static, Result<ChangeRecord, StoreError>>;

pub type SharedStore = Arc<dyn PollStore>;

/// Result of the conditional vote update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The option counter was incremented and the voter recorded. Carries
    /// the poll as committed by that same update.
    Applied(Box<Poll>),
    /// The precondition no longer held; nothing was written.
    Rejected,
}

/// Durable storage for polls, options, comments and membership sets.
///
/// `record_vote` and `set_heart` are single atomic operations at the store
/// level; callers must not emulate them with a read followed by a write.
#[async_trait]
pub trait PollStore: Send + Sync + 'static {
    async fn ping(&self) -> Result<(), StoreError>;

    /// Records or refreshes a user profile handed over by the auth layer.
    async fn upsert_user(&self, user: User) -> Result<(), StoreError>;

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, StoreError>;

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, StoreError>;

    async fn poll_exists(&self, poll_id: Uuid) -> Result<bool, StoreError>;

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError>;

    /// Polls created by `creator_id`, newest first.
    async fn list_polls_by_creator(&self, creator_id: Uuid) -> Result<Vec<Poll>, StoreError>;

    async fn delete_poll(&self, poll_id: Uuid) -> Result<bool, StoreError>;

    /// Increments `option_id` and adds `user_id` to the voter set, but only
    /// while the voter set does not contain `user_id`, the option belongs to
    /// the poll and the poll has not expired.
    async fn record_vote(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        user_id: Uuid,
    ) -> Result<VoteOutcome, StoreError>;

    /// Returns `None` when the poll does not exist.
    async fn insert_comment(
        &self,
        poll_id: Uuid,
        author_id: Uuid,
        text: &str,
    ) -> Result<Option<Comment>, StoreError>;

    async fn get_comment(
        &self,
        poll_id: Uuid,
        comment_id: Uuid,
    ) -> Result<Option<Comment>, StoreError>;

    async fn list_comments(&self, poll_id: Uuid) -> Result<Vec<Comment>, StoreError>;

    async fn count_comments(&self, poll_id: Uuid) -> Result<i64, StoreError>;

    /// Adds (`hearted == true`) or removes `user_id` from the hearter set.
    /// Idempotent for a given target state; `hearts` is always re-derived
    /// from the set size.
    async fn set_heart(
        &self,
        poll_id: Uuid,
        comment_id: Uuid,
        user_id: Uuid,
        hearted: bool,
    ) -> Result<Option<Comment>, StoreError>;

    /// Opens a fresh subscription to the store's change feed.
    async fn watch(&self) -> Result<ChangeStream, StoreError>;
}
