use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::PgListener;
use uuid::Uuid;

use crate::db::change_feed::{CHANGE_CHANNEL, ChangeRecord};
use crate::db::connection::DbPool;
use crate::db::models::{Comment, NewPoll, Poll, User};
use crate::db::repositories as repo;
use crate::db::store::{ChangeStream, PollStore, StoreError, VoteOutcome};

/// [`PollStore`] backed by Postgres, with `LISTEN/NOTIFY` as the change feed.
#[derive(Clone)]
pub struct PgPollStore {
    pool: DbPool,
}

impl PgPollStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PollStore for PgPollStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let conn = self.pool.acquire().await?;
        drop(conn);
        Ok(())
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        Ok(repo::upsert_user(&self.pool, &user).await?)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(repo::get_user(&self.pool, user_id).await?)
    }

    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, StoreError> {
        let poll_id = repo::create_poll(&self.pool, &poll).await?;
        repo::get_poll(&self.pool, poll_id)
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, StoreError> {
        Ok(repo::get_poll(&self.pool, poll_id).await?)
    }

    async fn poll_exists(&self, poll_id: Uuid) -> Result<bool, StoreError> {
        Ok(repo::poll_exists(&self.pool, poll_id).await?)
    }

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError> {
        Ok(repo::get_all_polls(&self.pool).await?)
    }

    async fn list_polls_by_creator(&self, creator_id: Uuid) -> Result<Vec<Poll>, StoreError> {
        Ok(repo::get_polls_by_creator(&self.pool, creator_id).await?)
    }

    async fn delete_poll(&self, poll_id: Uuid) -> Result<bool, StoreError> {
        Ok(repo::delete_poll(&self.pool, poll_id).await?)
    }

    async fn record_vote(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        user_id: Uuid,
    ) -> Result<VoteOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        if !repo::cast_vote(&mut tx, poll_id, option_id, user_id).await? {
            return Ok(VoteOutcome::Rejected);
        }

        // the vote holds the poll row lock until commit, so the poll cannot
        // be deleted between the update and this read
        let poll = repo::fetch_poll(&mut tx, poll_id)
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;
        tx.commit().await?;

        Ok(VoteOutcome::Applied(Box::new(poll)))
    }

    async fn insert_comment(
        &self,
        poll_id: Uuid,
        author_id: Uuid,
        text: &str,
    ) -> Result<Option<Comment>, StoreError> {
        match repo::insert_comment(&self.pool, poll_id, author_id, text).await? {
            Some(comment_id) => Ok(repo::get_comment(&self.pool, poll_id, comment_id).await?),
            None => Ok(None),
        }
    }

    async fn get_comment(
        &self,
        poll_id: Uuid,
        comment_id: Uuid,
    ) -> Result<Option<Comment>, StoreError> {
        Ok(repo::get_comment(&self.pool, poll_id, comment_id).await?)
    }

    async fn list_comments(&self, poll_id: Uuid) -> Result<Vec<Comment>, StoreError> {
        Ok(repo::get_poll_comments(&self.pool, poll_id).await?)
    }

    async fn count_comments(&self, poll_id: Uuid) -> Result<i64, StoreError> {
        Ok(repo::count_comments(&self.pool, poll_id).await?)
    }

    async fn set_heart(
        &self,
        poll_id: Uuid,
        comment_id: Uuid,
        user_id: Uuid,
        hearted: bool,
    ) -> Result<Option<Comment>, StoreError> {
        Ok(repo::set_heart(&self.pool, poll_id, comment_id, user_id, hearted).await?)
    }

    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        Ok(listener
            .into_stream()
            .map(|notification| {
                let notification = notification?;
                ChangeRecord::from_notification(notification.payload())
            })
            .boxed())
    }
}
