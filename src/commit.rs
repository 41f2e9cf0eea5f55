//! Write path for polls, votes, comments and hearts.
//!
//! Every mutation is a single conditional store operation. On success the
//! engine publishes the matching event itself; the change-feed watcher will
//! publish an equivalent one independently.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::{
    Category, Comment, MAX_COMMENT_CHARS, MAX_OPTIONS, MIN_OPTIONS, NewPoll, Poll, SharedStore,
    VoteOutcome,
};
use crate::error::PollError;
use crate::realtime::{Broadcaster, PollEvent};

/// Poll creation request as submitted by a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollDraft {
    pub question: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PollDraft {
    fn validate(self, creator_id: Uuid) -> Result<NewPoll, PollError> {
        let question = self.question.trim().to_string();
        if question.is_empty() {
            return Err(PollError::InvalidRequest("question is required".to_string()));
        }

        let options: Vec<String> = self.options.iter().map(|o| o.trim().to_string()).collect();
        if options.len() < MIN_OPTIONS || options.len() > MAX_OPTIONS {
            return Err(PollError::InvalidRequest(format!(
                "a poll needs between {MIN_OPTIONS} and {MAX_OPTIONS} options"
            )));
        }
        if options.iter().any(|o| o.is_empty()) {
            return Err(PollError::InvalidRequest(
                "options cannot be blank".to_string(),
            ));
        }

        let category = match self.category.as_deref().map(str::trim) {
            None | Some("") => Category::default(),
            Some(raw) => Category::parse(raw)
                .ok_or_else(|| PollError::InvalidRequest(format!("unknown category {raw}")))?,
        };

        Ok(NewPoll {
            question,
            options,
            category,
            creator_id,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct VoteReceipt {
    pub poll: Poll,
    pub total_votes: i64,
}

#[derive(Debug, Clone)]
pub struct CommentReceipt {
    pub comment: Comment,
    pub total_comments: i64,
}

#[derive(Debug, Clone)]
pub struct HeartReceipt {
    pub comment: Comment,
    pub has_hearted: bool,
}

#[derive(Clone)]
pub struct CommitEngine {
    store: SharedStore,
    broadcaster: Broadcaster,
}

impl CommitEngine {
    pub fn new(store: SharedStore, broadcaster: Broadcaster) -> Self {
        Self { store, broadcaster }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub async fn create_poll(&self, creator_id: Uuid, draft: PollDraft) -> Result<Poll, PollError> {
        let new_poll = draft.validate(creator_id)?;
        let poll = self.store.insert_poll(new_poll).await?;

        info!(source = "api", poll_id = %poll.id, "poll created");
        self.broadcaster.publish(PollEvent::poll_created(poll.clone()));
        Ok(poll)
    }

    pub async fn delete_poll(&self, poll_id: Uuid, user_id: Uuid) -> Result<(), PollError> {
        let poll = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or(PollError::PollNotFound)?;
        if poll.creator_id != user_id {
            return Err(PollError::Forbidden);
        }

        if !self.store.delete_poll(poll_id).await? {
            return Err(PollError::PollNotFound);
        }

        info!(source = "api", poll_id = %poll_id, "poll deleted");
        self.broadcaster.publish(PollEvent::poll_deleted(poll_id));
        Ok(())
    }

    /// Records one vote per user per poll.
    ///
    /// The read before the write only produces friendlier errors. The
    /// conditional update decides: if it matches nothing the vote is
    /// rejected even when the read said it was allowed.
    pub async fn cast_vote(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        user_id: Uuid,
    ) -> Result<VoteReceipt, PollError> {
        let poll = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or(PollError::PollNotFound)?;
        if poll.option(option_id).is_none() {
            return Err(PollError::OptionNotFound);
        }
        if poll.has_voted(user_id) {
            return Err(PollError::AlreadyVoted);
        }
        if poll.is_expired(Utc::now()) {
            return Err(PollError::PollExpired);
        }

        let poll = match self.store.record_vote(poll_id, option_id, user_id).await? {
            VoteOutcome::Applied(poll) => *poll,
            VoteOutcome::Rejected => {
                warn!(poll_id = %poll_id, user_id = %user_id, "conditional vote matched nothing");
                return Err(self.rejected_vote(poll_id, option_id, user_id).await?);
            }
        };
        let total_votes = poll.total_votes();

        info!(source = "api", poll_id = %poll_id, option_id = %option_id, total_votes, "vote recorded");
        self.broadcaster.publish(PollEvent::poll_updated(poll.clone()));

        Ok(VoteReceipt { poll, total_votes })
    }

    /// Names the precondition that failed, from the state after the update.
    async fn rejected_vote(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        user_id: Uuid,
    ) -> Result<PollError, PollError> {
        let Some(poll) = self.store.get_poll(poll_id).await? else {
            return Ok(PollError::PollNotFound);
        };

        Ok(if poll.has_voted(user_id) {
            PollError::AlreadyVoted
        } else if poll.is_expired(Utc::now()) {
            PollError::PollExpired
        } else if poll.option(option_id).is_none() {
            PollError::OptionNotFound
        } else {
            PollError::AlreadyVoted
        })
    }

    pub async fn add_comment(
        &self,
        poll_id: Uuid,
        author_id: Uuid,
        text: &str,
    ) -> Result<CommentReceipt, PollError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PollError::InvalidRequest("comment text is required".to_string()));
        }
        if text.chars().count() > MAX_COMMENT_CHARS {
            return Err(PollError::InvalidRequest(format!(
                "comments are limited to {MAX_COMMENT_CHARS} characters"
            )));
        }

        let comment = self
            .store
            .insert_comment(poll_id, author_id, text)
            .await?
            .ok_or(PollError::PollNotFound)?;
        let total_comments = self.store.count_comments(poll_id).await?;

        info!(source = "api", poll_id = %poll_id, comment_id = %comment.id, total_comments, "comment added");
        self.broadcaster
            .publish(PollEvent::comment_added(comment.clone(), total_comments));

        Ok(CommentReceipt {
            comment,
            total_comments,
        })
    }

    /// Flips the user's heart on a comment. Two racing toggles from the same
    /// user both write an absolute target state, so the last write wins and
    /// `hearts` always equals the size of `hearted_by`.
    pub async fn toggle_heart(
        &self,
        poll_id: Uuid,
        comment_id: Uuid,
        user_id: Uuid,
    ) -> Result<HeartReceipt, PollError> {
        let Some(current) = self.store.get_comment(poll_id, comment_id).await? else {
            return Err(self.missing_comment(poll_id).await?);
        };
        let already_hearted = current.is_hearted_by(user_id);

        let Some(comment) = self
            .store
            .set_heart(poll_id, comment_id, user_id, !already_hearted)
            .await?
        else {
            return Err(self.missing_comment(poll_id).await?);
        };
        let has_hearted = comment.is_hearted_by(user_id);

        info!(
            source = "api",
            poll_id = %poll_id,
            comment_id = %comment_id,
            hearts = comment.hearts,
            "comment heart toggled"
        );
        self.broadcaster
            .publish(PollEvent::comment_hearted(comment.clone()));

        Ok(HeartReceipt {
            comment,
            has_hearted,
        })
    }

    async fn missing_comment(&self, poll_id: Uuid) -> Result<PollError, PollError> {
        Ok(if self.store.poll_exists(poll_id).await? {
            PollError::CommentNotFound
        } else {
            PollError::PollNotFound
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ChangeStream, MemoryPollStore, PollStore, StoreError, User};
    use crate::realtime::SubscriptionManager;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Arc;
    use tokio::sync::broadcast;

    /// Deletes the poll as soon as a vote on it has been committed.
    struct DeletesAfterVote(MemoryPollStore);

    #[async_trait]
    impl PollStore for DeletesAfterVote {
        async fn ping(&self) -> Result<(), StoreError> {
            self.0.ping().await
        }
        async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
            self.0.upsert_user(user).await
        }
        async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
            self.0.get_user(user_id).await
        }
        async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, StoreError> {
            self.0.insert_poll(poll).await
        }
        async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, StoreError> {
            self.0.get_poll(poll_id).await
        }
        async fn poll_exists(&self, poll_id: Uuid) -> Result<bool, StoreError> {
            self.0.poll_exists(poll_id).await
        }
        async fn list_polls(&self) -> Result<Vec<Poll>, StoreError> {
            self.0.list_polls().await
        }
        async fn list_polls_by_creator(&self, creator_id: Uuid) -> Result<Vec<Poll>, StoreError> {
            self.0.list_polls_by_creator(creator_id).await
        }
        async fn delete_poll(&self, poll_id: Uuid) -> Result<bool, StoreError> {
            self.0.delete_poll(poll_id).await
        }
        async fn record_vote(
            &self,
            poll_id: Uuid,
            option_id: Uuid,
            user_id: Uuid,
        ) -> Result<VoteOutcome, StoreError> {
            let outcome = self.0.record_vote(poll_id, option_id, user_id).await?;
            self.0.delete_poll(poll_id).await?;
            Ok(outcome)
        }
        async fn insert_comment(
            &self,
            poll_id: Uuid,
            author_id: Uuid,
            text: &str,
        ) -> Result<Option<Comment>, StoreError> {
            self.0.insert_comment(poll_id, author_id, text).await
        }
        async fn get_comment(
            &self,
            poll_id: Uuid,
            comment_id: Uuid,
        ) -> Result<Option<Comment>, StoreError> {
            self.0.get_comment(poll_id, comment_id).await
        }
        async fn list_comments(&self, poll_id: Uuid) -> Result<Vec<Comment>, StoreError> {
            self.0.list_comments(poll_id).await
        }
        async fn count_comments(&self, poll_id: Uuid) -> Result<i64, StoreError> {
            self.0.count_comments(poll_id).await
        }
        async fn set_heart(
            &self,
            poll_id: Uuid,
            comment_id: Uuid,
            user_id: Uuid,
            hearted: bool,
        ) -> Result<Option<Comment>, StoreError> {
            self.0.set_heart(poll_id, comment_id, user_id, hearted).await
        }
        async fn watch(&self) -> Result<ChangeStream, StoreError> {
            self.0.watch().await
        }
    }

    fn draft(options: &[&str]) -> PollDraft {
        PollDraft {
            question: "Favourite colour?".to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            category: None,
            expires_at: None,
        }
    }

    fn engine() -> (CommitEngine, broadcast::Receiver<PollEvent>) {
        let store: SharedStore = Arc::new(MemoryPollStore::new());
        let broadcaster = Broadcaster::new(64, SubscriptionManager::spawn(64));
        let rx = broadcaster.subscribe_global();
        (CommitEngine::new(store, broadcaster), rx)
    }

    #[tokio::test]
    async fn second_vote_from_same_user_is_rejected() {
        let (engine, mut events) = engine();
        let creator = Uuid::new_v4();
        let poll = engine.create_poll(creator, draft(&["Red", "Blue"])).await.unwrap();
        assert_eq!(events.recv().await.unwrap().name(), "pollCreated");

        let (red, blue) = (poll.options[0].id, poll.options[1].id);
        let voter = Uuid::new_v4();

        let receipt = engine.cast_vote(poll.id, red, voter).await.unwrap();
        assert_eq!(receipt.total_votes, 1);
        assert_eq!(receipt.poll.option(red).unwrap().votes, 1);
        assert_eq!(receipt.poll.option(blue).unwrap().votes, 0);

        let event = events.recv().await.unwrap();
        assert!(matches!(event, PollEvent::PollUpdated(ref e) if e.total_votes == 1));

        let again = engine.cast_vote(poll.id, red, voter).await;
        assert!(matches!(again, Err(PollError::AlreadyVoted)));
        let after = engine.store().get_poll(poll.id).await.unwrap().unwrap();
        assert_eq!(after.total_votes(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn distinct_users_voting_concurrently_both_count() {
        let (engine, _events) = engine();
        let poll = engine
            .create_poll(Uuid::new_v4(), draft(&["Red", "Blue"]))
            .await
            .unwrap();
        let (poll_id, red) = (poll.id, poll.options[0].id);

        let (a, b) = tokio::join!(
            engine.cast_vote(poll_id, red, Uuid::new_v4()),
            engine.cast_vote(poll_id, red, Uuid::new_v4()),
        );
        assert!(a.is_ok() && b.is_ok());

        let after = engine.store().get_poll(poll_id).await.unwrap().unwrap();
        assert_eq!(after.option(red).unwrap().votes, 2);
        assert_eq!(after.voted_users.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_votes_from_one_user_apply_once() {
        let (engine, _events) = engine();
        let poll = engine
            .create_poll(Uuid::new_v4(), draft(&["Red", "Blue"]))
            .await
            .unwrap();
        let (poll_id, red) = (poll.id, poll.options[0].id);
        let voter = Uuid::new_v4();

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.cast_vote(poll_id, red, voter).await })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => applied += 1,
                Err(PollError::AlreadyVoted) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(applied, 1);
        let after = engine.store().get_poll(poll_id).await.unwrap().unwrap();
        assert_eq!(after.total_votes(), 1);
    }

    #[tokio::test]
    async fn vote_errors_are_classified() {
        let (engine, _events) = engine();
        let poll = engine
            .create_poll(Uuid::new_v4(), draft(&["Red", "Blue"]))
            .await
            .unwrap();

        let missing_poll = engine.cast_vote(Uuid::new_v4(), poll.options[0].id, Uuid::new_v4()).await;
        assert!(matches!(missing_poll, Err(PollError::PollNotFound)));

        let missing_option = engine.cast_vote(poll.id, Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(matches!(missing_option, Err(PollError::OptionNotFound)));
    }

    #[tokio::test]
    async fn expired_polls_refuse_votes() {
        let (engine, _events) = engine();
        let mut expired = draft(&["Red", "Blue"]);
        expired.expires_at = Some(Utc::now() - Duration::minutes(1));
        let poll = engine.create_poll(Uuid::new_v4(), expired).await.unwrap();

        let result = engine.cast_vote(poll.id, poll.options[0].id, Uuid::new_v4()).await;
        assert!(matches!(result, Err(PollError::PollExpired)));
    }

    #[tokio::test]
    async fn heart_toggles_follow_parity() {
        let (engine, _events) = engine();
        let poll = engine
            .create_poll(Uuid::new_v4(), draft(&["Red", "Blue"]))
            .await
            .unwrap();
        let comment = engine
            .add_comment(poll.id, Uuid::new_v4(), "  nice  ")
            .await
            .unwrap()
            .comment;
        assert_eq!(comment.text, "nice");

        let user = Uuid::new_v4();
        for round in 1..=5 {
            let receipt = engine.toggle_heart(poll.id, comment.id, user).await.unwrap();
            let odd = round % 2 == 1;
            assert_eq!(receipt.has_hearted, odd);
            assert_eq!(receipt.comment.hearts, if odd { 1 } else { 0 });
            assert_eq!(receipt.comment.hearts, receipt.comment.hearted_by.len() as i64);
        }
    }

    #[tokio::test]
    async fn hearts_from_two_users() {
        let (engine, mut events) = engine();
        let poll = engine
            .create_poll(Uuid::new_v4(), draft(&["Red", "Blue"]))
            .await
            .unwrap();
        let added = engine.add_comment(poll.id, Uuid::new_v4(), "hi").await.unwrap();
        assert_eq!(added.total_comments, 1);
        let comment_id = added.comment.id;
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(engine.toggle_heart(poll.id, comment_id, u1).await.unwrap().comment.hearts, 1);
        assert_eq!(engine.toggle_heart(poll.id, comment_id, u2).await.unwrap().comment.hearts, 2);
        let last = engine.toggle_heart(poll.id, comment_id, u1).await.unwrap();
        assert_eq!(last.comment.hearts, 1);
        assert_eq!(last.comment.hearted_by, vec![u2]);
        assert!(!last.has_hearted);

        let names: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(
            names,
            ["pollCreated", "commentAdded", "commentHearted", "commentHearted", "commentHearted"]
        );
    }

    #[tokio::test]
    async fn heart_on_missing_targets() {
        let (engine, _events) = engine();
        let poll = engine
            .create_poll(Uuid::new_v4(), draft(&["Red", "Blue"]))
            .await
            .unwrap();

        let no_comment = engine.toggle_heart(poll.id, Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(matches!(no_comment, Err(PollError::CommentNotFound)));

        let no_poll = engine
            .toggle_heart(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
            .await;
        assert!(matches!(no_poll, Err(PollError::PollNotFound)));
    }

    #[tokio::test]
    async fn drafts_are_validated() {
        let (engine, _events) = engine();
        let creator = Uuid::new_v4();

        for bad in [draft(&["Only"]), draft(&["a", "b", "c", "d", "e"]), draft(&["a", "  "])] {
            let result = engine.create_poll(creator, bad).await;
            assert!(matches!(result, Err(PollError::InvalidRequest(_))));
        }

        let mut blank = draft(&["a", "b"]);
        blank.question = "   ".to_string();
        assert!(engine.create_poll(creator, blank).await.is_err());

        let mut sports = draft(&[" a ", "b"]);
        sports.category = Some("sports".to_string());
        let poll = engine.create_poll(creator, sports).await.unwrap();
        assert_eq!(poll.category, Category::Sports);
        assert_eq!(poll.options[0].text, "a");
    }

    #[tokio::test]
    async fn comments_are_validated() {
        let (engine, _events) = engine();
        let poll = engine
            .create_poll(Uuid::new_v4(), draft(&["Red", "Blue"]))
            .await
            .unwrap();
        let author = Uuid::new_v4();

        assert!(engine.add_comment(poll.id, author, "   ").await.is_err());
        let long = "x".repeat(MAX_COMMENT_CHARS + 1);
        assert!(engine.add_comment(poll.id, author, &long).await.is_err());
        let missing = engine.add_comment(Uuid::new_v4(), author, "hello").await;
        assert!(matches!(missing, Err(PollError::PollNotFound)));
    }

    #[tokio::test]
    async fn only_the_creator_deletes() {
        let (engine, mut events) = engine();
        let creator = Uuid::new_v4();
        let poll = engine.create_poll(creator, draft(&["Red", "Blue"])).await.unwrap();
        events.recv().await.unwrap();

        let stranger = engine.delete_poll(poll.id, Uuid::new_v4()).await;
        assert!(matches!(stranger, Err(PollError::Forbidden)));

        engine.delete_poll(poll.id, creator).await.unwrap();
        assert_eq!(events.recv().await.unwrap().name(), "pollDeleted");
        assert!(matches!(
            engine.delete_poll(poll.id, creator).await,
            Err(PollError::PollNotFound)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_heart_toggles_keep_count_and_set_in_step() {
        let (engine, _events) = engine();
        let poll = engine
            .create_poll(Uuid::new_v4(), draft(&["Red", "Blue"]))
            .await
            .unwrap();
        let comment_id = engine
            .add_comment(poll.id, Uuid::new_v4(), "race me")
            .await
            .unwrap()
            .comment
            .id;
        let poll_id = poll.id;
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());

        let handles: Vec<_> = (0..24)
            .map(|i| {
                let engine = engine.clone();
                let user = if i % 2 == 0 { u1 } else { u2 };
                tokio::spawn(async move { engine.toggle_heart(poll_id, comment_id, user).await })
            })
            .collect();

        for handle in handles {
            let receipt = handle.await.unwrap().unwrap();
            assert_eq!(receipt.comment.hearts, receipt.comment.hearted_by.len() as i64);
        }

        let comment = engine
            .store()
            .get_comment(poll_id, comment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(comment.hearts, comment.hearted_by.len() as i64);
        for user in [u1, u2] {
            assert!(comment.hearted_by.iter().filter(|id| **id == user).count() <= 1);
        }
    }

    #[tokio::test]
    async fn rejected_votes_name_the_failed_precondition() {
        let (engine, _events) = engine();
        let mut expiring = draft(&["Red", "Blue"]);
        expiring.expires_at = Some(Utc::now() - Duration::minutes(1));
        let expired = engine.create_poll(Uuid::new_v4(), expiring).await.unwrap();
        let red = expired.options[0].id;

        // expiry that lands between the pre-read and the update
        let late = engine.rejected_vote(expired.id, red, Uuid::new_v4()).await.unwrap();
        assert!(matches!(late, PollError::PollExpired));

        let open = engine
            .create_poll(Uuid::new_v4(), draft(&["Red", "Blue"]))
            .await
            .unwrap();
        let voter = Uuid::new_v4();
        engine.cast_vote(open.id, open.options[0].id, voter).await.unwrap();
        let twice = engine.rejected_vote(open.id, open.options[0].id, voter).await.unwrap();
        assert!(matches!(twice, PollError::AlreadyVoted));

        let gone = engine.rejected_vote(Uuid::new_v4(), red, voter).await.unwrap();
        assert!(matches!(gone, PollError::PollNotFound));
    }

    #[tokio::test]
    async fn committed_vote_survives_a_later_delete() {
        let store: SharedStore = Arc::new(DeletesAfterVote(MemoryPollStore::new()));
        let broadcaster = Broadcaster::new(64, SubscriptionManager::spawn(64));
        let mut events = broadcaster.subscribe_global();
        let engine = CommitEngine::new(store, broadcaster);
        let poll = engine
            .create_poll(Uuid::new_v4(), draft(&["Red", "Blue"]))
            .await
            .unwrap();
        events.recv().await.unwrap();

        let receipt = engine
            .cast_vote(poll.id, poll.options[0].id, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(receipt.total_votes, 1);
        assert_eq!(receipt.poll.options[0].votes, 1);
        assert!(engine.store().get_poll(poll.id).await.unwrap().is_none());
        assert_eq!(events.recv().await.unwrap().name(), "pollUpdated");
    }
}
