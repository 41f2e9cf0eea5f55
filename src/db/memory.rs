//! In-process [`PollStore`] used when no database is configured.
//!
//! Every mutation runs under a single table lock, so the conditional
//! operations keep the same all-or-nothing behaviour as the SQL versions.
//! Changes are published on a broadcast channel that stands in for the
//! Postgres `LISTEN/NOTIFY` feed.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::db::change_feed::{ChangeKind, ChangeRecord};
use crate::db::models::{Comment, NewPoll, Poll, PollOption, User};
use crate::db::store::{ChangeStream, PollStore, StoreError, VoteOutcome};

const FEED_CAPACITY: usize = 256;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    polls: HashMap<Uuid, Poll>,
}

impl Tables {
    fn populate_comment(&self, comment: &Comment) -> Comment {
        let mut comment = comment.clone();
        comment.commented_by = self.users.get(&comment.author_id).cloned();
        comment
    }

    fn populate(&self, poll: &Poll) -> Poll {
        let mut poll = poll.clone();
        poll.created_by = self.users.get(&poll.creator_id).cloned();
        poll.comments = poll
            .comments
            .iter()
            .map(|c| self.populate_comment(c))
            .collect();
        poll
    }
}

struct Feed {
    tx: broadcast::Sender<ChangeRecord>,
    online: bool,
}

pub struct MemoryPollStore {
    tables: Mutex<Tables>,
    feed: StdMutex<Feed>,
}

impl MemoryPollStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(FEED_CAPACITY);
        Self {
            tables: Mutex::new(Tables::default()),
            feed: StdMutex::new(Feed { tx, online: true }),
        }
    }

    /// Drops every open change-feed subscription and refuses new ones until
    /// [`MemoryPollStore::resume_feed`] is called.
    pub fn interrupt_feed(&self) {
        if let Ok(mut feed) = self.feed.lock() {
            let (tx, _rx) = broadcast::channel(FEED_CAPACITY);
            feed.tx = tx;
            feed.online = false;
        }
    }

    pub fn resume_feed(&self) {
        if let Ok(mut feed) = self.feed.lock() {
            feed.online = true;
        }
    }

    fn emit(&self, record: ChangeRecord) {
        if let Ok(feed) = self.feed.lock() {
            // no subscribers is fine
            let _ = feed.tx.send(record);
        }
    }
}

impl Default for MemoryPollStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PollStore for MemoryPollStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        self.tables.lock().await.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.users.get(&user_id).cloned())
    }

    async fn insert_poll(&self, new_poll: NewPoll) -> Result<Poll, StoreError> {
        let poll = Poll {
            id: Uuid::new_v4(),
            question: new_poll.question,
            category: new_poll.category,
            creator_id: new_poll.creator_id,
            created_by: None,
            options: new_poll
                .options
                .into_iter()
                .map(|text| PollOption {
                    id: Uuid::new_v4(),
                    text,
                    votes: 0,
                })
                .collect(),
            voted_users: Vec::new(),
            comments: Vec::new(),
            expires_at: new_poll.expires_at,
            created_at: Utc::now(),
            revision: 0,
        };

        let populated = {
            let mut tables = self.tables.lock().await;
            tables.polls.insert(poll.id, poll.clone());
            tables.populate(&poll)
        };
        self.emit(ChangeRecord::poll(ChangeKind::Insert, poll.id));

        Ok(populated)
    }

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.polls.get(&poll_id).map(|p| tables.populate(p)))
    }

    async fn poll_exists(&self, poll_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.polls.contains_key(&poll_id))
    }

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError> {
        let tables = self.tables.lock().await;
        let mut polls: Vec<Poll> = tables.polls.values().map(|p| tables.populate(p)).collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(polls)
    }

    async fn list_polls_by_creator(&self, creator_id: Uuid) -> Result<Vec<Poll>, StoreError> {
        let tables = self.tables.lock().await;
        let mut polls: Vec<Poll> = tables
            .polls
            .values()
            .filter(|p| p.creator_id == creator_id)
            .map(|p| tables.populate(p))
            .collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(polls)
    }

    async fn delete_poll(&self, poll_id: Uuid) -> Result<bool, StoreError> {
        let removed = self.tables.lock().await.polls.remove(&poll_id).is_some();
        if removed {
            self.emit(ChangeRecord::poll(ChangeKind::Delete, poll_id));
        }
        Ok(removed)
    }

    async fn record_vote(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        user_id: Uuid,
    ) -> Result<VoteOutcome, StoreError> {
        let outcome = {
            let mut tables = self.tables.lock().await;
            let applied = match tables.polls.get_mut(&poll_id) {
                Some(poll) if !poll.has_voted(user_id) && !poll.is_expired(Utc::now()) => {
                    match poll.options.iter_mut().find(|o| o.id == option_id) {
                        Some(option) => {
                            option.votes += 1;
                            poll.voted_users.push(user_id);
                            poll.revision += 1;
                            true
                        }
                        None => false,
                    }
                }
                _ => false,
            };

            match tables.polls.get(&poll_id) {
                Some(poll) if applied => VoteOutcome::Applied(Box::new(tables.populate(poll))),
                _ => VoteOutcome::Rejected,
            }
        };

        if matches!(outcome, VoteOutcome::Applied(_)) {
            self.emit(ChangeRecord::poll(ChangeKind::Update, poll_id));
        }
        Ok(outcome)
    }

    async fn insert_comment(
        &self,
        poll_id: Uuid,
        author_id: Uuid,
        text: &str,
    ) -> Result<Option<Comment>, StoreError> {
        let comment = {
            let mut tables = self.tables.lock().await;
            let Some(poll) = tables.polls.get_mut(&poll_id) else {
                return Ok(None);
            };
            let comment = Comment {
                id: Uuid::new_v4(),
                poll_id,
                text: text.to_string(),
                author_id,
                commented_by: None,
                hearts: 0,
                hearted_by: Vec::new(),
                created_at: Utc::now(),
                revision: 0,
            };
            poll.comments.push(comment.clone());
            tables.populate_comment(&comment)
        };

        self.emit(ChangeRecord::comment(ChangeKind::Insert, poll_id, comment.id));
        Ok(Some(comment))
    }

    async fn get_comment(
        &self,
        poll_id: Uuid,
        comment_id: Uuid,
    ) -> Result<Option<Comment>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .polls
            .get(&poll_id)
            .and_then(|p| p.comments.iter().find(|c| c.id == comment_id))
            .map(|c| tables.populate_comment(c)))
    }

    async fn list_comments(&self, poll_id: Uuid) -> Result<Vec<Comment>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .polls
            .get(&poll_id)
            .map(|p| {
                p.comments
                    .iter()
                    .map(|c| tables.populate_comment(c))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_comments(&self, poll_id: Uuid) -> Result<i64, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .polls
            .get(&poll_id)
            .map_or(0, |p| p.comments.len() as i64))
    }

    async fn set_heart(
        &self,
        poll_id: Uuid,
        comment_id: Uuid,
        user_id: Uuid,
        hearted: bool,
    ) -> Result<Option<Comment>, StoreError> {
        let updated = {
            let mut tables = self.tables.lock().await;
            let Some(comment) = tables
                .polls
                .get_mut(&poll_id)
                .and_then(|p| p.comments.iter_mut().find(|c| c.id == comment_id))
            else {
                return Ok(None);
            };

            if hearted {
                if !comment.hearted_by.contains(&user_id) {
                    comment.hearted_by.push(user_id);
                }
            } else {
                comment.hearted_by.retain(|id| *id != user_id);
            }
            comment.hearts = comment.hearted_by.len() as i64;
            comment.revision += 1;

            let comment = comment.clone();
            tables.populate_comment(&comment)
        };

        self.emit(ChangeRecord::comment(ChangeKind::Update, poll_id, comment_id));
        Ok(Some(updated))
    }

    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        let rx = {
            let feed = self
                .feed
                .lock()
                .map_err(|_| StoreError::ChangeFeed("feed state poisoned".to_string()))?;
            if !feed.online {
                return Err(StoreError::ChangeFeed("change feed unavailable".to_string()));
            }
            feed.tx.subscribe()
        };

        Ok(BroadcastStream::new(rx)
            .map(|item| item.map_err(|e| StoreError::ChangeFeed(e.to_string())))
            .boxed())
    }
}
