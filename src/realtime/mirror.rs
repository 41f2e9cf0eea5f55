//! Receiver-side reconciliation.
//!
//! Events can arrive twice (direct path and change feed) and out of order.
//! [`PollMirror`] overwrites by id and keeps whichever copy carries the higher
//! revision, so any interleaving of the same events ends in the same state.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::db::{Comment, Poll};
use crate::realtime::events::PollEvent;

#[derive(Debug, Default, Clone)]
pub struct PollMirror {
    // stored with `comments` emptied; comments live in their own map
    polls: HashMap<Uuid, Poll>,
    comments: HashMap<Uuid, HashMap<Uuid, Comment>>,
    deleted: HashSet<Uuid>,
}

impl PollMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event. Returns whether the visible state changed.
    pub fn apply(&mut self, event: &PollEvent) -> bool {
        match event {
            PollEvent::PollCreated(e) => self.upsert_poll(&e.poll),
            PollEvent::PollUpdated(e) => self.upsert_poll(&e.poll),
            PollEvent::PollDeleted(e) => self.delete_poll(e.poll_id),
            PollEvent::CommentAdded(e) => self.upsert_comment(&e.comment),
            PollEvent::CommentHearted(e) => self.upsert_comment(&e.comment),
        }
    }

    /// The poll with every known comment attached, oldest comment first.
    pub fn poll(&self, poll_id: Uuid) -> Option<Poll> {
        let mut poll = self.polls.get(&poll_id)?.clone();
        let mut comments: Vec<Comment> = self
            .comments
            .get(&poll_id)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        poll.comments = comments;
        Some(poll)
    }

    /// All live polls, newest first.
    pub fn polls(&self) -> Vec<Poll> {
        let mut polls: Vec<Poll> = self.polls.keys().filter_map(|id| self.poll(*id)).collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        polls
    }

    pub fn comment(&self, poll_id: Uuid, comment_id: Uuid) -> Option<&Comment> {
        self.comments.get(&poll_id)?.get(&comment_id)
    }

    pub fn is_deleted(&self, poll_id: Uuid) -> bool {
        self.deleted.contains(&poll_id)
    }

    pub fn len(&self) -> usize {
        self.polls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }

    fn upsert_poll(&mut self, incoming: &Poll) -> bool {
        if self.deleted.contains(&incoming.id) {
            return false;
        }

        let mut changed = false;
        for comment in &incoming.comments {
            changed |= self.upsert_comment(comment);
        }

        let mut bare = incoming.clone();
        bare.comments.clear();

        match self.polls.get_mut(&incoming.id) {
            Some(current) if current.revision > bare.revision || *current == bare => {}
            Some(current) => {
                *current = bare;
                changed = true;
            }
            None => {
                self.polls.insert(bare.id, bare);
                changed = true;
            }
        }
        changed
    }

    fn upsert_comment(&mut self, incoming: &Comment) -> bool {
        if self.deleted.contains(&incoming.poll_id) {
            return false;
        }

        let comments = self.comments.entry(incoming.poll_id).or_default();
        match comments.get(&incoming.id) {
            Some(current) if current.revision > incoming.revision || current == incoming => false,
            _ => {
                comments.insert(incoming.id, incoming.clone());
                true
            }
        }
    }

    fn delete_poll(&mut self, poll_id: Uuid) -> bool {
        self.polls.remove(&poll_id);
        self.comments.remove(&poll_id);
        self.deleted.insert(poll_id)
    }
}
