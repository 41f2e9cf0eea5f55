//! Change-feed observer.
//!
//! Mirrors every committed mutation into the broadcaster, including ones the
//! API never saw. Votes made through the API are therefore published twice.

use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::db::{ChangeKind, ChangeRecord, ChangeTarget, SharedStore, StoreError};
use crate::realtime::{Broadcaster, PollEvent};

pub struct DatabaseWatcher {
    store: SharedStore,
    broadcaster: Broadcaster,
    retry: Duration,
}

impl DatabaseWatcher {
    pub fn new(store: SharedStore, broadcaster: Broadcaster, retry: Duration) -> Self {
        Self {
            store,
            broadcaster,
            retry,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Never returns. A dropped or failing feed is reattached after `retry`.
    pub async fn run(self) {
        loop {
            match self.watch_once().await {
                Ok(()) => warn!(retry = ?self.retry, "change feed closed, reconnecting"),
                Err(e) => error!(retry = ?self.retry, "change feed failed: {}", e),
            }
            tokio::time::sleep(self.retry).await;
        }
    }

    async fn watch_once(&self) -> Result<(), StoreError> {
        let mut changes = self.store.watch().await?;
        info!("change feed attached");

        while let Some(change) = changes.next().await {
            let change = change?;
            match self.derive(change).await {
                Ok(Some(event)) => {
                    info!(
                        source = "change_feed",
                        poll_id = %event.poll_id(),
                        event = event.name(),
                        "change observed"
                    );
                    self.broadcaster.publish(event);
                }
                Ok(None) => {}
                // a failed lookup loses one event, not the feed
                Err(e) => warn!(poll_id = %change.poll_id(), "could not derive event: {}", e),
            }
        }
        Ok(())
    }

    /// Rebuilds the normalized event for a change by reading current state.
    pub async fn derive(&self, change: ChangeRecord) -> Result<Option<PollEvent>, StoreError> {
        let event = match (change.kind, change.target) {
            (ChangeKind::Insert, ChangeTarget::Poll { poll_id }) => self
                .store
                .get_poll(poll_id)
                .await?
                .map(PollEvent::poll_created),
            (ChangeKind::Update, ChangeTarget::Poll { poll_id }) => {
                Some(match self.store.get_poll(poll_id).await? {
                    Some(poll) => PollEvent::poll_updated(poll),
                    None => PollEvent::poll_deleted(poll_id),
                })
            }
            (ChangeKind::Delete, ChangeTarget::Poll { poll_id }) => {
                Some(PollEvent::poll_deleted(poll_id))
            }
            (
                ChangeKind::Insert,
                ChangeTarget::Comment {
                    poll_id,
                    comment_id,
                },
            ) => match self.store.get_comment(poll_id, comment_id).await? {
                Some(comment) => {
                    let total = self.store.count_comments(poll_id).await?;
                    Some(PollEvent::comment_added(comment, total))
                }
                None => None,
            },
            (
                ChangeKind::Update,
                ChangeTarget::Comment {
                    poll_id,
                    comment_id,
                },
            ) => self
                .store
                .get_comment(poll_id, comment_id)
                .await?
                .map(PollEvent::comment_hearted),
            (ChangeKind::Delete, ChangeTarget::Comment { .. }) => None,
        };
        Ok(event)
    }
}
