use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::commit::CommitEngine;
use crate::db::SharedStore;
use crate::realtime::{Broadcaster, SubscriptionManager};

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub broadcaster: Broadcaster,
    pub engine: CommitEngine,
    pub ping_interval: Duration,
}

impl AppState {
    /// Wires the broadcaster and commit engine around `store`. Must be called
    /// inside a runtime since it starts the subscription manager.
    pub fn new(
        store: SharedStore,
        broadcast_capacity: usize,
        connection_buffer: usize,
        ping_interval: Duration,
    ) -> Self {
        let subscriptions = SubscriptionManager::spawn(connection_buffer);
        let broadcaster = Broadcaster::new(broadcast_capacity, subscriptions);
        let engine = CommitEngine::new(store.clone(), broadcaster.clone());

        AppState {
            store,
            broadcaster,
            engine,
            ping_interval,
        }
    }
}

/// Pings the store every minute and logs failures.
pub fn spawn_health_check(store: SharedStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Err(e) = store.ping().await {
                error!("Database connection health check failed: {}", e);
            }
        }
    })
}
