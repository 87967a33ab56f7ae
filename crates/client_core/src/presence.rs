use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use shared::{
    domain::UserId,
    error::{FailureKind, SyncFailure},
    protocol::{PresenceRecord, PresenceState},
};
use tokio::{
    sync::{broadcast, RwLock},
    task::JoinHandle,
};
use tracing::warn;

use crate::{ChatBackend, ClientEvent};

/// Collapses the heartbeat fan-out of a live session into one entry per
/// user. The transport delivers full-state snapshots on sync/join/leave, each
/// possibly carrying several records per user (one per connection); the
/// online view is a `user_id → record` map, so the online count is always the
/// number of distinct users.
pub struct PresenceTracker {
    online: Arc<RwLock<HashMap<UserId, PresenceRecord>>>,
    live: Arc<AtomicBool>,
    feed_task: JoinHandle<()>,
}

impl PresenceTracker {
    /// Subscribes to the presence channel, then publishes the local
    /// heartbeat record.
    pub async fn start(
        backend: Arc<dyn ChatBackend>,
        record: PresenceRecord,
        events: broadcast::Sender<ClientEvent>,
    ) -> Result<Self> {
        let mut feed = backend
            .subscribe_presence()
            .await
            .context("failed to subscribe to the presence channel")?;
        backend
            .track_presence(record)
            .await
            .context("failed to publish the presence heartbeat")?;

        let online = Arc::new(RwLock::new(HashMap::new()));
        let live = Arc::new(AtomicBool::new(true));

        let feed_task = {
            let online = Arc::clone(&online);
            let live = Arc::clone(&live);
            tokio::spawn(async move {
                while let Some(state) = feed.recv().await {
                    if !live.load(Ordering::SeqCst) {
                        return;
                    }
                    let collapsed = collapse(state);
                    {
                        *online.write().await = collapsed.clone();
                    }
                    let _ = events.send(ClientEvent::PresenceChanged { online: collapsed });
                }
                if live.load(Ordering::SeqCst) {
                    warn!("presence feed dropped");
                    let _ = events.send(ClientEvent::SyncFailed(SyncFailure::new(
                        FailureKind::Subscription,
                        None,
                        "presence feed dropped",
                    )));
                }
            })
        };

        Ok(Self {
            online,
            live,
            feed_task,
        })
    }

    pub async fn online_users(&self) -> HashMap<UserId, PresenceRecord> {
        self.online.read().await.clone()
    }

    /// Optimistic local teardown: the view empties immediately instead of
    /// waiting for the server's leave notification.
    pub async fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.feed_task.abort();
        self.online.write().await.clear();
    }
}

fn collapse(state: PresenceState) -> HashMap<UserId, PresenceRecord> {
    let mut by_user = HashMap::new();
    for record in state.into_values().flatten() {
        by_user.insert(record.user_id.clone(), record);
    }
    by_user
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
