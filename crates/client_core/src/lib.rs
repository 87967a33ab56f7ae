use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{ChannelId, MessageId, UserId},
    error::{FailureKind, SyncFailure},
    protocol::{
        AuthorDisplay, AuthorProfile, Message, MessageRow, PresenceRecord, PresenceState,
    },
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub mod config;
mod pagination;
mod presence;
mod profiles;
mod store;

pub use config::{load_settings, Settings};
pub use pagination::PaginationCursor;
pub use presence::PresenceTracker;
pub use profiles::ProfileResolver;
pub use store::{merge, MessageStore};

/// Surface of the backing persistence/pubsub platform. Everything the
/// synchronization core needs from the outside world goes through this
/// trait; auth, membership writes, and the wire format stay on the other
/// side of it.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Fetches one history page. With `before = None` this returns the
    /// newest `limit` rows of the channel in ascending `created_at` order;
    /// with `before = Some(t)` it returns up to `limit` rows strictly older
    /// than `t`, newest first (the caller reverses them).
    async fn fetch_page(
        &self,
        channel_id: &ChannelId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<MessageRow>>;

    async fn resolve_profiles(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, AuthorProfile>>;

    async fn insert_message(
        &self,
        channel_id: &ChannelId,
        author_id: &UserId,
        content: &str,
    ) -> Result<MessageRow>;

    /// Durable change notifications: one `MessageRow` per persisted insert
    /// in the channel, without display data.
    async fn subscribe_row_inserts(
        &self,
        channel_id: &ChannelId,
    ) -> Result<mpsc::Receiver<MessageRow>>;

    /// Best-effort peer feed carrying fully enriched messages.
    async fn subscribe_broadcast(&self, channel_id: &ChannelId)
        -> Result<mpsc::Receiver<Message>>;

    async fn publish_broadcast(&self, channel_id: &ChannelId, message: &Message) -> Result<()>;

    /// Full-state presence snapshots, delivered on every sync/join/leave.
    async fn subscribe_presence(&self) -> Result<mpsc::Receiver<PresenceState>>;

    async fn track_presence(&self, record: PresenceRecord) -> Result<()>;
}

/// Stub backend for client shells that exist before the platform is wired;
/// every operation fails with a descriptive error.
pub struct MissingChatBackend;

#[async_trait]
impl ChatBackend for MissingChatBackend {
    async fn fetch_page(
        &self,
        channel_id: &ChannelId,
        _before: Option<DateTime<Utc>>,
        _limit: usize,
    ) -> Result<Vec<MessageRow>> {
        Err(anyhow!("chat backend unavailable for channel {channel_id}"))
    }

    async fn resolve_profiles(
        &self,
        _user_ids: &[UserId],
    ) -> Result<HashMap<UserId, AuthorProfile>> {
        Err(anyhow!("chat backend unavailable for profile resolution"))
    }

    async fn insert_message(
        &self,
        channel_id: &ChannelId,
        _author_id: &UserId,
        _content: &str,
    ) -> Result<MessageRow> {
        Err(anyhow!("chat backend unavailable for channel {channel_id}"))
    }

    async fn subscribe_row_inserts(
        &self,
        channel_id: &ChannelId,
    ) -> Result<mpsc::Receiver<MessageRow>> {
        Err(anyhow!("chat backend unavailable for channel {channel_id}"))
    }

    async fn subscribe_broadcast(
        &self,
        channel_id: &ChannelId,
    ) -> Result<mpsc::Receiver<Message>> {
        Err(anyhow!("chat backend unavailable for channel {channel_id}"))
    }

    async fn publish_broadcast(&self, channel_id: &ChannelId, _message: &Message) -> Result<()> {
        Err(anyhow!("chat backend unavailable for channel {channel_id}"))
    }

    async fn subscribe_presence(&self) -> Result<mpsc::Receiver<PresenceState>> {
        Err(anyhow!("chat backend unavailable for presence"))
    }

    async fn track_presence(&self, _record: PresenceRecord) -> Result<()> {
        Err(anyhow!("chat backend unavailable for presence"))
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// New sorted snapshot of the open channel after a committed merge.
    TimelineUpdated {
        channel_id: ChannelId,
        messages: Vec<Message>,
    },
    PresenceChanged {
        online: HashMap<UserId, PresenceRecord>,
    },
    SyncFailed(SyncFailure),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("cannot send an empty message")]
    EmptyContent,
    #[error("no active session")]
    NoSession,
    #[error("no open channel")]
    NoOpenChannel,
    #[error("not a member of channel {0}")]
    NotJoined(ChannelId),
    #[error("failed to persist message: {0}")]
    Persist(#[source] anyhow::Error),
}

/// Locally known identity handed in by the session bootstrap. Supplies the
/// display snapshot for the user's own messages and the presence heartbeat,
/// so neither ever needs a profile round-trip.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub user_id: UserId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl LocalIdentity {
    pub fn display(&self) -> AuthorDisplay {
        AuthorProfile {
            id: self.user_id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            avatar_url: self.avatar_url.clone(),
        }
        .display()
    }

    pub fn presence_record(&self) -> PresenceRecord {
        PresenceRecord {
            user_id: self.user_id.clone(),
            name: self.display().label().to_string(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Everything a feed task or an in-flight operation needs to write into one
/// open channel. Cloned into spawned tasks; the `live` flag gates every
/// commit so work completing after the channel closed is discarded instead
/// of corrupting a newer session's store.
#[derive(Clone)]
struct SessionContext {
    channel_id: ChannelId,
    backend: Arc<dyn ChatBackend>,
    resolver: Arc<ProfileResolver>,
    store: Arc<Mutex<MessageStore>>,
    cursor: Arc<Mutex<PaginationCursor>>,
    live: Arc<AtomicBool>,
    events: broadcast::Sender<ClientEvent>,
    page_size: usize,
}

impl SessionContext {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn emit_timeline(&self, messages: Vec<Message>) {
        let _ = self.events.send(ClientEvent::TimelineUpdated {
            channel_id: self.channel_id.clone(),
            messages,
        });
    }

    fn fail(&self, kind: FailureKind, detail: String) {
        let _ = self.events.send(ClientEvent::SyncFailed(SyncFailure::new(
            kind,
            Some(self.channel_id.clone()),
            detail,
        )));
    }

    /// Commits a batch against the latest store state. The read-modify-write
    /// happens under one lock guard, never across an await point.
    async fn commit(&self, batch: Vec<Message>) -> bool {
        if !self.is_live() {
            return false;
        }
        let snapshot = {
            let mut store = self.store.lock().await;
            store.apply(batch)
        };
        self.emit_timeline(snapshot);
        true
    }

    async fn commit_confirm(&self, local_id: &MessageId, confirmed: Message) -> bool {
        if !self.is_live() {
            return false;
        }
        let snapshot = {
            let mut store = self.store.lock().await;
            store.confirm(local_id, confirmed)
        };
        self.emit_timeline(snapshot);
        true
    }

    async fn commit_remove(&self, id: &MessageId) -> bool {
        if !self.is_live() {
            return false;
        }
        let snapshot = {
            let mut store = self.store.lock().await;
            store.remove(id)
        };
        self.emit_timeline(snapshot);
        true
    }

    async fn load_initial(&self) -> Result<()> {
        let rows = match self
            .backend
            .fetch_page(&self.channel_id, None, self.page_size)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warn!(channel_id = %self.channel_id, error = %err, "initial history load failed");
                self.fail(
                    FailureKind::Fetch,
                    format!("initial history load failed: {err}"),
                );
                return Err(err);
            }
        };

        let batch = self.resolver.enrich(rows).await;
        if !self.is_live() {
            return Ok(());
        }
        {
            let mut cursor = self.cursor.lock().await;
            cursor.seed(&batch, self.page_size);
        }
        self.commit(batch).await;
        Ok(())
    }

    /// Fetches one older page. Returns `false` when the cursor guard refused
    /// the request (already loading, exhausted, or unseeded); duplicate
    /// edge-triggered invocations land here.
    async fn load_older(&self) -> Result<bool> {
        let before = {
            let mut cursor = self.cursor.lock().await;
            if !cursor.can_load_older() {
                return Ok(false);
            }
            cursor.loading = true;
            cursor.oldest_loaded_at
        };
        let Some(before) = before else {
            return Ok(false);
        };

        let mut rows = match self
            .backend
            .fetch_page(&self.channel_id, Some(before), self.page_size)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                self.cursor.lock().await.loading = false;
                warn!(channel_id = %self.channel_id, error = %err, "older history load failed");
                self.fail(
                    FailureKind::Fetch,
                    format!("older history load failed: {err}"),
                );
                return Err(err);
            }
        };

        if rows.is_empty() {
            let mut cursor = self.cursor.lock().await;
            cursor.has_more = false;
            cursor.loading = false;
            return Ok(true);
        }

        // Backward pages arrive newest first.
        rows.reverse();
        let batch = self.resolver.enrich(rows).await;
        if !self.is_live() {
            return Ok(false);
        }
        {
            let mut cursor = self.cursor.lock().await;
            cursor.advance(&batch, self.page_size);
            cursor.loading = false;
        }
        self.commit(batch).await;
        Ok(true)
    }

    /// Row-feed handler. Profile resolution is async, so rows may commit out
    /// of network-arrival order; the store's sort keeps final positions
    /// correct regardless.
    async fn ingest_row(&self, row: MessageRow) {
        let batch = self.resolver.enrich(vec![row]).await;
        self.commit(batch).await;
    }

    /// Broadcast-feed handler. Peer payloads arrive fully enriched; known
    /// ids are skipped to avoid redundant churn.
    async fn ingest_broadcast(&self, message: Message) {
        if !self.is_live() {
            return;
        }
        {
            let store = self.store.lock().await;
            if store.contains(&message.id) {
                return;
            }
        }
        self.commit(vec![message]).await;
    }

    fn spawn_row_feed(&self, mut feed: mpsc::Receiver<MessageRow>) -> JoinHandle<()> {
        let ctx = self.clone();
        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Some(row) => ctx.ingest_row(row).await,
                    None => {
                        if !ctx.is_live() {
                            return;
                        }
                        warn!(channel_id = %ctx.channel_id, "row-insertion feed dropped");
                        ctx.fail(
                            FailureKind::Subscription,
                            "row-insertion feed dropped".to_string(),
                        );
                        match ctx.backend.subscribe_row_inserts(&ctx.channel_id).await {
                            Ok(new_feed) => {
                                info!(channel_id = %ctx.channel_id, "row-insertion feed re-subscribed");
                                feed = new_feed;
                                // Reload the latest page to fill whatever the
                                // drop may have missed; merge absorbs overlap.
                                if let Err(err) = ctx.load_initial().await {
                                    warn!(channel_id = %ctx.channel_id, error = %err, "post-reconnect reload failed");
                                }
                            }
                            Err(err) => {
                                ctx.fail(
                                    FailureKind::Subscription,
                                    format!("row-insertion feed re-subscribe failed: {err}"),
                                );
                                return;
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_broadcast_feed(&self, mut feed: mpsc::Receiver<Message>) -> JoinHandle<()> {
        let ctx = self.clone();
        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Some(message) => ctx.ingest_broadcast(message).await,
                    None => {
                        if !ctx.is_live() {
                            return;
                        }
                        warn!(channel_id = %ctx.channel_id, "broadcast feed dropped");
                        ctx.fail(
                            FailureKind::Subscription,
                            "broadcast feed dropped".to_string(),
                        );
                        match ctx.backend.subscribe_broadcast(&ctx.channel_id).await {
                            Ok(new_feed) => {
                                info!(channel_id = %ctx.channel_id, "broadcast feed re-subscribed");
                                feed = new_feed;
                            }
                            Err(err) => {
                                ctx.fail(
                                    FailureKind::Subscription,
                                    format!("broadcast feed re-subscribe failed: {err}"),
                                );
                                return;
                            }
                        }
                    }
                }
            }
        })
    }
}

/// Per-channel realtime resource: both feed subscriptions plus the liveness
/// flag, acquired on channel open and released as a unit.
struct ChannelSession {
    context: SessionContext,
    row_feed_task: JoinHandle<()>,
    broadcast_feed_task: JoinHandle<()>,
}

impl ChannelSession {
    fn close(&self) {
        self.context.live.store(false, Ordering::SeqCst);
        self.row_feed_task.abort();
        self.broadcast_feed_task.abort();
    }
}

#[derive(Default)]
struct ClientState {
    identity: Option<LocalIdentity>,
    joined: HashSet<ChannelId>,
    open: Option<ChannelSession>,
}

/// The synchronization core of the chat client: owns the canonical message
/// set of the open channel, drives pagination, bridges both realtime feeds,
/// runs the optimistic send lifecycle, and tracks presence.
pub struct ChatClient {
    backend: Arc<dyn ChatBackend>,
    resolver: Arc<ProfileResolver>,
    settings: Settings,
    inner: Mutex<ClientState>,
    presence: Mutex<Option<PresenceTracker>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Arc<Self> {
        Self::with_settings(backend, Settings::default())
    }

    pub fn with_settings(backend: Arc<dyn ChatBackend>, settings: Settings) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_buffer);
        let resolver = Arc::new(ProfileResolver::new(
            Arc::clone(&backend),
            settings.profile_cache_ttl,
            settings.profile_cache_capacity,
        ));
        Arc::new(Self {
            backend,
            resolver,
            settings,
            inner: Mutex::new(ClientState::default()),
            presence: Mutex::new(None),
            events,
        })
    }

    /// Client with no platform wired yet; every operation fails cleanly.
    pub fn detached() -> Arc<Self> {
        Self::new(Arc::new(MissingChatBackend))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Resets all client state and enters the live session as `identity`.
    /// Presence subscription failure is surfaced but does not block messaging.
    pub async fn begin_session(&self, identity: LocalIdentity) {
        self.end_session().await;
        {
            let mut state = self.inner.lock().await;
            state.identity = Some(identity.clone());
        }

        match PresenceTracker::start(
            Arc::clone(&self.backend),
            identity.presence_record(),
            self.events.clone(),
        )
        .await
        {
            Ok(tracker) => {
                *self.presence.lock().await = Some(tracker);
                info!(user_id = %identity.user_id, "session started");
            }
            Err(err) => {
                warn!(user_id = %identity.user_id, error = %err, "presence tracking unavailable");
                let _ = self.events.send(ClientEvent::SyncFailed(SyncFailure::new(
                    FailureKind::Subscription,
                    None,
                    format!("presence tracking unavailable: {err}"),
                )));
            }
        }
    }

    /// Tears down the open channel, the presence view, and all session state.
    pub async fn end_session(&self) {
        let session = {
            let mut state = self.inner.lock().await;
            state.identity = None;
            state.joined.clear();
            state.open.take()
        };
        if let Some(session) = session {
            session.close();
        }
        if let Some(tracker) = self.presence.lock().await.take() {
            tracker.stop().await;
            let _ = self.events.send(ClientEvent::PresenceChanged {
                online: HashMap::new(),
            });
        }
    }

    pub async fn mark_joined(&self, channel_id: ChannelId) {
        self.inner.lock().await.joined.insert(channel_id);
    }

    /// Membership revocation. When it names the open channel, the canonical
    /// set is discarded and an empty timeline emitted.
    pub async fn mark_left(&self, channel_id: &ChannelId) {
        let closed = {
            let mut state = self.inner.lock().await;
            state.joined.remove(channel_id);
            let is_open = state
                .open
                .as_ref()
                .is_some_and(|session| session.context.channel_id == *channel_id);
            if is_open {
                state.open.take()
            } else {
                None
            }
        };
        if let Some(session) = closed {
            session.close();
            let _ = self.events.send(ClientEvent::TimelineUpdated {
                channel_id: channel_id.clone(),
                messages: Vec::new(),
            });
        }
    }

    /// Opens a channel: tears down any previous channel session, loads the
    /// first history page, then subscribes both realtime feeds. Re-entering
    /// recreates the subscriptions rather than stacking them.
    pub async fn open_channel(&self, channel_id: ChannelId) -> Result<()> {
        {
            let state = self.inner.lock().await;
            if state.identity.is_none() {
                return Err(anyhow!("no active session"));
            }
            if !state.joined.contains(&channel_id) {
                return Err(anyhow!("not a member of channel {channel_id}"));
            }
        }

        self.close_channel().await;

        let context = SessionContext {
            channel_id: channel_id.clone(),
            backend: Arc::clone(&self.backend),
            resolver: Arc::clone(&self.resolver),
            store: Arc::new(Mutex::new(MessageStore::new(channel_id.clone()))),
            cursor: Arc::new(Mutex::new(PaginationCursor::default())),
            live: Arc::new(AtomicBool::new(true)),
            events: self.events.clone(),
            page_size: self.settings.page_size,
        };

        context.load_initial().await?;

        let row_feed = self
            .backend
            .subscribe_row_inserts(&channel_id)
            .await
            .context("failed to subscribe to the row-insertion feed")?;
        let broadcast_feed = self
            .backend
            .subscribe_broadcast(&channel_id)
            .await
            .context("failed to subscribe to the broadcast feed")?;

        let session = ChannelSession {
            row_feed_task: context.spawn_row_feed(row_feed),
            broadcast_feed_task: context.spawn_broadcast_feed(broadcast_feed),
            context,
        };

        let mut state = self.inner.lock().await;
        if state.identity.is_none() || !state.joined.contains(&channel_id) {
            session.close();
            return Err(anyhow!("channel {channel_id} is no longer available"));
        }
        if let Some(previous) = state.open.replace(session) {
            previous.close();
        }
        info!(channel_id = %channel_id, "channel opened");
        Ok(())
    }

    pub async fn close_channel(&self) {
        let session = { self.inner.lock().await.open.take() };
        if let Some(session) = session {
            session.close();
        }
    }

    /// Loads the next older history page for the open channel. `Ok(false)`
    /// means nothing was attempted: no open channel, a load already in
    /// flight, history exhausted, or an unseeded cursor.
    pub async fn load_older(&self) -> Result<bool> {
        let Some(context) = self.open_context().await else {
            return Ok(false);
        };
        context.load_older().await
    }

    /// Optimistic send: the message appears immediately under a local id,
    /// then the pending entry is swapped in place for the persisted row on
    /// success, or removed on failure.
    pub async fn send_message(&self, text: &str) -> Result<(), SendError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(SendError::EmptyContent);
        }

        let (identity, context) = {
            let state = self.inner.lock().await;
            let identity = state.identity.clone().ok_or(SendError::NoSession)?;
            let session = state.open.as_ref().ok_or(SendError::NoOpenChannel)?;
            if !state.joined.contains(&session.context.channel_id) {
                return Err(SendError::NotJoined(session.context.channel_id.clone()));
            }
            (identity, session.context.clone())
        };

        let display = identity.display();
        let pending = Message {
            id: MessageId::local(),
            channel_id: context.channel_id.clone(),
            author_id: identity.user_id.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            author_display: display.clone(),
        };
        let local_id = pending.id.clone();
        context.commit(vec![pending]).await;

        match context
            .backend
            .insert_message(&context.channel_id, &identity.user_id, content)
            .await
        {
            Ok(row) => {
                // Keep the locally known display; confirming a send never
                // needs a profile fetch for one's own message.
                let confirmed = row.into_message(display);
                context.commit_confirm(&local_id, confirmed.clone()).await;

                if let Err(err) = context
                    .backend
                    .publish_broadcast(&context.channel_id, &confirmed)
                    .await
                {
                    warn!(
                        channel_id = %context.channel_id,
                        error = %err,
                        "broadcast publish failed; peers will catch up from the row feed"
                    );
                }
                Ok(())
            }
            Err(err) => {
                context.commit_remove(&local_id).await;
                context.fail(FailureKind::Persist, format!("message insert failed: {err}"));
                Err(SendError::Persist(err))
            }
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        match self.open_context().await {
            Some(context) => {
                let store = context.store.lock().await;
                store.snapshot()
            }
            None => Vec::new(),
        }
    }

    pub async fn pagination(&self) -> Option<PaginationCursor> {
        match self.open_context().await {
            Some(context) => Some(*context.cursor.lock().await),
            None => None,
        }
    }

    pub async fn online_users(&self) -> HashMap<UserId, PresenceRecord> {
        match self.presence.lock().await.as_ref() {
            Some(tracker) => tracker.online_users().await,
            None => HashMap::new(),
        }
    }

    async fn open_context(&self) -> Option<SessionContext> {
        self.inner
            .lock()
            .await
            .open
            .as_ref()
            .map(|session| session.context.clone())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
