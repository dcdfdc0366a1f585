//! Paste-data synchronization engine
//!
//! Ties the resolver, fetch coordinator, and reconciliation cache together
//! behind [`PasteEngine`]: the host service calls `get_paste_data` when a
//! paste happens and `set_paste_data` when a copy happens, and the engine
//! decides whether the bytes come from the local cache or from a
//! coordinated fetch against the origin device.

pub mod cache;
pub mod resolver;
pub mod tasks;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, SyncConfig};
use crate::devices::{DeviceError, DeviceRoster};
use crate::event::{now_millis, ClipEvent, EventStatus, UserId};
use crate::record::{EntryValue, PasteData};
use crate::transport::{ClipPlugin, PluginError, PluginHandle};

pub use cache::PasteCache;
pub use resolver::{EventResolver, Resolution};
pub use tasks::{FetchCoordinator, FetchTask, RecordKey, RecordOutcome, TaskKey, TaskOutcome};

/// Synchronization errors.
///
/// Cloneable because a fetch outcome is broadcast verbatim to every caller
/// waiting on the same task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// No transport is attached
    #[error("no clip transport is attached")]
    PluginUnavailable,

    /// The transport returned an empty event list
    #[error("no published events for this user")]
    NoEvents,

    /// Top event belongs to a different account
    #[error("event account '{remote}' does not match active account '{local}'")]
    AccountMismatch { remote: String, local: String },

    /// Origin device failed the trusted/online check
    #[error("device '{0}' is not in the trusted online roster")]
    UntrustedDevice(String),

    /// Roster lookup failed with its own reason
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Top event is not in a fetchable lifecycle state
    #[error("event status {0:?} is not fetchable")]
    InvalidStatus(EventStatus),

    /// Top event's expiration has passed
    #[error("event expired at {expired_at}, now is {now}")]
    Expired { expired_at: i64, now: i64 },

    /// Nothing cached for this user
    #[error("no paste data available")]
    NoContent,

    /// Joined fetch did not finish within the bounded wait
    #[error("remote fetch still in progress")]
    TaskProcessing,

    /// Own fetch did not finish within the bounded wait
    #[error("remote fetch timed out")]
    Timeout,

    /// The fetch side went away without publishing a result
    #[error("remote task ended without a result")]
    RemoteTask,

    /// Fetched payload could not be decoded
    #[error("failed to decode remote payload: {0}")]
    Decode(String),

    /// Transport failure without a status code
    #[error("transport error: {0}")]
    Plugin(String),

    /// Transport status code, passed through verbatim
    #[error("transport returned status {0}")]
    Transport(i32),
}

impl From<PluginError> for SyncError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::Status(code) => SyncError::Transport(code),
            other => SyncError::Plugin(other.to_string()),
        }
    }
}

/// What a paste request produced: the payload plus the wall-clock cost of
/// the remote round trip, `None` when served from the local cache
#[derive(Debug, Clone)]
pub struct PasteResponse {
    pub data: PasteData,
    pub sync_time: Option<Duration>,
}

struct EngineInner {
    device_id: String,
    account: String,
    sync: SyncConfig,
    plugin: Arc<PluginHandle>,
    resolver: EventResolver,
    tasks: FetchCoordinator<TaskKey, PasteData>,
    record_fills: FetchCoordinator<RecordKey, EntryValue>,
    cache: PasteCache,
    /// Remote fetches are suppressed while the screen is locked
    screen_locked: AtomicBool,
    /// Device-local publication counter
    seq: AtomicU64,
}

/// Engine coordinating local clipboard state with remote publications.
///
/// Cheap to clone; all state lives behind one shared inner.
#[derive(Clone)]
pub struct PasteEngine {
    inner: Arc<EngineInner>,
}

impl PasteEngine {
    /// Build an engine for this device from its configuration and the
    /// host-maintained device roster. The transport starts detached; the
    /// host attaches one via [`attach_plugin`](Self::attach_plugin) once
    /// its channel is up.
    pub fn new(config: &Config, roster: Arc<dyn DeviceRoster>) -> Self {
        let plugin = Arc::new(PluginHandle::new());
        let resolver = EventResolver::new(
            Arc::clone(&plugin),
            roster,
            config.device.device_id.clone(),
            config.device.account.clone(),
            config.sync.top_events,
        );
        Self {
            inner: Arc::new(EngineInner {
                device_id: config.device.device_id.clone(),
                account: config.device.account.clone(),
                sync: config.sync.clone(),
                plugin,
                resolver,
                tasks: FetchCoordinator::new(),
                record_fills: FetchCoordinator::new(),
                cache: PasteCache::new(),
                screen_locked: AtomicBool::new(false),
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Install (or replace) the clip transport
    pub async fn attach_plugin(&self, plugin: Arc<dyn ClipPlugin>) {
        self.inner.plugin.attach(plugin).await;
    }

    /// Remove the clip transport; returns whether one was attached
    pub async fn detach_plugin(&self) -> bool {
        self.inner.plugin.detach().await
    }

    /// Whether a transport is currently attached
    pub async fn is_plugin_attached(&self) -> bool {
        self.inner.plugin.is_attached().await
    }

    /// Gate remote fetches on screen state; locked devices serve only
    /// local data
    pub fn set_screen_locked(&self, locked: bool) {
        self.inner.screen_locked.store(locked, Ordering::SeqCst);
        debug!(locked, "screen lock state changed");
    }

    /// Materialize the current paste payload for a user.
    ///
    /// Resolves the newest published event; a remote event triggers (or
    /// joins) a coordinated fetch, anything else serves the local cache.
    /// Resolution failures are folded into the local fallback rather than
    /// propagated, so a paste always degrades to "whatever this device
    /// already has".
    pub async fn get_paste_data(&self, user: UserId) -> Result<PasteResponse, SyncError> {
        if self.inner.screen_locked.load(Ordering::SeqCst) {
            debug!(user, "screen locked, serving local data");
            return self.local_response(user).await;
        }
        let current = self.inner.cache.current_event(user).await;
        match self.inner.resolver.resolve(user, current.as_ref()).await {
            Ok(Resolution::Remote(event)) => self.fetch_remote(user, event).await,
            Ok(Resolution::Local) => self.local_response(user).await,
            Err(err) => {
                debug!(user, error = %err, "resolution failed, serving local data");
                self.local_response(user).await
            }
        }
    }

    /// Record a local copy and publish it to the device group.
    ///
    /// The cache is updated before any publish attempt so the local
    /// clipboard works even when the transport is detached or failing;
    /// publish problems are logged and absorbed. Returns the stamped event
    /// describing this publication.
    pub async fn set_paste_data(
        &self,
        user: UserId,
        mut data: PasteData,
    ) -> Result<ClipEvent, SyncError> {
        if data.is_empty() {
            return Err(SyncError::NoContent);
        }
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut event = ClipEvent::new(
            user,
            seq,
            self.inner.device_id.clone(),
            self.inner.account.clone(),
        );
        event.expiration = now_millis() + self.inner.sync.event_ttl_ms;
        event.status = EventStatus::Normal;
        event.data_id = seq;
        event.data_types = data.mime_types();
        event.is_delay = data.has_delay_records();

        data.is_remote = false;
        data.data_id = seq;
        self.inner
            .cache
            .set_local(user, event.clone(), data.clone())
            .await;

        if data.size() > self.inner.sync.max_payload {
            warn!(
                user,
                size = data.size(),
                limit = self.inner.sync.max_payload,
                "payload exceeds sync limit, keeping it local only"
            );
            return Ok(event);
        }
        if let Some(plugin) = self.inner.plugin.get().await {
            match data.to_bytes() {
                Ok(raw) => {
                    if let Err(err) = plugin.set_paste_data(&event, raw).await {
                        warn!(user, seq, error = %err, "publishing local copy failed");
                    } else {
                        debug!(user, seq, records = data.record_count(), "published local copy");
                    }
                }
                Err(err) => warn!(user, error = %err, "serializing local copy failed"),
            }
        }
        Ok(event)
    }

    /// Resolve one delay record's content, fetching it on first access.
    ///
    /// Already-filled entries are served from the cache without touching
    /// the transport. Concurrent first accesses to the same record share
    /// one transport fetch, the same way payload fetches are coordinated.
    pub async fn record_value(
        &self,
        user: UserId,
        record_id: u32,
        mime: &str,
    ) -> Result<EntryValue, SyncError> {
        let cached = self.inner.cache.cached_data(user).await;
        let Some(record) = cached.record(record_id) else {
            return Err(SyncError::NoContent);
        };
        match record.value_for(mime) {
            Some(value) if !value.is_empty() => return Ok(value.clone()),
            Some(_) => {}
            None => return Err(SyncError::NoContent),
        }

        let Some(event) = self.inner.cache.current_event(user).await else {
            return Err(SyncError::NoContent);
        };
        let Some(plugin) = self.inner.plugin.get().await else {
            return Err(SyncError::PluginUnavailable);
        };
        if !plugin.supports_delay_fetch() {
            return Err(PluginError::Unsupported("delay-record fetch").into());
        }

        let key = RecordKey::new(&event, record_id, mime);
        let task = self.inner.record_fills.acquire(key.clone()).await;
        if task.owns_fetch() {
            let outcome = self.fill_record(user, &event, record_id, mime, plugin).await;
            self.inner.record_fills.complete(&key, outcome.clone()).await;
            self.inner.record_fills.clear(&key).await;
            return outcome;
        }
        match task.wait(self.inner.sync.await_timeout()).await {
            Some(outcome) => outcome,
            None => Err(SyncError::TaskProcessing),
        }
    }

    /// The single real fill for one record: re-check the cache now that
    /// this caller owns the key, then fetch and store the value
    async fn fill_record(
        &self,
        user: UserId,
        event: &ClipEvent,
        record_id: u32,
        mime: &str,
        plugin: Arc<dyn ClipPlugin>,
    ) -> RecordOutcome {
        // Another caller may have finished the fill between this caller's
        // cache check and its acquisition of the key
        let recheck = self.inner.cache.cached_data(user).await;
        if let Some(value) = recheck
            .record(record_id)
            .and_then(|r| r.value_for(mime))
            .filter(|v| !v.is_empty())
        {
            return Ok(value.clone());
        }

        let value = plugin.get_record_value(event, record_id, mime).await?;
        if !self
            .inner
            .cache
            .fill_record_entry(user, record_id, mime, value.clone())
            .await
        {
            debug!(user, record_id, "cache moved on while record value was fetched");
        }
        Ok(value)
    }

    /// Drop everything cached for a user (session ended, user removed)
    pub async fn evict_user(&self, user: UserId) {
        self.inner.cache.evict(user).await;
    }

    /// Announce this device's connectivity to the device group
    pub async fn set_device_online(&self, online: bool) -> Result<(), SyncError> {
        let Some(plugin) = self.inner.plugin.get().await else {
            return Err(SyncError::PluginUnavailable);
        };
        plugin.publish_state(&self.inner.device_id, online).await?;
        info!(online, "published device state");
        Ok(())
    }

    async fn local_response(&self, user: UserId) -> Result<PasteResponse, SyncError> {
        let data = self.inner.cache.cached_data(user).await;
        if data.is_empty() {
            return Err(SyncError::NoContent);
        }
        Ok(PasteResponse {
            data,
            sync_time: None,
        })
    }

    /// Start or join the coordinated fetch for a remote event and wait for
    /// its outcome
    async fn fetch_remote(
        &self,
        user: UserId,
        event: ClipEvent,
    ) -> Result<PasteResponse, SyncError> {
        let started = Instant::now();
        let key = TaskKey::from(&event);
        let task = self.inner.tasks.acquire(key.clone()).await;
        let owns = task.owns_fetch();
        if owns {
            let inner = Arc::clone(&self.inner);
            let fetch_event = event.clone();
            tokio::spawn(async move {
                let outcome = inner.run_fetch(user, &fetch_event).await;
                inner.tasks.complete(&key, outcome).await;
                inner.tasks.clear(&key).await;
            });
        }
        match task.wait(self.inner.sync.await_timeout()).await {
            Some(Ok(data)) => Ok(PasteResponse {
                data,
                sync_time: Some(started.elapsed()),
            }),
            Some(Err(err)) => Err(err),
            None if owns => Err(SyncError::Timeout),
            None => Err(SyncError::TaskProcessing),
        }
    }
}

impl EngineInner {
    /// The single real fetch for one event: pull bytes, decode, rebase
    /// URIs, then promote into the cache if the event is still current.
    ///
    /// The outcome goes to every waiter whether or not promotion happened;
    /// a stale fetch wins the caller, never the cache.
    async fn run_fetch(&self, user: UserId, event: &ClipEvent) -> TaskOutcome {
        let fetch_started = now_millis();
        let Some(plugin) = self.plugin.get().await else {
            return Err(SyncError::PluginUnavailable);
        };
        let raw = plugin.get_paste_data(event).await?;
        let mut data =
            PasteData::from_bytes(&raw).map_err(|e| SyncError::Decode(e.to_string()))?;
        let converted = data.convert_remote_uris(user);
        data.mark_remote(event);

        let current = self.cache.current_event(user).await;
        let still_current = matches!(
            self.resolver.resolve(user, current.as_ref()).await,
            Ok(Resolution::Remote(ref top)) if top.same_publication(event)
        );
        if still_current {
            let promoted = self
                .cache
                .promote_remote(user, event.clone(), data.clone(), fetch_started)
                .await;
            if !promoted {
                debug!(user, seq_id = event.seq_id, "promotion skipped by newer local write");
            }
        } else {
            debug!(
                user,
                seq_id = event.seq_id,
                "event no longer current, returning data without promotion"
            );
        }
        info!(
            user,
            device_id = %event.device_id,
            seq_id = event.seq_id,
            records = data.record_count(),
            converted,
            "materialized remote paste data"
        );
        Ok(data)
    }
}
