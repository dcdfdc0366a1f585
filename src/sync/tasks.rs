//! Single-flight fetch coordination
//!
//! At most one remote fetch runs at a time per coordination key: payload
//! fetches are keyed by `(device_id, seq_id)`, delay-record fills by
//! `(device_id, seq_id, record_id, mime)`. The first caller to acquire a
//! key owns the real fetch; every other concurrent caller joins it and
//! blocks on the same outcome. Completion is a broadcast: all waiters
//! observe the identical result, and a waiter arriving between completion
//! and cleanup still sees the stored value.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::event::ClipEvent;
use crate::record::{EntryValue, PasteData};
use crate::sync::SyncError;

/// Dedup key for payload fetch coordination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    /// Publishing device
    pub device_id: String,
    /// Per-device sequence number
    pub seq_id: u64,
}

impl From<&ClipEvent> for TaskKey {
    fn from(event: &ClipEvent) -> Self {
        Self {
            device_id: event.device_id.clone(),
            seq_id: event.seq_id,
        }
    }
}

/// Dedup key for one delay record's value fetch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    /// Publishing device
    pub device_id: String,
    /// Per-device sequence number
    pub seq_id: u64,
    /// Record within the payload
    pub record_id: u32,
    /// Requested MIME type
    pub mime: String,
}

impl RecordKey {
    /// Key for filling one record of the given event's payload
    pub fn new(event: &ClipEvent, record_id: u32, mime: &str) -> Self {
        Self {
            device_id: event.device_id.clone(),
            seq_id: event.seq_id,
            record_id,
            mime: mime.to_string(),
        }
    }
}

/// What a coordinated payload fetch produced: the payload, or the error
/// every waiter will see
pub type TaskOutcome = Result<PasteData, SyncError>;

/// What a coordinated delay-record fill produced
pub type RecordOutcome = Result<EntryValue, SyncError>;

struct TaskContext<T> {
    /// True once some caller owns the in-flight fetch for this key
    pasting: AtomicBool,
    /// Result slot; written exactly once, observed by all waiters
    slot: watch::Sender<Option<Result<T, SyncError>>>,
}

impl<T> TaskContext<T> {
    fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            pasting: AtomicBool::new(false),
            slot,
        }
    }
}

/// Handle to one coordinated fetch.
///
/// Both the fetch owner and the joiners hold one of these; the underlying
/// context stays alive for as long as any handle does, so clearing the
/// coordinator entry never strands a waiter.
pub struct FetchTask<T> {
    ctx: Arc<TaskContext<T>>,
    owns_fetch: bool,
}

impl<T: Clone> FetchTask<T> {
    /// Whether this caller must perform the real fetch (first acquisition)
    /// rather than wait for someone else's
    pub fn owns_fetch(&self) -> bool {
        self.owns_fetch
    }

    /// Block until the fetch completes or the bounded wait elapses.
    ///
    /// `Some(outcome)` once a completion was published (even one published
    /// before this call started); `None` when the local wait timed out. The
    /// caller decides what a timeout means: the fetch owner reports it as
    /// its own timeout, a joiner reports the fetch as still processing.
    pub async fn wait(&self, limit: Duration) -> Option<Result<T, SyncError>> {
        let mut rx = self.ctx.slot.subscribe();
        // Bind before returning: the waited-for value borrows `rx` and
        // must drop while `rx` is still alive
        let outcome = match tokio::time::timeout(limit, rx.wait_for(|slot| slot.is_some())).await
        {
            Ok(Ok(value)) => (*value).clone(),
            // Fetch side vanished without publishing a result
            Ok(Err(_)) => Some(Err(SyncError::RemoteTask)),
            Err(_) => None,
        };
        outcome
    }
}

/// Coordinates at-most-one in-flight fetch per key.
///
/// The map lock is never held across a wait or any plugin I/O; contexts are
/// shared out as `Arc`s and removed as soon as the fetch side has published
/// its result.
pub struct FetchCoordinator<K, T> {
    tasks: Mutex<HashMap<K, Arc<TaskContext<T>>>>,
}

impl<K, T> FetchCoordinator<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    /// Coordinator with no in-flight fetches
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Look up or create the context for this key and report whether the
    /// caller owns the fetch.
    ///
    /// Exactly one concurrent caller per key observes `owns_fetch() ==
    /// true`; the atomic swap decides the winner even when several callers
    /// race past the map lookup together.
    pub async fn acquire(&self, key: K) -> FetchTask<T> {
        let ctx = {
            let mut tasks = self.tasks.lock().await;
            tasks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(TaskContext::new()))
                .clone()
        };
        let already = ctx.pasting.swap(true, Ordering::SeqCst);
        if already {
            debug!(?key, "joining in-flight fetch");
        }
        FetchTask {
            ctx,
            owns_fetch: !already,
        }
    }

    /// Publish the fetch outcome and release every waiter.
    ///
    /// The slot accepts exactly one value; a second completion for the same
    /// key is ignored so a late duplicate cannot rewrite what waiters
    /// already observed.
    pub async fn complete(&self, key: &K, outcome: Result<T, SyncError>) {
        let ctx = { self.tasks.lock().await.get(key).cloned() };
        let Some(ctx) = ctx else {
            warn!(?key, "completing a fetch that has no task context");
            return;
        };
        let published = ctx.slot.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(outcome);
                true
            } else {
                false
            }
        });
        if !published {
            debug!(?key, "fetch result already published, ignoring");
        }
    }

    /// Drop the context for this key.
    ///
    /// Called by the fetch side right after completing, success or failure,
    /// so contexts never outlive the operation that created them. Waiters
    /// holding the context through their [`FetchTask`] still observe the
    /// published result.
    pub async fn clear(&self, key: &K) {
        if self.tasks.lock().await.remove(key).is_some() {
            debug!(?key, "cleared fetch task");
        }
    }

    /// Number of keys currently tracked
    pub async fn in_flight(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

impl<K, T> Default for FetchCoordinator<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
