//! Per-user reconciliation cache
//!
//! Tracks, for each user, the event whose payload the clipboard currently
//! reflects and the materialized data itself. Local copies and promoted
//! remote fetches both land here; a write timestamp arbitrates the race
//! between a local copy and a fetch that was already in flight when the
//! copy happened.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::event::{now_millis, ClipEvent, UserId};
use crate::record::{EntryValue, PasteData};

#[derive(Debug, Default)]
struct UserSlot {
    /// Publication the cached data belongs to
    event: Option<ClipEvent>,
    /// Materialized paste data, possibly with unfilled delay entries
    data: PasteData,
    /// Millis timestamp of the last accepted write, local or promoted
    last_write: i64,
}

/// Cache of the latest reconciled paste state per user
#[derive(Debug, Default)]
pub struct PasteCache {
    users: RwLock<HashMap<UserId, UserSlot>>,
}

impl PasteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publication the cache currently holds data for, if any
    pub async fn current_event(&self, user: UserId) -> Option<ClipEvent> {
        self.users
            .read()
            .await
            .get(&user)
            .and_then(|slot| slot.event.clone())
    }

    /// Snapshot of the cached data; empty when the user has no state
    pub async fn cached_data(&self, user: UserId) -> PasteData {
        self.users
            .read()
            .await
            .get(&user)
            .map(|slot| slot.data.clone())
            .unwrap_or_default()
    }

    /// Record a local copy: the clipboard now reflects this publication.
    ///
    /// Stamps the write time so an in-flight remote fetch that started
    /// before this call cannot replace the newer local content.
    pub async fn set_local(&self, user: UserId, event: ClipEvent, data: PasteData) {
        let mut users = self.users.write().await;
        let slot = users.entry(user).or_default();
        slot.event = Some(event);
        slot.data = data;
        slot.data.is_remote = false;
        slot.last_write = now_millis();
    }

    /// Install a fetched remote payload, unless a local write landed after
    /// the fetch started.
    ///
    /// Returns whether the promotion was applied. A skipped promotion is
    /// not an error: the caller still hands the fetched data to whoever
    /// asked for it, the cache just keeps the newer local state.
    pub async fn promote_remote(
        &self,
        user: UserId,
        event: ClipEvent,
        data: PasteData,
        fetch_started_at: i64,
    ) -> bool {
        let mut users = self.users.write().await;
        let slot = users.entry(user).or_default();
        if slot.last_write > fetch_started_at {
            debug!(
                user,
                device_id = %event.device_id,
                seq_id = event.seq_id,
                "local write beat remote fetch, keeping local state"
            );
            return false;
        }
        slot.event = Some(event);
        slot.data = data;
        slot.last_write = now_millis();
        true
    }

    /// Write a lazily fetched delay value into the cached record.
    ///
    /// Returns false when the user has no cached data or the record is
    /// gone, which means the cache moved on while the value was fetched.
    pub async fn fill_record_entry(
        &self,
        user: UserId,
        record_id: u32,
        mime_type: &str,
        value: EntryValue,
    ) -> bool {
        let mut users = self.users.write().await;
        let Some(slot) = users.get_mut(&user) else {
            return false;
        };
        match slot.data.record_mut(record_id) {
            Some(record) => record.fill_entry(mime_type, value),
            None => false,
        }
    }

    /// Drop everything cached for this user
    pub async fn evict(&self, user: UserId) {
        if self.users.write().await.remove(&user).is_some() {
            debug!(user, "evicted cached paste state");
        }
    }
}
