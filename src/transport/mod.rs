//! Clip transport plugin boundary
//!
//! The synchronization core does not move bytes between devices itself.
//! A host-provided [`ClipPlugin`] publishes and fetches serialized payloads
//! keyed by [`ClipEvent`] and enumerates the most recent events per user.
//! The plugin may come and go at runtime; [`PluginHandle`] is the slot the
//! rest of the crate reads it through.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::event::{ClipEvent, UserId};
use crate::record::EntryValue;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum PluginError {
    /// Transport-reported status code, passed through verbatim
    #[error("transport returned status {0}")]
    Status(i32),

    /// The attached transport does not implement this operation
    #[error("operation not supported by this transport: {0}")]
    Unsupported(&'static str),

    /// The remote side is unreachable
    #[error("transport offline: {0}")]
    Offline(String),

    /// Any other transport failure
    #[error("transport failure: {0}")]
    Other(String),
}

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

/// Pluggable channel moving serialized clipboard payloads between devices.
///
/// Implementations own the wire: reliability, framing, and routing are
/// theirs. The core only requires that a payload published for an event can
/// later be fetched with that same event as the key.
#[async_trait]
pub trait ClipPlugin: Send + Sync {
    /// Most recent published events for a user, newest first
    async fn get_top_events(&self, top_n: usize, user: UserId) -> Result<Vec<ClipEvent>>;

    /// Fetch the serialized payload for an event
    async fn get_paste_data(&self, event: &ClipEvent) -> Result<Bytes>;

    /// Publish a serialized payload under an event
    async fn set_paste_data(&self, event: &ClipEvent, payload: Bytes) -> Result<()>;

    /// Whether this transport can fetch individual delay-record values
    fn supports_delay_fetch(&self) -> bool {
        false
    }

    /// Fetch one delay record's value for an event
    async fn get_record_value(
        &self,
        event: &ClipEvent,
        record_id: u32,
        mime: &str,
    ) -> Result<EntryValue> {
        let _ = (event, record_id, mime);
        Err(PluginError::Unsupported("delay-record fetch"))
    }

    /// Signal local connectivity state to the device group
    async fn publish_state(&self, device_id: &str, online: bool) -> Result<()> {
        let _ = (device_id, online);
        Ok(())
    }
}

/// Slot holding the currently attached transport, if any.
///
/// A detached plugin is a normal state, not a panic: resolution reports it
/// as a distinct outcome and paste requests fall back to local data.
#[derive(Default)]
pub struct PluginHandle {
    inner: RwLock<Option<Arc<dyn ClipPlugin>>>,
}

impl PluginHandle {
    /// Empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the transport
    pub async fn attach(&self, plugin: Arc<dyn ClipPlugin>) {
        let mut inner = self.inner.write().await;
        if inner.replace(plugin).is_some() {
            info!("replacing attached clip transport");
        } else {
            info!("clip transport attached");
        }
    }

    /// Remove the transport; returns whether one was attached
    pub async fn detach(&self) -> bool {
        let was = self.inner.write().await.take().is_some();
        if was {
            info!("clip transport detached");
        }
        was
    }

    /// Current transport, if attached
    pub async fn get(&self) -> Option<Arc<dyn ClipPlugin>> {
        self.inner.read().await.clone()
    }

    /// Whether a transport is attached
    pub async fn is_attached(&self) -> bool {
        self.inner.read().await.is_some()
    }
}
