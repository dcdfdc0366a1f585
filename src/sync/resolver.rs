//! Remote event validity resolution
//!
//! Before any payload moves, the resolver decides whether the most recent
//! published event is worth fetching at all. The outcome is either a
//! routing decision (use the local clipboard) or a fetchable remote event;
//! everything else is a distinct error the caller folds into its fallback.

use std::sync::Arc;

use tracing::debug;

use crate::devices::DeviceRoster;
use crate::event::{now_millis, ClipEvent, UserId};
use crate::sync::SyncError;
use crate::transport::PluginHandle;

/// Where the next paste should come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Fetch this event's payload from its origin device
    Remote(ClipEvent),
    /// Serve the local clipboard; nothing remote is newer or applicable
    Local,
}

/// Decides fetchability of the newest published event for a user.
///
/// The check order is contractual: self-origin and expiration comparison
/// come before the roster lookup so the common local case never pays for
/// a trust query, and the same-publication re-check short-circuits before
/// status and staleness so a re-resolve of already-materialized data stays
/// cheap.
pub struct EventResolver {
    plugin: Arc<PluginHandle>,
    roster: Arc<dyn DeviceRoster>,
    local_device: String,
    local_account: String,
    top_n: usize,
}

impl EventResolver {
    pub fn new(
        plugin: Arc<PluginHandle>,
        roster: Arc<dyn DeviceRoster>,
        local_device: impl Into<String>,
        local_account: impl Into<String>,
        top_n: usize,
    ) -> Self {
        Self {
            plugin,
            roster,
            local_device: local_device.into(),
            local_account: local_account.into(),
            top_n: top_n.max(1),
        }
    }

    /// Resolve the newest event for `user` against the last materialized
    /// publication (`current`).
    pub async fn resolve(
        &self,
        user: UserId,
        current: Option<&ClipEvent>,
    ) -> Result<Resolution, SyncError> {
        let Some(plugin) = self.plugin.get().await else {
            return Err(SyncError::PluginUnavailable);
        };
        let mut events = plugin.get_top_events(self.top_n, user).await?;
        if events.is_empty() {
            return Err(SyncError::NoEvents);
        }
        let event = events.remove(0);
        self.classify(event, current).await
    }

    async fn classify(
        &self,
        event: ClipEvent,
        current: Option<&ClipEvent>,
    ) -> Result<Resolution, SyncError> {
        if event.device_id == self.local_device {
            return Ok(Resolution::Local);
        }
        if let Some(current) = current {
            if event.expiration < current.expiration {
                debug!(
                    seq_id = event.seq_id,
                    device_id = %event.device_id,
                    "top event is older than held state, staying local"
                );
                return Ok(Resolution::Local);
            }
        }
        if event.account != self.local_account {
            return Err(SyncError::AccountMismatch {
                remote: event.account,
                local: self.local_account.clone(),
            });
        }
        if !self.roster.is_online(&event.device_id).await {
            // Surface the roster's own reason when it has one
            self.roster.device_info(&event.device_id).await?;
            return Err(SyncError::UntrustedDevice(event.device_id));
        }
        if let Some(current) = current {
            if event.same_publication(current) {
                return Ok(Resolution::Local);
            }
        }
        if !event.status.is_actionable() {
            return Err(SyncError::InvalidStatus(event.status));
        }
        let now = now_millis();
        if event.is_expired(now) {
            return Err(SyncError::Expired {
                expired_at: event.expiration,
                now,
            });
        }
        Ok(Resolution::Remote(event))
    }
}
