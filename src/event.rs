//! Clipboard publication events
//!
//! A [`ClipEvent`] is the compact descriptor one device broadcasts when its
//! clipboard changes. Peers use it to decide whether a payload fetch is
//! worthwhile without ever transferring the payload itself.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Local account identifier owning a clipboard session
pub type UserId = i32;

/// Lifecycle status of a published event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventStatus {
    /// Status not yet determined by the publisher
    Unknown,

    /// Publisher withdrew or superseded the event
    Invalid,

    /// Event is live and its payload may be fetched
    Normal,
}

impl Default for EventStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl EventStatus {
    /// Only `Normal` events are actionable for a fetch
    pub fn is_actionable(self) -> bool {
        matches!(self, Self::Normal)
    }
}

/// One clipboard-publication instant on some device.
///
/// Immutable once published. Two events describe the same fetch unit when
/// their `(device_id, seq_id)` pair matches; they describe the same
/// publication when the expiration matches as well (a device may republish
/// a sequence number with a fresh expiration after a restart).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipEvent {
    /// Owning local-account identifier
    pub user: UserId,

    /// Per-device monotonically increasing sequence number
    pub seq_id: u64,

    /// Identifier of the publishing device
    pub device_id: String,

    /// Logical account the event belongs to
    pub account: String,

    /// Absolute epoch-millis after which the event must not be treated as current
    pub expiration: i64,

    /// Publisher-side lifecycle status
    pub status: EventStatus,

    /// Correlates the event to one payload version on the origin device
    pub data_id: u64,

    /// MIME types present in the payload, for cheap capability checks
    pub data_types: Vec<String>,

    /// Whether the payload carries records that need a secondary per-record fetch
    pub is_delay: bool,
}

impl ClipEvent {
    /// Create an event with the given identity; remaining fields start empty
    pub fn new(
        user: UserId,
        seq_id: u64,
        device_id: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            user,
            seq_id,
            device_id: device_id.into(),
            account: account.into(),
            expiration: 0,
            status: EventStatus::default(),
            data_id: 0,
            data_types: Vec::new(),
            is_delay: false,
        }
    }

    /// Same fetch unit: `(device_id, seq_id)` equality
    pub fn same_source(&self, other: &ClipEvent) -> bool {
        self.device_id == other.device_id && self.seq_id == other.seq_id
    }

    /// Same publication: `(device_id, seq_id, expiration)` equality.
    ///
    /// The expiration is part of the identity so a republished sequence
    /// number is never mistaken for the copy already materialized.
    pub fn same_publication(&self, other: &ClipEvent) -> bool {
        self.same_source(other) && self.expiration == other.expiration
    }

    /// Whether the event is stale at the given wall-clock instant
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiration <= now_ms
    }

    /// Whether the payload advertises the given MIME type
    pub fn has_type(&self, mime: &str) -> bool {
        self.data_types.iter().any(|t| t == mime)
    }
}

/// Current wall-clock time in epoch milliseconds
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
