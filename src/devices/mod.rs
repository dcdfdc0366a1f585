//! Trusted device roster
//!
//! The synchronization core never discovers devices itself; the host
//! service supplies a [`DeviceRoster`] describing which devices are
//! currently trusted and reachable. [`StaticRoster`] is the in-memory
//! implementation used by tests and simple embeddings.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::event::now_millis;

/// Roster lookup errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// Device is not known to the roster
    #[error("device '{0}' is not in the trusted device list")]
    NotFound(String),

    /// Device is known but its trust was revoked
    #[error("trust for device '{0}' has been revoked")]
    Untrusted(String),
}

/// Descriptor of a trusted device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable device identifier
    pub device_id: String,

    /// Human-readable name
    pub device_name: String,

    /// Whether the device is currently reachable
    pub online: bool,

    /// Last time the device was seen, epoch millis
    pub last_seen: i64,
}

/// Source of device trust and reachability decisions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceRoster: Send + Sync {
    /// Whether the device is trusted and currently reachable
    async fn is_online(&self, device_id: &str) -> bool;

    /// Full descriptor for a device, or why it cannot be used
    async fn device_info(&self, device_id: &str) -> Result<DeviceInfo, DeviceError>;
}

struct RosterEntry {
    info: DeviceInfo,
    trusted: bool,
}

/// In-memory roster maintained by the host service
#[derive(Default)]
pub struct StaticRoster {
    devices: RwLock<HashMap<String, RosterEntry>>,
}

impl StaticRoster {
    /// Empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or refresh a trusted device, marked online
    pub async fn add(&self, device_id: impl Into<String>, device_name: impl Into<String>) {
        let device_id = device_id.into();
        let mut devices = self.devices.write().await;
        devices.insert(
            device_id.clone(),
            RosterEntry {
                info: DeviceInfo {
                    device_id,
                    device_name: device_name.into(),
                    online: true,
                    last_seen: now_millis(),
                },
                trusted: true,
            },
        );
    }

    /// Flip a device's reachability
    pub async fn set_online(&self, device_id: &str, online: bool) {
        let mut devices = self.devices.write().await;
        if let Some(entry) = devices.get_mut(device_id) {
            entry.info.online = online;
            if online {
                entry.info.last_seen = now_millis();
            }
        }
    }

    /// Keep the device but drop its trust
    pub async fn revoke(&self, device_id: &str) {
        let mut devices = self.devices.write().await;
        if let Some(entry) = devices.get_mut(device_id) {
            debug!(device_id, "revoking device trust");
            entry.trusted = false;
        }
    }

    /// Forget a device entirely
    pub async fn remove(&self, device_id: &str) {
        self.devices.write().await.remove(device_id);
    }

    /// Snapshot of all trusted devices
    pub async fn all(&self) -> Vec<DeviceInfo> {
        let devices = self.devices.read().await;
        devices
            .values()
            .filter(|e| e.trusted)
            .map(|e| e.info.clone())
            .collect()
    }
}

#[async_trait]
impl DeviceRoster for StaticRoster {
    async fn is_online(&self, device_id: &str) -> bool {
        let devices = self.devices.read().await;
        devices
            .get(device_id)
            .map(|e| e.trusted && e.info.online)
            .unwrap_or(false)
    }

    async fn device_info(&self, device_id: &str) -> Result<DeviceInfo, DeviceError> {
        let devices = self.devices.read().await;
        match devices.get(device_id) {
            Some(entry) if entry.trusted => Ok(entry.info.clone()),
            Some(_) => Err(DeviceError::Untrusted(device_id.to_string())),
            None => Err(DeviceError::NotFound(device_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_lookup() {
        let roster = StaticRoster::new();
        roster.add("phone", "Pixel").await;

        assert!(roster.is_online("phone").await);
        let info = roster.device_info("phone").await.unwrap();
        assert_eq!(info.device_name, "Pixel");
        assert!(info.online);
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let roster = StaticRoster::new();
        assert!(!roster.is_online("ghost").await);
        assert_eq!(
            roster.device_info("ghost").await,
            Err(DeviceError::NotFound("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn removed_device_is_forgotten() {
        let roster = StaticRoster::new();
        roster.add("phone", "Pixel").await;
        assert!(roster.is_online("phone").await);

        roster.remove("phone").await;
        assert!(!roster.is_online("phone").await);
        assert_eq!(
            roster.device_info("phone").await,
            Err(DeviceError::NotFound("phone".to_string()))
        );
    }

    #[tokio::test]
    async fn revoked_device_is_untrusted() {
        let roster = StaticRoster::new();
        roster.add("tablet", "Tab").await;
        roster.revoke("tablet").await;

        assert!(!roster.is_online("tablet").await);
        assert_eq!(
            roster.device_info("tablet").await,
            Err(DeviceError::Untrusted("tablet".to_string()))
        );
    }

    #[tokio::test]
    async fn offline_flag_flips_reachability() {
        let roster = StaticRoster::new();
        roster.add("laptop", "Book").await;
        roster.set_online("laptop", false).await;

        assert!(!roster.is_online("laptop").await);
        // Still trusted, so lookups succeed
        assert!(roster.device_info("laptop").await.is_ok());

        roster.set_online("laptop", true).await;
        assert!(roster.is_online("laptop").await);
    }

    #[tokio::test]
    async fn snapshot_excludes_revoked() {
        let roster = StaticRoster::new();
        roster.add("a", "A").await;
        roster.add("b", "B").await;
        roster.revoke("b").await;

        let all = roster.all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].device_id, "a");
    }
}
