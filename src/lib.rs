//! # PasteBridge
//!
//! Distributed clipboard paste-data synchronization core.
//!
//! One device publishes a compact [`event::ClipEvent`] when its clipboard
//! changes; peers resolve whether that event is worth fetching, coordinate
//! so at most one fetch runs per publication, and reconcile the fetched
//! payload with their own local clipboard state. The actual byte transport
//! is pluggable; see [`transport::ClipPlugin`].

pub mod cli;
pub mod config;
pub mod devices;
pub mod event;
pub mod record;
pub mod sync;
pub mod transport;

pub use config::Config;
pub use event::{ClipEvent, EventStatus, UserId};
pub use record::{EntryValue, PasteData, PasteRecord};
pub use sync::{PasteEngine, PasteResponse, SyncError};
pub use transport::ClipPlugin;

/// Result type alias for PasteBridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for PasteBridge operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Synchronization error
    #[error("Sync error: {0}")]
    Sync(#[from] sync::SyncError),

    /// Transport plugin error
    #[error("Transport error: {0}")]
    Transport(#[from] transport::PluginError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum clipboard payload size accepted for sync (5MB default)
pub const MAX_PAYLOAD_SIZE: usize = 5 * 1024 * 1024;
