//! Paste payload model
//!
//! [`PasteData`] is the materialized form of a clipboard publication: an
//! ordered sequence of typed records plus provenance. Records may arrive
//! with their content withheld (`is_delay`) and be filled one at a time by
//! a secondary fetch; until then the entry value is the `Empty` placeholder.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::event::{now_millis, ClipEvent, UserId};

/// Authority segment marking a URI already rebased into the local namespace
const DISTRIBUTED_AUTHORITY: &str = "distributed";

/// Screen state captured when a payload was created
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScreenStatus {
    /// Not reported by the creating host
    Unknown,
    /// Device was locked at creation time
    Locked,
    /// Device was unlocked at creation time
    Unlocked,
}

impl Default for ScreenStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

/// A typed record value, resolved eagerly at decode time.
///
/// `Empty` is the placeholder a delay record holds until its per-record
/// fetch completes; every other variant is immediately usable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum EntryValue {
    /// No content yet (delay placeholder or cleared record)
    Empty,

    /// Plain text
    Text(String),

    /// HTML markup
    Html(String),

    /// A URI reference
    Uri(String),

    /// Opaque bytes for any other MIME type
    Bytes(Vec<u8>),
}

impl EntryValue {
    /// Whether this value still awaits its content
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Text view of the value, if it has one
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Html(s) | Self::Uri(s) => Some(s),
            Self::Empty | Self::Bytes(_) => None,
        }
    }

    /// Approximate in-memory size in bytes
    pub fn size(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Text(s) | Self::Html(s) | Self::Uri(s) => s.len(),
            Self::Bytes(b) => b.len(),
        }
    }
}

/// One typed value slot inside a record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordEntry {
    /// MIME type this entry satisfies
    pub mime_type: String,

    /// The entry content
    pub value: EntryValue,
}

/// One clipboard record: a MIME type, an optional embedded URI, and the
/// typed entries carrying (or awaiting) the content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasteRecord {
    /// Record identifier, unique within its payload
    pub id: u32,

    /// Primary MIME type of the record
    pub mime_type: String,

    /// Embedded URI, if the record references one
    pub uri: Option<String>,

    /// Typed values (lazily populated for delay records)
    pub entries: Vec<RecordEntry>,

    /// Content withheld by the publisher; requires a per-record fetch
    pub is_delay: bool,

    /// The embedded URI was rewritten from a remote namespace
    pub remote_uri_converted: bool,
}

impl PasteRecord {
    /// Plain-text record
    pub fn text(id: u32, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id,
            mime_type: "text/plain".to_string(),
            uri: None,
            entries: vec![RecordEntry {
                mime_type: "text/plain".to_string(),
                value: EntryValue::Text(text),
            }],
            is_delay: false,
            remote_uri_converted: false,
        }
    }

    /// HTML record
    pub fn html(id: u32, markup: impl Into<String>) -> Self {
        Self {
            id,
            mime_type: "text/html".to_string(),
            uri: None,
            entries: vec![RecordEntry {
                mime_type: "text/html".to_string(),
                value: EntryValue::Html(markup.into()),
            }],
            is_delay: false,
            remote_uri_converted: false,
        }
    }

    /// Record referencing a URI (file handle, shared object)
    pub fn uri(id: u32, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            id,
            mime_type: "text/uri".to_string(),
            uri: Some(uri.clone()),
            entries: vec![RecordEntry {
                mime_type: "text/uri".to_string(),
                value: EntryValue::Uri(uri),
            }],
            is_delay: false,
            remote_uri_converted: false,
        }
    }

    /// Delay record: the type is known, the content arrives on demand
    pub fn delay(id: u32, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        Self {
            id,
            mime_type: mime_type.clone(),
            uri: None,
            entries: vec![RecordEntry {
                mime_type,
                value: EntryValue::Empty,
            }],
            is_delay: true,
            remote_uri_converted: false,
        }
    }

    /// Entry value for the given MIME type, if present
    pub fn value_for(&self, mime: &str) -> Option<&EntryValue> {
        self.entries
            .iter()
            .find(|e| e.mime_type == mime)
            .map(|e| &e.value)
    }

    /// Store a fetched value into the matching entry slot.
    ///
    /// Returns false when the record has no entry for that MIME type.
    pub fn fill_entry(&mut self, mime: &str, value: EntryValue) -> bool {
        match self.entries.iter_mut().find(|e| e.mime_type == mime) {
            Some(entry) => {
                entry.value = value;
                true
            }
            None => false,
        }
    }
}

/// A fully described clipboard payload: ordered records plus provenance
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasteData {
    /// Ordered records making up the payload
    pub records: Vec<PasteRecord>,

    /// Payload was materialized from a remote device
    pub is_remote: bool,

    /// Application that created the payload
    pub bundle_name: String,

    /// Screen state at creation time
    pub screen_status: ScreenStatus,

    /// Token of the creating caller
    pub token_id: u64,

    /// Creation timestamp, epoch millis
    pub created_at: i64,

    /// Payload version this data corresponds to
    pub data_id: u64,
}

impl PasteData {
    /// Payload with the given records, stamped with the current time
    pub fn with_records(records: Vec<PasteRecord>) -> Self {
        Self {
            records,
            created_at: now_millis(),
            ..Self::default()
        }
    }

    /// Single plain-text payload
    pub fn text(text: impl Into<String>) -> Self {
        Self::with_records(vec![PasteRecord::text(0, text)])
    }

    /// Whether any record carries the given MIME type
    pub fn has_mime_type(&self, mime: &str) -> bool {
        self.records.iter().any(|r| r.mime_type == mime)
    }

    /// Distinct MIME types across records, in record order
    pub fn mime_types(&self) -> Vec<String> {
        let mut types = Vec::new();
        for record in &self.records {
            if !types.contains(&record.mime_type) {
                types.push(record.mime_type.clone());
            }
        }
        types
    }

    /// Number of records
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Whether the payload carries no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Text of the first plain-text record, if any
    pub fn primary_text(&self) -> Option<&str> {
        self.records
            .iter()
            .filter(|r| r.mime_type == "text/plain")
            .find_map(|r| r.value_for("text/plain"))
            .and_then(|v| v.as_text())
    }

    /// Whether any record still awaits a per-record fetch
    pub fn has_delay_records(&self) -> bool {
        self.records.iter().any(|r| r.is_delay)
    }

    /// Mutable record lookup by id
    pub fn record_mut(&mut self, id: u32) -> Option<&mut PasteRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    /// Record lookup by id
    pub fn record(&self, id: u32) -> Option<&PasteRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Approximate payload size in bytes
    pub fn size(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.entries.iter().map(|e| e.value.size()).sum::<usize>())
            .sum()
    }

    /// Stamp remote provenance from the event the payload was fetched for
    pub fn mark_remote(&mut self, event: &ClipEvent) {
        self.is_remote = true;
        self.data_id = event.data_id;
    }

    /// Rebase every embedded URI into the local user's namespace and mark
    /// each URI-bearing record as converted. Returns the number of records
    /// touched.
    pub fn convert_remote_uris(&mut self, user: UserId) -> usize {
        let mut converted = 0;
        for record in &mut self.records {
            let mut touched = false;
            if let Some(uri) = &record.uri {
                if let Some(local) = to_local_namespace(uri, user) {
                    record.uri = Some(local);
                }
                touched = true;
            }
            for entry in &mut record.entries {
                if let EntryValue::Uri(uri) = &entry.value {
                    if let Some(local) = to_local_namespace(uri, user) {
                        entry.value = EntryValue::Uri(local);
                    }
                    touched = true;
                }
            }
            if touched {
                record.remote_uri_converted = true;
                converted += 1;
            }
        }
        converted
    }

    /// Serialize for the transport boundary
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Deserialize from the transport boundary
    pub fn from_bytes(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// Rebase a `file://` URI under the local user's distributed namespace.
///
/// Returns `None` when the URI is not file-scheme or is already rebased;
/// applying the rewrite a second time is therefore a no-op.
pub fn to_local_namespace(uri: &str, user: UserId) -> Option<String> {
    let rest = uri.strip_prefix("file://")?;
    let path = rest.trim_start_matches('/');
    if path == DISTRIBUTED_AUTHORITY
        || path.starts_with(&format!("{DISTRIBUTED_AUTHORITY}/"))
    {
        return None;
    }
    Some(format!("file://{DISTRIBUTED_AUTHORITY}/{user}/{path}"))
}
