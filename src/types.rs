//! Core data types shared across the view, coordinator, and sync layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An application record payload. DeltaSync does not interpret the shape —
/// it is opaque JSON, keyed by a string id the caller chooses.
pub type Payload = Value;

/// Reserved store names. Names beginning with a double underscore are the
/// convention reserved stores use so they can never collide with an
/// application-chosen store name (spec §6, "Persisted state layout").
pub const CHANGES_STORE: &str = "__delta_sync_changes";
pub const TOMBSTONES_STORE: &str = "__delta_sync_tombstones";
pub const VIEW_SNAPSHOT_KEY: &str = "__delta_sync_view";
pub const ATTACHMENTS_STORE: &str = "__delta_sync_attachments";
pub const VERSION_COUNTER_KEY: &str = "__delta_sync_version_counter";

/// Default tombstone retention window: 180 days.
pub const DEFAULT_RETENTION_SECS: i64 = 180 * 24 * 60 * 60;

// ============================================================================
// Attachment
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Set when the binary referenced by this attachment could not be
    /// located at transfer time (spec §3, §4.4's attachment protocol).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_at: Option<DateTime<Utc>>,
    /// The record this attachment is embedded on, if it was added through
    /// `attach_file` rather than uploaded standalone. Lets a later transfer
    /// find and patch the owning record's `attachments` list without a
    /// full-store scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_store: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

// ============================================================================
// DataChange
// ============================================================================

/// A single journaled mutation. Canonical shape chosen per spec.md §9's
/// open question ("pick one canonical shape and translate at adapter
/// boundaries") — plain field names, no leading-underscore legacy aliases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataChange {
    pub id: String,
    pub store: String,
    pub version: u64,
    pub operation: ChangeOp,
    /// Post-state snapshot for `Put`; `None` for `Delete`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Put,
    Delete,
}

/// Puts and deletes bound for a peer, grouped for `extract_changes`/
/// `apply_changes` (spec §4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataChangeSet {
    pub store: String,
    pub changes: Vec<DataChange>,
}

// ============================================================================
// SyncViewItem
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SyncKey {
    pub store: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncViewItem {
    pub store: String,
    pub id: String,
    pub version: u64,
    pub deleted: bool,
    pub is_attachment: bool,
}

impl SyncViewItem {
    pub fn key(&self) -> SyncKey {
        SyncKey {
            store: self.store.clone(),
            id: self.id.clone(),
        }
    }
}

// ============================================================================
// Query / scan options
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Return only items whose SyncView version is strictly greater than
    /// this cursor.
    pub since: Option<u64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

// ============================================================================
// Bulk file operation results (spec §4.1)
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct BulkFileResult {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

// ============================================================================
// Change notification
// ============================================================================

#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Put { store: String, ids: Vec<String> },
    Delete { store: String, ids: Vec<String> },
    Remote { store: String, ids: Vec<String> },
}

// ============================================================================
// Status (spec §6)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Error = -2,
    Offline = -1,
    Idle = 0,
    Uploading = 1,
    Downloading = 2,
    Operating = 3,
    Maintaining = 4,
}

// ============================================================================
// Maintenance options
// ============================================================================

#[derive(Debug, Clone)]
pub struct MaintenanceOptions {
    pub retention_secs: i64,
    pub batch_size: usize,
}

impl Default for MaintenanceOptions {
    fn default() -> Self {
        Self {
            retention_secs: DEFAULT_RETENTION_SECS,
            batch_size: 500,
        }
    }
}
