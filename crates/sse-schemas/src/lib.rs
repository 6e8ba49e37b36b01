use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod cursor;

pub use cursor::Cursor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub raw: Value,
    pub api_key_hashes: Vec<String>,
    pub first_synced_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectRunStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl ObjectRunStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            ObjectRunStatus::Pending => "pending",
            ObjectRunStatus::Running => "running",
            ObjectRunStatus::Complete => "complete",
            ObjectRunStatus::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ObjectRunStatus::Pending),
            "running" => Some(ObjectRunStatus::Running),
            "complete" => Some(ObjectRunStatus::Complete),
            "error" => Some(ObjectRunStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ObjectRunStatus::Complete | ObjectRunStatus::Error)
    }
}

/// `(account_id, started_at)` is the natural key. `closed_at` is null while active;
/// an exclusion constraint (enforced in the schema, not here) forbids a second active
/// row for the same account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub account_id: String,
    pub started_at: DateTime<Utc>,
    pub max_concurrent: i32,
    pub closed_at: Option<DateTime<Utc>>,
    pub triggered_by: String,
}

impl SyncRun {
    pub fn is_active(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// `(account_id, run_started_at, object_name)` is the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRun {
    pub account_id: String,
    pub run_started_at: DateTime<Utc>,
    pub object_name: String,
    pub status: ObjectRunStatus,
    pub processed_count: i64,
    pub cursor: Option<String>,
    pub page_cursor: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedWebhook {
    pub id: String,
    pub account_id: String,
    pub url: String,
    pub signing_secret: String,
    pub enabled_events: Vec<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Result of one `process_next` call, returned all the way up to a queue worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProcessNextOutcome {
    pub processed: i64,
    pub has_more: bool,
    pub run_started_at: DateTime<Utc>,
}

pub const DEADMAN_STALE_AFTER_SECS: i64 = 5 * 60;
pub const DEFAULT_MAX_CONCURRENT_OBJECT_RUNS: i32 = 1;
pub const DEFAULT_UPSERT_CHUNK_SIZE: usize = 5;
pub const DEFAULT_MAX_CONCURRENT_CUSTOMERS: usize = 10;
pub const DEFAULT_PAGE_SIZE: i64 = 100;
