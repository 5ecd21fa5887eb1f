//! Core types for the ingestion pipeline

use chrono::{DateTime, NaiveDate, Utc};
use ludex_common::Fingerprint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Scan the entire upstream catalog from page 1
    Full,
    /// Resume from the last checkpoint / changed-since watermark
    Incremental,
}

impl RunKind {
    pub fn as_str(&self) -> &str {
        match self {
            RunKind::Full => "full",
            RunKind::Incremental => "incremental",
        }
    }
}

impl From<String> for RunKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "incremental" => RunKind::Incremental,
            _ => RunKind::Full,
        }
    }
}

/// Terminal and in-flight run states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    /// Completed, but some records were dropped for data-quality reasons
    Partial,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Partial => "partial",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "succeeded" => RunStatus::Succeeded,
            "failed" => RunStatus::Failed,
            "partial" => RunStatus::Partial,
            _ => RunStatus::Running,
        }
    }
}

/// One execution of the pipeline (maps to ingestion_runs)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionRun {
    pub id: Uuid,
    pub kind: RunKind,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages_completed: i32,
    pub records_inserted: i64,
    pub records_updated: i64,
    pub records_unchanged: i64,
    pub defects: i64,
    pub failure_reason: Option<String>,
}

/// Explicit pagination position, passed and returned between fetch calls.
///
/// Resume after a failure is a pure function of the last persisted cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    /// 1-based upstream page number
    pub page: u32,
    /// Optional `updated=from,to` window for changed-since scans
    pub updated_range: Option<String>,
}

impl PageCursor {
    pub fn first() -> Self {
        Self {
            page: 1,
            updated_range: None,
        }
    }

    pub fn changed_since(range: impl Into<String>) -> Self {
        Self {
            page: 1,
            updated_range: Some(range.into()),
        }
    }

    /// Cursor for the page after this one, same window
    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            updated_range: self.updated_range.clone(),
        }
    }
}

/// Durable marker of ingestion progress (maps to ingestion_checkpoints)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: Uuid,
    pub last_completed_page: u32,
    pub cursor: PageCursor,
}

impl Checkpoint {
    /// The cursor the next run should resume from
    pub fn resume_cursor(&self) -> PageCursor {
        PageCursor {
            page: self.last_completed_page + 1,
            updated_range: self.cursor.updated_range.clone(),
        }
    }
}

/// Reference to an archived raw page; write-once, content-addressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub key: String,
    pub sha256: String,
    pub size: i64,
}

/// A normalized, fingerprinted game record ready for classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub released: Option<NaiveDate>,
    pub updated: Option<DateTime<Utc>>,
    pub metacritic: Option<i32>,
    pub rating: Option<f64>,
    pub rating_top: Option<i32>,
    pub ratings_count: Option<i32>,
    pub reviews_text_count: Option<i32>,
    pub added: Option<i32>,
    pub suggestions_count: Option<i32>,
    pub reddit_count: Option<i32>,
    pub twitch_count: Option<i32>,
    pub youtube_count: Option<i32>,
    pub platforms: Option<Value>,
    pub metacritic_platforms: Option<Value>,
    pub esrb_rating: Option<Value>,
    pub added_by_status: Option<Value>,
    pub website: Option<String>,
    pub background_image: Option<String>,
    pub background_image_additional: Option<String>,
    pub content_fingerprint: Fingerprint,
}

/// Classification of one record against the pre-run fingerprint snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Updated,
    Unchanged,
}

/// Ephemeral classification result; never persisted beyond the run
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub entity_id: i64,
    pub kind: ChangeKind,
    pub previous_fingerprint: Option<Fingerprint>,
    pub new_fingerprint: Fingerprint,
}

/// Structured outcome of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub kind: RunKind,
    pub status: RunStatus,
    pub pages_completed: u32,
    pub records_seen: u64,
    pub records_inserted: u64,
    pub records_updated: u64,
    pub records_unchanged: u64,
    pub defects: u64,
    pub failure_reason: Option<String>,
}
