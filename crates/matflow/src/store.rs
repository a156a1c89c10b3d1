//! Metadata store contract and the records that cross it.
//!
//! The pipeline only talks to [`MetadataStore`]; `db::Database` is the
//! SQLite-backed implementation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("Record already exists: {0}")]
    Duplicate(String),

    #[error("Metadata store write failed: {0}")]
    Write(String),

    #[error("Metadata store read failed: {0}")]
    Read(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Success => "success",
            TaskStatus::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "success" => Ok(TaskStatus::Success),
            "failure" => Ok(TaskStatus::Failure),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// One row of a job's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub job_id: String,
    pub material_id: String,
    pub content: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(job_id: &str, material_id: &str, content: String, status: TaskStatus) -> Self {
        Self {
            job_id: job_id.to_string(),
            material_id: material_id.to_string(),
            content,
            status,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub material_id: String,
    pub user_id: String,
    pub filename: String,
    pub content_type: String,
    pub num_page: u32,
    /// Caller-supplied metadata, stored verbatim.
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLink {
    pub page: u32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub summary_id: String,
    pub material_id: String,
    pub content: String,
    pub prompt_token_count: u32,
    pub thoughts_token_count: u32,
    pub total_token_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub material_id: String,
    pub star_level: u8,
    pub count: u32,
}

impl RatingRecord {
    /// The five zero-count rows every new material starts with.
    pub fn initial_for(material_id: &str) -> Vec<RatingRecord> {
        (1..=5)
            .map(|star_level| RatingRecord {
                material_id: material_id.to_string(),
                star_level,
                count: 0,
            })
            .collect()
    }
}

/// Everything written for a material once all of its pages are uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialBundle {
    pub material: MaterialRecord,
    pub pages: Vec<PageLink>,
    pub summary: SummaryRecord,
    pub ratings: Vec<RatingRecord>,
}

/// Durable storage for job status and finished materials.
///
/// Implementations must be safe to share between worker threads.
pub trait MetadataStore: Send + Sync {
    fn insert_task(&self, task: &TaskRecord) -> Result<(), PersistenceError>;

    /// Overwrites the content of the job's record that is still `pending`.
    ///
    /// Returns `false` when no pending record matched.
    fn update_pending_task(&self, job_id: &str, content: &str) -> Result<bool, PersistenceError>;

    /// All records for a job, oldest first.
    fn task_history(&self, job_id: &str) -> Result<Vec<TaskRecord>, PersistenceError>;

    /// Newest records first.
    fn recent_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>, PersistenceError>;

    /// Writes material, pages, summary and ratings, in that order, atomically.
    fn persist_material(&self, bundle: &MaterialBundle) -> Result<(), PersistenceError>;
}
