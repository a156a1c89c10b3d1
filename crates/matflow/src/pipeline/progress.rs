//! Per-job progress journal.
//!
//! Each job owns one `pending` task record whose content is the rendered
//! step log. Every [`ProgressRecorder::append`] re-persists that record
//! through an update filtered on `(job_id, status = pending)`; reaching a
//! terminal state inserts a second record carrying the final status.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::store::{MetadataStore, PersistenceError, TaskRecord, TaskStatus};

const EVENT_CAPACITY: usize = 256;

pub const START_MESSAGE: &str = "Starting conversion task";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// 1-based position in the job's log.
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLog {
    pub material_id: String,
    pub total_steps: usize,
    pub entries: Vec<LogEntry>,
}

impl ProgressLog {
    pub fn new(material_id: &str, total_steps: usize) -> Self {
        Self {
            material_id: material_id.to_string(),
            total_steps,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, message: impl Into<String>) -> &LogEntry {
        let index = self.entries.len() + 1;
        self.entries.push(LogEntry {
            index,
            timestamp: Utc::now(),
            message: message.into(),
        });
        &self.entries[index - 1]
    }

    /// Serialized form stored as the task record's content.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("- [Step {}/{}] {}\n", e.index, self.total_steps, e.message))
            .collect()
    }
}

/// A progress transition, fanned out to live subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: String,
    pub material_id: String,
    pub status: TaskStatus,
    pub entry: LogEntry,
}

pub struct ProgressRecorder {
    store: Arc<dyn MetadataStore>,
    logs: RwLock<HashMap<String, ProgressLog>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl ProgressRecorder {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            logs: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    fn logs_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, ProgressLog>> {
        match self.logs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Progress log lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Jobs that have started but not yet finished.
    pub fn in_flight(&self) -> usize {
        match self.logs.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Creates the job's pending record with its first log entry.
    pub fn start(
        &self,
        job_id: &str,
        material_id: &str,
        total_steps: usize,
    ) -> Result<(), PersistenceError> {
        let mut log = ProgressLog::new(material_id, total_steps);
        let entry = log.push(START_MESSAGE).clone();
        let content = log.render();

        self.store.insert_task(&TaskRecord::new(
            job_id,
            material_id,
            content,
            TaskStatus::Pending,
        ))?;
        self.logs_mut().insert(job_id.to_string(), log);
        self.publish(job_id, material_id, TaskStatus::Pending, entry);
        Ok(())
    }

    /// Appends a line and re-persists the pending record.
    ///
    /// Returns `false` without touching the store when the job has no open
    /// log, or when the store had no pending record left to update.
    pub fn append(
        &self,
        job_id: &str,
        material_id: &str,
        line: &str,
    ) -> Result<bool, PersistenceError> {
        let (entry, content) = {
            let mut logs = self.logs_mut();
            let Some(log) = logs.get_mut(job_id) else {
                log::debug!("Ignoring progress line for job {} with no open log", job_id);
                return Ok(false);
            };
            let entry = log.push(line).clone();
            (entry, log.render())
        };

        let matched = self.store.update_pending_task(job_id, &content)?;
        if !matched {
            log::warn!("No pending task record left for job {}", job_id);
        }
        self.publish(job_id, material_id, TaskStatus::Pending, entry);
        Ok(matched)
    }

    /// Closes the job's log and records its terminal state.
    ///
    /// Returns `false` when the job was already finished or never started.
    pub fn finish(
        &self,
        job_id: &str,
        material_id: &str,
        status: TaskStatus,
        summary_line: &str,
    ) -> Result<bool, PersistenceError> {
        if !status.is_terminal() {
            log::warn!("Refusing to finish job {} with non-terminal status", job_id);
            return Ok(false);
        }

        let Some(log) = self.logs_mut().remove(job_id) else {
            log::debug!("Job {} is already finished", job_id);
            return Ok(false);
        };

        // The terminal record matters more than the final snapshot.
        if let Err(e) = self.store.update_pending_task(job_id, &log.render()) {
            log::warn!("Failed to save final log snapshot for job {}: {}", job_id, e);
        }
        if let Err(e) = self.store.insert_task(&TaskRecord::new(
            job_id,
            material_id,
            summary_line.to_string(),
            status,
        )) {
            // Keep the log open so the caller can retry.
            self.logs_mut().insert(job_id.to_string(), log);
            return Err(e);
        }

        let entry = LogEntry {
            index: log.entries.len() + 1,
            timestamp: Utc::now(),
            message: summary_line.to_string(),
        };
        self.publish(job_id, material_id, status, entry);
        Ok(true)
    }

    fn publish(&self, job_id: &str, material_id: &str, status: TaskStatus, entry: LogEntry) {
        // No subscribers is fine.
        let _ = self.events.send(ProgressEvent {
            job_id: job_id.to_string(),
            material_id: material_id.to_string(),
            status,
            entry,
        });
    }
}
