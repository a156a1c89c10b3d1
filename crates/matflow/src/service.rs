//! Job submission and status queries on top of the worker pool.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::adapters::Adapters;
use crate::config::{resolve_database_path, Config};
use crate::db::Database;
use crate::error::{ValidationError, WorkerError};
use crate::pipeline::{Pipeline, PipelineConfig, ProgressEvent};
use crate::store::{MetadataStore, PersistenceError, TaskRecord, TaskStatus};
use crate::worker::{Job, JobInput, JobResult, WorkerPool};

pub const PENDING_STATUS: &str = "Pending...";
pub const DEFAULT_RECENT_LIMIT: usize = 5;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Unknown job '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResult {
    pub message: String,
    pub material_id: String,
}

/// What a status query reports for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobState {
    Pending { status: String },
    Success { result: SuccessResult },
    Failure { status: String },
}

impl JobState {
    fn pending() -> Self {
        JobState::Pending {
            status: PENDING_STATUS.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending { .. })
    }

    fn from_result(result: &JobResult) -> Self {
        if result.success {
            JobState::Success {
                result: SuccessResult {
                    message: result.message.clone().unwrap_or_default(),
                    material_id: result.material_id.clone(),
                },
            }
        } else {
            JobState::Failure {
                status: result.error.clone().unwrap_or_default(),
            }
        }
    }
}

/// Results older than this are dropped if nobody waits for or polls them.
const MAX_UNCLAIMED_RESULTS: usize = 1024;

pub struct JobService {
    pipeline: Arc<Pipeline>,
    pool: WorkerPool,
    board: Arc<ResultBoard>,
    collector: JoinHandle<()>,
}

impl JobService {
    pub fn new(pipeline: Arc<Pipeline>, worker_count: usize) -> Result<Self, WorkerError> {
        let pool = WorkerPool::new(Arc::clone(&pipeline), worker_count)?;
        let board = Arc::new(ResultBoard::default());

        let results = pool.results();
        let collector_board = Arc::clone(&board);
        let collector = thread::Builder::new()
            .name("matflow-results".to_string())
            .spawn(move || collect_results(results, collector_board))
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        Ok(Self {
            pipeline,
            pool,
            board,
            collector,
        })
    }

    /// Opens the database, builds every adapter and starts the workers.
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let db_path = resolve_database_path(config);
        let store = Arc::new(Database::open(&db_path)?);
        let adapters = Adapters::from_config(config, store)?;
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(PipelineConfig::from_config(config)),
            adapters,
        ));
        Ok(Self::new(pipeline, config.worker_count)?)
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Validates and enqueues a job, returning its id.
    pub fn submit(&self, input: JobInput) -> Result<String, ServiceError> {
        let job = Job::from_input(input, self.pipeline.config().default_quality)?;
        let job_id = job.id.clone();

        self.board.lock().queued.insert(job_id.clone());
        if let Err(e) = self.pool.submit(job) {
            self.board.lock().queued.remove(&job_id);
            return Err(e.into());
        }

        tracing::info!(job_id = %job_id, "Job submitted");
        Ok(job_id)
    }

    /// Current state of a job. Once a terminal state has been reported the
    /// service forgets the job; later queries are answered from the store.
    pub fn status(&self, job_id: &str) -> Result<JobState, ServiceError> {
        if let Some(state) = recorded_state(self.pipeline.store().as_ref(), job_id)? {
            if state.is_terminal() {
                self.board.lock().forget(job_id);
            }
            return Ok(state);
        }

        let mut board = self.board.lock();
        if let Some(result) = board.claim(job_id) {
            // The job never got a task record, so its result is the only trace.
            return Ok(JobState::from_result(&result));
        }
        if board.queued.contains(job_id) {
            return Ok(JobState::pending());
        }

        Err(ServiceError::NotFound(job_id.to_string()))
    }

    /// Newest task records first.
    pub fn recent_tasks(&self, limit: Option<usize>) -> Result<Vec<TaskRecord>, ServiceError> {
        let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT);
        Ok(self.pipeline.store().recent_tasks(limit)?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.pipeline.progress().subscribe()
    }

    /// Blocks until some job finishes and returns its result, oldest first.
    /// `None` once the workers have stopped and every result was claimed.
    pub fn recv_result(&self) -> Option<JobResult> {
        let mut board = self.board.lock();
        loop {
            if let Some(result) = board.claim_oldest() {
                return Some(result);
            }
            if board.closed {
                return None;
            }
            board = self.board.wait(board);
        }
    }

    /// Blocks until `job_id` reaches a terminal state and returns it.
    ///
    /// Any number of callers may wait on the same or on different jobs.
    /// If the workers stop first, the last known state is returned.
    pub fn wait_for(&self, job_id: &str) -> Result<JobState, ServiceError> {
        let mut board = self.board.lock();
        while board.queued.contains(job_id) && !board.closed {
            board = self.board.wait(board);
        }
        drop(board);
        self.status(job_id)
    }

    /// Stops the workers and joins them. Queued jobs that have not started are dropped.
    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
        if self.collector.join().is_err() {
            log::error!("Result collector panicked");
        }
    }
}

/// Finished results waiting to be claimed, plus the jobs still in flight.
#[derive(Default)]
struct ResultBoard {
    state: Mutex<BoardState>,
    changed: Condvar,
}

#[derive(Default)]
struct BoardState {
    /// Accepted jobs whose result has not arrived yet.
    queued: HashSet<String>,
    finished: HashMap<String, JobResult>,
    arrival: VecDeque<String>,
    closed: bool,
}

impl ResultBoard {
    fn lock(&self) -> MutexGuard<'_, BoardState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Result board lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, BoardState>) -> MutexGuard<'a, BoardState> {
        match self.changed.wait(guard) {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, result: JobResult) {
        let mut board = self.lock();
        if !board.queued.remove(&result.job_id) {
            // Already reported through `status`.
            drop(board);
            self.changed.notify_all();
            return;
        }
        board.arrival.push_back(result.job_id.clone());
        board.finished.insert(result.job_id.clone(), result);

        while board.finished.len() > MAX_UNCLAIMED_RESULTS {
            match board.arrival.pop_front() {
                Some(oldest) => {
                    board.finished.remove(&oldest);
                }
                None => break,
            }
        }
        drop(board);
        self.changed.notify_all();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }
}

impl BoardState {
    fn claim(&mut self, job_id: &str) -> Option<JobResult> {
        let result = self.finished.remove(job_id)?;
        self.arrival.retain(|id| id != job_id);
        Some(result)
    }

    fn claim_oldest(&mut self) -> Option<JobResult> {
        while let Some(job_id) = self.arrival.pop_front() {
            if let Some(result) = self.finished.remove(&job_id) {
                return Some(result);
            }
        }
        None
    }

    fn forget(&mut self, job_id: &str) {
        self.queued.remove(job_id);
        self.claim(job_id);
    }

    #[cfg(test)]
    fn retained(&self) -> usize {
        self.finished.len()
    }
}

fn collect_results(results: Receiver<JobResult>, board: Arc<ResultBoard>) {
    for result in results.iter() {
        board.publish(result);
    }
    board.close();
    log::debug!("Result collector stopped");
}

/// State of a job as recorded in the store. A terminal record wins over the
/// pending one; `None` means the store has never seen the job.
pub fn recorded_state(
    store: &dyn MetadataStore,
    job_id: &str,
) -> Result<Option<JobState>, PersistenceError> {
    let history = store.task_history(job_id)?;

    if let Some(terminal) = history.iter().rev().find(|r| r.status.is_terminal()) {
        return Ok(Some(terminal_state(terminal)));
    }
    if history.is_empty() {
        Ok(None)
    } else {
        Ok(Some(JobState::pending()))
    }
}

fn terminal_state(record: &TaskRecord) -> JobState {
    match record.status {
        TaskStatus::Success => JobState::Success {
            result: SuccessResult {
                message: record.content.clone(),
                material_id: record.material_id.clone(),
            },
        },
        _ => JobState::Failure {
            status: record.content.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{input, FakeConverter, FakeUploader, Harness};

    fn service(h: &Harness) -> JobService {
        JobService::new(h.pipeline.clone(), 2).unwrap()
    }

    #[test]
    fn test_state_json_shapes() {
        let pending = serde_json::to_value(JobState::pending()).unwrap();
        assert_eq!(
            pending,
            serde_json::json!({ "state": "pending", "status": "Pending..." })
        );

        let success = serde_json::to_value(JobState::Success {
            result: SuccessResult {
                message: "PDF converted".to_string(),
                material_id: "mat-1".to_string(),
            },
        })
        .unwrap();
        assert_eq!(
            success,
            serde_json::json!({
                "state": "success",
                "result": { "message": "PDF converted", "material_id": "mat-1" }
            })
        );

        let failure = serde_json::to_value(JobState::Failure {
            status: "Upload failed".to_string(),
        })
        .unwrap();
        assert_eq!(
            failure,
            serde_json::json!({ "state": "failure", "status": "Upload failed" })
        );
    }

    #[test]
    fn test_submit_then_success() {
        let h = Harness::with_pages(2);
        let service = service(&h);

        let job_id = service.submit(input("cells.pdf", "bio-101")).unwrap();
        let state = service.status(&job_id).unwrap();
        assert!(matches!(state, JobState::Pending { .. } | JobState::Success { .. }));

        let state = service.wait_for(&job_id).unwrap();
        assert!(matches!(state, JobState::Success { .. }), "{:?}", state);

        match service.status(&job_id).unwrap() {
            JobState::Success { result: success } => {
                assert_eq!(success.material_id, "bio-101");
                assert!(success.message.starts_with("PDF converted to page images"));
            }
            other => panic!("expected success, got {:?}", other),
        }

        // Terminal state does not change on repeated queries.
        assert_eq!(service.status(&job_id).unwrap(), service.status(&job_id).unwrap());
        service.shutdown();
    }

    #[test]
    fn test_submit_then_failure() {
        let h = Harness::new(
            FakeConverter {
                pages: 1,
                fail_conversion: true,
            },
            FakeUploader::default(),
        );
        let service = service(&h);

        let job_id = service.submit(input("essay.docx", "bio-101")).unwrap();
        assert!(service.wait_for(&job_id).unwrap().is_terminal());

        match service.status(&job_id).unwrap() {
            JobState::Failure { status } => assert!(status.starts_with("Conversion failed:")),
            other => panic!("expected failure, got {:?}", other),
        }
        service.shutdown();
    }

    #[test]
    fn test_invalid_submission_is_rejected() {
        let h = Harness::with_pages(1);
        let service = service(&h);

        let err = service.submit(input("slides.pptx", "bio-101")).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::UnsupportedExtension(_))
        ));
        assert!(service.recent_tasks(None).unwrap().is_empty());
        service.shutdown();
    }

    #[test]
    fn test_recorded_state_prefers_terminal_record() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(recorded_state(&db, "job-1").unwrap(), None);

        db.insert_task(&TaskRecord::new("job-1", "mat-1", "log".to_string(), TaskStatus::Pending))
            .unwrap();
        assert_eq!(recorded_state(&db, "job-1").unwrap(), Some(JobState::pending()));

        db.insert_task(&TaskRecord::new("job-1", "mat-1", "boom".to_string(), TaskStatus::Failure))
            .unwrap();
        assert_eq!(
            recorded_state(&db, "job-1").unwrap(),
            Some(JobState::Failure {
                status: "boom".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_job() {
        let h = Harness::with_pages(1);
        let service = service(&h);
        assert!(matches!(
            service.status("nope"),
            Err(ServiceError::NotFound(_))
        ));
        service.shutdown();
    }

    #[test]
    fn test_recent_tasks_newest_first() {
        let h = Harness::with_pages(1);
        let service = service(&h);

        for i in 0..4 {
            let job_id = service
                .submit(input("cells.pdf", &format!("mat-{}", i)))
                .unwrap();
            service.wait_for(&job_id).unwrap();
        }

        let recent = service.recent_tasks(None).unwrap();
        assert_eq!(recent.len(), DEFAULT_RECENT_LIMIT);
        assert!(recent
            .windows(2)
            .all(|w| w[0].created_at >= w[1].created_at));
        assert_eq!(recent[0].material_id, "mat-3");

        assert_eq!(service.recent_tasks(Some(2)).unwrap().len(), 2);
        service.shutdown();
    }

    #[test]
    fn test_waiters_in_reverse_submission_order() {
        let h = Harness::with_pages(1);
        let service = Arc::new(JobService::new(h.pipeline.clone(), 1).unwrap());

        let first = service.submit(input("a.pdf", "mat-a")).unwrap();
        let second = service.submit(input("b.pdf", "mat-b")).unwrap();

        assert!(service.wait_for(&second).unwrap().is_terminal());

        let waiter = {
            let service = Arc::clone(&service);
            thread::spawn(move || service.wait_for(&first).unwrap())
        };
        match waiter.join().unwrap() {
            JobState::Success { result } => assert_eq!(result.material_id, "mat-a"),
            other => panic!("expected success, got {:?}", other),
        }

        // A second wait on an already reported job answers from the store.
        assert!(service.wait_for(&second).unwrap().is_terminal());

        match Arc::try_unwrap(service) {
            Ok(service) => service.shutdown(),
            Err(_) => panic!("service still shared"),
        }
    }

    #[test]
    fn test_recv_result_sees_every_job() {
        let h = Harness::with_pages(1);
        let service = service(&h);

        let mut submitted: Vec<String> = (0..3)
            .map(|i| service.submit(input("a.pdf", &format!("mat-{}", i))).unwrap())
            .collect();
        let mut finished: Vec<String> = (0..3)
            .map(|_| service.recv_result().unwrap().job_id)
            .collect();

        submitted.sort();
        finished.sort();
        assert_eq!(submitted, finished);
        service.shutdown();
    }

    #[test]
    fn test_status_polling_retains_nothing() {
        let h = Harness::with_pages(1);
        let service = service(&h);
        let board = Arc::clone(&service.board);

        let mut pending: Vec<String> = (0..20)
            .map(|i| service.submit(input("a.pdf", &format!("mat-{}", i))).unwrap())
            .collect();
        while !pending.is_empty() {
            pending.retain(|job_id| !service.status(job_id).unwrap().is_terminal());
            thread::sleep(std::time::Duration::from_millis(5));
        }

        service.shutdown();

        let state = board.lock();
        assert_eq!(state.retained(), 0);
        assert!(state.queued.is_empty());
        assert!(state.closed);
    }
}
