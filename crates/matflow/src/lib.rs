pub mod adapters;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use adapters::{Adapters, Converter, Extractor, Uploader};
pub use config::{load_config, Config, DocumentKind};
pub use db::Database;
pub use error::{ConfigError, MatflowError, Result, ValidationError, WorkerError};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, ProgressRecorder};
pub use secrets::{resolve_secret, SecretError};
pub use service::{JobService, JobState, ServiceError};
pub use store::{MetadataStore, PersistenceError, TaskRecord, TaskStatus};
pub use worker::{Job, JobInput, JobResult, WorkerPool};
