pub mod job;
pub mod pool;

pub use job::{validate_filename, Job, JobInput, JobResult};
pub use pool::WorkerPool;

