pub mod artifacts;
pub mod config;
pub mod context;
pub mod error;
pub mod pages;
pub mod progress;
pub mod runner;

pub use artifacts::{JobArtifacts, ReleaseReport};
pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::PipelineError;
pub use pages::{order_pages, page_number};
pub use progress::{LogEntry, ProgressEvent, ProgressLog, ProgressRecorder};
pub use runner::Pipeline;
