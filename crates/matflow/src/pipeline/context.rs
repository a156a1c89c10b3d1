use std::path::Path;
use std::time::{Duration, Instant};

use crate::worker::job::Job;

use super::artifacts::JobArtifacts;

pub struct PipelineContext {
    pub job: Job,

    /// Temporary files owned by this run. Released when the run ends.
    pub artifacts: JobArtifacts,

    /// Object paths already written to storage, kept for failure reporting.
    pub uploaded: Vec<String>,

    started: Instant,
}

impl PipelineContext {
    pub fn new(job: Job, work_directory: &Path) -> Self {
        let artifacts = JobArtifacts::new(work_directory, &job.material_id, &job.id);
        Self {
            job,
            artifacts,
            uploaded: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Step count shown in the progress log; DOCX adds the conversion step.
    pub fn total_steps(&self) -> usize {
        if self.job.kind.is_renderable() {
            5
        } else {
            6
        }
    }
}
