use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::adapters::{Adapters, Extraction, PageImage, UploadError};
use crate::error::ValidationError;
use crate::sanitize::{redact_path, secure_filename};
use crate::store::{
    MaterialBundle, MaterialRecord, MetadataStore, PageLink, RatingRecord, SummaryRecord,
    TaskStatus,
};
use crate::worker::job::{Job, JobInput, JobResult};

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;
use super::pages::order_pages;
use super::progress::ProgressRecorder;

const RENDERABLE_FILE: &str = "renderable.pdf";
const PAGES_DIR: &str = "pages";

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    adapters: Adapters,
    progress: Arc<ProgressRecorder>,
}

impl Pipeline {
    pub fn new(config: Arc<PipelineConfig>, adapters: Adapters) -> Self {
        let progress = Arc::new(ProgressRecorder::new(Arc::clone(&adapters.store)));
        Self {
            config,
            adapters,
            progress,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn progress(&self) -> &Arc<ProgressRecorder> {
        &self.progress
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.adapters.store
    }

    /// Validates `input` and runs it to completion on the calling thread.
    ///
    /// Validation failures return `Err` before any job record exists; every
    /// later failure is reported through the returned [`JobResult`].
    pub fn execute(&self, input: JobInput) -> Result<JobResult, ValidationError> {
        let job = Job::from_input(input, self.config.default_quality)?;
        Ok(self.run(job))
    }

    /// Runs the full step sequence for one validated job.
    pub fn run(&self, job: Job) -> JobResult {
        let _pipeline_span = info_span!("pipeline",
            job_id = %job.id,
            material_id = %job.material_id,
            filename = %redact_path(std::path::Path::new(&job.filename)),
        )
        .entered();

        let mut ctx = PipelineContext::new(job, &self.config.work_directory);

        if let Err(e) = self
            .progress
            .start(&ctx.job.id, &ctx.job.material_id, ctx.total_steps())
        {
            let err = PipelineError::from(e);
            error!(error = %err, "Could not create job record");
            ctx.artifacts.release();
            return JobResult::failure(&ctx.job, err.to_string(), ctx.elapsed());
        }

        let result = match self.run_steps(&mut ctx) {
            Ok(num_page) => self.complete(&ctx, num_page),
            Err(e) => self.fail(&ctx, e),
        };

        ctx.artifacts.release();
        result
    }

    fn run_steps(&self, ctx: &mut PipelineContext) -> Result<u32, PipelineError> {
        let source = {
            let _step = info_span!("stage_source").entered();
            self.step_stage(ctx)?
        };

        let renderable = {
            let _step = info_span!("to_renderable").entered();
            self.step_to_renderable(ctx, source)?
        };

        let extraction = {
            let _step = info_span!("extract").entered();
            self.step_extract(ctx, &renderable)?
        };

        let images = {
            let _step = info_span!("render").entered();
            self.step_render(ctx, &renderable)?
        };

        let pages = {
            let _step = info_span!("upload").entered();
            self.step_upload(ctx, &images)?
        };

        let _step = info_span!("persist").entered();
        self.step_persist(ctx, extraction, pages)
    }

    fn complete(&self, ctx: &PipelineContext, num_page: u32) -> JobResult {
        let secs = ctx.elapsed().as_secs_f64();
        let job = &ctx.job;

        if let Err(e) = self.progress.append(
            &job.id,
            &job.material_id,
            &format!("All steps completed successfully in {:.2} seconds", secs),
        ) {
            warn!(error = %e, "Failed to record completion line");
        }

        let message = format!(
            "{} converted to page images successfully in {:.2} seconds",
            job.kind.label(),
            secs
        );

        match self
            .progress
            .finish(&job.id, &job.material_id, TaskStatus::Success, &message)
        {
            Ok(_) => {
                info!(pages = num_page, elapsed_secs = secs, "Job completed");
                JobResult::success(job, message, num_page, ctx.elapsed())
            }
            Err(e) => {
                let err = PipelineError::from(e);
                error!(error = %err, "Material persisted but job could not be marked complete");
                JobResult::failure(job, err.to_string(), ctx.elapsed())
            }
        }
    }

    fn fail(&self, ctx: &PipelineContext, err: PipelineError) -> JobResult {
        let job = &ctx.job;
        let message = err.to_string();
        error!(error = %message, "Job failed");

        if let Err(e) =
            self.progress
                .append(&job.id, &job.material_id, &format!("Failed: {}", message))
        {
            warn!(error = %e, "Failed to record failure line");
        }
        if let Err(e) =
            self.progress
                .finish(&job.id, &job.material_id, TaskStatus::Failure, &message)
        {
            error!(error = %e, "Failed to record terminal failure");
        }

        if !ctx.uploaded.is_empty() {
            warn!(
                count = ctx.uploaded.len(),
                objects = ?ctx.uploaded,
                "Uploaded page images left in storage by failed job"
            );
        }

        JobResult::failure(job, message, ctx.elapsed())
    }

    fn step_stage(&self, ctx: &mut PipelineContext) -> Result<PathBuf, PipelineError> {
        let file_name = format!(
            "{}.{}",
            secure_filename(&ctx.job.material_id),
            ctx.job.kind.extension()
        );
        let bytes = std::mem::take(&mut ctx.job.document_bytes);

        let path = ctx
            .artifacts
            .stage(&bytes, &file_name)
            .map_err(|source| PipelineError::Staging {
                path: ctx.artifacts.root().join(&file_name),
                source,
            })?;

        debug!(file = %redact_path(&path), bytes = bytes.len(), "Staged source document");
        Ok(path)
    }

    fn step_to_renderable(
        &self,
        ctx: &mut PipelineContext,
        source: PathBuf,
    ) -> Result<PathBuf, PipelineError> {
        if ctx.job.kind.is_renderable() {
            return Ok(source);
        }

        let target = ctx.artifacts.track_file(RENDERABLE_FILE);
        let renderable = self.adapters.converter.to_renderable(&source, &target)?;
        self.progress.append(
            &ctx.job.id,
            &ctx.job.material_id,
            &format!("Converted {} to PDF", ctx.job.kind.label()),
        )?;
        Ok(renderable)
    }

    fn step_extract(
        &self,
        ctx: &PipelineContext,
        renderable: &std::path::Path,
    ) -> Result<Extraction, PipelineError> {
        let extraction = self.adapters.extractor.extract(renderable)?;
        debug!(
            chars = extraction.text.chars().count(),
            total_tokens = extraction.usage.total_token_count,
            "Extracted document content"
        );

        let preview: String = extraction
            .text
            .chars()
            .take(self.config.preview_chars)
            .collect();
        self.progress.append(
            &ctx.job.id,
            &ctx.job.material_id,
            &format!("Extracted content from PDF: {}...", preview),
        )?;
        Ok(extraction)
    }

    fn step_render(
        &self,
        ctx: &mut PipelineContext,
        renderable: &std::path::Path,
    ) -> Result<Vec<PageImage>, PipelineError> {
        let out_dir = ctx
            .artifacts
            .create_dir(PAGES_DIR)
            .map_err(|source| PipelineError::Staging {
                path: ctx.artifacts.root().join(PAGES_DIR),
                source,
            })?;

        let prefix = secure_filename(&ctx.job.material_id);
        let images =
            self.adapters
                .converter
                .render(renderable, &out_dir, &prefix, ctx.job.quality)?;
        let images = order_pages(images)?;

        self.progress.append(
            &ctx.job.id,
            &ctx.job.material_id,
            &format!("Rendered {} pages to images", images.len()),
        )?;
        Ok(images)
    }

    fn step_upload(
        &self,
        ctx: &mut PipelineContext,
        images: &[PageImage],
    ) -> Result<Vec<PageLink>, PipelineError> {
        let folder = secure_filename(&ctx.job.material_id);
        let mut pages = Vec::with_capacity(images.len());

        for (i, image) in images.iter().enumerate() {
            let bytes = std::fs::read(&image.path).map_err(|source| UploadError::Io {
                path: image.path.clone(),
                source,
            })?;
            let object_path = self.object_path(&folder, image.file_name());
            let content_type = mime_guess::from_path(&image.path)
                .first_or_octet_stream()
                .to_string();

            let url = self
                .adapters
                .uploader
                .put(&bytes, &object_path, &content_type)?;
            ctx.uploaded.push(object_path);
            pages.push(PageLink {
                page: i as u32 + 1,
                url,
            });
        }

        self.progress.append(
            &ctx.job.id,
            &ctx.job.material_id,
            &format!("Uploaded {} page images to storage", pages.len()),
        )?;
        Ok(pages)
    }

    fn object_path(&self, folder: &str, file_name: &str) -> String {
        if self.config.path_prefix.is_empty() {
            format!("{}/{}", folder, file_name)
        } else {
            format!("{}/{}/{}", self.config.path_prefix, folder, file_name)
        }
    }

    fn step_persist(
        &self,
        ctx: &PipelineContext,
        extraction: Extraction,
        pages: Vec<PageLink>,
    ) -> Result<u32, PipelineError> {
        let job = &ctx.job;
        let num_page = pages.last().map(|p| p.page).unwrap_or(0);

        let bundle = MaterialBundle {
            material: MaterialRecord {
                material_id: job.material_id.clone(),
                user_id: job.user_id.clone(),
                filename: job.filename.clone(),
                content_type: job
                    .content_type
                    .clone()
                    .unwrap_or_else(|| job.kind.mime_type().to_string()),
                num_page,
                metadata: job.extra_metadata.clone(),
            },
            pages,
            summary: SummaryRecord {
                summary_id: format!("{}-{}", job.user_id, Uuid::new_v4()),
                material_id: job.material_id.clone(),
                content: extraction.text,
                prompt_token_count: extraction.usage.prompt_token_count,
                thoughts_token_count: extraction.usage.thoughts_token_count,
                total_token_count: extraction.usage.total_token_count,
            },
            ratings: RatingRecord::initial_for(&job.material_id),
        };

        self.adapters.store.persist_material(&bundle)?;
        debug!(pages = num_page, "Persisted material");
        Ok(num_page)
    }
}
