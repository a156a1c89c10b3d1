use std::path::PathBuf;

use thiserror::Error;

use crate::adapters::{ConversionError, ExtractionError, RenderError, UploadError};
use crate::store::PersistenceError;

/// Failure of a single pipeline step. Its `Display` string becomes the job's
/// terminal failure message.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to stage '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}
