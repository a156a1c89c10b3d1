use std::time::Duration;

use uuid::Uuid;

use crate::config::DocumentKind;
use crate::error::ValidationError;

/// A submission as received from the caller.
#[derive(Debug, Clone, Default)]
pub struct JobInput {
    pub document_bytes: Vec<u8>,
    pub filename: String,
    /// Content type reported by the uploader, if any.
    pub content_type: Option<String>,
    pub material_id: String,
    pub user_id: String,
    /// JPEG quality in `1..=100`; the configured default applies when `None`.
    pub quality: Option<u8>,
    /// Stored verbatim on the material record.
    pub extra_metadata: serde_json::Value,
}

/// A validated unit of work.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub kind: DocumentKind,
    pub filename: String,
    pub content_type: Option<String>,
    pub material_id: String,
    pub user_id: String,
    pub quality: u8,
    pub extra_metadata: serde_json::Value,
    pub document_bytes: Vec<u8>,
}

impl Job {
    /// Validates `input` and assigns a fresh job id.
    pub fn from_input(input: JobInput, default_quality: u8) -> Result<Self, ValidationError> {
        let kind = validate_filename(&input.filename)?;

        if input.material_id.trim().is_empty() {
            return Err(ValidationError::MissingField("material_id"));
        }
        if input.user_id.trim().is_empty() {
            return Err(ValidationError::MissingField("user_id"));
        }

        let quality = input.quality.unwrap_or(default_quality);
        if quality == 0 || quality > 100 {
            return Err(ValidationError::QualityOutOfRange(quality));
        }

        let extra_metadata = if input.extra_metadata.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            input.extra_metadata
        };

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            kind,
            filename: input.filename,
            content_type: input.content_type,
            material_id: input.material_id,
            user_id: input.user_id,
            quality,
            extra_metadata,
            document_bytes: input.document_bytes,
        })
    }
}

/// Maps the extension after the last `.` onto a supported document kind.
pub fn validate_filename(filename: &str) -> Result<DocumentKind, ValidationError> {
    if filename.trim().is_empty() {
        return Err(ValidationError::EmptyFilename);
    }

    let ext = match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext,
        _ => return Err(ValidationError::MissingExtension(filename.to_string())),
    };

    DocumentKind::from_extension(ext)
        .ok_or_else(|| ValidationError::UnsupportedExtension(ext.to_string()))
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub material_id: String,
    pub success: bool,
    /// Terminal success message.
    pub message: Option<String>,
    pub error: Option<String>,
    pub num_page: u32,
    pub elapsed: Duration,
}

impl JobResult {
    pub fn success(job: &Job, message: String, num_page: u32, elapsed: Duration) -> Self {
        Self {
            job_id: job.id.clone(),
            material_id: job.material_id.clone(),
            success: true,
            message: Some(message),
            error: None,
            num_page,
            elapsed,
        }
    }

    pub fn failure(job: &Job, error: String, elapsed: Duration) -> Self {
        Self {
            job_id: job.id.clone(),
            material_id: job.material_id.clone(),
            success: false,
            message: None,
            error: Some(error),
            num_page: 0,
            elapsed,
        }
    }
}
