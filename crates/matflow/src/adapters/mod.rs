//! Boundaries to the external conversion, extraction and storage services.
//!
//! The pipeline only sees the traits in this module. Concrete clients are
//! built once by [`Adapters::from_config`] and shared by every worker.

pub mod converter;
pub mod extractor;
pub mod uploader;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::{Config, ExtractorConfig, StorageConfig};
use crate::error::ConfigError;
use crate::store::MetadataStore;

pub use converter::DocumentConverter;
pub use extractor::{GeminiExtractor, PdfTextExtractor};
pub use uploader::{LocalUploader, SupabaseUploader};

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Failed to read document '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Failed to write converted document '{path}': {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Failed to run {tool}: {source}. Make sure LibreOffice is installed.")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed: {stderr}")]
    ToolFailed { tool: String, stderr: String },
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to run {tool}: {source}. Make sure poppler-utils is installed.")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed: {stderr}")]
    ToolFailed { tool: String, stderr: String },

    #[error("Image encoding failed for '{path}': {reason}")]
    Image { path: PathBuf, reason: String },

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rendered artifact '{0}' carries no page number")]
    UnnumberedArtifact(String),
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to read document '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction request failed: {0}")]
    Request(String),

    #[error("Extraction service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Extraction service returned no content")]
    EmptyResponse,

    #[error("Failed to decode extraction response: {0}")]
    Decode(String),

    #[error("Failed to extract PDF text: {0}")]
    Pdf(String),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload request failed: {0}")]
    Request(String),

    #[error("Object storage rejected '{path}' with {status}: {body}")]
    Rejected {
        path: String,
        status: u16,
        body: String,
    },

    #[error("Object '{0}' already exists")]
    AlreadyExists(String),

    #[error("Invalid object path '{0}'")]
    InvalidPath(String),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Token counters reported by the extraction service. Absent fields are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_token_count: u32,
    pub thoughts_token_count: u32,
    pub total_token_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub usage: TokenUsage,
}

/// A rendered page on disk. Its page number is encoded in the file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub path: PathBuf,
}

impl PageImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

pub trait Converter: Send + Sync {
    /// Converts `source` into a page-renderable document written at `target`.
    fn to_renderable(&self, source: &Path, target: &Path) -> Result<PathBuf, ConversionError>;

    /// Renders every page of `renderable` into `out_dir` as `{prefix}_page_{n}.*`.
    ///
    /// The returned artifacts are in no particular order.
    fn render(
        &self,
        renderable: &Path,
        out_dir: &Path,
        prefix: &str,
        quality: u8,
    ) -> Result<Vec<PageImage>, RenderError>;
}

pub trait Extractor: Send + Sync {
    fn extract(&self, renderable: &Path) -> Result<Extraction, ExtractionError>;
}

pub trait Uploader: Send + Sync {
    /// Stores `bytes` at `path` and returns its public URL.
    ///
    /// Calls are not assumed idempotent.
    fn put(&self, bytes: &[u8], path: &str, content_type: &str) -> Result<String, UploadError>;
}

/// The set of external clients a pipeline runs against.
#[derive(Clone)]
pub struct Adapters {
    pub converter: Arc<dyn Converter>,
    pub extractor: Arc<dyn Extractor>,
    pub uploader: Arc<dyn Uploader>,
    pub store: Arc<dyn MetadataStore>,
}

impl Adapters {
    /// Builds every client described by `config` against the given store.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn MetadataStore>,
    ) -> Result<Self, ConfigError> {
        let mut converter = DocumentConverter::new(&config.render.pdftoppm, config.render.dpi);
        if let Some(soffice) = &config.render.soffice {
            converter = converter.with_soffice(soffice);
        }
        let converter: Arc<dyn Converter> = Arc::new(converter);

        let extractor: Arc<dyn Extractor> = match &config.extractor {
            ExtractorConfig::Gemini(gemini) => Arc::new(GeminiExtractor::from_config(gemini)?),
            ExtractorConfig::PdfText => Arc::new(PdfTextExtractor),
        };

        let uploader: Arc<dyn Uploader> = match &config.storage {
            StorageConfig::Supabase(supabase) => {
                Arc::new(SupabaseUploader::from_config(supabase)?)
            }
            StorageConfig::Local(local) => Arc::new(LocalUploader::new(
                &local.root,
                &local.public_base_url,
            )),
        };

        tracing::info!(
            extractor = extractor_kind(&config.extractor),
            storage = storage_kind(&config.storage),
            "External adapters initialized"
        );

        Ok(Self {
            converter,
            extractor,
            uploader,
            store,
        })
    }
}

fn extractor_kind(config: &ExtractorConfig) -> &'static str {
    match config {
        ExtractorConfig::Gemini(_) => "gemini",
        ExtractorConfig::PdfText => "pdf_text",
    }
}

fn storage_kind(config: &StorageConfig) -> &'static str {
    match config {
        StorageConfig::Supabase(_) => "supabase",
        StorageConfig::Local(_) => "local",
    }
}
