use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Service error: {0}")]
    Service(#[from] crate::service::ServiceError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Failed to resolve secret for '{name}': {source}")]
    Secret {
        name: String,
        #[source]
        source: crate::secrets::SecretError,
    },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Rejections raised before a job record exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No selected file")]
    EmptyFilename,

    #[error("File '{0}' has no extension")]
    MissingExtension(String),

    #[error("File type not allowed: '{0}'")]
    UnsupportedExtension(String),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Quality {0} is outside the allowed range 1..=100")]
    QualityOutOfRange(u8),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, MatflowError>;
