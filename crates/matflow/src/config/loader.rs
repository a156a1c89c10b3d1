use std::path::{Path, PathBuf};

use crate::config::schema::{Config, StorageConfig};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Database location: the configured path, else `~/.matflow/data/matflow.db`.
pub fn resolve_database_path(config: &Config) -> PathBuf {
    match config.database_path.as_deref() {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => crate::db::default_database_path()
            .unwrap_or_else(|| PathBuf::from(".matflow/data/matflow.db")),
    }
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if !(1..=100).contains(&config.render.quality) {
        return Err(ConfigError::Validation {
            message: format!(
                "render.quality must be within 1..=100, got {}",
                config.render.quality
            ),
        });
    }

    if !(36..=600).contains(&config.render.dpi) {
        return Err(ConfigError::Validation {
            message: format!("render.dpi must be within 36..=600, got {}", config.render.dpi),
        });
    }

    match &config.storage {
        StorageConfig::Supabase(s) if !s.url.starts_with("http") => {
            return Err(ConfigError::Validation {
                message: format!("storage.url must be an http(s) URL, got '{}'", s.url),
            });
        }
        StorageConfig::Local(l) if l.public_base_url.trim().is_empty() => {
            return Err(ConfigError::Validation {
                message: "storage.public_base_url must not be empty".to_string(),
            });
        }
        _ => {}
    }

    Ok(())
}
