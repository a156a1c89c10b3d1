//! Object storage: Supabase Storage over HTTP, or a local directory.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::adapters::{UploadError, Uploader};
use crate::config::schema::SupabaseConfig;
use crate::error::ConfigError;
use crate::secrets::resolve_secret;

pub struct SupabaseUploader {
    client: reqwest::blocking::Client,
    base_url: String,
    bucket: String,
    key: SecretString,
}

impl SupabaseUploader {
    pub fn from_config(config: &SupabaseConfig) -> Result<Self, ConfigError> {
        let key = resolve_secret(
            config.key.as_deref(),
            config.key_file.as_deref(),
            config.key_env_var.as_deref(),
        )
        .map_err(|e| ConfigError::Secret {
            name: "storage.key".to_string(),
            source: e,
        })?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            key,
        })
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }
}

impl Uploader for SupabaseUploader {
    fn put(&self, bytes: &[u8], path: &str, content_type: &str) -> Result<String, UploadError> {
        let path = normalize_object_path(path)?;
        let key = self.key.expose_secret();

        let response = self
            .client
            .post(self.object_url(&path))
            .header("apikey", key)
            .bearer_auth(key)
            .header("x-upsert", "false")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .map_err(|e| UploadError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(UploadError::Rejected {
                path,
                status: status.as_u16(),
                body,
            });
        }

        let url = self.public_url(&path);
        tracing::debug!(object = %path, "Uploaded object");
        Ok(url)
    }
}

/// Stores objects under a directory and serves them from `public_base_url`.
pub struct LocalUploader {
    root: PathBuf,
    public_base_url: String,
}

impl LocalUploader {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Uploader for LocalUploader {
    fn put(&self, bytes: &[u8], path: &str, _content_type: &str) -> Result<String, UploadError> {
        let path = normalize_object_path(path)?;
        let target = self.root.join(&path);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| UploadError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    UploadError::AlreadyExists(path.clone())
                } else {
                    UploadError::Io {
                        path: target.clone(),
                        source: e,
                    }
                }
            })?;
        file.write_all(bytes).map_err(|e| UploadError::Io {
            path: target.clone(),
            source: e,
        })?;

        Ok(format!("{}/{}", self.public_base_url, path))
    }
}

/// Rejects absolute paths and `..` segments; collapses backslashes to `/`.
fn normalize_object_path(path: &str) -> Result<String, UploadError> {
    let unified = path.replace('\\', "/");
    let trimmed = unified.trim_matches('/');
    if trimmed.is_empty() {
        return Err(UploadError::InvalidPath(path.to_string()));
    }

    let all_normal = Path::new(trimmed)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !all_normal {
        return Err(UploadError::InvalidPath(path.to_string()));
    }

    Ok(trimmed.to_string())
}
