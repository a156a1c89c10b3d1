use std::path::PathBuf;

use crate::config::Config;

pub struct PipelineConfig {
    pub work_directory: PathBuf,
    pub default_quality: u8,
    pub preview_chars: usize,
    /// Leading segment of every uploaded object path.
    pub path_prefix: String,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            work_directory: PathBuf::from(&config.work_directory),
            default_quality: config.render.quality,
            preview_chars: config.progress.preview_chars,
            path_prefix: config.storage.path_prefix().trim_matches('/').to_string(),
        }
    }
}
