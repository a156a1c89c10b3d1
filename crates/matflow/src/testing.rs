//! In-process adapters and a pipeline harness for unit tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::adapters::{
    Adapters, ConversionError, Converter, Extraction, ExtractionError, Extractor, PageImage,
    RenderError, TokenUsage, UploadError, Uploader,
};
use crate::db::Database;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::worker::JobInput;

pub struct FakeConverter {
    pub pages: u32,
    pub fail_conversion: bool,
}

impl FakeConverter {
    pub fn with_pages(pages: u32) -> Self {
        Self {
            pages,
            fail_conversion: false,
        }
    }
}

impl Converter for FakeConverter {
    fn to_renderable(&self, _source: &Path, target: &Path) -> Result<PathBuf, ConversionError> {
        if self.fail_conversion {
            return Err(ConversionError::Malformed("not a zip archive".to_string()));
        }
        std::fs::write(target, b"%PDF-1.5").map_err(|e| ConversionError::Write {
            path: target.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(target.to_path_buf())
    }

    /// Writes pages highest first so callers cannot rely on listing order.
    fn render(
        &self,
        _renderable: &Path,
        out_dir: &Path,
        prefix: &str,
        _quality: u8,
    ) -> Result<Vec<PageImage>, RenderError> {
        (1..=self.pages)
            .rev()
            .map(|n| -> Result<PageImage, RenderError> {
                let path = out_dir.join(format!("{}_page_{}.jpg", prefix, n));
                std::fs::write(&path, format!("page {}", n)).map_err(|source| {
                    RenderError::Io {
                        path: path.clone(),
                        source,
                    }
                })?;
                Ok(PageImage::new(path))
            })
            .collect()
    }
}

pub struct FakeExtractor;

impl Extractor for FakeExtractor {
    fn extract(&self, _renderable: &Path) -> Result<Extraction, ExtractionError> {
        Ok(Extraction {
            text: "## Page 1\nPhotosynthesis converts light into chemical energy.".to_string(),
            usage: TokenUsage {
                prompt_token_count: 120,
                thoughts_token_count: 0,
                total_token_count: 180,
            },
        })
    }
}

#[derive(Default)]
pub struct FakeUploader {
    pub puts: Mutex<Vec<(String, String)>>,
    pub fail_after: Option<usize>,
}

impl FakeUploader {
    pub fn paths(&self) -> Vec<String> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }
}

impl Uploader for FakeUploader {
    fn put(&self, _bytes: &[u8], path: &str, content_type: &str) -> Result<String, UploadError> {
        let mut puts = self.puts.lock().unwrap();
        if self.fail_after.is_some_and(|n| puts.len() >= n) {
            return Err(UploadError::Request("connection reset".to_string()));
        }
        puts.push((path.to_string(), content_type.to_string()));
        Ok(format!("https://cdn.test/{}", path))
    }
}

pub struct Harness {
    _work: TempDir,
    pub work_dir: PathBuf,
    pub db: Arc<Database>,
    pub uploader: Arc<FakeUploader>,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub fn new(converter: FakeConverter, uploader: FakeUploader) -> Self {
        let work = tempfile::tempdir().unwrap();
        let work_dir = work.path().to_path_buf();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let uploader = Arc::new(uploader);

        let adapters = Adapters {
            converter: Arc::new(converter),
            extractor: Arc::new(FakeExtractor),
            uploader: uploader.clone(),
            store: db.clone(),
        };
        let config = Arc::new(PipelineConfig {
            work_directory: work_dir.clone(),
            default_quality: 20,
            preview_chars: 9,
            path_prefix: "output_webp".to_string(),
        });

        Self {
            _work: work,
            work_dir,
            db,
            uploader,
            pipeline: Arc::new(Pipeline::new(config, adapters)),
        }
    }

    pub fn with_pages(pages: u32) -> Self {
        Self::new(FakeConverter::with_pages(pages), FakeUploader::default())
    }

    pub fn work_dir_is_empty(&self) -> bool {
        std::fs::read_dir(&self.work_dir).unwrap().next().is_none()
    }
}

pub fn input(filename: &str, material_id: &str) -> JobInput {
    JobInput {
        document_bytes: b"document".to_vec(),
        filename: filename.to_string(),
        material_id: material_id.to_string(),
        user_id: "user-7".to_string(),
        extra_metadata: serde_json::json!({ "course": "Biology" }),
        ..Default::default()
    }
}
