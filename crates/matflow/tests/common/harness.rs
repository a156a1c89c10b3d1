//! Isolated workspace for pipeline integration tests.
//!
//! Each `TestHarness` owns a temporary directory holding the job work
//! directory, a local object store and an on-disk SQLite database.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use matflow::adapters::{Adapters, Converter, Extractor, LocalUploader};
use matflow::db::{material_repo, Database};
use matflow::pipeline::{Pipeline, PipelineConfig};
use matflow::JobInput;

pub const PUBLIC_BASE_URL: &str = "http://objects.test";

pub struct TestHarness {
    temp_dir: TempDir,
    pub work_dir: PathBuf,
    pub objects_dir: PathBuf,
    pub db: Arc<Database>,
    pub pipeline: Arc<Pipeline>,
}

impl TestHarness {
    pub fn new(converter: impl Converter + 'static, extractor: impl Extractor + 'static) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let work_dir = base.join("work");
        let objects_dir = base.join("objects");
        std::fs::create_dir_all(&work_dir).unwrap();
        std::fs::create_dir_all(&objects_dir).unwrap();

        let db = Arc::new(Database::open(&base.join("data").join("matflow.db")).unwrap());

        let adapters = Adapters {
            converter: Arc::new(converter),
            extractor: Arc::new(extractor),
            uploader: Arc::new(LocalUploader::new(&objects_dir, PUBLIC_BASE_URL)),
            store: db.clone(),
        };
        let config = Arc::new(PipelineConfig {
            work_directory: work_dir.clone(),
            default_quality: 20,
            preview_chars: 100,
            path_prefix: "output_webp".to_string(),
        });

        Self {
            temp_dir,
            work_dir,
            objects_dir,
            db,
            pipeline: Arc::new(Pipeline::new(config, adapters)),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Everything left under the work directory.
    pub fn leftover_artifacts(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.work_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    /// Object paths written to the local store, relative to its root, sorted.
    pub fn stored_objects(&self) -> Vec<String> {
        let mut found = Vec::new();
        collect_files(&self.objects_dir, &self.objects_dir, &mut found);
        found.sort();
        found
    }

    pub fn material_count(&self) -> u64 {
        material_repo::count_materials(&self.db).unwrap()
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else {
            let rel = path.strip_prefix(root).unwrap();
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}

pub fn pdf_input(material_id: &str) -> JobInput {
    JobInput {
        document_bytes: b"%PDF-1.5\n%stub\n".to_vec(),
        filename: "photosynthesis.pdf".to_string(),
        content_type: Some("application/pdf".to_string()),
        material_id: material_id.to_string(),
        user_id: "user-42".to_string(),
        quality: Some(20),
        extra_metadata: serde_json::json!({
            "title": "Photosynthesis",
            "course": "BIO 101",
        }),
    }
}

pub fn docx_input(material_id: &str, bytes: Vec<u8>) -> JobInput {
    JobInput {
        document_bytes: bytes,
        filename: "essay.docx".to_string(),
        content_type: None,
        material_id: material_id.to_string(),
        user_id: "user-42".to_string(),
        quality: None,
        extra_metadata: serde_json::Value::Null,
    }
}
