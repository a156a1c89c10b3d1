//! Per-job temporary artifacts and their guaranteed removal.
//!
//! Every job gets `{work_directory}/{material}-{job_id}/` holding the staged
//! source, the intermediate PDF (DOCX only) and the `pages/` directory. Each
//! path is registered before it is created, and [`JobArtifacts::release`]
//! runs exactly once: explicitly at the end of the pipeline, or from `Drop`
//! if the run unwinds.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::sanitize::{redact_path, secure_filename};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactKind {
    File,
    Dir,
}

#[derive(Debug)]
struct Artifact {
    path: PathBuf,
    kind: ArtifactKind,
}

/// Outcome of a release pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub removed: usize,
    pub skipped: usize,
    pub failures: Vec<(PathBuf, String)>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub struct JobArtifacts {
    root: PathBuf,
    tracked: Vec<Artifact>,
    released: bool,
}

impl JobArtifacts {
    pub fn new(work_directory: &Path, material_id: &str, job_id: &str) -> Self {
        let root = work_directory.join(format!("{}-{}", secure_filename(material_id), job_id));
        Self {
            root,
            tracked: Vec::new(),
            released: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_root(&mut self) -> std::io::Result<()> {
        if !self.is_tracked(&self.root) {
            self.tracked.push(Artifact {
                path: self.root.clone(),
                kind: ArtifactKind::Dir,
            });
        }
        fs::create_dir_all(&self.root)
    }

    fn is_tracked(&self, path: &Path) -> bool {
        self.tracked.iter().any(|a| a.path == path)
    }

    /// Writes `bytes` to `file_name` inside the job directory.
    pub fn stage(&mut self, bytes: &[u8], file_name: &str) -> std::io::Result<PathBuf> {
        self.ensure_root()?;
        let path = self.track_file(file_name);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Registers a file that some later step will create.
    pub fn track_file(&mut self, file_name: &str) -> PathBuf {
        let path = self.root.join(file_name);
        if !self.is_tracked(&path) {
            self.tracked.push(Artifact {
                path: path.clone(),
                kind: ArtifactKind::File,
            });
        }
        path
    }

    /// Creates (and registers) a subdirectory of the job directory.
    pub fn create_dir(&mut self, name: &str) -> std::io::Result<PathBuf> {
        self.ensure_root()?;
        let path = self.root.join(name);
        if !self.is_tracked(&path) {
            self.tracked.push(Artifact {
                path: path.clone(),
                kind: ArtifactKind::Dir,
            });
        }
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Removes every registered artifact. Files go first, then directories
    /// innermost first, each emptied before removal. Missing paths are
    /// skipped, failures are logged and collected without stopping the pass.
    /// Later calls do nothing.
    pub fn release(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        if self.released {
            return report;
        }
        self.released = true;

        for artifact in self.tracked.iter().filter(|a| a.kind == ArtifactKind::File) {
            remove_file(&artifact.path, &mut report);
        }

        for artifact in self
            .tracked
            .iter()
            .rev()
            .filter(|a| a.kind == ArtifactKind::Dir)
        {
            remove_dir(&artifact.path, &mut report);
        }

        if report.is_clean() {
            tracing::debug!(
                dir = %redact_path(&self.root),
                removed = report.removed,
                "Released job artifacts"
            );
        } else {
            tracing::warn!(
                dir = %redact_path(&self.root),
                failures = report.failures.len(),
                "Some job artifacts could not be removed"
            );
        }

        report
    }
}

impl Drop for JobArtifacts {
    fn drop(&mut self) {
        if !self.released {
            self.release();
        }
    }
}

fn remove_file(path: &Path, report: &mut ReleaseReport) {
    match fs::remove_file(path) {
        Ok(()) => report.removed += 1,
        Err(e) if e.kind() == ErrorKind::NotFound => report.skipped += 1,
        Err(e) => {
            tracing::warn!(file = %redact_path(path), error = %e, "Failed to remove artifact");
            report.failures.push((path.to_path_buf(), e.to_string()));
        }
    }
}

fn remove_dir(path: &Path, report: &mut ReleaseReport) {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            report.skipped += 1;
            return;
        }
        Err(e) => {
            tracing::warn!(dir = %redact_path(path), error = %e, "Failed to list artifact directory");
            report.failures.push((path.to_path_buf(), e.to_string()));
            return;
        }
    };

    for entry in entries.flatten() {
        let entry_path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            remove_dir(&entry_path, report);
        } else {
            remove_file(&entry_path, report);
        }
    }

    match fs::remove_dir(path) {
        Ok(()) => report.removed += 1,
        Err(e) if e.kind() == ErrorKind::NotFound => report.skipped += 1,
        Err(e) => {
            tracing::warn!(dir = %redact_path(path), error = %e, "Failed to remove artifact directory");
            report.failures.push((path.to_path_buf(), e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_scoped_by_material_and_job() {
        let artifacts = JobArtifacts::new(Path::new("/work"), "../mat 1", "job-9");
        assert_eq!(artifacts.root(), Path::new("/work/mat_1-job-9"));
    }

    #[test]
    fn test_release_removes_everything() {
        let work = tempfile::tempdir().unwrap();
        let mut artifacts = JobArtifacts::new(work.path(), "mat-1", "job-1");

        let source = artifacts.stage(b"%PDF-1.5", "source.pdf").unwrap();
        let pages = artifacts.create_dir("pages").unwrap();
        std::fs::write(pages.join("mat-1_page_1.jpg"), b"a").unwrap();
        std::fs::write(pages.join("mat-1_page_2.jpg"), b"b").unwrap();
        assert!(source.exists());

        let root = artifacts.root().to_path_buf();
        let report = artifacts.release();

        assert!(report.is_clean());
        assert!(!root.exists());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_release_skips_never_created_paths() {
        let work = tempfile::tempdir().unwrap();
        let mut artifacts = JobArtifacts::new(work.path(), "mat-1", "job-1");
        artifacts.stage(b"PK", "source.docx").unwrap();
        artifacts.track_file("renderable.pdf");

        let report = artifacts.release();
        assert!(report.is_clean());
        assert!(report.skipped >= 1);
        assert!(!artifacts.root().exists());
    }

    #[test]
    fn test_release_with_nothing_staged() {
        let work = tempfile::tempdir().unwrap();
        let mut artifacts = JobArtifacts::new(work.path(), "mat-1", "job-1");
        let report = artifacts.release();
        assert_eq!(report, ReleaseReport::default());
    }

    #[test]
    fn test_release_runs_once() {
        let work = tempfile::tempdir().unwrap();
        let mut artifacts = JobArtifacts::new(work.path(), "mat-1", "job-1");
        artifacts.stage(b"x", "source.pdf").unwrap();

        assert!(artifacts.release().removed > 0);
        assert!(artifacts.is_released());
        assert_eq!(artifacts.release(), ReleaseReport::default());
    }

    #[test]
    fn test_drop_releases() {
        let work = tempfile::tempdir().unwrap();
        let root = {
            let mut artifacts = JobArtifacts::new(work.path(), "mat-1", "job-1");
            artifacts.stage(b"x", "source.pdf").unwrap();
            artifacts.create_dir("pages").unwrap();
            artifacts.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn test_untracked_leftovers_inside_dirs_are_removed() {
        let work = tempfile::tempdir().unwrap();
        let mut artifacts = JobArtifacts::new(work.path(), "mat-1", "job-1");
        let pages = artifacts.create_dir("pages").unwrap();
        std::fs::create_dir_all(pages.join("nested")).unwrap();
        std::fs::write(pages.join("nested").join("raw-1.png"), b"x").unwrap();

        let report = artifacts.release();
        assert!(report.is_clean());
        assert!(!artifacts.root().exists());
    }

    #[test]
    fn test_unlistable_dir_is_reported_and_pass_continues() {
        let work = tempfile::tempdir().unwrap();
        let mut artifacts = JobArtifacts::new(work.path(), "mat-1", "job-1");
        let pages = artifacts.create_dir("pages").unwrap();
        std::fs::remove_dir(&pages).unwrap();
        std::fs::write(&pages, b"not a directory").unwrap();

        let report = artifacts.release();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, pages);
        assert!(!artifacts.root().exists());
    }
}
