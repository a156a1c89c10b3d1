//! DOCX to PDF through a headless LibreOffice.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::adapters::ConversionError;

/// Subdirectory of the target's directory that receives `soffice` output.
const OUT_SUBDIR: &str = "office-out";
/// Per-job LibreOffice profile, so concurrent conversions never share one.
const PROFILE_SUBDIR: &str = "office-profile";

/// Converts `source` to PDF at `target` with `soffice --convert-to pdf`.
///
/// Scratch directories are created next to `target` and left for the
/// job's artifact release to remove.
pub fn convert(soffice: &str, source: &Path, target: &Path) -> Result<(), ConversionError> {
    let work_dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let out_dir = scratch_dir(work_dir, OUT_SUBDIR)?;
    let profile_dir = scratch_dir(work_dir, PROFILE_SUBDIR)?;

    let output = Command::new(soffice)
        .arg(format!("-env:UserInstallation=file://{}", profile_dir.display()))
        .arg("--headless")
        .arg("--convert-to")
        .arg("pdf")
        .arg("--outdir")
        .arg(&out_dir)
        .arg(source)
        .output()
        .map_err(|e| ConversionError::ToolUnavailable {
            tool: soffice.to_string(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(ConversionError::ToolFailed {
            tool: soffice.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let produced = converted_path(&out_dir, source)?;
    if !produced.is_file() {
        // soffice exits 0 on some load failures and only reports on stderr.
        return Err(ConversionError::ToolFailed {
            tool: soffice.to_string(),
            stderr: format!(
                "no PDF produced; {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    fs::rename(&produced, target).map_err(|e| ConversionError::Write {
        path: target.to_path_buf(),
        reason: e.to_string(),
    })
}

fn scratch_dir(work_dir: &Path, name: &str) -> Result<PathBuf, ConversionError> {
    let dir = work_dir.join(name);
    fs::create_dir_all(&dir).map_err(|e| ConversionError::Write {
        path: dir.clone(),
        reason: e.to_string(),
    })?;
    // The profile URL must be absolute.
    fs::canonicalize(&dir).map_err(|e| ConversionError::Write {
        path: dir,
        reason: e.to_string(),
    })
}

/// Where `soffice` writes its result: the source stem with a `.pdf` extension.
fn converted_path(out_dir: &Path, source: &Path) -> Result<PathBuf, ConversionError> {
    let stem = source.file_stem().ok_or_else(|| {
        ConversionError::Malformed(format!("'{}' has no file name", source.display()))
    })?;
    let mut name = stem.to_os_string();
    name.push(".pdf");
    Ok(out_dir.join(name))
}
