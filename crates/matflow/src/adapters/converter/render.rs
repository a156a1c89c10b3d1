//! Page rasterisation through poppler's `pdftoppm`, re-encoded as JPEG.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::adapters::{PageImage, RenderError};

/// Runs `pdftoppm` over the whole document, writing `{prefix}-{n}.png` files.
pub fn rasterize(
    pdftoppm: &str,
    pdf: &Path,
    out_dir: &Path,
    prefix: &str,
    dpi: u32,
) -> Result<Vec<PathBuf>, RenderError> {
    fs::create_dir_all(out_dir).map_err(|e| RenderError::Io {
        path: out_dir.to_path_buf(),
        source: e,
    })?;

    let raw_prefix = out_dir.join(format!("{}-raw", prefix));
    let output = Command::new(pdftoppm)
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(pdf)
        .arg(&raw_prefix)
        .output()
        .map_err(|e| RenderError::ToolUnavailable {
            tool: pdftoppm.to_string(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(RenderError::ToolFailed {
            tool: pdftoppm.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let raw_stem = format!("{}-raw-", prefix);
    let entries = fs::read_dir(out_dir).map_err(|e| RenderError::Io {
        path: out_dir.to_path_buf(),
        source: e,
    })?;

    let mut rasters = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RenderError::Io {
            path: out_dir.to_path_buf(),
            source: e,
        })?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&raw_stem) && name.ends_with(".png") {
            rasters.push(entry.path());
        }
    }

    Ok(rasters)
}

/// Page number of a `pdftoppm` raster: the digits after the final `-`.
/// `pdftoppm` zero-pads them to the width of the page count.
pub fn raster_page_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('-').next()?.parse().ok()
}

/// Re-encodes one raster as `{prefix}_page_{n}.jpg` and removes the raster.
pub fn encode_page(
    raster: &Path,
    out_dir: &Path,
    prefix: &str,
    page: u32,
    quality: u8,
) -> Result<PageImage, RenderError> {
    let img = image::open(raster).map_err(|e| RenderError::Image {
        path: raster.to_path_buf(),
        reason: e.to_string(),
    })?;
    let rgb = img.to_rgb8();

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| RenderError::Image {
            path: raster.to_path_buf(),
            reason: e.to_string(),
        })?;

    let target = out_dir.join(format!("{}_page_{}.jpg", prefix, page));
    fs::write(&target, &buffer).map_err(|e| RenderError::Io {
        path: target.clone(),
        source: e,
    })?;

    fs::remove_file(raster).map_err(|e| RenderError::Io {
        path: raster.to_path_buf(),
        source: e,
    })?;

    Ok(PageImage::new(target))
}
