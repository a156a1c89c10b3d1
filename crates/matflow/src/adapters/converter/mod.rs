mod docx;
mod office;
mod render;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::adapters::{ConversionError, Converter, PageImage, RenderError};
use crate::sanitize::redact_path;

#[cfg(test)]
pub(crate) use docx::tests::sample_docx;

/// DOCX conversion plus `pdftoppm` rendering.
///
/// DOCX goes through LibreOffice when a `soffice` binary is configured,
/// and through the built-in text layout otherwise.
pub struct DocumentConverter {
    pdftoppm: String,
    soffice: Option<String>,
    dpi: u32,
}

impl DocumentConverter {
    pub fn new(pdftoppm: &str, dpi: u32) -> Self {
        Self {
            pdftoppm: pdftoppm.to_string(),
            soffice: None,
            dpi,
        }
    }

    pub fn with_soffice(mut self, soffice: &str) -> Self {
        self.soffice = Some(soffice.to_string());
        self
    }
}

impl Converter for DocumentConverter {
    fn to_renderable(&self, source: &Path, target: &Path) -> Result<PathBuf, ConversionError> {
        let _span = tracing::info_span!("converter.docx", file = %redact_path(source)).entered();

        if let Some(soffice) = &self.soffice {
            office::convert(soffice, source, target)?;
            tracing::debug!("DOCX converted to PDF by LibreOffice");
            return Ok(target.to_path_buf());
        }

        let file = File::open(source).map_err(|e| ConversionError::Read {
            path: source.to_path_buf(),
            source: e,
        })?;
        let pdf_bytes = docx::docx_to_pdf(BufReader::new(file))?;

        std::fs::write(target, &pdf_bytes).map_err(|e| ConversionError::Write {
            path: target.to_path_buf(),
            reason: e.to_string(),
        })?;

        tracing::debug!(bytes = pdf_bytes.len(), "DOCX converted to PDF");
        Ok(target.to_path_buf())
    }

    fn render(
        &self,
        renderable: &Path,
        out_dir: &Path,
        prefix: &str,
        quality: u8,
    ) -> Result<Vec<PageImage>, RenderError> {
        let _span = tracing::info_span!(
            "converter.render",
            file = %redact_path(renderable),
            dpi = self.dpi,
            quality
        )
        .entered();

        let rasters = render::rasterize(&self.pdftoppm, renderable, out_dir, prefix, self.dpi)?;

        let mut pages = Vec::with_capacity(rasters.len());
        for raster in rasters {
            let page = render::raster_page_number(&raster).ok_or_else(|| {
                RenderError::UnnumberedArtifact(redact_path(&raster))
            })?;
            pages.push(render::encode_page(&raster, out_dir, prefix, page, quality)?);
        }

        tracing::debug!(pages = pages.len(), "Pages rendered");
        Ok(pages)
    }
}
