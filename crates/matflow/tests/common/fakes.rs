//! Adapters that stand in for `pdftoppm` and the extraction service.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use matflow::adapters::{
    ConversionError, Converter, DocumentConverter, Extraction, ExtractionError, Extractor,
    PageImage, RenderError, TokenUsage,
};

/// Real DOCX conversion, simulated rendering.
///
/// `render` writes `pages` artifacts and returns them in a scrambled order,
/// the way a directory listing might.
pub struct SimulatedRenderer {
    inner: DocumentConverter,
    pub pages: u32,
    pub fail_render: bool,
}

impl SimulatedRenderer {
    pub fn new(pages: u32) -> Self {
        Self {
            inner: DocumentConverter::new("pdftoppm", 140),
            pages,
            fail_render: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_render: true,
            ..Self::new(0)
        }
    }
}

/// Deterministic scramble of `1..=n`: evens descending, then odds ascending.
pub fn scrambled(n: u32) -> Vec<u32> {
    let mut order: Vec<u32> = (1..=n).filter(|p| p % 2 == 0).rev().collect();
    order.extend((1..=n).filter(|p| p % 2 == 1));
    order
}

impl Converter for SimulatedRenderer {
    fn to_renderable(&self, source: &Path, target: &Path) -> Result<PathBuf, ConversionError> {
        self.inner.to_renderable(source, target)
    }

    fn render(
        &self,
        _renderable: &Path,
        out_dir: &Path,
        prefix: &str,
        quality: u8,
    ) -> Result<Vec<PageImage>, RenderError> {
        if self.fail_render {
            return Err(RenderError::ToolFailed {
                tool: "pdftoppm".to_string(),
                stderr: "Syntax Error: Couldn't read xref table".to_string(),
            });
        }

        scrambled(self.pages)
            .into_iter()
            .map(|n| -> Result<PageImage, RenderError> {
                let path = out_dir.join(format!("{}_page_{}.jpg", prefix, n));
                std::fs::write(&path, format!("jpeg q={} page={}", quality, n)).map_err(
                    |source| RenderError::Io {
                        path: path.clone(),
                        source,
                    },
                )?;
                Ok(PageImage::new(path))
            })
            .collect()
    }
}

/// Returns fixed text and token counts, and counts its calls.
pub struct ScriptedExtractor {
    pub text: String,
    pub usage: TokenUsage,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            usage: TokenUsage {
                prompt_token_count: 1_250,
                thoughts_token_count: 0,
                total_token_count: 1_730,
            },
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }
}

impl Extractor for ScriptedExtractor {
    fn extract(&self, _renderable: &Path) -> Result<Extraction, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ExtractionError::Status {
                status: 503,
                body: "model overloaded".to_string(),
            });
        }
        Ok(Extraction {
            text: self.text.clone(),
            usage: self.usage,
        })
    }
}

/// Minimal DOCX container with one paragraph per entry.
pub fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::{Cursor, Write};

    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
        body
    );

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    buffer.into_inner()
}
