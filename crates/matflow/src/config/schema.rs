use serde::{Deserialize, Serialize};

pub const DEFAULT_QUALITY: u8 = 20;
pub const DEFAULT_DPI: u32 = 140;
pub const DEFAULT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Root under which every job gets its own scratch directory.
    pub work_directory: String,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    pub extractor: ExtractorConfig,
    pub storage: StorageConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default = "default_pdftoppm")]
    pub pdftoppm: String,
    /// LibreOffice binary for DOCX conversion. Unset means the built-in
    /// text layout.
    #[serde(default)]
    pub soffice: Option<String>,
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

fn default_dpi() -> u32 {
    DEFAULT_DPI
}

fn default_pdftoppm() -> String {
    "pdftoppm".to_string()
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            dpi: DEFAULT_DPI,
            pdftoppm: default_pdftoppm(),
            soffice: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Characters of extracted text echoed into the progress log.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

fn default_preview_chars() -> usize {
    DEFAULT_PREVIEW_CHARS
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorConfig {
    Gemini(GeminiConfig),
    PdfText,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_gemini_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_gemini_env_var")]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_extract_timeout")]
    pub timeout_secs: u64,
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash-lite".to_string()
}

fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_env_var() -> Option<String> {
    Some("GEMINI_API_KEY".to_string())
}

fn default_extract_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    Supabase(SupabaseConfig),
    Local(LocalStorageConfig),
}

impl StorageConfig {
    pub fn path_prefix(&self) -> &str {
        match self {
            StorageConfig::Supabase(c) => &c.path_prefix,
            StorageConfig::Local(c) => &c.path_prefix,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    pub url: String,
    pub bucket: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
    #[serde(default = "default_supabase_env_var")]
    pub key_env_var: Option<String>,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
}

fn default_supabase_env_var() -> Option<String> {
    Some("SUPABASE_ANON_KEY".to_string())
}

fn default_upload_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    pub root: String,
    pub public_base_url: String,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
}

fn default_path_prefix() -> String {
    "output_webp".to_string()
}

/// Source document formats accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Docx,
}

impl DocumentKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Docx => "docx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    /// Whether pages can be rasterised directly, without an intermediate conversion.
    pub fn is_renderable(&self) -> bool {
        matches!(self, DocumentKind::Pdf)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "PDF",
            DocumentKind::Docx => "DOCX",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_kind_from_extension_is_case_insensitive() {
        assert_eq!(DocumentKind::from_extension("PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_extension("Docx"), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_extension("doc"), None);
        assert_eq!(DocumentKind::from_extension(""), None);
    }

    #[test]
    fn test_only_pdf_is_renderable() {
        assert!(DocumentKind::Pdf.is_renderable());
        assert!(!DocumentKind::Docx.is_renderable());
    }

    #[test]
    fn test_render_config_defaults() {
        let render: RenderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(render.quality, 20);
        assert_eq!(render.dpi, 140);
        assert_eq!(render.pdftoppm, "pdftoppm");
        assert!(render.soffice.is_none());
    }

    #[test]
    fn test_render_soffice_opt_in() {
        let render: RenderConfig =
            serde_json::from_str(r#"{"soffice": "/usr/bin/soffice"}"#).unwrap();
        assert_eq!(render.soffice.as_deref(), Some("/usr/bin/soffice"));
        assert_eq!(render.dpi, 140);
    }

    #[test]
    fn test_extractor_config_tagged() {
        let cfg: ExtractorConfig = serde_json::from_str(r#"{"kind": "pdf_text"}"#).unwrap();
        assert!(matches!(cfg, ExtractorConfig::PdfText));

        let cfg: ExtractorConfig = serde_json::from_str(r#"{"kind": "gemini"}"#).unwrap();
        match cfg {
            ExtractorConfig::Gemini(g) => {
                assert_eq!(g.model, "gemini-2.0-flash-lite");
                assert_eq!(g.api_key_env_var.as_deref(), Some("GEMINI_API_KEY"));
            }
            _ => panic!("expected gemini extractor"),
        }
    }
}
