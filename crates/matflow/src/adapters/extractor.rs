//! Content extraction: the Gemini `generateContent` API, or embedded PDF text.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::adapters::{Extraction, ExtractionError, Extractor, TokenUsage};
use crate::config::schema::GeminiConfig;
use crate::error::ConfigError;
use crate::sanitize::redact_path;
use crate::secrets::resolve_secret;

const SYSTEM_INSTRUCTION: &str = "You are an expert document parser and data extractor. \
Your task is to analyze an entire PDF or DOC document and provide a detailed, page-by-page breakdown of its contents. \
For each page, you must identify and transcribe all text, describe any tables, charts, or images, \
and present the information clearly under a header for that specific page. \
Maintain the structure and logical flow of the original document. \
Do not miss any details.";

const USER_PROMPT: &str = "Provide a detailed, page-by-page summary of the entire document. \
Use '## Page [number]' as a header for each new page.";

const PDF_MIME: &str = "application/pdf";

/// Larger documents go through the Files API. Inline data travels base64
/// encoded inside a request that the service caps at 20MB.
const INLINE_LIMIT_BYTES: usize = 15 * 1024 * 1024;
const FILE_STATE_POLLS: u32 = 30;
const FILE_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct GeminiExtractor {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
    inline_limit: usize,
    poll_interval: Duration,
}

impl GeminiExtractor {
    pub fn from_config(config: &GeminiConfig) -> Result<Self, ConfigError> {
        let api_key = resolve_secret(
            config.api_key.as_deref(),
            config.api_key_file.as_deref(),
            config.api_key_env_var.as_deref(),
        )
        .map_err(|e| ConfigError::Secret {
            name: "extractor.api_key".to_string(),
            source: e,
        })?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            inline_limit: INLINE_LIMIT_BYTES,
            poll_interval: FILE_POLL_INTERVAL,
        })
    }

    fn request_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    fn file_url(&self, name: &str) -> String {
        format!("{}/{}", self.endpoint, name)
    }

    fn generate(&self, document: &DocumentPart<'_>) -> Result<Extraction, ExtractionError> {
        let response = self
            .client
            .post(self.request_url())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&generate_body(document))
            .send()
            .map_err(|e| ExtractionError::Request(e.to_string()))?;

        parse_response(&success_body(response)?)
    }

    /// Resumable upload: a start request returns the session URL, then
    /// the bytes are sent and finalized in one request.
    fn upload(&self, bytes: Vec<u8>) -> Result<RemoteFile, ExtractionError> {
        let start = self
            .client
            .post(upload_url(&self.endpoint))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", PDF_MIME)
            .json(&json!({ "file": { "displayName": "matflow-document" } }))
            .send()
            .map_err(|e| ExtractionError::Request(e.to_string()))?;

        let session = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        success_body(start)?;
        let session = session
            .ok_or_else(|| ExtractionError::Decode("upload session URL missing".to_string()))?;

        let response = self
            .client
            .post(session)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .map_err(|e| ExtractionError::Request(e.to_string()))?;

        let uploaded: UploadResponse = serde_json::from_str(&success_body(response)?)
            .map_err(|e| ExtractionError::Decode(e.to_string()))?;
        Ok(uploaded.file)
    }

    /// Polls the file until the service has finished processing it.
    fn wait_until_active(&self, mut file: RemoteFile) -> Result<RemoteFile, ExtractionError> {
        let mut polls = 0;
        loop {
            match file.state.as_deref() {
                None | Some("ACTIVE") => return Ok(file),
                Some("FAILED") => {
                    return Err(ExtractionError::Request(format!(
                        "uploaded file {} failed processing",
                        file.name
                    )))
                }
                _ if polls == FILE_STATE_POLLS => {
                    return Err(ExtractionError::Request(format!(
                        "uploaded file {} still processing",
                        file.name
                    )))
                }
                _ => {}
            }

            std::thread::sleep(self.poll_interval);
            polls += 1;
            let response = self
                .client
                .get(self.file_url(&file.name))
                .header("x-goog-api-key", self.api_key.expose_secret())
                .send()
                .map_err(|e| ExtractionError::Request(e.to_string()))?;
            file = serde_json::from_str(&success_body(response)?)
                .map_err(|e| ExtractionError::Decode(e.to_string()))?;
        }
    }

    fn delete_file(&self, name: &str) {
        let result = self
            .client
            .delete(self.file_url(name))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .send()
            .map_err(|e| ExtractionError::Request(e.to_string()))
            .and_then(success_body);
        match result {
            Ok(_) => tracing::debug!(file = %name, "Uploaded document deleted"),
            Err(e) => tracing::warn!(file = %name, error = %e, "Failed to delete uploaded document"),
        }
    }

    fn extract_via_files_api(&self, bytes: Vec<u8>) -> Result<Extraction, ExtractionError> {
        let file = self.upload(bytes)?;
        let name = file.name.clone();
        let result = self
            .wait_until_active(file)
            .and_then(|file| self.generate(&DocumentPart::Uploaded(&file)));
        self.delete_file(&name);
        result
    }
}

/// How the document travels in a `generateContent` request.
enum DocumentPart<'a> {
    Inline(&'a [u8]),
    Uploaded(&'a RemoteFile),
}

fn generate_body(document: &DocumentPart<'_>) -> serde_json::Value {
    let document = match document {
        DocumentPart::Inline(bytes) => {
            json!({ "inlineData": { "mimeType": PDF_MIME, "data": BASE64.encode(bytes) } })
        }
        DocumentPart::Uploaded(file) => {
            json!({ "fileData": { "mimeType": file.mime_type, "fileUri": file.uri } })
        }
    };

    json!({
        "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
        "contents": [{
            "role": "user",
            "parts": [{ "text": USER_PROMPT }, document]
        }],
        "generationConfig": { "responseMimeType": "text/plain" }
    })
}

/// `https://host/v1beta` uploads to `https://host/upload/v1beta/files`.
fn upload_url(endpoint: &str) -> String {
    let path_start = endpoint
        .find("://")
        .map(|i| i + 3)
        .and_then(|host| endpoint[host..].find('/').map(|p| host + p));
    match path_start {
        Some(i) => format!("{}/upload{}/files", &endpoint[..i], &endpoint[i..]),
        None => format!("{}/upload/files", endpoint),
    }
}

fn success_body(response: reqwest::blocking::Response) -> Result<String, ExtractionError> {
    let status = response.status();
    let text = response
        .text()
        .map_err(|e| ExtractionError::Request(e.to_string()))?;

    if !status.is_success() {
        return Err(ExtractionError::Status {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(text)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    uri: String,
    #[serde(default = "default_mime")]
    mime_type: String,
    #[serde(default)]
    state: Option<String>,
}

fn default_mime() -> String {
    PDF_MIME.to_string()
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

impl Extractor for GeminiExtractor {
    fn extract(&self, renderable: &Path) -> Result<Extraction, ExtractionError> {
        let _span = tracing::info_span!(
            "extractor.gemini",
            file = %redact_path(renderable),
            model = %self.model
        )
        .entered();

        let bytes = std::fs::read(renderable).map_err(|e| ExtractionError::Read {
            path: renderable.to_path_buf(),
            source: e,
        })?;

        let extraction = if bytes.len() <= self.inline_limit {
            self.generate(&DocumentPart::Inline(&bytes))?
        } else {
            tracing::debug!(bytes = bytes.len(), "Document above inline limit, uploading");
            self.extract_via_files_api(bytes)?
        };
        tracing::info!(
            total_tokens = extraction.usage.total_token_count,
            chars = extraction.text.len(),
            "Content extracted"
        );
        Ok(extraction)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    thoughts_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

fn parse_response(body: &str) -> Result<Extraction, ExtractionError> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| ExtractionError::Decode(e.to_string()))?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }

    let usage = response.usage_metadata.unwrap_or_default();
    Ok(Extraction {
        text,
        usage: TokenUsage {
            prompt_token_count: usage.prompt_token_count,
            thoughts_token_count: usage.thoughts_token_count,
            total_token_count: usage.total_token_count,
        },
    })
}

/// Offline extractor: the document's embedded text, one `## Page n` section per page.
pub struct PdfTextExtractor;

impl Extractor for PdfTextExtractor {
    fn extract(&self, renderable: &Path) -> Result<Extraction, ExtractionError> {
        let _span =
            tracing::info_span!("extractor.pdf_text", file = %redact_path(renderable)).entered();

        let doc = lopdf::Document::load(renderable).map_err(|e| ExtractionError::Pdf(e.to_string()))?;

        let mut text = String::new();
        for (number, _) in doc.get_pages() {
            let page_text = doc.extract_text(&[number]).unwrap_or_default();
            text.push_str(&format!("## Page {}\n{}\n", number, page_text.trim()));
        }

        Ok(Extraction {
            text,
            usage: TokenUsage::default(),
        })
    }
}
