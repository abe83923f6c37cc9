//! Page extraction from source documents.
//!
//! PDFs go through `pdftotext`, whose stdout separates pages with form
//! feeds. Scanned PDFs with little or no text layer can be routed
//! through `ocrmypdf` first, per the configured OCR mode. Extraction is
//! best effort: tool failures degrade to whatever text is available and
//! are reported as warnings, not errors.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::{OcrConfig, OcrMode};
use crate::error::ExtractError;

/// Pages whose trimmed text is shorter than this are treated as
/// image-only and become OCR candidates in `auto` mode.
const OCR_TEXT_THRESHOLD: usize = 40;

/// One page of extracted text. Numbering starts at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub page: u32,
    pub text: String,
}

impl Page {
    pub fn new(page: u32, text: impl Into<String>) -> Self {
        Self {
            page,
            text: text.into(),
        }
    }
}

/// Turns a source document into ordered page text.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Vec<Page>, ExtractError>;
}

/// Production extractor: `pdftotext` for PDFs (with optional `ocrmypdf`
/// fallback), direct reads for plain text.
pub struct DocumentExtractor {
    ocr: OcrConfig,
}

impl DocumentExtractor {
    pub fn new(ocr: OcrConfig) -> Self {
        Self { ocr }
    }

    async fn extract_pdf(&self, path: &Path) -> Result<Vec<Page>, ExtractError> {
        match self.ocr.mode {
            OcrMode::Off => Ok(native_pages_or_empty(path).await),
            OcrMode::Force => match self.ocr_pages(path).await {
                Ok(pages) => Ok(pages),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "OCR failed, using native text");
                    Ok(native_pages_or_empty(path).await)
                }
            },
            OcrMode::Auto => {
                let mut pages = native_pages_or_empty(path).await;
                let low: Vec<usize> = pages
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| page_needs_ocr(&p.text))
                    .map(|(i, _)| i)
                    .collect();
                if low.is_empty() {
                    return Ok(pages);
                }

                debug!(
                    path = %path.display(),
                    low_text_pages = low.len(),
                    "Running OCR for low-text pages"
                );
                match self.ocr_pages(path).await {
                    Ok(ocr_pages) => {
                        // Replace only the deficient pages; pages the OCR
                        // run didn't produce keep their native text.
                        for i in low {
                            if let Some(replacement) = ocr_pages.get(i) {
                                pages[i].text = replacement.text.clone();
                            }
                        }
                        Ok(pages)
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "OCR failed, keeping native text");
                        Ok(pages)
                    }
                }
            }
        }
    }

    /// Run `ocrmypdf` into a scratch dir and extract the searchable copy.
    async fn ocr_pages(&self, path: &Path) -> Result<Vec<Page>, ExtractError> {
        if !tool_available("ocrmypdf") {
            return Err(ExtractError::Tool {
                tool: "ocrmypdf".into(),
                message: "not found on PATH".into(),
            });
        }

        let scratch = tempfile::tempdir()?;
        let searchable = scratch.path().join("searchable.pdf");
        let output = tokio::process::Command::new("ocrmypdf")
            .arg("--force-ocr")
            .arg("--optimize")
            .arg("3")
            .arg("--language")
            .arg(&self.ocr.langs)
            .arg(path)
            .arg(&searchable)
            .output()
            .await
            .map_err(|e| ExtractError::Tool {
                tool: "ocrmypdf".into(),
                message: format!("Failed to run ocrmypdf: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Tool {
                tool: "ocrmypdf".into(),
                message: format!("exited with {}: {}", output.status, stderr.trim()),
            });
        }

        native_pages(&searchable).await
    }
}

#[async_trait]
impl PageExtractor for DocumentExtractor {
    async fn extract(&self, path: &Path) -> Result<Vec<Page>, ExtractError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => self.extract_pdf(path).await,
            "txt" => extract_plain_text(path),
            _ => Err(ExtractError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Native PDF text via `pdftotext`, degrading to no pages on failure.
async fn native_pages_or_empty(path: &Path) -> Vec<Page> {
    match native_pages(path).await {
        Ok(pages) => pages,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "PDF text extraction failed, treating document as empty");
            Vec::new()
        }
    }
}

async fn native_pages(path: &Path) -> Result<Vec<Page>, ExtractError> {
    let output = tokio::process::Command::new("pdftotext")
        .arg("-enc")
        .arg("UTF-8")
        .arg(path)
        .arg("-")
        .output()
        .await
        .map_err(|e| ExtractError::Tool {
            tool: "pdftotext".into(),
            message: format!("Failed to run pdftotext: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractError::Tool {
            tool: "pdftotext".into(),
            message: format!("exited with {}: {}", output.status, stderr.trim()),
        });
    }

    let text = String::from_utf8_lossy(&output.stdout).to_string();
    Ok(split_form_feeds(&text))
}

fn extract_plain_text(path: &Path) -> Result<Vec<Page>, ExtractError> {
    let text = std::fs::read_to_string(path)?;
    Ok(split_form_feeds(&text))
}

/// Split text into pages on form feeds. `pdftotext` terminates every
/// page with one, leaving an empty trailing segment that is dropped; an
/// empty input yields no pages.
fn split_form_feeds(text: &str) -> Vec<Page> {
    let mut segments: Vec<&str> = text.split('\u{0c}').collect();
    if segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }
    segments
        .iter()
        .enumerate()
        .map(|(i, t)| Page::new((i + 1) as u32, *t))
        .collect()
}

fn page_needs_ocr(text: &str) -> bool {
    text.trim().chars().count() < OCR_TEXT_THRESHOLD
}

/// Check whether a command is available on the system PATH.
pub fn tool_available(name: &str) -> bool {
    std::process::Command::new("which")
        .arg(name)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Mock extractor
// ---------------------------------------------------------------------------

/// A mock extractor serving canned pages, for exercising ingest without
/// external tools.
pub struct MockPageExtractor {
    pages: HashMap<PathBuf, Vec<Page>>,
}

impl MockPageExtractor {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
        }
    }

    pub fn with_document(mut self, path: impl Into<PathBuf>, pages: Vec<Page>) -> Self {
        self.pages.insert(path.into(), pages);
        self
    }
}

impl Default for MockPageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageExtractor for MockPageExtractor {
    async fn extract(&self, path: &Path) -> Result<Vec<Page>, ExtractError> {
        self.pages
            .get(path)
            .cloned()
            .ok_or_else(|| ExtractError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
    }
}
