//! Input sniffing and positioned-text extraction.

use std::fmt;
use std::str::FromStr;

use lopdf::{Document, ObjectId};
use serde::{Deserialize, Serialize};

use crate::error::{RedactorError, RedactorResult};
use crate::redaction::pdf;
use crate::redaction::positioned::readable_chars;
use crate::redaction::PositionedRun;

/// Parsed text below this many readable characters counts as no text.
pub const MIN_PARSED_CHARS: usize = 10;

/// What the submitted bytes are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Text,
}

/// Sniffs the input: `%PDF-` header or valid UTF-8.
pub fn sniff(bytes: &[u8]) -> RedactorResult<DocumentKind> {
    if bytes.starts_with(b"%PDF-") {
        return Ok(DocumentKind::Pdf);
    }
    match std::str::from_utf8(bytes) {
        Ok(_) => Ok(DocumentKind::Text),
        Err(e) => Err(RedactorError::UnsupportedFormat {
            reason: format!("neither a PDF nor UTF-8 text ({})", e),
        }),
    }
}

/// How text is obtained from a PDF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Parser first, OCR when the parser finds no usable text
    #[default]
    Auto,
    Parser,
    Ocr,
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractionMode::Auto => "auto",
            ExtractionMode::Parser => "parser",
            ExtractionMode::Ocr => "ocr",
        })
    }
}

impl FromStr for ExtractionMode {
    type Err = RedactorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ExtractionMode::Auto),
            "parser" => Ok(ExtractionMode::Parser),
            "ocr" => Ok(ExtractionMode::Ocr),
            other => Err(RedactorError::InvalidInput {
                parameter: "extraction_mode".to_string(),
                reason: format!("expected auto, parser or ocr, got '{}'", other),
            }),
        }
    }
}

/// Method that actually produced the runs of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Parser,
    Ocr,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractionMethod::Parser => "parser",
            ExtractionMethod::Ocr => "ocr",
        })
    }
}

/// External OCR collaborator.
///
/// Implementations receive the whole PDF and a zero-based page index and
/// return the recognised runs in PDF user space.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn recognize_page(&self, pdf: &[u8], page_index: usize) -> RedactorResult<Vec<PositionedRun>>;
}

/// A loaded PDF with the parser's runs for every page.
pub struct ParsedDocument {
    pub document: Document,
    pub page_ids: Vec<ObjectId>,
    pub pages: Vec<RedactorResult<Vec<PositionedRun>>>,
}

impl ParsedDocument {
    /// Loads the PDF and interprets every page's content stream.
    pub fn parse(bytes: &[u8]) -> RedactorResult<Self> {
        let document = pdf::load_document(bytes)?;
        let page_ids = pdf::page_ids(&document);
        let pages = page_ids
            .iter()
            .enumerate()
            .map(|(index, id)| pdf::extract_page_runs(&document, index, *id))
            .collect();
        Ok(Self {
            document,
            page_ids,
            pages,
        })
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Readable non-whitespace characters across all successfully parsed
    /// pages.
    pub fn text_chars(&self) -> usize {
        self.pages
            .iter()
            .filter_map(|page| page.as_ref().ok())
            .flatten()
            .map(|run| readable_chars(&run.text))
            .sum()
    }

    pub fn has_usable_text(&self) -> bool {
        self.text_chars() >= MIN_PARSED_CHARS
    }
}
