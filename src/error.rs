//! Error types for the detection and redaction engine.
//!
//! Errors are grouped by when they can happen: configuration errors surface
//! while the rule registry or the config file is loaded, input errors are
//! raised before any detection work starts, and the remaining variants are
//! job-time failures reported per document.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for redaction operations.
pub type RedactorResult<T> = Result<T, RedactorError>;

/// Error type for all detection, redaction and pipeline operations.
#[derive(Debug, Error)]
pub enum RedactorError {
    /// Error occurred while reading or writing files
    #[error("IO error for path '{}': {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// Error occurred during PDF processing
    #[error("{}", pdf_processing_message(message, page))]
    PdfProcessing {
        message: String,
        page: Option<usize>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A rule pattern failed to compile. Fatal at startup.
    #[error("Pattern error for '{pattern}': {reason}")]
    PatternError { pattern: String, reason: String },

    /// The submitted bytes are neither a PDF nor UTF-8 text
    #[error("Unsupported input format: {reason}")]
    UnsupportedFormat { reason: String },

    /// No usable text could be extracted from the document
    #[error("Text extraction failed: {reason}")]
    TextExtraction { reason: String },

    /// OCR extraction was requested but no engine is configured
    #[error("OCR extraction requested but no OCR engine is configured")]
    OcrUnavailable,

    /// An external processing collaborator reported failure
    #[error("Processing failed during {stage}: {message}")]
    Pipeline { stage: String, message: String },

    /// The caller stopped waiting for the job
    #[error("Processing timed out after {}s", after.as_secs())]
    Timeout { after: Duration },

    /// Invalid configuration or parameters
    #[error("Invalid input for '{parameter}': {reason}")]
    InvalidInput { parameter: String, reason: String },

    /// Backend-specific error (lopdf, pdf-extract, tokio, ...)
    #[error("{backend} backend error: {message}")]
    BackendError {
        backend: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

fn pdf_processing_message(message: &str, page: &Option<usize>) -> String {
    match page {
        Some(p) => format!("PDF processing error on page {}: {}", p, message),
        None => format!("PDF processing error: {}", message),
    }
}

impl RedactorError {
    /// Short machine-readable category, used in progress messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::PdfProcessing { .. } => "pdf",
            Self::PatternError { .. } => "configuration",
            Self::UnsupportedFormat { .. } | Self::InvalidInput { .. } => "input",
            Self::TextExtraction { .. } | Self::OcrUnavailable => "extraction",
            Self::Pipeline { .. } | Self::BackendError { .. } => "pipeline",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Returns true if the error was caused by the caller giving up.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// Conversion implementations for common error types
impl From<io::Error> for RedactorError {
    fn from(err: io::Error) -> Self {
        Self::BackendError {
            backend: "std::io".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<regex::Error> for RedactorError {
    fn from(err: regex::Error) -> Self {
        Self::PatternError {
            pattern: "<unknown>".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<lopdf::Error> for RedactorError {
    fn from(err: lopdf::Error) -> Self {
        Self::BackendError {
            backend: "lopdf".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<tokio::task::JoinError> for RedactorError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::BackendError {
            backend: "tokio".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
