//! Sensitive-data detection and redaction for text and PDF documents.
//!
//! The library finds personal data in free text (cards, IBANs, Spanish
//! national IDs, emails, phones and a dozen more categories) and either
//! rewrites the text or paints over the matches on the pages of a PDF.
//!
//! # Features
//!
//! - **Rule Registry**: Twenty detection rules with checksum validators and
//!   a fixed priority order
//! - **Sensitivity Levels**: Strict, normal and relaxed confidence scoring,
//!   boosted by nearby context keywords
//! - **Text Strategies**: Tokenize, mask or underline each match
//! - **PDF Redaction**: Content-stream text is blanked and covered with
//!   opaque rectangles, or outlined for review
//! - **Progress Tracking**: Per-job stage records and a cancellable poller
//!
//! # Architecture
//!
//! - [`domain`]: Rules, validators, normalization and the detector
//! - [`redaction`]: Text strategies, positioned-run redaction and the PDF backend
//! - [`pipeline`]: Document orchestration with concurrent page analysis
//! - [`progress`]: Job progress records and client-side polling
//! - [`config`]: TOML configuration
//! - [`error`]: Error handling
//!
//! # Quick Start
//!
//! ```
//! use docredact::{RedactionService, RuleSet, Sensitivity, TextStrategy};
//!
//! let service = RedactionService::default();
//! let (output, stats) = service.redact_text(
//!     "Contact jane@example.com",
//!     &RuleSet::all(),
//!     Sensitivity::Normal,
//!     TextStrategy::Tokenize,
//! );
//! assert_eq!(output, "Contact [EMAIL]");
//! assert_eq!(stats.total, 1);
//! ```
//!
//! # Examples
//!
//! ## Redact a PDF
//!
//! ```no_run
//! use docredact::{DocumentProcessor, ProcessOptions, ProgressTracker, RuleSet};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let tracker = ProgressTracker::new();
//! tracker.accept("job-1");
//! let processor = DocumentProcessor::new(tracker.clone());
//!
//! let input = std::fs::read("statement.pdf")?;
//! let options = ProcessOptions::new(RuleSet::all()).with_progress_id("job-1");
//! let document = processor.process(&input, options).await?;
//! std::fs::write("statement.redacted.pdf", &document.bytes)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod redaction;

pub use config::Config;
pub use domain::{
    Detection, Detector, PatternMatcher, Rule, RuleId, RuleRegistry, RuleSet, Sensitivity,
};
pub use error::{RedactorError, RedactorResult};
pub use pipeline::{
    DocumentKind, DocumentProcessor, ExtractionMethod, ExtractionMode, OcrEngine, ProcessOptions,
    ProcessedDocument,
};
pub use progress::{
    PollHandle, ProgressPoller, ProgressRecord, ProgressSource, ProgressTracker, ProgressUpdate,
    Stage,
};
pub use redaction::{
    PdfAction, PositionedRun, RedactionService, RedactionStats, RedactionStrategy, TextStrategy,
    TextTransformer,
};
