//! Document orchestration.
//!
//! [`DocumentProcessor`] takes the raw bytes of a submitted document,
//! decides whether it is text or PDF, drives extraction, concurrent page
//! analysis and painting, and reports every stage to the progress tracker.

pub mod extract;

pub use extract::{sniff, DocumentKind, ExtractionMethod, ExtractionMode, OcrEngine};

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{Detector, RuleSet, Sensitivity};
use crate::error::{RedactorError, RedactorResult};
use crate::progress::{ProgressTracker, ProgressUpdate, Stage};
use crate::redaction::positioned::DEFAULT_COVER_PADDING;
use crate::redaction::{
    pdf, PageRedaction, PageRedactor, PdfAction, PositionedRun, RedactionStats, TextStrategy,
    TextTransformer,
};
use extract::ParsedDocument;

/// Default number of pages analysed at the same time.
pub const DEFAULT_MAX_PAGE_WORKERS: usize = 4;

/// Default caller timeout for a whole document.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const PERCENT_SAVED_INPUT: u8 = 5;
const PERCENT_IMAGE_CONVERTED: u8 = 8;
const PERCENT_STARTING: u8 = 12;
const PERCENT_EXTRACTING: u8 = 18;
const PERCENT_OPENING: u8 = 20;
const PERCENT_PAGES_SPAN: usize = 75;
const PERCENT_PAGES_CAP: u8 = 95;
const PERCENT_FINALIZING: u8 = 97;

/// Per-job settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessOptions {
    pub rules: RuleSet,
    pub sensitivity: Sensitivity,
    pub action: PdfAction,
    pub strategy: TextStrategy,
    pub extraction_mode: ExtractionMode,
    pub progress_id: Option<String>,
}

impl ProcessOptions {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            ..Default::default()
        }
    }

    pub fn with_progress_id(mut self, job_id: impl Into<String>) -> Self {
        self.progress_id = Some(job_id.into());
        self
    }
}

/// Result of a finished job.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    /// Redacted PDF, or transformed UTF-8 text
    pub bytes: Vec<u8>,
    pub kind: DocumentKind,
    pub stats: RedactionStats,
    pub pages_processed: usize,
    pub pages_failed: usize,
    pub extraction_method: Option<ExtractionMethod>,
}

/// Where a page's runs come from.
#[derive(Clone)]
enum PageSource {
    Parsed(Arc<RedactorResult<Vec<PositionedRun>>>),
    Ocr(Arc<dyn OcrEngine>, Arc<Vec<u8>>),
}

impl PageSource {
    fn runs(&self, page_index: usize) -> RedactorResult<Vec<PositionedRun>> {
        match self {
            PageSource::Parsed(result) => match result.as_ref() {
                Ok(runs) => Ok(runs.clone()),
                Err(e) => Err(RedactorError::PdfProcessing {
                    message: e.to_string(),
                    page: Some(page_index + 1),
                    source: None,
                }),
            },
            PageSource::Ocr(engine, bytes) => engine.recognize_page(bytes, page_index),
        }
    }
}

/// Writes progress for one job when a job id was given.
#[derive(Clone)]
struct Reporter {
    tracker: ProgressTracker,
    job_id: Option<String>,
}

impl Reporter {
    fn report(&self, update: ProgressUpdate) {
        if let Some(job_id) = &self.job_id {
            self.tracker.update(job_id, update);
        }
    }

    fn fail(&self, err: &RedactorError) {
        if let Some(job_id) = &self.job_id {
            self.tracker.fail(job_id, err.to_string());
        }
    }
}

/// Orchestrates one document from raw bytes to redacted output.
#[derive(Clone)]
pub struct DocumentProcessor {
    tracker: ProgressTracker,
    ocr: Option<Arc<dyn OcrEngine>>,
    transformer: TextTransformer,
    detector: Detector,
    max_page_workers: usize,
    cover_padding: f32,
}

impl DocumentProcessor {
    pub fn new(tracker: ProgressTracker) -> Self {
        Self {
            tracker,
            ocr: None,
            transformer: TextTransformer::default(),
            detector: Detector::new(),
            max_page_workers: DEFAULT_MAX_PAGE_WORKERS,
            cover_padding: DEFAULT_COVER_PADDING,
        }
    }

    /// Processor configured from a loaded [`Config`].
    pub fn from_config(config: &Config, tracker: ProgressTracker) -> Self {
        Self::new(tracker)
            .with_transformer(config.transformer())
            .with_max_page_workers(config.max_page_workers)
            .with_cover_padding(config.cover_padding)
    }

    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn with_transformer(mut self, transformer: TextTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_max_page_workers(mut self, workers: usize) -> Self {
        self.max_page_workers = workers.max(1);
        self
    }

    pub fn with_cover_padding(mut self, padding: f32) -> Self {
        self.cover_padding = padding.max(0.0);
        self
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Runs a job to completion.
    ///
    /// # Errors
    ///
    /// Input errors are returned before any progress is written. Every
    /// later failure also moves the job's progress record to `error`.
    pub async fn process(
        &self,
        bytes: &[u8],
        options: ProcessOptions,
    ) -> RedactorResult<ProcessedDocument> {
        let kind = sniff(bytes)?;
        let reporter = Reporter {
            tracker: self.tracker.clone(),
            job_id: options.progress_id.clone(),
        };

        info!(
            job_id = options.progress_id.as_deref().unwrap_or("-"),
            kind = ?kind,
            bytes = bytes.len(),
            rules = options.rules.len(),
            "Processing document"
        );

        reporter.report(ProgressUpdate::new(Stage::SavedInput).percent(PERCENT_SAVED_INPUT));

        let result = match kind {
            DocumentKind::Text => self.process_text(bytes, &options, &reporter).await,
            DocumentKind::Pdf => self.process_pdf(bytes, &options, &reporter).await,
        };

        match result {
            Ok(document) => {
                reporter.report(ProgressUpdate::new(Stage::Completed).percent(100));
                info!(
                    job_id = options.progress_id.as_deref().unwrap_or("-"),
                    total = document.stats.total,
                    pages = document.pages_processed,
                    failed_pages = document.pages_failed,
                    "Document processed"
                );
                Ok(document)
            }
            Err(e) => {
                warn!(
                    job_id = options.progress_id.as_deref().unwrap_or("-"),
                    error = %e,
                    "Document processing failed"
                );
                reporter.fail(&e);
                Err(e)
            }
        }
    }

    /// Runs [`process`](Self::process) on its own task and stops waiting
    /// after `timeout`. The job keeps running in the background.
    pub async fn process_with_timeout(
        &self,
        bytes: Vec<u8>,
        options: ProcessOptions,
        timeout: Duration,
    ) -> RedactorResult<ProcessedDocument> {
        let processor = self.clone();
        let job_id = options.progress_id.clone();
        let task = tokio::spawn(async move { processor.process(&bytes, options).await });

        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => {
                warn!(
                    job_id = job_id.as_deref().unwrap_or("-"),
                    after_secs = timeout.as_secs(),
                    "Stopped waiting for document"
                );
                Err(RedactorError::Timeout { after: timeout })
            }
        }
    }

    async fn process_text(
        &self,
        bytes: &[u8],
        options: &ProcessOptions,
        reporter: &Reporter,
    ) -> RedactorResult<ProcessedDocument> {
        let text = String::from_utf8(bytes.to_vec()).map_err(|e| {
            RedactorError::UnsupportedFormat {
                reason: e.to_string(),
            }
        })?;
        reporter.report(ProgressUpdate::new(Stage::StartingProcessing).percent(PERCENT_STARTING));

        let detector = self.detector;
        let transformer = self.transformer.clone();
        let rules = options.rules.clone();
        let sensitivity = options.sensitivity;
        let strategy = options.strategy;

        let (output, stats) = tokio::task::spawn_blocking(move || {
            let matches = detector.detect_with_sensitivity(&text, &rules, sensitivity);
            let stats = crate::domain::detector::summarize(&matches);
            (transformer.apply(&text, &matches, strategy), stats)
        })
        .await?;

        reporter.report(ProgressUpdate::new(Stage::Finalizing).percent(PERCENT_FINALIZING));

        Ok(ProcessedDocument {
            bytes: output.into_bytes(),
            kind: DocumentKind::Text,
            stats,
            pages_processed: 1,
            pages_failed: 0,
            extraction_method: None,
        })
    }

    async fn process_pdf(
        &self,
        bytes: &[u8],
        options: &ProcessOptions,
        reporter: &Reporter,
    ) -> RedactorResult<ProcessedDocument> {
        if options.extraction_mode == ExtractionMode::Ocr && self.ocr.is_none() {
            return Err(RedactorError::OcrUnavailable);
        }

        let input = Arc::new(bytes.to_vec());
        let scanned = options.extraction_mode == ExtractionMode::Ocr;
        if scanned {
            reporter.report(
                ProgressUpdate::new(Stage::ImageConverted)
                    .percent(PERCENT_IMAGE_CONVERTED)
                    .method(ExtractionMethod::Ocr),
            );
        }
        reporter.report(ProgressUpdate::new(Stage::StartingProcessing).percent(PERCENT_STARTING));

        let parse_input = Arc::clone(&input);
        let parsed = if scanned {
            let document = tokio::task::spawn_blocking(move || pdf::load_document(&parse_input))
                .await??;
            let page_ids = pdf::page_ids(&document);
            ParsedDocument {
                document,
                page_ids,
                pages: Vec::new(),
            }
        } else {
            reporter.report(
                ProgressUpdate::new(Stage::ParsingExternal)
                    .percent(PERCENT_EXTRACTING)
                    .method(ExtractionMethod::Parser),
            );
            tokio::task::spawn_blocking(move || ParsedDocument::parse(&parse_input)).await??
        };

        let total_pages = parsed.page_count();
        if total_pages == 0 {
            return Err(RedactorError::TextExtraction {
                reason: "document has no pages".to_string(),
            });
        }

        let method = self.choose_method(options.extraction_mode, &parsed);
        let ParsedDocument {
            mut document,
            page_ids,
            pages,
        } = parsed;

        let sources: Vec<PageSource> = match (method, &self.ocr) {
            (ExtractionMethod::Ocr, Some(engine)) => {
                reporter.report(
                    ProgressUpdate::new(Stage::OcrInitializing)
                        .percent(PERCENT_EXTRACTING)
                        .method(ExtractionMethod::Ocr),
                );
                info!(engine = engine.name(), pages = total_pages, "Using OCR extraction");
                (0..total_pages)
                    .map(|_| PageSource::Ocr(Arc::clone(engine), Arc::clone(&input)))
                    .collect()
            }
            (ExtractionMethod::Ocr, None) => return Err(RedactorError::OcrUnavailable),
            (ExtractionMethod::Parser, _) => pages
                .into_iter()
                .map(|page| PageSource::Parsed(Arc::new(page)))
                .collect(),
        };

        reporter.report(
            ProgressUpdate::new(Stage::OpeningDocument)
                .percent(PERCENT_OPENING)
                .pages(0, total_pages)
                .method(method),
        );

        let page_stage = match method {
            ExtractionMethod::Parser => Stage::ParserPage,
            ExtractionMethod::Ocr => Stage::OcrPage,
        };
        let redactor = PageRedactor::new(options.rules.clone(), options.sensitivity)
            .with_detector(self.detector)
            .with_padding(self.cover_padding);

        let mut analysed = stream::iter(sources.into_iter().enumerate())
            .map(|(page_index, source)| {
                let redactor = redactor.clone();
                tokio::task::spawn_blocking(move || {
                    let page = redactor.redact_page(page_index, source.runs(page_index)?);
                    if page.has_text() {
                        Ok(page)
                    } else {
                        Err(RedactorError::TextExtraction {
                            reason: format!("page {} yields no extractable text", page_index + 1),
                        })
                    }
                })
            })
            .buffered(self.max_page_workers);

        let mut stats = RedactionStats::default();
        let mut painted: Vec<PageRedaction> = Vec::with_capacity(total_pages);
        let mut pages_failed = 0;
        let mut page_index = 0;

        while let Some(joined) = analysed.next().await {
            match joined? {
                Ok(page) => {
                    debug!(page = page_index, matches = page.matches.len(), "Page done");
                    stats.merge(&page.stats());
                    painted.push(page);
                }
                Err(e) => {
                    warn!(page = page_index, error = %e, "Page skipped");
                    pages_failed += 1;
                }
            }
            page_index += 1;

            reporter.report(
                ProgressUpdate::new(page_stage)
                    .percent(page_percent(page_index, total_pages))
                    .pages(page_index, total_pages)
                    .method(method),
            );
        }

        if pages_failed == total_pages {
            return Err(RedactorError::TextExtraction {
                reason: format!("no text could be extracted from any of {} pages", total_pages),
            });
        }

        reporter.report(
            ProgressUpdate::new(Stage::Finalizing)
                .percent(PERCENT_FINALIZING)
                .pages(total_pages, total_pages),
        );

        let action = options.action;
        let output = tokio::task::spawn_blocking(move || {
            for page in &painted {
                pdf::paint_page(
                    &mut document,
                    page.page_index,
                    page_ids[page.page_index],
                    &page.covers,
                    &page.covered_ops,
                    action,
                )?;
            }
            pdf::save_document(&mut document)
        })
        .await??;

        Ok(ProcessedDocument {
            bytes: output,
            kind: DocumentKind::Pdf,
            stats,
            pages_processed: total_pages - pages_failed,
            pages_failed,
            extraction_method: Some(method),
        })
    }

    fn choose_method(&self, mode: ExtractionMode, parsed: &ParsedDocument) -> ExtractionMethod {
        match mode {
            ExtractionMode::Parser => ExtractionMethod::Parser,
            ExtractionMode::Ocr => ExtractionMethod::Ocr,
            ExtractionMode::Auto => {
                if parsed.has_usable_text() {
                    ExtractionMethod::Parser
                } else if self.ocr.is_some() {
                    info!(
                        chars = parsed.text_chars(),
                        "Parser found no usable text, falling back to OCR"
                    );
                    ExtractionMethod::Ocr
                } else {
                    warn!("Parser found no usable text and no OCR engine is configured");
                    ExtractionMethod::Parser
                }
            }
        }
    }
}

/// `20 + 75 * done / total`, capped at 95.
fn page_percent(done: usize, total: usize) -> u8 {
    let total = total.max(1);
    let percent = usize::from(PERCENT_OPENING) + PERCENT_PAGES_SPAN * done / total;
    percent.min(usize::from(PERCENT_PAGES_CAP)) as u8
}
