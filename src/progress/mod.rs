//! Job progress tracking.
//!
//! The [`ProgressTracker`] is the server-side store of per-job progress
//! records. Every stage transition of the document pipeline is written
//! here, and clients read it back, usually through a
//! [`ProgressPoller`](poller::ProgressPoller).
//!
//! A record never moves backwards: `percent` is non-decreasing and once a
//! record is terminal (`completed` or `error`) it is frozen.

pub mod poller;

pub use poller::{PollHandle, ProgressPoller};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RedactorResult;
use crate::pipeline::ExtractionMethod;

/// Records idle for longer than this are dropped by [`ProgressTracker::sweep`].
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2 * 60 * 60);

/// Pipeline stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Queued,
    SavedInput,
    ImageConverted,
    StartingProcessing,
    ParsingExternal,
    OcrInitializing,
    OpeningDocument,
    ParserPage,
    OcrPage,
    Finalizing,
    Completed,
    Error,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::SavedInput => "saved-input",
            Stage::ImageConverted => "image-converted",
            Stage::StartingProcessing => "starting-processing",
            Stage::ParsingExternal => "parsing-external",
            Stage::OcrInitializing => "ocr-initializing",
            Stage::OpeningDocument => "opening-document",
            Stage::ParserPage => "parser-page",
            Stage::OcrPage => "ocr-page",
            Stage::Finalizing => "finalizing",
            Stage::Completed => "completed",
            Stage::Error => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one job as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub job_id: String,
    pub stage: Stage,
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<ExtractionMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub done: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    fn queued(job_id: &str, percent: u8) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage: Stage::Queued,
            percent,
            current_page: None,
            total_pages: None,
            extraction_method: None,
            message: None,
            done: false,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.done || self.stage.is_terminal()
    }

    fn merge(&mut self, update: ProgressUpdate) {
        self.stage = update.stage;
        if let Some(percent) = update.percent {
            self.percent = self.percent.max(percent.min(100));
        }
        if update.current_page.is_some() {
            self.current_page = update.current_page;
        }
        if update.total_pages.is_some() {
            self.total_pages = update.total_pages;
        }
        if update.extraction_method.is_some() {
            self.extraction_method = update.extraction_method;
        }
        if update.message.is_some() {
            self.message = update.message;
        }
        match update.stage {
            Stage::Completed => {
                self.done = true;
                self.percent = 100;
            }
            Stage::Error => self.done = true,
            _ => {}
        }
        self.updated_at = Utc::now();
    }
}

/// Partial record written by the pipeline; absent fields are left alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub percent: Option<u8>,
    pub current_page: Option<usize>,
    pub total_pages: Option<usize>,
    pub extraction_method: Option<ExtractionMethod>,
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            percent: None,
            current_page: None,
            total_pages: None,
            extraction_method: None,
            message: None,
        }
    }

    pub fn percent(mut self, percent: u8) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn pages(mut self, current: usize, total: usize) -> Self {
        self.current_page = Some(current);
        self.total_pages = Some(total);
        self
    }

    pub fn method(mut self, method: ExtractionMethod) -> Self {
        self.extraction_method = Some(method);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug)]
struct Entry {
    record: ProgressRecord,
    touched: Instant,
    terminal_read_at: Option<Instant>,
}

#[derive(Debug)]
struct TrackerInner {
    records: DashMap<String, Entry>,
    stale_after: Duration,
}

/// Shared, cloneable progress store.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::with_stale_after(DEFAULT_STALE_AFTER)
    }

    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                records: DashMap::new(),
                stale_after,
            }),
        }
    }

    /// Registers a new job as `queued`.
    ///
    /// An id that is already tracked keeps its record, running or terminal,
    /// and that record is returned unchanged.
    pub fn accept(&self, job_id: &str) -> ProgressRecord {
        let entry = self
            .inner
            .records
            .entry(job_id.to_string())
            .or_insert_with(|| Entry {
                record: ProgressRecord::queued(job_id, 1),
                touched: Instant::now(),
                terminal_read_at: None,
            });
        debug!(job_id, stage = %entry.record.stage, "Job accepted");
        entry.record.clone()
    }

    /// Merges an update into the job's record, creating it if needed.
    ///
    /// Writes to a terminal record are ignored and the frozen record is
    /// returned.
    pub fn update(&self, job_id: &str, update: ProgressUpdate) -> ProgressRecord {
        let mut entry = self
            .inner
            .records
            .entry(job_id.to_string())
            .or_insert_with(|| Entry {
                record: ProgressRecord::queued(job_id, 0),
                touched: Instant::now(),
                terminal_read_at: None,
            });

        if entry.record.is_terminal() {
            warn!(
                job_id,
                stage = %update.stage,
                current = %entry.record.stage,
                "Ignoring progress update for finished job"
            );
            return entry.record.clone();
        }

        entry.record.merge(update);
        entry.touched = Instant::now();
        debug!(
            job_id,
            stage = %entry.record.stage,
            percent = entry.record.percent,
            "Progress updated"
        );
        entry.record.clone()
    }

    /// Moves the job to `error`.
    pub fn fail(&self, job_id: &str, message: impl Into<String>) -> ProgressRecord {
        self.update(job_id, ProgressUpdate::new(Stage::Error).message(message))
    }

    /// Current record; reading a terminal record schedules it for removal.
    pub fn read(&self, job_id: &str) -> Option<ProgressRecord> {
        let mut entry = self.inner.records.get_mut(job_id)?;
        if entry.record.is_terminal() && entry.terminal_read_at.is_none() {
            entry.terminal_read_at = Some(Instant::now());
        }
        Some(entry.record.clone())
    }

    pub fn remove(&self, job_id: &str) -> Option<ProgressRecord> {
        self.inner.records.remove(job_id).map(|(_, entry)| entry.record)
    }

    /// Drops terminal records read more than `retention` ago and records
    /// idle past the stale limit. Returns how many were dropped.
    pub fn sweep(&self, retention: Duration) -> usize {
        let before = self.inner.records.len();
        let stale_after = self.inner.stale_after;
        self.inner.records.retain(|_, entry| {
            let expired = entry
                .terminal_read_at
                .is_some_and(|read_at| read_at.elapsed() >= retention);
            !expired && entry.touched.elapsed() < stale_after
        });
        let dropped = before.saturating_sub(self.inner.records.len());
        if dropped > 0 {
            debug!(dropped, "Swept progress records");
        }
        dropped
    }

    /// Sweeps every `interval` until `token` is cancelled.
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        retention: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tracker.sweep(retention);
                    }
                }
            }
            debug!("Progress sweeper stopped");
        })
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything a client can read progress records from.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    /// `Ok(None)` means the job is not known (yet).
    async fn fetch(&self, job_id: &str) -> RedactorResult<Option<ProgressRecord>>;
}

#[async_trait]
impl ProgressSource for ProgressTracker {
    async fn fetch(&self, job_id: &str) -> RedactorResult<Option<ProgressRecord>> {
        Ok(self.read(job_id))
    }
}
