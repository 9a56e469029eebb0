//! Progress tracking and polling against real and scripted sources.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use docredact::{
    DocumentProcessor, ProcessOptions, ProgressPoller, ProgressRecord, ProgressSource,
    ProgressTracker, ProgressUpdate, RedactorError, RedactorResult, RuleSet, Stage,
};

mod common;
use common::*;

const PARSER_FLOW: &[Stage] = &[
    Stage::Queued,
    Stage::SavedInput,
    Stage::StartingProcessing,
    Stage::ParsingExternal,
    Stage::OpeningDocument,
    Stage::ParserPage,
    Stage::Finalizing,
    Stage::Completed,
];

/// True if every observed stage appears in `flow`, in flow order.
fn follows_flow(observed: &[Stage], flow: &[Stage]) -> bool {
    let mut position = 0;
    for stage in observed {
        match flow[position..].iter().position(|s| s == stage) {
            Some(offset) => position += offset,
            None => return false,
        }
    }
    true
}

/// Source that fails a few times before delegating to a tracker.
struct FlakySource {
    tracker: ProgressTracker,
    failures_left: AtomicUsize,
}

#[async_trait]
impl ProgressSource for FlakySource {
    async fn fetch(&self, job_id: &str) -> RedactorResult<Option<ProgressRecord>> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RedactorError::Pipeline {
                stage: "progress".to_string(),
                message: "503 from progress endpoint".to_string(),
            });
        }
        Ok(self.tracker.read(job_id))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_poller_observes_parser_flow() -> Result<()> {
    let tracker = ProgressTracker::new();
    tracker.accept("job");
    let processor = DocumentProcessor::new(tracker.clone());
    let poller = ProgressPoller::new(Arc::new(tracker.clone()));
    let mut handle = poller.start("job", Duration::from_millis(1));

    let mut updates = handle.subscribe();
    let collector = tokio::spawn(async move {
        let mut stages: Vec<Stage> = Vec::new();
        while updates.changed().await.is_ok() {
            let latest = updates.borrow_and_update().clone();
            if let Some(record) = latest {
                if stages.last() != Some(&record.stage) {
                    stages.push(record.stage);
                }
            }
        }
        stages
    });

    let input = statement_fixture().build()?;
    processor
        .process(
            &input,
            ProcessOptions::new(RuleSet::all()).with_progress_id("job"),
        )
        .await?;

    let last = handle.finished().await.expect("poller should see the end");
    assert_eq!(last.stage, Stage::Completed);
    drop(handle);

    let stages = collector.await?;
    assert!(follows_flow(&stages, PARSER_FLOW), "out of order: {:?}", stages);
    assert_eq!(stages.last(), Some(&Stage::Completed));
    Ok(())
}

#[tokio::test]
async fn test_poller_retries_failed_reads() {
    let tracker = ProgressTracker::new();
    tracker.accept("job");
    tracker.update("job", ProgressUpdate::new(Stage::Completed));

    let source = Arc::new(FlakySource {
        tracker,
        failures_left: AtomicUsize::new(3),
    });
    let poller = ProgressPoller::new(source.clone());
    let mut handle = poller.start("job", Duration::from_millis(2));

    let record = handle.finished().await.unwrap();
    assert!(record.done);
    assert_eq!(source.failures_left.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dropping_handle_stops_polling() {
    let tracker = ProgressTracker::new();
    tracker.accept("job");
    let poller = ProgressPoller::new(Arc::new(tracker.clone()));

    let handle = poller.start("job", Duration::from_millis(2));
    let mut updates = handle.subscribe();
    drop(handle);

    // The loop exits and drops its sender
    while updates.changed().await.is_ok() {}
    assert_eq!(poller.active_polls(), 0);
    assert_eq!(tracker.read("job").unwrap().stage, Stage::Queued);
}

#[tokio::test]
async fn test_sweeper_removes_finished_jobs() {
    let tracker = ProgressTracker::new();
    tracker.accept("done");
    tracker.accept("running");
    tracker.update("done", ProgressUpdate::new(Stage::Completed));
    assert!(tracker.read("done").unwrap().done);

    let token = CancellationToken::new();
    let sweeper = tracker.spawn_sweeper(Duration::from_millis(2), Duration::ZERO, token.clone());

    tokio::time::timeout(Duration::from_secs(2), async {
        while tracker.len() > 1 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("sweeper should drop the finished job");

    token.cancel();
    sweeper.await.unwrap();
    assert!(tracker.read("done").is_none());
    assert!(tracker.read("running").is_some());
}

#[test]
fn test_flow_check() {
    assert!(follows_flow(
        &[Stage::Queued, Stage::ParserPage, Stage::Completed],
        PARSER_FLOW
    ));
    assert!(!follows_flow(
        &[Stage::ParserPage, Stage::OpeningDocument],
        PARSER_FLOW
    ));
}
