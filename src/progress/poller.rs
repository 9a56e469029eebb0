//! Client-side progress polling.
//!
//! A poll loop runs as a tokio task, reading a [`ProgressSource`] at a
//! fixed interval until it sees a terminal record or its handle is
//! cancelled. At most one loop runs per job: starting a new poll for a job
//! cancels the previous one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ProgressRecord, ProgressSource};

/// Default delay between two reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Starts and de-duplicates poll loops.
#[derive(Clone)]
pub struct ProgressPoller {
    source: Arc<dyn ProgressSource>,
    active: Arc<DashMap<String, (u64, CancellationToken)>>,
    generation: Arc<AtomicU64>,
}

impl ProgressPoller {
    pub fn new(source: Arc<dyn ProgressSource>) -> Self {
        Self {
            source,
            active: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of poll loops currently running.
    pub fn active_polls(&self) -> usize {
        self.active.len()
    }

    /// Starts polling `job_id` every `interval`, cancelling any poll already
    /// running for that job.
    pub fn start(&self, job_id: &str, interval: Duration) -> PollHandle {
        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        if let Some((_, previous)) = self
            .active
            .insert(job_id.to_string(), (generation, token.clone()))
        {
            debug!(job_id, "Replacing running poll");
            previous.cancel();
        }

        let (sender, receiver) = watch::channel(None);
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.source),
            Arc::clone(&self.active),
            job_id.to_string(),
            generation,
            interval,
            token.clone(),
            sender,
        ));

        PollHandle {
            job_id: job_id.to_string(),
            token,
            receiver,
            task,
        }
    }
}

async fn poll_loop(
    source: Arc<dyn ProgressSource>,
    active: Arc<DashMap<String, (u64, CancellationToken)>>,
    job_id: String,
    generation: u64,
    interval: Duration,
    token: CancellationToken,
    sender: watch::Sender<Option<ProgressRecord>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            _ = token.cancelled() => break,
            fetched = source.fetch(&job_id) => fetched,
        };

        match fetched {
            Ok(Some(record)) => {
                let done = record.done;
                sender.send_replace(Some(record));
                if done {
                    debug!(job_id = %job_id, "Job finished, poll stopped");
                    break;
                }
            }
            // Not registered yet
            Ok(None) => debug!(job_id = %job_id, "No progress yet"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Progress fetch failed, retrying"),
        }
    }

    active.remove_if(&job_id, |_, (current, _)| *current == generation);
}

/// Caller-owned handle to one poll loop. Dropping it cancels the loop.
#[derive(Debug)]
pub struct PollHandle {
    job_id: String,
    token: CancellationToken,
    receiver: watch::Receiver<Option<ProgressRecord>>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Most recent record seen, if any.
    pub fn latest(&self) -> Option<ProgressRecord> {
        self.receiver.borrow().clone()
    }

    /// Receiver notified on every new record.
    pub fn subscribe(&self) -> watch::Receiver<Option<ProgressRecord>> {
        self.receiver.clone()
    }

    /// Stops polling. The job itself keeps running.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for a terminal record. Returns the last record seen if the
    /// loop stops first.
    pub async fn finished(&mut self) -> Option<ProgressRecord> {
        loop {
            if let Some(record) = self.receiver.borrow_and_update().as_ref() {
                if record.done {
                    return Some(record.clone());
                }
            }
            if self.receiver.changed().await.is_err() {
                return self.receiver.borrow().clone();
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
