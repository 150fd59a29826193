//! Background polling of ingestion progress.
//!
//! [`Poller::start`] spawns a task that repeatedly runs a progress round and
//! publishes each snapshot on a watch channel. The returned [`PollHandle`]
//! owns the task's liveness: once it is cancelled or dropped, no further
//! report is applied and nothing more is published.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::IngestBackend;
use crate::config::PollingSettings;
use crate::ingest::{IngestionJob, JobStatus};
use crate::progress::{OverallStatus, ProgressAggregator, ProgressSnapshot};

#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_backoff: Duration,
    /// Consecutive fatal rounds before giving up. Zero never gives up.
    pub max_consecutive_failures: u32,
    pub stop_on_complete: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PollingSettings::default())
    }
}

impl From<&PollingSettings> for PollPolicy {
    fn from(settings: &PollingSettings) -> Self {
        Self {
            interval: Duration::from_millis(settings.interval_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            max_consecutive_failures: settings.max_consecutive_failures,
            stop_on_complete: settings.stop_on_complete,
        }
    }
}

impl PollPolicy {
    /// Wait before the next round: the base interval, doubled per
    /// consecutive failure, capped at `max_backoff`.
    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.interval;
        }
        let exp = 2u64.saturating_pow(consecutive_failures);
        let base_ms = self.interval.as_millis() as u64;
        let raw_ms = base_ms.saturating_mul(exp);
        let cap_ms = (self.max_backoff.as_millis() as u64).max(base_ms);
        Duration::from_millis(raw_ms.min(cap_ms))
    }
}

/// Why the polling task stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum PollExit {
    Completed(ProgressSnapshot),
    GaveUp {
        failures: u32,
        last_error: Option<String>,
    },
    Cancelled,
}

#[derive(Debug)]
struct Liveness {
    alive: Mutex<bool>,
    notify: Notify,
}

impl Liveness {
    fn new() -> Self {
        Self {
            alive: Mutex::new(true),
            notify: Notify::new(),
        }
    }

    fn is_alive(&self) -> bool {
        *self.alive.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cancel(&self) {
        *self.alive.lock().unwrap_or_else(|e| e.into_inner()) = false;
        self.notify.notify_waiters();
    }

    /// Run `f` only while alive. Cancellation waits for a running `f`.
    fn while_alive<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let alive = self.alive.lock().unwrap_or_else(|e| e.into_inner());
        if *alive {
            Some(f())
        } else {
            None
        }
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.is_alive() {
                return;
            }
            notified.await;
        }
    }
}

pub struct PollHandle {
    snapshots: watch::Receiver<Option<ProgressSnapshot>>,
    job: watch::Receiver<IngestionJob>,
    liveness: Arc<Liveness>,
    task: Option<JoinHandle<PollExit>>,
}

impl PollHandle {
    /// Latest published snapshot. `None` until the first round lands.
    pub fn snapshots(&self) -> watch::Receiver<Option<ProgressSnapshot>> {
        self.snapshots.clone()
    }

    pub fn job(&self) -> watch::Receiver<IngestionJob> {
        self.job.clone()
    }

    pub fn cancel(&self) {
        if self.liveness.is_alive() {
            debug!("cancelling progress polling");
        }
        self.liveness.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        !self.liveness.is_alive()
    }

    /// Wait for the task to stop. `None` if it panicked or was aborted.
    pub async fn join(mut self) -> Option<PollExit> {
        let task = self.task.take()?;
        task.await.ok()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.liveness.cancel();
    }
}

pub struct Poller;

impl Poller {
    pub fn start<B>(
        aggregator: ProgressAggregator<B>,
        job: IngestionJob,
        policy: PollPolicy,
    ) -> PollHandle
    where
        B: IngestBackend + 'static,
    {
        let (snapshot_tx, snapshots) = watch::channel(None);
        let (job_tx, job_rx) = watch::channel(job);
        let liveness = Arc::new(Liveness::new());

        let task = tokio::spawn(run(
            aggregator,
            policy,
            snapshot_tx,
            job_tx,
            liveness.clone(),
        ));

        PollHandle {
            snapshots,
            job: job_rx,
            liveness,
            task: Some(task),
        }
    }
}

fn finish_job(job_tx: &watch::Sender<IngestionJob>, status: JobStatus) {
    job_tx.send_modify(|job| {
        job.transition(status);
    });
}

async fn run<B: IngestBackend>(
    mut aggregator: ProgressAggregator<B>,
    policy: PollPolicy,
    snapshot_tx: watch::Sender<Option<ProgressSnapshot>>,
    job_tx: watch::Sender<IngestionJob>,
    liveness: Arc<Liveness>,
) -> PollExit {
    let mut failures = 0u32;

    loop {
        let report = tokio::select! {
            report = aggregator.fetch_round() => report,
            _ = liveness.cancelled() => return PollExit::Cancelled,
        };

        let fatal = report.is_fatal();
        let published = liveness.while_alive(|| {
            let snapshot = aggregator.apply(report);
            snapshot_tx.send_replace(Some(snapshot.clone()));
            snapshot
        });
        let Some(snapshot) = published else {
            debug!("discarding report that arrived after cancellation");
            return PollExit::Cancelled;
        };

        if fatal {
            failures += 1;
            warn!(failures, error = ?snapshot.error, "progress round failed");
            if policy.max_consecutive_failures > 0 && failures >= policy.max_consecutive_failures {
                finish_job(&job_tx, JobStatus::Failed);
                return PollExit::GaveUp {
                    failures,
                    last_error: snapshot.error,
                };
            }
        } else {
            failures = 0;
        }

        if snapshot.overall_status == OverallStatus::Complete && policy.stop_on_complete {
            info!(
                emails = snapshot.total_emails,
                attachments = snapshot.total_attachments,
                "ingestion complete"
            );
            finish_job(&job_tx, JobStatus::Complete);
            return PollExit::Completed(snapshot);
        }

        let delay = policy.delay_after(failures);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = liveness.cancelled() => return PollExit::Cancelled,
        }
    }
}
