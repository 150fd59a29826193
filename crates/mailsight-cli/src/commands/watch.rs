use anyhow::{bail, Result};
use mailsight_core::{
    emit_result, emit_snapshot, IngestionJob, JobStatus, PollExit, PollPolicy, Poller,
    ProgressAggregator, SourceKind,
};

use super::CliContext;
use crate::ui;

pub async fn run(kind: SourceKind, json: bool) -> Result<()> {
    let ctx = CliContext::load()?;
    let mut job = IngestionJob::new(kind);
    job.transition(JobStatus::Running);
    follow(&ctx, job, json).await
}

/// Poll until the job completes, fails, or polling gives up.
pub async fn follow(ctx: &CliContext, job: IngestionJob, json: bool) -> Result<()> {
    let aggregator = ProgressAggregator::new(ctx.ingest_backend()?);
    let handle = Poller::start(aggregator, job, PollPolicy::from(&ctx.config.polling));
    let mut snapshots = handle.snapshots();

    let view = (!json).then(ui::ProgressView::new);
    while snapshots.changed().await.is_ok() {
        let latest = snapshots.borrow_and_update().clone();
        let Some(snapshot) = latest else { continue };
        match &view {
            Some(view) => view.update(&snapshot),
            None => emit_snapshot(&snapshot),
        }
    }
    if let Some(view) = &view {
        view.finish();
    }

    let job = handle.job();
    let exit = handle.join().await;
    let job = job.borrow().clone();

    match exit {
        Some(PollExit::Completed(snapshot)) => {
            if json {
                emit_result("ingest", "complete", serde_json::to_value(&job)?);
            } else {
                ui::success(&format!("Ingestion complete: {}", ui::snapshot_summary(&snapshot)));
            }
            Ok(())
        }
        Some(PollExit::GaveUp {
            failures,
            last_error,
        }) => {
            let reason = last_error.unwrap_or_else(|| "backend unavailable".to_string());
            if json {
                emit_result(
                    "ingest",
                    "failed",
                    serde_json::json!({ "failures": failures, "error": reason, "job": job }),
                );
            } else {
                ui::error(&format!("Gave up after {failures} failed attempts: {reason}"));
            }
            bail!("Progress polling failed: {reason}")
        }
        Some(PollExit::Cancelled) => Ok(()),
        None => bail!("Progress polling stopped unexpectedly"),
    }
}
