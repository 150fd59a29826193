use anyhow::Result;
use console::style;
use mailsight_core::{OverallStatus, ProgressAggregator, ProgressSnapshot};
use serde::Serialize;

use super::CliContext;
use crate::ui;

#[derive(Serialize)]
struct Status {
    backend_url: String,
    backend: String,
    reachable: bool,
    progress: Option<ProgressSnapshot>,
}

pub async fn run(json: bool) -> Result<()> {
    let ctx = CliContext::load()?;
    let backend = ctx.ingest_backend()?;

    let (reachable, health) = match backend.health().await {
        Ok(status) => (true, status),
        Err(e) if e.is_network() => (false, "unreachable".to_string()),
        Err(e) => (true, format!("error: {e}")),
    };

    let progress = if reachable {
        let mut aggregator = ProgressAggregator::new(backend.clone());
        let report = aggregator.fetch_round().await;
        Some(aggregator.apply(report))
    } else {
        None
    };

    if json {
        let status = Status {
            backend_url: backend.base_url().to_string(),
            backend: health,
            reachable,
            progress,
        };
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    if !reachable {
        ui::error(&format!("Backend unreachable at {}", backend.base_url()));
        println!();
        return Ok(());
    }
    ui::success(&format!("Backend {} ({})", backend.base_url(), health));

    let Some(snapshot) = progress else {
        return Ok(());
    };
    println!();
    if snapshot.mailboxes.is_empty() {
        ui::info("No mailboxes yet. Run `mailsight connect` or `mailsight upload <file>`.");
    }
    for mailbox in &snapshot.mailboxes {
        println!(
            "  {:<32} {:>7}/{:<7} {}",
            mailbox.name,
            mailbox.processed_messages,
            mailbox.total_messages,
            style(mailbox.kind.as_deref().unwrap_or("")).dim()
        );
    }
    println!();
    ui::info(&ui::snapshot_summary(&snapshot));
    match snapshot.overall_status {
        OverallStatus::Complete => ui::success("Ingestion complete."),
        OverallStatus::Processing => ui::info("Ingestion in progress."),
        OverallStatus::Failed => ui::error(&format!(
            "Ingestion status unavailable: {}",
            snapshot.error.as_deref().unwrap_or("unknown error")
        )),
    }
    println!();
    Ok(())
}
