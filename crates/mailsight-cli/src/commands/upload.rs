use std::path::Path;

use anyhow::{Context, Result};
use mailsight_core::{emit_error, emit_result, ArchiveUpload, IngestError, Submission};

use super::{watch, CliContext};
use crate::ui;

pub async fn run(file: &Path, follow: bool, json: bool) -> Result<()> {
    let ctx = CliContext::load()?;
    let upload = ArchiveUpload::new(ctx.ingest_backend()?, ctx.config.upload.clone());

    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    let spinner = (!json).then(|| ui::spinner(&format!("Uploading {name}...")));
    let submitted = upload.submit(file).await;
    if let Some(spinner) = &spinner {
        spinner.finish_and_clear();
    }

    let job = match submitted {
        Ok(Submission::Accepted(job)) => job,
        Ok(Submission::Ignored) => {
            ui::warn("An upload is already in progress.");
            return Ok(());
        }
        Err(e) => {
            if json {
                emit_error("upload", &e.to_string());
            } else {
                ui::error(&describe(&e));
            }
            return Err(e).with_context(|| format!("Upload of {} failed", file.display()));
        }
    };

    if json {
        emit_result("upload", "accepted", serde_json::to_value(&job)?);
    } else {
        match &job.reference {
            Some(reference) => ui::success(&format!("Uploaded {name} (job {reference}).")),
            None => ui::success(&format!("Uploaded {name}.")),
        }
    }

    if follow {
        watch::follow(&ctx, job, json).await
    } else {
        if !json {
            ui::info("Follow progress with: mailsight watch --source archive");
        }
        Ok(())
    }
}

fn describe(err: &IngestError) -> String {
    match err {
        IngestError::UnsupportedFormat { allowed, .. } => {
            format!("Only {} archives can be uploaded.", allowed.join(" and "))
        }
        IngestError::ArchiveTooLarge { size, limit } => format!(
            "Archive is {} MiB; the limit is {} MiB.",
            size / (1024 * 1024),
            limit / (1024 * 1024)
        ),
        other => other.to_string(),
    }
}
