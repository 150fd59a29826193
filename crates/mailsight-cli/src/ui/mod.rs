use console::style;
use dialoguer::{theme::ColorfulTheme, Input};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use mailsight_core::{OverallStatus, ProgressSnapshot};
use std::time::Duration;

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", style("✔").green(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    println!("{} {}", style("✖").red(), msg);
}

/// Print warning message
pub fn warn(msg: &str) {
    println!("{} {}", style("!").yellow(), msg);
}

/// Print info message (indented)
pub fn info(msg: &str) {
    println!("  {}", msg);
}

/// Print a header/title
pub fn header(msg: &str) {
    println!();
    println!("  {}", msg);
    println!();
}

/// Prompt for regular text input
pub fn prompt_input(prompt: &str) -> anyhow::Result<String> {
    let value = Input::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .interact_text()?;
    Ok(value)
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:<12} {bar:24.cyan/dim} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

/// Create a spinner for indeterminate progress
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Email and attachment bars plus a counts line.
pub struct ProgressView {
    emails: ProgressBar,
    attachments: ProgressBar,
    entities: ProgressBar,
}

impl ProgressView {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let emails = multi.add(ProgressBar::new(0));
        emails.set_style(bar_style());
        emails.set_prefix("Emails");
        let attachments = multi.add(ProgressBar::new(0));
        attachments.set_style(bar_style());
        attachments.set_prefix("Attachments");
        let entities = multi.add(ProgressBar::new_spinner());
        entities.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        entities.enable_steady_tick(Duration::from_millis(120));
        entities.set_message("Waiting for the first update...");
        Self {
            emails,
            attachments,
            entities,
        }
    }

    pub fn update(&self, snapshot: &ProgressSnapshot) {
        self.emails.set_length(snapshot.total_emails);
        self.emails.set_position(snapshot.processed_emails);
        self.emails
            .set_message(format!("{:.0}%", snapshot.email_percent));

        self.attachments.set_length(snapshot.total_attachments);
        self.attachments.set_position(snapshot.processed_attachments);
        let failed = if snapshot.failed_attachments > 0 {
            format!(", {} failed", snapshot.failed_attachments)
        } else {
            String::new()
        };
        self.attachments
            .set_message(format!("{:.0}%{}", snapshot.attachment_percent, failed));

        let counts = format!(
            "{} mailbox(es) · {} organizations · {} contacts",
            snapshot.mailboxes.len(),
            snapshot.organizations,
            snapshot.contacts
        );
        match (&snapshot.overall_status, &snapshot.error) {
            (OverallStatus::Failed, Some(err)) => self
                .entities
                .set_message(format!("{counts} · {}", style(err).red())),
            _ => self.entities.set_message(counts),
        }
    }

    pub fn finish(&self) {
        self.emails.finish();
        self.attachments.finish();
        self.entities.finish_and_clear();
    }
}

/// One-line summary of a snapshot.
pub fn snapshot_summary(snapshot: &ProgressSnapshot) -> String {
    format!(
        "{}/{} emails ({:.1}%), {}/{} attachments ({:.1}%), {} organizations, {} contacts",
        snapshot.processed_emails,
        snapshot.total_emails,
        snapshot.email_percent,
        snapshot.processed_attachments,
        snapshot.total_attachments,
        snapshot.attachment_percent,
        snapshot.organizations,
        snapshot.contacts
    )
}
