//! Reconciles backend counters into monotonic progress snapshots.
//!
//! A round has two halves. [`ProgressAggregator::fetch_round`] talks to the
//! backend and produces a [`PollReport`] without touching any state;
//! [`ProgressAggregator::apply`] folds a report into the running totals. A
//! report that is never applied leaves no trace.
//!
//! Every counter only grows: mailbox counters per mailbox id, everything else
//! globally. Reports may be applied out of order; an older report can raise a
//! counter but never lower one, and never changes the failure state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{AttachmentCounts, IngestBackend, MailboxId, MailboxRecord};
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Processing,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub sequence: u64,
    pub observed_at: DateTime<Utc>,
    pub mailboxes: Vec<MailboxRecord>,
    pub total_emails: u64,
    pub processed_emails: u64,
    pub total_attachments: u64,
    pub processed_attachments: u64,
    pub failed_attachments: u64,
    pub organizations: u64,
    pub contacts: u64,
    pub email_percent: f64,
    pub attachment_percent: f64,
    pub overall_status: OverallStatus,
    pub error: Option<String>,
}

/// `processed / total * 100`, or exactly `0.0` when there is nothing to do.
pub fn percent(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (processed.min(total) as f64 / total as f64) * 100.0
}

/// Raw results of one polling round.
#[derive(Debug)]
pub struct PollReport {
    pub sequence: u64,
    pub observed_at: DateTime<Utc>,
    pub mailboxes: Result<Vec<MailboxRecord>, IngestError>,
    pub organizations: Result<Option<u64>, IngestError>,
    pub contacts: Result<Option<u64>, IngestError>,
    /// `None` when the round never got as far as attachments.
    pub attachments: Option<Result<AttachmentCounts, IngestError>>,
}

impl PollReport {
    /// True when the round failed in a way that fails the snapshot.
    pub fn is_fatal(&self) -> bool {
        self.mailboxes.is_err()
    }
}

#[derive(Debug, Default)]
struct Totals {
    mailboxes: BTreeMap<MailboxId, MailboxRecord>,
    organizations: u64,
    contacts: u64,
    attachments: AttachmentCounts,
}

pub struct ProgressAggregator<B> {
    backend: Arc<B>,
    next_sequence: AtomicU64,
    totals: Totals,
    /// Highest report sequence applied so far.
    applied_sequence: Option<u64>,
    latest: Option<ProgressSnapshot>,
}

impl<B: IngestBackend> ProgressAggregator<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            next_sequence: AtomicU64::new(0),
            totals: Totals::default(),
            applied_sequence: None,
            latest: None,
        }
    }

    /// Query the backend once.
    ///
    /// Mailboxes, organizations and contacts are read concurrently. Attachment
    /// processing is only triggered after the mailbox list came back.
    /// Transport failures keep their [`IngestError::Network`] variant.
    pub async fn fetch_round(&self) -> PollReport {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);

        let (mailboxes, organizations, contacts) = tokio::join!(
            self.backend.list_mailboxes(),
            self.backend.count_organizations(),
            self.backend.count_contacts(),
        );
        let mailboxes = mailboxes.map_err(|e| match e {
            IngestError::SourceUnavailable(_) | IngestError::Network { .. } => e,
            other => IngestError::SourceUnavailable(other.to_string()),
        });

        let attachments = if mailboxes.is_ok() {
            Some(self.backend.process_attachments().await.map_err(|e| match e {
                IngestError::ProcessingUnavailable(_) | IngestError::Network { .. } => e,
                other => IngestError::ProcessingUnavailable(other.to_string()),
            }))
        } else {
            None
        };

        PollReport {
            sequence,
            observed_at: Utc::now(),
            mailboxes,
            organizations,
            contacts,
            attachments,
        }
    }

    /// Fold a report into the totals and publish the resulting snapshot.
    pub fn apply(&mut self, report: PollReport) -> ProgressSnapshot {
        let stale = self
            .applied_sequence
            .is_some_and(|applied| report.sequence < applied);
        if stale {
            debug!(sequence = report.sequence, "applying out-of-order report");
        } else {
            self.applied_sequence = Some(report.sequence);
        }

        let mut fatal = None;
        match report.mailboxes {
            Ok(list) => {
                for record in list {
                    self.merge_mailbox(record, stale);
                }
            }
            Err(e) => {
                warn!(error = %e, "mailbox listing failed");
                fatal = Some(e.to_string());
            }
        }

        self.totals.organizations =
            merge_count(self.totals.organizations, report.organizations, "organizations");
        self.totals.contacts = merge_count(self.totals.contacts, report.contacts, "contacts");

        match report.attachments {
            Some(Ok(counts)) => {
                let seen = &mut self.totals.attachments;
                seen.total = seen.total.max(counts.total);
                seen.processed = seen.processed.max(counts.processed.min(counts.total));
                seen.failed = seen.failed.max(counts.failed);
            }
            Some(Err(e)) => warn!(error = %e, "keeping last attachment counters"),
            None => {}
        }

        let snapshot = self.snapshot(report.observed_at, stale, fatal);
        self.latest = Some(snapshot.clone());
        snapshot
    }

    fn merge_mailbox(&mut self, record: MailboxRecord, stale: bool) {
        match self.totals.mailboxes.get_mut(&record.id) {
            Some(known) => {
                known.total_messages = known.total_messages.max(record.total_messages);
                known.processed_messages = known
                    .processed_messages
                    .max(record.processed_messages)
                    .min(known.total_messages);
                if !stale {
                    known.name = record.name;
                    known.kind = record.kind;
                }
            }
            None => {
                let mut record = record;
                record.processed_messages = record.processed_messages.min(record.total_messages);
                self.totals.mailboxes.insert(record.id.clone(), record);
            }
        }
    }

    fn snapshot(
        &self,
        observed_at: DateTime<Utc>,
        stale: bool,
        fatal: Option<String>,
    ) -> ProgressSnapshot {
        let totals = &self.totals;
        let mailboxes: Vec<MailboxRecord> = totals.mailboxes.values().cloned().collect();
        // Saturating: backend counters are unbounded.
        let total_emails = mailboxes
            .iter()
            .fold(0u64, |acc, m| acc.saturating_add(m.total_messages));
        let processed_emails = mailboxes
            .iter()
            .fold(0u64, |acc, m| acc.saturating_add(m.processed_messages));
        let attachments = totals.attachments;

        let complete = (total_emails > 0 || attachments.total > 0)
            && mailboxes
                .iter()
                .all(|m| m.processed_messages == m.total_messages)
            && attachments.processed == attachments.total;

        let (overall_status, error) = if stale {
            // An old report never decides failure either way.
            match &self.latest {
                _ if complete => (OverallStatus::Complete, None),
                Some(prev) => (prev.overall_status, prev.error.clone()),
                None => (OverallStatus::Processing, None),
            }
        } else if let Some(message) = fatal {
            (OverallStatus::Failed, Some(message))
        } else if complete {
            (OverallStatus::Complete, None)
        } else {
            (OverallStatus::Processing, None)
        };

        let sequence = self.applied_sequence.unwrap_or(0);
        let observed_at = match &self.latest {
            Some(prev) if prev.observed_at > observed_at => prev.observed_at,
            _ => observed_at,
        };

        ProgressSnapshot {
            sequence,
            observed_at,
            total_emails,
            processed_emails,
            total_attachments: attachments.total,
            processed_attachments: attachments.processed,
            failed_attachments: attachments.failed,
            organizations: totals.organizations,
            contacts: totals.contacts,
            email_percent: percent(processed_emails, total_emails),
            attachment_percent: percent(attachments.processed, attachments.total),
            overall_status,
            error,
            mailboxes,
        }
    }
}

fn merge_count(previous: u64, reported: Result<Option<u64>, IngestError>, what: &str) -> u64 {
    match reported {
        Ok(Some(n)) => previous.max(n),
        Ok(None) => {
            debug!(what, "no usable count, keeping {previous}");
            previous
        }
        Err(e) => {
            warn!(what, error = %e, "count unavailable, keeping {previous}");
            previous
        }
    }
}
