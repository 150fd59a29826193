//! Ingestion sources: an uploaded archive or a connected mailbox.
//!
//! Both sources allow one outstanding submission at a time. A submission made
//! while another is in flight is answered with [`Submission::Ignored`] and
//! sends nothing.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mailsight_auth_bridge::AuthState;
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::{IngestBackend, MailboxId};
use crate::config::UploadSettings;
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    UploadedArchive,
    ConnectedMailbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionJob {
    pub source_kind: SourceKind,
    status: JobStatus,
    /// Backend-assigned identifier, when the backend returns one.
    pub reference: Option<String>,
    /// Mailboxes ingestion was started for. Empty for uploads.
    pub mailboxes: Vec<MailboxId>,
    pub created_at: DateTime<Utc>,
}

impl IngestionJob {
    pub fn new(source_kind: SourceKind) -> Self {
        Self {
            source_kind,
            status: JobStatus::Pending,
            reference: None,
            mailboxes: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Move to `status`. Returns false, changing nothing, once terminal.
    pub fn transition(&mut self, status: JobStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}

#[derive(Debug, PartialEq)]
pub enum Submission<T> {
    Accepted(T),
    /// Another submission was still outstanding.
    Ignored,
}

impl<T> Submission<T> {
    pub fn accepted(self) -> Option<T> {
        match self {
            Submission::Accepted(v) => Some(v),
            Submission::Ignored => None,
        }
    }
}

/// Held for the lifetime of one submission.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Check a file name against the extension allow-list. Case-insensitive.
pub fn validate_archive_name(file_name: &str, allowed: &[String]) -> Result<(), IngestError> {
    let extension = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());

    let permitted = extension.as_deref().is_some_and(|ext| {
        allowed
            .iter()
            .any(|candidate| normalize_extension(candidate) == ext)
    });

    if permitted {
        Ok(())
    } else {
        Err(IngestError::UnsupportedFormat {
            file_name: file_name.to_string(),
            allowed: allowed.to_vec(),
        })
    }
}

/// Offline archive upload (`.pst`, `.mbox`).
pub struct ArchiveUpload<B> {
    backend: Arc<B>,
    settings: UploadSettings,
    busy: AtomicBool,
}

impl<B: IngestBackend> ArchiveUpload<B> {
    pub fn new(backend: Arc<B>, settings: UploadSettings) -> Self {
        Self {
            backend,
            settings,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn submit(&self, path: &Path) -> Result<Submission<IngestionJob>, IngestError> {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            info!(path = %path.display(), "upload already in progress, ignoring");
            return Ok(Submission::Ignored);
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        validate_archive_name(&file_name, &self.settings.allowed_extensions)?;

        let size = tokio::fs::metadata(path).await?.len();
        if size > self.settings.max_upload_bytes {
            return Err(IngestError::ArchiveTooLarge {
                size,
                limit: self.settings.max_upload_bytes,
            });
        }

        let mut job = IngestionJob::new(SourceKind::UploadedArchive);
        let accepted = self.backend.upload_archive(path).await?;
        job.reference = accepted.reference;
        job.transition(JobStatus::Running);
        info!(file = %file_name, bytes = size, reference = ?job.reference, "archive accepted");
        Ok(Submission::Accepted(job))
    }
}

/// Mailbox connected through the authorization flow.
pub struct ConnectedMailbox<B> {
    backend: Arc<B>,
    busy: AtomicBool,
}

impl<B: IngestBackend> ConnectedMailbox<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Start backend ingestion for every listed mailbox.
    ///
    /// Only valid once the authorization flow has reached
    /// [`AuthState::Authenticated`].
    pub async fn submit(&self, auth_state: AuthState) -> Result<Submission<IngestionJob>, IngestError> {
        if auth_state != AuthState::Authenticated {
            return Err(IngestError::SourceUnavailable(format!(
                "mailbox is not connected (auth state: {auth_state})"
            )));
        }
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            info!("mailbox ingestion already starting, ignoring");
            return Ok(Submission::Ignored);
        };

        let mailboxes = self.backend.list_mailboxes().await.map_err(|e| match e {
            IngestError::SourceUnavailable(_) => e,
            other => IngestError::SourceUnavailable(other.to_string()),
        })?;

        let mut job = IngestionJob::new(SourceKind::ConnectedMailbox);
        for mailbox in &mailboxes {
            match self.backend.start_mailbox_ingestion(&mailbox.id).await {
                Ok(()) => job.mailboxes.push(mailbox.id.clone()),
                Err(e) => warn!(mailbox = %mailbox.id, error = %e, "could not start mailbox ingestion"),
            }
        }
        job.transition(JobStatus::Running);
        info!(
            listed = mailboxes.len(),
            started = job.mailboxes.len(),
            "mailbox ingestion started"
        );
        Ok(Submission::Accepted(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mailbox, FakeBackend};
    use tempfile::TempDir;

    fn allowed() -> Vec<String> {
        UploadSettings::default().allowed_extensions
    }

    #[test]
    fn test_validate_archive_name() {
        assert!(validate_archive_name("archive.pst", &allowed()).is_ok());
        assert!(validate_archive_name("mail.mbox", &allowed()).is_ok());
        assert!(validate_archive_name("Outlook.PST", &allowed()).is_ok());
        assert!(matches!(
            validate_archive_name("archive.zip", &allowed()),
            Err(IngestError::UnsupportedFormat { .. })
        ));
        assert!(validate_archive_name("pst", &allowed()).is_err());
        assert!(validate_archive_name("archive.pst.zip", &allowed()).is_err());
    }

    #[test]
    fn test_terminal_job_does_not_change() {
        let mut job = IngestionJob::new(SourceKind::UploadedArchive);
        assert!(job.transition(JobStatus::Running));
        assert!(job.transition(JobStatus::Complete));
        assert!(!job.transition(JobStatus::Failed));
        assert_eq!(job.status(), JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_unsupported_format_sends_nothing() {
        let backend = Arc::new(FakeBackend::new());
        let upload = ArchiveUpload::new(backend.clone(), UploadSettings::default());

        let err = upload.submit(Path::new("/tmp/archive.zip")).await.unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat { .. }));
        assert_eq!(backend.upload_calls.load(Ordering::SeqCst), 0);
        assert!(!upload.is_busy());
    }

    #[tokio::test]
    async fn test_oversized_archive_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.mbox");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let backend = Arc::new(FakeBackend::new());
        let settings = UploadSettings {
            max_upload_bytes: 16,
            ..UploadSettings::default()
        };
        let upload = ArchiveUpload::new(backend.clone(), settings);

        let err = upload.submit(&path).await.unwrap_err();
        assert!(matches!(err, IngestError::ArchiveTooLarge { size: 64, limit: 16 }));
        assert_eq!(backend.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_creates_running_job() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.pst");
        std::fs::write(&path, b"!BDN").unwrap();

        let backend = Arc::new(FakeBackend::new());
        let upload = ArchiveUpload::new(backend.clone(), UploadSettings::default());

        let job = upload.submit(&path).await.unwrap().accepted().unwrap();
        assert_eq!(job.source_kind, SourceKind::UploadedArchive);
        assert_eq!(job.status(), JobStatus::Running);
        assert!(job.reference.is_some());
        assert!(!upload.is_busy());
    }

    #[tokio::test]
    async fn test_reentrant_upload_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.pst");
        std::fs::write(&path, b"!BDN").unwrap();

        let backend = Arc::new(FakeBackend::new());
        let upload = ArchiveUpload::new(backend.clone(), UploadSettings::default());

        let (a, b) = tokio::join!(upload.submit(&path), upload.submit(&path));
        let outcomes = [a.unwrap(), b.unwrap()];
        let ignored = outcomes
            .iter()
            .filter(|s| matches!(s, Submission::Ignored))
            .count();
        assert_eq!(ignored, 1);
        assert_eq!(backend.upload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_upload_surfaces_status() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mail.mbox");
        std::fs::write(&path, b"From ").unwrap();

        let backend = Arc::new(FakeBackend::new());
        *backend.upload_reply.lock().unwrap() = Some(Err("disk full".to_string()));
        let upload = ArchiveUpload::new(backend.clone(), UploadSettings::default());

        match upload.submit(&path).await.unwrap_err() {
            IngestError::UploadFailed { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "disk full");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!upload.is_busy());
    }

    #[tokio::test]
    async fn test_connected_mailbox_requires_authentication() {
        let backend = Arc::new(FakeBackend::new());
        let source = ConnectedMailbox::new(backend.clone());
        let err = source.submit(AuthState::AwaitingCode).await.unwrap_err();
        assert!(matches!(err, IngestError::SourceUnavailable(_)));
        assert_eq!(backend.mailbox_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connected_mailbox_isolates_trigger_failures() {
        let backend = Arc::new(FakeBackend::new());
        backend.push_mailboxes(Ok(vec![mailbox(1, 10, 0), mailbox(2, 5, 0)]));
        backend.ingest_failures.lock().unwrap().push("2".to_string());
        let source = ConnectedMailbox::new(backend.clone());

        let job = source
            .submit(AuthState::Authenticated)
            .await
            .unwrap()
            .accepted()
            .unwrap();
        assert_eq!(job.status(), JobStatus::Running);
        assert_eq!(job.mailboxes, vec![MailboxId::from("1".to_string())]);
        assert_eq!(backend.ingest_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connected_mailbox_listing_failure() {
        let backend = Arc::new(FakeBackend::new());
        backend.push_mailboxes(Err("503".to_string()));
        let source = ConnectedMailbox::new(backend.clone());

        let err = source.submit(AuthState::Authenticated).await.unwrap_err();
        assert!(matches!(err, IngestError::SourceUnavailable(_)));
        assert_eq!(backend.ingest_calls.load(Ordering::SeqCst), 0);
    }
}
