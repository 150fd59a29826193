use std::path::PathBuf;
use std::time::Duration;

use mailsight_auth_bridge::SessionFileState;
use url::Url;

pub mod backend;
pub mod config;
pub mod emit;
pub mod error;
pub mod ingest;
pub mod poller;
pub mod progress;

pub use backend::{
    decode_count, AttachmentCounts, HttpBackend, IngestBackend, JobReference, MailboxId,
    MailboxRecord,
};
pub use config::ClientConfig;
pub use emit::{emit_error, emit_result, emit_snapshot};
pub use error::IngestError;
pub use ingest::{
    validate_archive_name, ArchiveUpload, ConnectedMailbox, IngestionJob, JobStatus, SourceKind,
    Submission,
};
pub use poller::{PollExit, PollHandle, PollPolicy, Poller};
pub use progress::{percent, OverallStatus, PollReport, ProgressAggregator, ProgressSnapshot};

#[derive(Debug, Clone)]
pub struct MailsightPaths {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    /// Holds the pending PKCE verifier between `connect` and `callback`.
    pub session_dir: PathBuf,
}

impl MailsightPaths {
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os("MAILSIGHT_DATA_DIR") {
            return Self::from_base(PathBuf::from(dir));
        }
        if let Some(home) = std::env::var_os("HOME") {
            return Self::from_base(PathBuf::from(home).join(".mailsight"));
        }
        Self::from_base(PathBuf::from(".mailsight"))
    }

    pub fn from_base(base_dir: PathBuf) -> Self {
        let config_path = base_dir.join("config.toml");
        let session_dir = base_dir.join("session");
        Self {
            base_dir,
            config_path,
            session_dir,
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base_dir)
    }

    /// Verifier slot scoped to one backend origin.
    pub fn verifier_state(&self, origin: &Url, max_age: Duration) -> SessionFileState {
        SessionFileState::new(self.session_dir.clone(), origin, max_age)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory [`IngestBackend`] for unit tests.

    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::backend::{AttachmentCounts, IngestBackend, JobReference, MailboxId, MailboxRecord};
    use crate::error::IngestError;

    pub type Scripted<T> = Result<T, String>;

    /// Each call pops the next scripted answer; the last one repeats.
    #[derive(Default)]
    pub struct FakeBackend {
        pub mailboxes: Mutex<VecDeque<Scripted<Vec<MailboxRecord>>>>,
        pub organizations: Mutex<VecDeque<Scripted<Option<u64>>>>,
        pub contacts: Mutex<VecDeque<Scripted<Option<u64>>>>,
        pub attachments: Mutex<VecDeque<Scripted<AttachmentCounts>>>,
        pub upload_reply: Mutex<Option<Scripted<JobReference>>>,
        pub ingest_failures: Mutex<Vec<String>>,
        pub mailbox_calls: AtomicUsize,
        pub attachment_calls: AtomicUsize,
        pub upload_calls: AtomicUsize,
        pub ingest_calls: AtomicUsize,
        /// When set, `list_mailboxes` blocks until the gate is notified.
        pub mailbox_gate: Mutex<Option<Arc<Notify>>>,
        pub mailbox_started: Notify,
    }

    fn next<T: Clone>(queue: &Mutex<VecDeque<Scripted<T>>>) -> Option<Scripted<T>> {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    pub fn mailbox(id: i64, total: u64, processed: u64) -> MailboxRecord {
        MailboxRecord {
            id: MailboxId::from(id.to_string()),
            name: format!("mailbox-{id}"),
            kind: Some("inbox".to_string()),
            total_messages: total,
            processed_messages: processed,
        }
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_mailboxes(&self, reply: Scripted<Vec<MailboxRecord>>) -> &Self {
            self.mailboxes.lock().unwrap().push_back(reply);
            self
        }

        pub fn push_organizations(&self, reply: Scripted<Option<u64>>) -> &Self {
            self.organizations.lock().unwrap().push_back(reply);
            self
        }

        pub fn push_contacts(&self, reply: Scripted<Option<u64>>) -> &Self {
            self.contacts.lock().unwrap().push_back(reply);
            self
        }

        pub fn push_attachments(&self, reply: Scripted<AttachmentCounts>) -> &Self {
            self.attachments.lock().unwrap().push_back(reply);
            self
        }

        /// Hold every mailbox listing until the returned gate opens.
        pub fn gate_mailboxes(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.mailbox_gate.lock().unwrap() = Some(gate.clone());
            gate
        }
    }

    #[async_trait]
    impl IngestBackend for FakeBackend {
        async fn list_mailboxes(&self) -> Result<Vec<MailboxRecord>, IngestError> {
            self.mailbox_calls.fetch_add(1, Ordering::SeqCst);
            self.mailbox_started.notify_one();
            let gate = self.mailbox_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            match next(&self.mailboxes) {
                Some(Ok(list)) => Ok(list),
                Some(Err(e)) => Err(IngestError::SourceUnavailable(e)),
                None => Ok(Vec::new()),
            }
        }

        async fn count_organizations(&self) -> Result<Option<u64>, IngestError> {
            match next(&self.organizations) {
                Some(Ok(n)) => Ok(n),
                Some(Err(e)) => Err(IngestError::UnexpectedResponse {
                    endpoint: "organizations",
                    detail: e,
                }),
                None => Ok(Some(0)),
            }
        }

        async fn count_contacts(&self) -> Result<Option<u64>, IngestError> {
            match next(&self.contacts) {
                Some(Ok(n)) => Ok(n),
                Some(Err(e)) => Err(IngestError::UnexpectedResponse {
                    endpoint: "contacts",
                    detail: e,
                }),
                None => Ok(Some(0)),
            }
        }

        async fn process_attachments(&self) -> Result<AttachmentCounts, IngestError> {
            self.attachment_calls.fetch_add(1, Ordering::SeqCst);
            match next(&self.attachments) {
                Some(Ok(counts)) => Ok(counts),
                Some(Err(e)) => Err(IngestError::ProcessingUnavailable(e)),
                None => Ok(AttachmentCounts::default()),
            }
        }

        async fn start_mailbox_ingestion(&self, id: &MailboxId) -> Result<(), IngestError> {
            self.ingest_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .ingest_failures
                .lock()
                .unwrap()
                .iter()
                .any(|f| f == id.as_str())
            {
                return Err(IngestError::UnexpectedResponse {
                    endpoint: "mailbox ingest",
                    detail: format!("mailbox {id} refused"),
                });
            }
            Ok(())
        }

        async fn upload_archive(&self, path: &Path) -> Result<JobReference, IngestError> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            match self.upload_reply.lock().unwrap().clone() {
                Some(Ok(reference)) => Ok(reference),
                Some(Err(body)) => Err(IngestError::UploadFailed {
                    status: 500,
                    status_text: "Internal Server Error".to_string(),
                    body,
                }),
                None => Ok(JobReference {
                    reference: Some(format!("job-{}", path.display())),
                    raw: serde_json::Value::Null,
                }),
            }
        }
    }
}
