//! HTTP contract of the analysis backend's ingestion endpoints.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::IngestError;

/// Backend mailbox identifier. The backend uses integers; anything else is
/// kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawId", into = "String")]
pub struct MailboxId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(serde_json::Number),
    Text(String),
}

impl From<RawId> for MailboxId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Number(n) => MailboxId(n.to_string()),
            RawId::Text(s) => MailboxId(s),
        }
    }
}

impl From<String> for MailboxId {
    fn from(s: String) -> Self {
        MailboxId(s)
    }
}

impl From<MailboxId> for String {
    fn from(id: MailboxId) -> Self {
        id.0
    }
}

impl MailboxId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawMailbox")]
pub struct MailboxRecord {
    pub id: MailboxId,
    pub name: String,
    pub kind: Option<String>,
    pub total_messages: u64,
    /// Never above `total_messages`.
    pub processed_messages: u64,
}

#[derive(Deserialize)]
struct RawMailbox {
    id: MailboxId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "type")]
    kind: Option<String>,
    #[serde(default, alias = "totalMessages")]
    total_messages: Option<Value>,
    #[serde(default, alias = "processedMessages")]
    processed_messages: Option<Value>,
}

impl From<RawMailbox> for MailboxRecord {
    fn from(raw: RawMailbox) -> Self {
        let total_messages = raw.total_messages.as_ref().map(count_of).unwrap_or(0);
        let processed_messages = raw
            .processed_messages
            .as_ref()
            .map(count_of)
            .unwrap_or(0)
            .min(total_messages);
        let name = raw
            .name
            .or(raw.email)
            .unwrap_or_else(|| format!("mailbox {}", raw.id));
        Self {
            id: raw.id,
            name,
            kind: raw.kind,
            total_messages,
            processed_messages,
        }
    }
}

/// Non-negative integer view of a JSON counter.
fn count_of(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Read an entity count from a list-style response.
///
/// Returns `None` when the body doesn't say how many there are.
pub fn decode_count(body: &Value) -> Option<u64> {
    match body {
        Value::Array(items) => Some(items.len() as u64),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("items") {
                return Some(items.len() as u64);
            }
            ["count", "total"]
                .iter()
                .filter_map(|key| map.get(*key))
                .find_map(|v| v.as_u64())
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentCounts {
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
}

impl AttachmentCounts {
    fn from_json(body: &Value) -> Self {
        let field = |key: &str| body.get(key).map(count_of).unwrap_or(0);
        Self {
            total: field("total"),
            processed: field("processed"),
            failed: field("failed"),
        }
    }
}

/// What the backend said about an accepted upload.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReference {
    pub reference: Option<String>,
    pub raw: Value,
}

impl JobReference {
    pub fn from_json(raw: Value) -> Self {
        let reference = ["job_id", "id", "mailbox_id", "reference"]
            .iter()
            .filter_map(|key| raw.get(*key))
            .find_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        Self { reference, raw }
    }
}

/// Calls the ingestion side of the backend.
#[async_trait]
pub trait IngestBackend: Send + Sync {
    async fn list_mailboxes(&self) -> Result<Vec<MailboxRecord>, IngestError>;

    /// `Ok(None)` when the backend answered but gave no usable count.
    async fn count_organizations(&self) -> Result<Option<u64>, IngestError>;

    async fn count_contacts(&self) -> Result<Option<u64>, IngestError>;

    /// Trigger (or re-poll) attachment text extraction.
    async fn process_attachments(&self) -> Result<AttachmentCounts, IngestError>;

    async fn start_mailbox_ingestion(&self, id: &MailboxId) -> Result<(), IngestError>;

    async fn upload_archive(&self, path: &Path) -> Result<JobReference, IngestError>;
}

/// [`IngestBackend`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http_client: Client,
    base_url: Url,
    request_timeout: Duration,
    upload_timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: &Url, timeout: Duration, upload_timeout: Duration) -> Self {
        // Timeouts are set per request so uploads can run longer.
        let http_client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(http_client, base_url, timeout, upload_timeout)
    }

    pub fn with_client(
        http_client: Client,
        base_url: &Url,
        request_timeout: Duration,
        upload_timeout: Duration,
    ) -> Self {
        let mut base_url = base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            http_client,
            base_url,
            request_timeout,
            upload_timeout,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str, name: &'static str) -> Result<Url, IngestError> {
        self.base_url
            .join(path)
            .map_err(|e| IngestError::UnexpectedResponse {
                endpoint: name,
                detail: format!("invalid url: {e}"),
            })
    }

    /// `GET /`. Returns the backend's reported status string.
    pub async fn health(&self) -> Result<String, IngestError> {
        let url = self.endpoint("", "health")?;
        let resp = self
            .http_client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| IngestError::network("health check", e))?;
        let body = json_body(resp, "health").await?;
        Ok(body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    async fn get_count(&self, path: &str, name: &'static str) -> Result<Option<u64>, IngestError> {
        let url = self.endpoint(path, name)?;
        let resp = self
            .http_client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| IngestError::network(name, e))?;
        let body = json_body(resp, name).await?;
        let count = decode_count(&body);
        if count.is_none() {
            debug!(endpoint = name, "response carries no count");
        }
        Ok(count)
    }
}

/// Decode a JSON body, mapping non-2xx to `UnexpectedResponse`.
async fn json_body(resp: Response, name: &'static str) -> Result<Value, IngestError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(IngestError::UnexpectedResponse {
            endpoint: name,
            detail: format!("status {}: {}", status.as_u16(), body.trim()),
        });
    }
    resp.json()
        .await
        .map_err(|e| IngestError::UnexpectedResponse {
            endpoint: name,
            detail: format!("unreadable body: {e}"),
        })
}

#[async_trait]
impl IngestBackend for HttpBackend {
    async fn list_mailboxes(&self) -> Result<Vec<MailboxRecord>, IngestError> {
        let url = self.endpoint("mailboxes/", "mailboxes")?;
        let resp = self
            .http_client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| IngestError::network("mailbox listing", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(IngestError::SourceUnavailable(format!(
                "mailbox listing returned {}",
                status.as_u16()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| IngestError::SourceUnavailable(format!("unreadable mailbox list: {e}")))?;
        let Value::Array(entries) = body else {
            return Err(IngestError::SourceUnavailable(
                "mailbox list is not an array".to_string(),
            ));
        };

        let mut mailboxes = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<MailboxRecord>(entry) {
                Ok(record) => mailboxes.push(record),
                Err(e) => warn!(error = %e, "skipping undecodable mailbox entry"),
            }
        }
        Ok(mailboxes)
    }

    async fn count_organizations(&self) -> Result<Option<u64>, IngestError> {
        self.get_count("organizations", "organizations").await
    }

    async fn count_contacts(&self) -> Result<Option<u64>, IngestError> {
        self.get_count("contacts", "contacts").await
    }

    async fn process_attachments(&self) -> Result<AttachmentCounts, IngestError> {
        let url = self.endpoint("process-attachments", "process-attachments")?;
        let resp = self
            .http_client
            .post(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| IngestError::network("process-attachments", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::ProcessingUnavailable(format!(
                "status {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| IngestError::ProcessingUnavailable(format!("unreadable body: {e}")))?;
        Ok(AttachmentCounts::from_json(&body))
    }

    async fn start_mailbox_ingestion(&self, id: &MailboxId) -> Result<(), IngestError> {
        let mut url = self.endpoint("mailboxes/", "mailbox ingest")?;
        url.path_segments_mut()
            .map_err(|_| IngestError::UnexpectedResponse {
                endpoint: "mailbox ingest",
                detail: "base url cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .push(id.as_str())
            .push("ingest");

        let resp = self
            .http_client
            .post(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| IngestError::network("mailbox ingest", e))?;
        json_body(resp, "mailbox ingest").await.map(|_| ())
    }

    async fn upload_archive(&self, path: &Path) -> Result<JobReference, IngestError> {
        let url = self.endpoint("upload", "upload")?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());

        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        debug!(file = %file_name, bytes = length, "uploading archive");

        let part = Part::stream_with_length(reqwest::Body::from(file), length)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| IngestError::network("upload", e))?;
        let form = Form::new().part("file", part);

        let resp = self
            .http_client
            .post(url)
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| IngestError::network("upload", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::UploadFailed {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                body,
            });
        }

        // An empty or non-JSON success body still means accepted.
        let text = resp.text().await.unwrap_or_default();
        let raw = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok(JobReference::from_json(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mailbox_record_tolerant_decoding() {
        let record: MailboxRecord = serde_json::from_value(json!({
            "id": 7,
            "email": "ada@example.com",
            "total_messages": 10,
            "processed_messages": 14
        }))
        .unwrap();
        assert_eq!(record.id.as_str(), "7");
        assert_eq!(record.name, "ada@example.com");
        assert_eq!(record.total_messages, 10);
        assert_eq!(record.processed_messages, 10);

        let record: MailboxRecord = serde_json::from_value(json!({
            "id": "archive-1",
            "name": "Archive",
            "type": "pst",
            "totalMessages": "5"
        }))
        .unwrap();
        assert_eq!(record.id.as_str(), "archive-1");
        assert_eq!(record.kind.as_deref(), Some("pst"));
        assert_eq!(record.total_messages, 5);
        assert_eq!(record.processed_messages, 0);
    }

    #[test]
    fn test_negative_counters_read_as_zero() {
        let record: MailboxRecord =
            serde_json::from_value(json!({"id": 1, "total_messages": -3})).unwrap();
        assert_eq!(record.total_messages, 0);
    }

    #[test]
    fn test_decode_count_shapes() {
        assert_eq!(decode_count(&json!([1, 2, 3])), Some(3));
        assert_eq!(decode_count(&json!({"items": [{}, {}]})), Some(2));
        assert_eq!(decode_count(&json!({"count": 9})), Some(9));
        assert_eq!(decode_count(&json!({"total": 4})), Some(4));
        assert_eq!(decode_count(&json!({"message": "Will return contacts"})), None);
        assert_eq!(decode_count(&json!("nope")), None);
    }

    #[test]
    fn test_job_reference_lookup() {
        let job = JobReference::from_json(json!({"job_id": 42, "status": "queued"}));
        assert_eq!(job.reference.as_deref(), Some("42"));
        assert_eq!(JobReference::from_json(Value::Null).reference, None);
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let base = Url::parse("http://localhost:8000/api").unwrap();
        let backend =
            HttpBackend::new(&base, Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(backend.base_url().as_str(), "http://localhost:8000/api/");
    }
}
