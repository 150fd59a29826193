use thiserror::Error;

/// Failures of ingestion submissions and progress reads.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported archive format: {file_name} (allowed: {})", .allowed.join(", "))]
    UnsupportedFormat {
        file_name: String,
        allowed: Vec<String>,
    },

    #[error("archive is too large: {size} bytes (limit {limit} bytes)")]
    ArchiveTooLarge { size: u64, limit: u64 },

    #[error("upload failed: {status} {status_text}{}", describe_body(.body))]
    UploadFailed {
        status: u16,
        status_text: String,
        body: String,
    },

    /// The mailbox list could not be read. Fatal to a progress round.
    #[error("mailbox source unavailable: {0}")]
    SourceUnavailable(String),

    /// Attachment processing could not be started or polled. Never fatal.
    #[error("attachment processing unavailable: {0}")]
    ProcessingUnavailable(String),

    /// A supplementary endpoint answered with something unusable.
    #[error("unexpected response from {endpoint}: {detail}")]
    UnexpectedResponse {
        endpoint: &'static str,
        detail: String,
    },

    #[error("network error during {operation}: {source}")]
    Network {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub(crate) fn network(operation: &'static str, source: reqwest::Error) -> Self {
        IngestError::Network { operation, source }
    }

    /// True when the failure is connectivity rather than a rejection.
    pub fn is_network(&self) -> bool {
        matches!(self, IngestError::Network { .. })
    }
}

fn describe_body(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        String::new()
    } else {
        format!(": {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_format_lists_allowed() {
        let err = IngestError::UnsupportedFormat {
            file_name: "archive.zip".to_string(),
            allowed: vec![".pst".to_string(), ".mbox".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "unsupported archive format: archive.zip (allowed: .pst, .mbox)"
        );
    }

    #[test]
    fn test_upload_failed_message() {
        let err = IngestError::UploadFailed {
            status: 413,
            status_text: "Payload Too Large".to_string(),
            body: String::new(),
        };
        assert_eq!(err.to_string(), "upload failed: 413 Payload Too Large");
        assert!(!err.is_network());
    }
}
