use thiserror::Error;

/// Failures of the connect/callback sequence.
///
/// Every variant except [`AuthError::Network`] is a semantic rejection;
/// `Network` means the backend could not be reached at all.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("could not start authorization: {0}")]
    AuthInitiation(String),

    #[error("no authorization code received{}", describe_reason(.reason))]
    MissingCode { reason: Option<String> },

    #[error("no code verifier found for this session; start the connection again")]
    MissingVerifier,

    #[error("failed to authenticate ({status}): {body}")]
    ExchangeFailed { status: u16, body: String },

    #[error("network error during {operation}: {source}")]
    Network {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("session state storage failed: {0}")]
    State(#[from] std::io::Error),
}

impl AuthError {
    pub(crate) fn network(operation: &'static str, source: reqwest::Error) -> Self {
        AuthError::Network { operation, source }
    }

    /// True when the failure is connectivity rather than a rejection.
    pub fn is_network(&self) -> bool {
        matches!(self, AuthError::Network { .. })
    }

    /// Short machine-friendly code, matching the landing page vocabulary.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::AuthInitiation(_) => "auth_initiation",
            AuthError::MissingCode { .. } => "no_code",
            AuthError::MissingVerifier => "no_code_verifier",
            AuthError::ExchangeFailed { .. } => "exchange_failed",
            AuthError::Network { .. } => "network",
            AuthError::State(_) => "state",
        }
    }
}

fn describe_reason(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(" ({r})"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_code_message_includes_reason() {
        let err = AuthError::MissingCode {
            reason: Some("access_denied".to_string()),
        };
        assert_eq!(err.to_string(), "no authorization code received (access_denied)");

        let err = AuthError::MissingCode { reason: None };
        assert_eq!(err.to_string(), "no authorization code received");
    }

    #[test]
    fn test_exchange_failed_keeps_body_verbatim() {
        let err = AuthError::ExchangeFailed {
            status: 500,
            body: r#"{"detail":"invalid_grant"}"#.to_string(),
        };
        assert!(err.to_string().ends_with(r#"{"detail":"invalid_grant"}"#));
        assert!(!err.is_network());
        assert_eq!(err.code(), "exchange_failed");
    }
}
