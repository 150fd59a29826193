use std::time::Duration;

use async_trait::async_trait;
use oauth2::{AuthorizationCode, PkceCodeVerifier};
use reqwest::redirect::Policy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::AuthError;

/// What the backend hands out when a login starts.
#[derive(Debug)]
pub struct AuthorizationGrant {
    pub auth_url: Url,
    pub code_verifier: PkceCodeVerifier,
}

#[derive(Debug, Default, Deserialize)]
struct GrantResponse {
    #[serde(default)]
    auth_url: Option<String>,
    #[serde(default)]
    code_verifier: Option<String>,
}

impl AuthorizationGrant {
    /// Validate a raw `/auth/microsoft` body.
    pub fn from_json(body: &serde_json::Value) -> Result<Self, AuthError> {
        let raw: GrantResponse = serde_json::from_value(body.clone()).unwrap_or_default();

        let auth_url = raw
            .auth_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::AuthInitiation("no auth_url in response".to_string()))?;
        let auth_url = Url::parse(auth_url)
            .map_err(|e| AuthError::AuthInitiation(format!("unusable auth_url: {e}")))?;
        if !matches!(auth_url.scheme(), "http" | "https") {
            return Err(AuthError::AuthInitiation(format!(
                "unusable auth_url scheme: {}",
                auth_url.scheme()
            )));
        }

        let code_verifier = raw
            .code_verifier
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AuthError::AuthInitiation("no code_verifier in response".to_string()))?;

        Ok(Self {
            auth_url,
            code_verifier: PkceCodeVerifier::new(code_verifier),
        })
    }
}

/// The account the exchange connected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default, rename = "displayName", alias = "display_name")]
    pub display_name: Option<String>,
    #[serde(default, rename = "userPrincipalName", alias = "user_principal_name")]
    pub user_principal_name: Option<String>,
}

impl ConnectedAccount {
    pub fn label(&self) -> String {
        let address = self
            .mail
            .as_deref()
            .or(self.user_principal_name.as_deref());
        match (self.display_name.as_deref(), address) {
            (Some(name), Some(addr)) => format!("{name} <{addr}>"),
            (Some(name), None) => name.to_string(),
            (None, Some(addr)) => addr.to_string(),
            (None, None) => "unknown account".to_string(),
        }
    }
}

/// Decoded body of a successful code exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub message: Option<String>,
    pub user: Option<ConnectedAccount>,
    pub raw: serde_json::Value,
}

impl Session {
    pub fn from_json(raw: serde_json::Value) -> Self {
        let message = raw
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let user = raw
            .get("user")
            .filter(|v| v.is_object())
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        Self { message, user, raw }
    }
}

/// The two backend calls the flow makes.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Request an authorization URL and a fresh PKCE verifier.
    async fn authorization_grant(&self) -> Result<AuthorizationGrant, AuthError>;

    /// Trade a code and its verifier for a session.
    async fn exchange_code(
        &self,
        code: &AuthorizationCode,
        verifier: &PkceCodeVerifier,
    ) -> Result<Session, AuthError>;
}

/// [`AuthBackend`] over the backend's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpAuthBackend {
    http_client: Client,
    base_url: Url,
}

impl HttpAuthBackend {
    pub fn new(base_url: &Url, timeout: Duration) -> Self {
        let http_client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(http_client, base_url)
    }

    pub fn with_client(http_client: Client, base_url: &Url) -> Self {
        let mut base_url = base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            http_client,
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.base_url
            .join(path)
            .map_err(|e| AuthError::AuthInitiation(format!("invalid backend url: {e}")))
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn authorization_grant(&self) -> Result<AuthorizationGrant, AuthError> {
        let url = self.endpoint("auth/microsoft")?;
        debug!(%url, "requesting authorization url");

        let resp = self
            .http_client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AuthError::network("authorization request", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::AuthInitiation(format!(
                "HTTP error! status: {}",
                status.as_u16()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AuthError::AuthInitiation(format!("unreadable response: {e}")))?;
        AuthorizationGrant::from_json(&body)
    }

    async fn exchange_code(
        &self,
        code: &AuthorizationCode,
        verifier: &PkceCodeVerifier,
    ) -> Result<Session, AuthError> {
        let url = self.endpoint("auth/microsoft/callback")?;
        debug!(
            code_len = code.secret().len(),
            verifier_len = verifier.secret().len(),
            "exchanging authorization code"
        );

        let resp = self
            .http_client
            .get(url)
            .query(&[
                ("code", code.secret().as_str()),
                ("code_verifier", verifier.secret().as_str()),
            ])
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AuthError::network("code exchange", e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AuthError::network("code exchange", e))?;

        if !status.is_success() {
            return Err(AuthError::ExchangeFailed {
                status: status.as_u16(),
                body,
            });
        }

        let raw = serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body));
        let session = Session::from_json(raw);
        info!(
            account = %session.user.as_ref().map(|u| u.label()).unwrap_or_default(),
            "exchanged authorization code"
        );
        Ok(session)
    }
}
