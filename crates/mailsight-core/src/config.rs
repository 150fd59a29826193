//! Client configuration.
//!
//! Read from `<data dir>/config.toml`. Every field is optional; a missing
//! file means all defaults. `MAILSIGHT_BACKEND_URL` overrides `backend_url`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

pub const BACKEND_URL_ENV: &str = "MAILSIGHT_BACKEND_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the analysis backend.
    pub backend_url: String,
    pub auth: AuthSettings,
    pub polling: PollingSettings,
    pub upload: UploadSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Loopback address the callback listener binds to.
    pub callback_addr: String,
    /// Path the authorization server redirects to.
    pub callback_path: String,
    /// Where failed logins are sent, with an `error` parameter.
    pub landing_url: String,
    /// How long a stored verifier stays usable.
    pub verifier_max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub interval_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failed rounds before the job is marked failed.
    pub max_consecutive_failures: u32,
    pub stop_on_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub allowed_extensions: Vec<String>,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub upload_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            auth: AuthSettings::default(),
            polling: PollingSettings::default(),
            upload: UploadSettings::default(),
            http: HttpSettings::default(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            callback_addr: "127.0.0.1:3000".to_string(),
            callback_path: "/auth/callback".to_string(),
            landing_url: "http://localhost:3000/".to_string(),
            verifier_max_age_secs: 600,
        }
    }
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            max_backoff_ms: 30_000,
            max_consecutive_failures: 10,
            stop_on_complete: true,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            allowed_extensions: vec![".pst".to_string(), ".mbox".to_string()],
            max_upload_bytes: 1024 * 1024 * 1024, // 1 GiB
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            upload_timeout_secs: 60 * 60,
        }
    }
}

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults when it doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                config.backend_url = url.trim().to_string();
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.backend_url()?;
        self.landing_url()?;
        self.callback_url()?;
        Ok(())
    }

    pub fn backend_url(&self) -> Result<Url> {
        Url::parse(&self.backend_url)
            .with_context(|| format!("Invalid backend_url: {}", self.backend_url))
    }

    pub fn landing_url(&self) -> Result<Url> {
        Url::parse(&self.auth.landing_url)
            .with_context(|| format!("Invalid auth.landing_url: {}", self.auth.landing_url))
    }

    /// The redirect target registered with the authorization server.
    pub fn callback_url(&self) -> Result<Url> {
        let raw = format!("http://{}{}", self.auth.callback_addr, self.auth.callback_path);
        Url::parse(&raw).with_context(|| format!("Invalid callback location: {raw}"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.http.upload_timeout_secs)
    }

    pub fn verifier_max_age(&self) -> Duration {
        Duration::from_secs(self.auth.verifier_max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.backend_url().unwrap().as_str(), "http://localhost:8000/");
        assert_eq!(config.upload.allowed_extensions, vec![".pst", ".mbox"]);
        assert_eq!(config.upload.max_upload_bytes, 1_073_741_824);
        assert_eq!(
            config.callback_url().unwrap().as_str(),
            "http://127.0.0.1:3000/auth/callback"
        );
        assert!(config.polling.stop_on_complete);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = ClientConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.polling.interval_ms, 2_000);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
backend_url = "https://mail.example.com/api/"

[polling]
interval_ms = 500

[upload]
allowed_extensions = [".pst"]
"#;
        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.backend_url().unwrap().host_str(), Some("mail.example.com"));
        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.polling.max_backoff_ms, 30_000);
        assert_eq!(config.upload.allowed_extensions, vec![".pst"]);
        assert_eq!(config.auth.callback_path, "/auth/callback");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backend_url = \"not a url\"\n").unwrap();
        let err = ClientConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid backend_url"));
    }
}
