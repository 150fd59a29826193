pub mod callback;
pub mod connect;
pub mod status;
pub mod upload;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};
use mailsight_auth_bridge::{
    AuthError, AuthFlowController, AuthState, HttpAuthBackend, SecureState, SessionFileState,
};
use mailsight_core::{
    emit_result, ClientConfig, ConnectedMailbox, HttpBackend, IngestionJob, MailsightPaths,
    Submission,
};
use tracing::warn;

use crate::navigator::TerminalNavigator;
use crate::ui;

pub type Flow = AuthFlowController<HttpAuthBackend, SessionFileState>;

/// Paths and configuration every command starts from.
pub struct CliContext {
    pub paths: MailsightPaths,
    pub config: ClientConfig,
}

impl CliContext {
    pub fn load() -> Result<Self> {
        let paths = MailsightPaths::from_env();
        let config = ClientConfig::load_with_env(&paths.config_path)?;
        Ok(Self { paths, config })
    }

    pub fn ingest_backend(&self) -> Result<Arc<HttpBackend>> {
        Ok(Arc::new(HttpBackend::new(
            &self.config.backend_url()?,
            self.config.request_timeout(),
            self.config.upload_timeout(),
        )))
    }

    /// Auth flow whose verifier survives between `connect` and `callback`.
    pub fn auth_flow(&self, navigator: TerminalNavigator) -> Result<Flow> {
        let backend_url = self.config.backend_url()?;
        self.paths
            .ensure_dirs()
            .with_context(|| format!("Failed to create {}", self.paths.base_dir.display()))?;
        let state = self
            .paths
            .verifier_state(&backend_url, self.config.verifier_max_age());
        Ok(AuthFlowController::new(
            HttpAuthBackend::new(&backend_url, self.config.request_timeout()),
            state,
            Arc::new(navigator),
            self.config.landing_url()?,
        ))
    }
}

/// Drop whatever the login session left in the verifier slot.
pub fn end_session(flow: &Flow) {
    if let Err(e) = flow.secure_state().teardown() {
        warn!("failed to tear down login session state: {}", e);
    }
}

/// `--json` payload for an auth failure.
pub fn auth_error_data(err: &AuthError) -> serde_json::Value {
    serde_json::json!({ "code": err.code(), "message": err.to_string() })
}

/// Kick off backend ingestion for the freshly connected mailbox.
pub async fn start_mailbox_ingestion(
    ctx: &CliContext,
    auth_state: AuthState,
    json: bool,
) -> Result<Option<IngestionJob>> {
    let source = ConnectedMailbox::new(ctx.ingest_backend()?);
    let spinner = (!json).then(|| ui::spinner("Starting mailbox ingestion..."));
    let submitted = source.submit(auth_state).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    match submitted? {
        Submission::Accepted(job) => {
            if json {
                emit_result("ingest", "running", serde_json::to_value(&job)?);
            } else {
                ui::success(&format!(
                    "Ingestion started for {} mailbox(es).",
                    job.mailboxes.len()
                ));
            }
            Ok(Some(job))
        }
        Submission::Ignored => Ok(None),
    }
}
