//! The two-step Authorization Code + PKCE sequence.
//!
//! ```text
//! Idle ──initiate──▶ AwaitingCode ──callback──▶ Exchanging ──▶ Authenticated
//!   ▲                                                │
//!   └──────────────(new connect)──── Failed ◀────────┘
//! ```
//!
//! The controller never holds its state lock across an `.await`. A callback
//! first *claims* its code under the lock; any later callback carrying the
//! same code, or arriving while an exchange is running or after success,
//! short-circuits without touching the network. Codes exchanged by an
//! earlier process are recognised through the secure state's handled-code
//! record.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use oauth2::AuthorizationCode;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::backend::{AuthBackend, Session};
use crate::callback::{landing_url, CallbackParams};
use crate::error::AuthError;
use crate::secure_state::SecureState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Idle,
    AwaitingCode,
    Exchanging,
    Authenticated,
    Failed,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthState::Idle => "idle",
            AuthState::AwaitingCode => "awaiting_code",
            AuthState::Exchanging => "exchanging",
            AuthState::Authenticated => "authenticated",
            AuthState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where the user agent should go next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The authorization server's login page.
    AuthorizationServer(Url),
    /// The ingestion-monitoring view.
    Monitoring,
    /// The landing location, possibly carrying an `error` parameter.
    Landing(Url),
}

/// Moves the user agent. Implemented by whatever front end drives the flow.
pub trait Navigator: Send + Sync {
    fn navigate(&self, destination: &Destination) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub enum AuthEvent {
    Connect,
    Callback(CallbackParams),
}

#[derive(Debug)]
pub enum ResumeOutcome {
    Authenticated(Session),
    /// The callback was a duplicate; nothing was exchanged.
    AlreadyHandled { state: AuthState },
}

#[derive(Debug)]
pub enum FlowOutcome {
    Redirected(Url),
    Resumed(ResumeOutcome),
}

#[derive(Debug)]
struct FlowInner {
    state: AuthState,
    /// Codes that have been claimed by a callback. A code is single-use.
    seen_codes: HashSet<String>,
    last_error: Option<String>,
}

pub struct AuthFlowController<B, S> {
    backend: B,
    secure_state: S,
    navigator: Arc<dyn Navigator>,
    landing: Url,
    inner: Mutex<FlowInner>,
}

impl<B, S> AuthFlowController<B, S>
where
    B: AuthBackend,
    S: SecureState,
{
    pub fn new(backend: B, secure_state: S, navigator: Arc<dyn Navigator>, landing: Url) -> Self {
        Self {
            backend,
            secure_state,
            navigator,
            landing,
            inner: Mutex::new(FlowInner {
                state: AuthState::Idle,
                seen_codes: HashSet::new(),
                last_error: None,
            }),
        }
    }

    pub fn state(&self) -> AuthState {
        self.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn secure_state(&self) -> &S {
        &self.secure_state
    }

    fn lock(&self) -> MutexGuard<'_, FlowInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Single entry point for front ends: one event per user action or
    /// incoming redirect.
    pub async fn dispatch(&self, event: AuthEvent) -> Result<FlowOutcome, AuthError> {
        match event {
            AuthEvent::Connect => self.initiate().await.map(FlowOutcome::Redirected),
            AuthEvent::Callback(params) => self.resume(params).await.map(FlowOutcome::Resumed),
        }
    }

    /// Start a login: fetch an authorization URL and verifier, persist the
    /// verifier, send the user agent to the authorization server.
    ///
    /// On failure nothing is navigated and the state stays `Idle`.
    pub async fn initiate(&self) -> Result<Url, AuthError> {
        {
            let mut inner = self.lock();
            if inner.state == AuthState::Exchanging {
                return Err(AuthError::AuthInitiation(
                    "an authorization exchange is already in progress".to_string(),
                ));
            }
            debug!(from = %inner.state, "auth state transition to idle");
            inner.state = AuthState::Idle;
        }

        match self.try_initiate().await {
            Ok(url) => {
                let mut inner = self.lock();
                inner.state = AuthState::AwaitingCode;
                inner.last_error = None;
                info!(host = url.host_str().unwrap_or(""), "redirected to authorization server");
                Ok(url)
            }
            Err(e) => {
                warn!("failed to get auth url: {}", e);
                let mut inner = self.lock();
                inner.state = AuthState::Idle;
                inner.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn try_initiate(&self) -> Result<Url, AuthError> {
        let grant = self.backend.authorization_grant().await?;

        self.secure_state.init()?;
        self.secure_state.store(&grant.code_verifier)?;

        let destination = Destination::AuthorizationServer(grant.auth_url.clone());
        if let Err(e) = self.navigator.navigate(&destination) {
            // Without the redirect the stored verifier is useless.
            if let Err(clear_err) = self.secure_state.clear() {
                warn!("failed to clear verifier after aborted redirect: {}", clear_err);
            }
            return Err(AuthError::AuthInitiation(format!(
                "could not open authorization page: {e}"
            )));
        }
        Ok(grant.auth_url)
    }

    /// Handle the redirect back from the authorization server.
    pub async fn resume(&self, params: CallbackParams) -> Result<ResumeOutcome, AuthError> {
        let code = {
            let mut inner = self.lock();
            match inner.state {
                AuthState::Exchanging | AuthState::Authenticated => {
                    debug!(state = %inner.state, "callback short-circuited");
                    return Ok(ResumeOutcome::AlreadyHandled { state: inner.state });
                }
                AuthState::Idle | AuthState::AwaitingCode | AuthState::Failed => {}
            }

            match params.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                None => {
                    inner.state = AuthState::Failed;
                    drop(inner);
                    error!("no code received from authorization server");
                    return Err(self.fail(AuthError::MissingCode {
                        reason: params.denial_reason(),
                    }));
                }
                Some(code) if inner.seen_codes.contains(code) => {
                    debug!(state = %inner.state, "authorization code already used");
                    return Ok(ResumeOutcome::AlreadyHandled { state: inner.state });
                }
                Some(code) => {
                    inner.seen_codes.insert(code.to_string());
                    inner.state = AuthState::Exchanging;
                    AuthorizationCode::new(code.to_string())
                }
            }
        };

        match self.secure_state.was_handled(&code) {
            Ok(true) => {
                info!("authorization code was already exchanged by an earlier session");
                let mut inner = self.lock();
                inner.state = AuthState::Authenticated;
                inner.last_error = None;
                return Ok(ResumeOutcome::AlreadyHandled {
                    state: AuthState::Authenticated,
                });
            }
            Ok(false) => {}
            Err(e) => warn!("could not read handled-code record: {}", e),
        }

        let verifier = match self.secure_state.retrieve() {
            Ok(Some(verifier)) => verifier,
            Ok(None) => {
                error!("no code verifier found in session state");
                return Err(self.fail(AuthError::MissingVerifier));
            }
            Err(e) => return Err(self.fail(AuthError::State(e))),
        };

        info!("received auth code, exchanging for session");
        match self.backend.exchange_code(&code, &verifier).await {
            Ok(session) => {
                self.clear_verifier();
                if let Err(e) = self.secure_state.mark_handled(&code) {
                    warn!("failed to record handled authorization code: {}", e);
                }
                {
                    let mut inner = self.lock();
                    inner.state = AuthState::Authenticated;
                    inner.last_error = None;
                }
                info!("authentication successful");
                if let Err(e) = self.navigator.navigate(&Destination::Monitoring) {
                    warn!("authenticated but could not open monitoring view: {}", e);
                }
                Ok(ResumeOutcome::Authenticated(session))
            }
            Err(e) => {
                error!("authentication error: {}", e);
                Err(self.fail(e))
            }
        }
    }

    /// Record a permanent failure: erase the verifier, send the user to the
    /// landing location with the message.
    fn fail(&self, err: AuthError) -> AuthError {
        self.clear_verifier();
        {
            let mut inner = self.lock();
            inner.state = AuthState::Failed;
            inner.last_error = Some(err.to_string());
        }
        let destination = Destination::Landing(landing_url(&self.landing, Some(&err.to_string())));
        if let Err(e) = self.navigator.navigate(&destination) {
            warn!("could not open landing page: {}", e);
        }
        err
    }

    fn clear_verifier(&self) {
        if let Err(e) = self.secure_state.clear() {
            error!("failed to clear code verifier: {}", e);
        }
    }
}
