//! Mailsight auth bridge - connects a mailbox through the backend's
//! OAuth2 Authorization Code + PKCE endpoints.
//!
//! The backend owns the OAuth client; this crate only relays. It asks the
//! backend for an authorization URL and verifier, keeps the verifier in
//! session-scoped [`SecureState`] while the user is at the authorization
//! server, then trades the returned code plus verifier for a session.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mailsight_auth_bridge::{AuthFlowController, CallbackParams, HttpAuthBackend, MemoryState};
//!
//! let backend = HttpAuthBackend::new(&backend_url, timeout);
//! let flow = AuthFlowController::new(backend, MemoryState::new(), navigator, landing_url);
//! flow.initiate().await?;
//! // ... user agent comes back ...
//! flow.resume(CallbackParams::parse(&redirect)?).await?;
//! ```

pub mod backend;
pub mod callback;
pub mod error;
pub mod flow;
pub mod secure_state;

pub use backend::{AuthBackend, AuthorizationGrant, ConnectedAccount, HttpAuthBackend, Session};
pub use callback::{landing_url, CallbackParams};
pub use error::AuthError;
pub use flow::{
    AuthEvent, AuthFlowController, AuthState, Destination, FlowOutcome, Navigator, ResumeOutcome,
};
pub use secure_state::{MemoryState, SecureState, SessionFileState};

// Secret types that appear in the `SecureState` and `AuthBackend` signatures.
pub use oauth2::{AuthorizationCode, PkceCodeVerifier};
