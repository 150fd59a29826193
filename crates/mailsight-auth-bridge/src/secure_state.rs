//! Session-scoped storage for the one secret a pending login needs: the
//! PKCE code verifier.
//!
//! The slot survives a hop through the browser (the `connect` process and
//! the `callback` process may differ) but not the end of the session:
//! entries expire, and `teardown` removes them.
//!
//! Next to the slot sits a record of authorization codes that were already
//! exchanged, so a callback replayed by a later process is recognised.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use oauth2::{AuthorizationCode, PkceCodeVerifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

/// Single-slot secret store with an explicit session lifecycle.
///
/// All operations are synchronous and idempotent. `clear` on an empty
/// store is a no-op.
pub trait SecureState: Send + Sync {
    /// Start of a session. Drops anything stale left behind by a previous one.
    fn init(&self) -> io::Result<()> {
        Ok(())
    }

    fn store(&self, verifier: &PkceCodeVerifier) -> io::Result<()>;

    fn retrieve(&self) -> io::Result<Option<PkceCodeVerifier>>;

    fn clear(&self) -> io::Result<()>;

    /// Remember that `code` was exchanged successfully.
    fn mark_handled(&self, code: &AuthorizationCode) -> io::Result<()>;

    fn was_handled(&self, code: &AuthorizationCode) -> io::Result<bool>;

    /// End of a session. Handled-code records are kept until they expire.
    fn teardown(&self) -> io::Result<()> {
        self.clear()
    }
}

/// In-process slot. Used by single-process flows and tests.
#[derive(Debug, Default)]
pub struct MemoryState {
    slot: Mutex<Option<String>>,
    handled: Mutex<HashSet<String>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SecureState for MemoryState {
    fn store(&self, verifier: &PkceCodeVerifier) -> io::Result<()> {
        *self.slot() = Some(verifier.secret().to_string());
        Ok(())
    }

    fn retrieve(&self) -> io::Result<Option<PkceCodeVerifier>> {
        Ok(self.slot().clone().map(PkceCodeVerifier::new))
    }

    fn clear(&self) -> io::Result<()> {
        self.slot().take();
        Ok(())
    }

    fn mark_handled(&self, code: &AuthorizationCode) -> io::Result<()> {
        self.handled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(code_digest(code));
        Ok(())
    }

    fn was_handled(&self, code: &AuthorizationCode) -> io::Result<bool> {
        Ok(self
            .handled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&code_digest(code)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredVerifier {
    origin: String,
    verifier: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HandledCode {
    code_sha256: String,
    created_at: DateTime<Utc>,
}

/// File-backed slot, one file per backend origin.
///
/// The directory is created 0700 and the file written 0600 via a temp file
/// and rename. Entries older than `max_age` read as absent.
#[derive(Debug, Clone)]
pub struct SessionFileState {
    path: PathBuf,
    handled_path: PathBuf,
    origin: String,
    max_age: Duration,
}

impl SessionFileState {
    pub fn new(dir: impl AsRef<Path>, origin: &Url, max_age: std::time::Duration) -> Self {
        let origin = origin.origin().ascii_serialization();
        let path = dir.as_ref().join(slot_file_name(&origin, "verifier"));
        let handled_path = dir.as_ref().join(slot_file_name(&origin, "handled"));
        let max_age = Duration::from_std(max_age).unwrap_or_else(|_| Duration::minutes(10));
        Self {
            path,
            handled_path,
            origin,
            max_age,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_dir(&self) -> io::Result<()> {
        let Some(dir) = self.path.parent() else {
            return Ok(());
        };
        if !dir.exists() {
            fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
            }
        }
        Ok(())
    }

    fn read_entry(&self) -> io::Result<Option<StoredVerifier>> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        match serde_json::from_str::<StoredVerifier>(&json) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(path = %self.path.display(), "discarding unreadable verifier slot: {}", e);
                self.clear()?;
                Ok(None)
            }
        }
    }

    fn is_expired(&self, created_at: DateTime<Utc>) -> bool {
        Utc::now() - created_at > self.max_age
    }

    /// Unexpired handled-code records. An unreadable file reads as empty.
    fn read_handled(&self) -> io::Result<Vec<HandledCode>> {
        let json = match fs::read_to_string(&self.handled_path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        match serde_json::from_str::<Vec<HandledCode>>(&json) {
            Ok(entries) => Ok(entries
                .into_iter()
                .filter(|entry| !self.is_expired(entry.created_at))
                .collect()),
            Err(e) => {
                warn!(
                    path = %self.handled_path.display(),
                    "discarding unreadable handled-code record: {}", e
                );
                Ok(Vec::new())
            }
        }
    }
}

impl SecureState for SessionFileState {
    fn init(&self) -> io::Result<()> {
        self.ensure_dir()?;
        if let Some(entry) = self.read_entry()? {
            if self.is_expired(entry.created_at) {
                debug!(path = %self.path.display(), "removing expired verifier slot");
                self.clear()?;
            }
        }
        Ok(())
    }

    fn store(&self, verifier: &PkceCodeVerifier) -> io::Result<()> {
        self.ensure_dir()?;
        let entry = StoredVerifier {
            origin: self.origin.clone(),
            verifier: verifier.secret().to_string(),
            created_at: Utc::now(),
        };
        write_private_json(&self.path, &entry)?;

        debug!(path = %self.path.display(), "stored code verifier");
        Ok(())
    }

    fn retrieve(&self) -> io::Result<Option<PkceCodeVerifier>> {
        let Some(entry) = self.read_entry()? else {
            return Ok(None);
        };
        if entry.origin != self.origin {
            warn!(
                expected = %self.origin,
                found = %entry.origin,
                "verifier slot belongs to another origin"
            );
            return Ok(None);
        }
        if self.is_expired(entry.created_at) {
            debug!(path = %self.path.display(), "verifier slot expired");
            self.clear()?;
            return Ok(None);
        }
        Ok(Some(PkceCodeVerifier::new(entry.verifier)))
    }

    fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "cleared code verifier");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn mark_handled(&self, code: &AuthorizationCode) -> io::Result<()> {
        self.ensure_dir()?;
        let digest = code_digest(code);
        let mut entries = self.read_handled()?;
        entries.retain(|entry| entry.code_sha256 != digest);
        entries.push(HandledCode {
            code_sha256: digest,
            created_at: Utc::now(),
        });
        write_private_json(&self.handled_path, &entries)?;
        debug!(path = %self.handled_path.display(), "recorded handled authorization code");
        Ok(())
    }

    fn was_handled(&self, code: &AuthorizationCode) -> io::Result<bool> {
        let digest = code_digest(code);
        Ok(self
            .read_handled()?
            .iter()
            .any(|entry| entry.code_sha256 == digest))
    }
}

fn slot_file_name(origin: &str, kind: &str) -> String {
    let sanitized: String = origin
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{sanitized}.{kind}.json")
}

/// Codes are only ever stored hashed.
fn code_digest(code: &AuthorizationCode) -> String {
    Sha256::digest(code.secret().as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn write_private_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json =
        serde_json::to_string(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)?;
    set_file_permissions_0600(&tmp_path)?;
    fs::rename(&tmp_path, path)
}

fn set_file_permissions_0600(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
