//! Active-session persistence in the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the kernel keyutils store. Only the currently signed-in
//! session lives here; per-staff offline credentials stay in the staff cache
//! so they survive logout.

use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::error::SessionError;
use crate::session::{SessionContext, SessionOrigin, SessionUser};

const SERVICE_NAME: &str = "pos-offline-sync";
const KEY_ACTIVE_SESSION: &str = "active_session";

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential. Returns `None` when the entry does not
/// exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

pub fn set_credential(key: &str, value: &str) -> Result<(), SessionError> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| SessionError::Vault(e.to_string()))?;
    entry
        .set_password(value)
        .map_err(|e| SessionError::Vault(e.to_string()))
}

/// Delete a credential. Silently succeeds if the entry does not exist.
pub fn delete_credential(key: &str) -> Result<(), SessionError> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| SessionError::Vault(e.to_string()))?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(SessionError::Vault(e.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Session blob
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct PersistedSession {
    user: SessionUser,
    token: String,
    origin: SessionOrigin,
    started_at: DateTime<Utc>,
}

fn encode_session(session: &SessionContext) -> Result<String, SessionError> {
    let mut blob = PersistedSession {
        user: session.user.clone(),
        token: session.token().to_string(),
        origin: session.origin,
        started_at: session.started_at,
    };
    let encoded = serde_json::to_string(&blob)
        .map_err(|e| SessionError::Vault(format!("encode session: {e}")));
    blob.token.zeroize();
    encoded
}

fn decode_session(raw: &str) -> Option<SessionContext> {
    let blob: PersistedSession = serde_json::from_str(raw).ok()?;
    if blob.token.trim().is_empty() {
        return None;
    }
    Some(SessionContext::restored(
        blob.user,
        blob.token,
        blob.origin,
        blob.started_at,
    ))
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

pub fn persist_session(session: &SessionContext) -> Result<(), SessionError> {
    let mut encoded = encode_session(session)?;
    let result = set_credential(KEY_ACTIVE_SESSION, &encoded);
    encoded.zeroize();
    result
}

/// Session saved by a previous run, if any.
pub fn restore_session() -> Option<SessionContext> {
    let mut raw = get_credential(KEY_ACTIVE_SESSION)?;
    let session = decode_session(&raw);
    raw.zeroize();
    match &session {
        Some(s) => info!(user_id = s.user.id, origin = ?s.origin, "Restored persisted session"),
        None => warn!("Persisted session is unreadable; ignoring it"),
    }
    session
}

pub fn clear_session() -> Result<(), SessionError> {
    delete_credential(KEY_ACTIVE_SESSION)
}
