//! Backend connection secrets in the OS credential store.
//!
//! The backend URL and the Django session cookies (`sessionid`, `csrftoken`)
//! live in the platform keyring (DPAPI on Windows, Keychain on macOS, Secret
//! Service on Linux) rather than in the SQLite file.

use keyring::Entry;
use serde_json::Value;
use tracing::{info, warn};

use crate::value_str;

const SERVICE_NAME: &str = "playita-pos";

pub(crate) const KEY_BACKEND_URL: &str = "backend_url";
pub(crate) const KEY_SESSION_ID: &str = "sessionid";
pub(crate) const KEY_CSRF_TOKEN: &str = "csrftoken";

const ALL_KEYS: &[&str] = &[KEY_BACKEND_URL, KEY_SESSION_ID, KEY_CSRF_TOKEN];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential. Returns `None` when the entry does not exist
/// or the platform store is unavailable.
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

pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential. Silently succeeds if the entry does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Cookies captured from an authenticated backend session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCookies {
    pub session_id: Option<String>,
    pub csrf_token: Option<String>,
}

impl SessionCookies {
    pub fn load() -> Self {
        Self {
            session_id: get_credential(KEY_SESSION_ID),
            csrf_token: get_credential(KEY_CSRF_TOKEN),
        }
    }

    /// Render as a `Cookie` request header value.
    pub fn cookie_header(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(sid) = self.session_id.as_deref() {
            parts.push(format!("sessionid={sid}"));
        }
        if let Some(token) = self.csrf_token.as_deref() {
            parts.push(format!("csrftoken={token}"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

/// Pull session values out of a connect payload. Accepts explicit fields or a
/// raw `Cookie` header copied from an authenticated browser.
pub(crate) fn parse_session_payload(payload: &Value) -> (Option<String>, SessionCookies) {
    let backend_url = value_str(payload, &["backendUrl", "backend_url", "url"]);
    let raw_cookie = value_str(payload, &["cookie", "cookies"]).unwrap_or_default();

    let session_id = value_str(payload, &["sessionid", "sessionId", "session_id"])
        .or_else(|| crate::api::cookie_value(&raw_cookie, "sessionid"));
    let csrf_token = value_str(payload, &["csrftoken", "csrfToken", "csrf_token"])
        .or_else(|| crate::api::csrf_token_from_cookie(&raw_cookie));

    (
        backend_url,
        SessionCookies {
            session_id,
            csrf_token,
        },
    )
}

/// Store the backend URL and session cookies received from the shell.
pub fn update_session(payload: &Value) -> Result<Value, String> {
    let (backend_url, cookies) = parse_session_payload(payload);

    if let Some(url) = backend_url.as_deref() {
        let normalized = crate::api::normalize_base_url(url);
        if normalized.is_empty() {
            return Err("Backend URL cannot be empty".into());
        }
        set_credential(KEY_BACKEND_URL, &normalized)?;
    }
    if let Some(sid) = cookies.session_id.as_deref() {
        set_credential(KEY_SESSION_ID, sid)?;
    }
    if let Some(token) = cookies.csrf_token.as_deref() {
        set_credential(KEY_CSRF_TOKEN, token)?;
    }

    info!(
        has_session = cookies.session_id.is_some(),
        has_csrf = cookies.csrf_token.is_some(),
        "backend session updated"
    );
    Ok(serde_json::json!({ "success": true }))
}

/// Config summary for the shell. Secrets are reported as present/absent only.
pub fn get_session_summary() -> Value {
    serde_json::json!({
        "backend_url": get_credential(KEY_BACKEND_URL),
        "has_session": get_credential(KEY_SESSION_ID).is_some(),
        "has_csrf_token": get_credential(KEY_CSRF_TOKEN).is_some(),
    })
}

/// Forget the session cookies, keeping the backend URL.
pub fn clear_session() -> Result<(), String> {
    delete_credential(KEY_SESSION_ID)?;
    delete_credential(KEY_CSRF_TOKEN)?;
    info!("backend session cleared");
    Ok(())
}

/// Delete every stored credential.
pub fn factory_reset() -> Result<Value, String> {
    info!("performing factory reset - deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(serde_json::json!({ "success": true }))
}
