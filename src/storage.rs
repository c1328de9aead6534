//! Terminal credentials in the OS credential store.
//!
//! Windows Credential Manager, macOS Keychain and the Linux kernel keyring,
//! all through the `keyring` crate. Only the three values needed to reach the
//! admin dashboard live here; everything else is plain terminal config.

use serde_json::Value;
use tracing::{info, warn};

const SERVICE_NAME: &str = "bar-pos";

pub const KEY_ADMIN_URL: &str = "admin_dashboard_url";
pub const KEY_TERMINAL_ID: &str = "terminal_id";
pub const KEY_API_KEY: &str = "pos_api_key";

const ALL_KEYS: &[&str] = &[KEY_ADMIN_URL, KEY_TERMINAL_ID, KEY_API_KEY];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential. Returns `None` when the entry does not exist
/// or the platform store is unavailable.
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match keyring::Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) if !pw.trim().is_empty() => Some(pw),
        Ok(_) | Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = keyring::Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())
}

/// Silently succeeds if the entry does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = keyring::Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key).is_some()
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// Store credentials received during terminal pairing.
///
/// Accepts `{ apiKey, terminalId?, adminUrl? }`. A connection string pasted
/// into `apiKey` carries all three values and wins over the loose fields.
pub fn update_terminal_credentials(payload: &Value) -> Result<Value, String> {
    let raw_api_key = crate::value_str(payload, &["apiKey", "api_key", "pos_api_key"])
        .ok_or("Missing required field: apiKey")?;
    let mut terminal_id = crate::value_str(payload, &["terminalId", "terminal_id"]);
    let mut admin_url = crate::value_str(payload, &["adminUrl", "adminDashboardUrl", "admin_url"]);

    let mut api_key = raw_api_key.clone();
    if let Some(conn) = crate::config::ConnectionString::decode(&raw_api_key) {
        api_key = conn.key;
        terminal_id = conn.terminal_id.or(terminal_id);
        admin_url = conn.url.or(admin_url);
    }

    let terminal_id = terminal_id.ok_or("Missing required field: terminalId")?;
    set_credential(KEY_TERMINAL_ID, &terminal_id)?;
    set_credential(KEY_API_KEY, &api_key)?;
    if let Some(url) = admin_url {
        set_credential(KEY_ADMIN_URL, &crate::api::normalize_admin_url(&url))?;
    }

    info!(terminal_id = %terminal_id, "terminal credentials updated");
    Ok(serde_json::json!({ "success": true }))
}

/// Delete every stored credential.
pub fn factory_reset() -> Result<Value, String> {
    info!("performing factory reset - deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(serde_json::json!({ "success": true }))
}
