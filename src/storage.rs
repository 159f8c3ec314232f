//! Backend credentials in the OS credential store.
//!
//! Windows Credential Manager, macOS Keychain or the Linux Secret Service,
//! through the `keyring` crate. Environment variables take precedence (see
//! [`crate::config`]); the keyring is where `mont-pos configure` leaves the
//! Supabase endpoint between runs.

use keyring::Entry;
use serde_json::{json, Value};
use tracing::{info, warn};

const SERVICE_NAME: &str = "mont-pos";

pub const KEY_SUPABASE_URL: &str = "supabase_url";
pub const KEY_SUPABASE_ANON_KEY: &str = "supabase_anon_key";

const ALL_KEYS: &[&str] = &[KEY_SUPABASE_URL, KEY_SUPABASE_ANON_KEY];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Read one credential. `None` when absent or when the platform store is
/// unavailable.
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

/// Delete a credential; missing entries are not an error.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// Both the endpoint and the public key are stored.
pub fn is_configured() -> bool {
    get_credential(KEY_SUPABASE_URL).is_some() && get_credential(KEY_SUPABASE_ANON_KEY).is_some()
}

/// Save the hosted backend endpoint. The URL is stored normalized.
pub fn store_backend_credentials(url: &str, anon_key: &str) -> Result<(), String> {
    let anon_key = anon_key.trim();
    if url.trim().is_empty() || anon_key.is_empty() {
        return Err("Supabase URL and key are both required".to_string());
    }
    let url = crate::backend::normalize_supabase_url(url);
    set_credential(KEY_SUPABASE_URL, &url)?;
    set_credential(KEY_SUPABASE_ANON_KEY, anon_key)?;
    info!(url = %url, "backend credentials saved");
    Ok(())
}

/// Stored configuration with the key masked, for `mont-pos doctor`.
pub fn describe() -> Value {
    json!({
        "supabase_url": get_credential(KEY_SUPABASE_URL),
        "supabase_anon_key": get_credential(KEY_SUPABASE_ANON_KEY).map(|k| mask(&k)),
    })
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(6).collect();
    format!("{visible}…")
}

/// Remove every stored credential.
pub fn factory_reset() -> Result<(), String> {
    info!("deleting stored backend credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}
