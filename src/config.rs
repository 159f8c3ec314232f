//! Runtime configuration.
//!
//! Sources, highest precedence first:
//!
//! 1. process environment (after loading `.env` with `dotenvy`);
//! 2. OS keyring credentials saved by `mont-pos configure` ([`crate::storage`]);
//! 3. built-in defaults.
//!
//! Terminal-level overrides (restaurant details, service rate) live in the
//! local SQLite `local_settings` table and are applied on top with
//! [`AppConfig::apply_local_settings`].

use std::path::PathBuf;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{normalize_supabase_url, DEFAULT_TIMEOUT};
use crate::cart::DEFAULT_SERVICE_RATE;
use crate::db;
use crate::storage;

pub const ENV_SUPABASE_URL: &[&str] = &["SUPABASE_URL", "EXPO_PUBLIC_SUPABASE_URL"];
pub const ENV_SUPABASE_ANON_KEY: &[&str] = &["SUPABASE_ANON_KEY", "EXPO_PUBLIC_SUPABASE_ANON_KEY"];
pub const ENV_CONNECTION: &str = "MONT_POS_CONNECTION";
pub const ENV_DATA_DIR: &str = "MONT_POS_DATA_DIR";
pub const ENV_BACKEND: &str = "MONT_POS_BACKEND";
pub const ENV_POLL_SECS: &str = "MONT_POS_POLL_SECS";
pub const ENV_SERVICE_RATE: &str = "MONT_POS_SERVICE_RATE";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "MONT_POS_HTTP_TIMEOUT_SECS";

const DEFAULT_POLL_SECS: u64 = 5;
const SETTINGS_RESTAURANT: &str = "restaurant";
const SETTINGS_POS: &str = "pos";

// ---------------------------------------------------------------------------
// Restaurant details
// ---------------------------------------------------------------------------

/// Details printed on receipts and marketing messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestaurantInfo {
    pub name: String,
    pub location: String,
    pub phone: String,
    pub whatsapp: String,
}

impl Default for RestaurantInfo {
    fn default() -> Self {
        Self {
            name: "O'PIED DU MONT".into(),
            location: "Korhogo, Quartier Résidentiel".into(),
            phone: "+225 07 07 00 00 00".into(),
            whatsapp: "2250707000000".into(),
        }
    }
}

impl RestaurantInfo {
    /// Town part of `location` (text before the first comma).
    pub fn city(&self) -> &str {
        self.location.split(',').next().unwrap_or_default().trim()
    }

    /// Defaults overridden by any `restaurant/*` local setting.
    pub fn load(conn: &Connection) -> Self {
        let mut info = Self::default();
        for (key, slot) in [
            ("name", &mut info.name),
            ("location", &mut info.location),
            ("phone", &mut info.phone),
            ("whatsapp", &mut info.whatsapp),
        ] {
            if let Some(value) = db::get_setting(conn, SETTINGS_RESTAURANT, key) {
                if !value.trim().is_empty() {
                    *slot = value;
                }
            }
        }
        info
    }

    pub fn save(&self, conn: &Connection) -> Result<(), String> {
        db::set_setting(conn, SETTINGS_RESTAURANT, "name", &self.name)?;
        db::set_setting(conn, SETTINGS_RESTAURANT, "location", &self.location)?;
        db::set_setting(conn, SETTINGS_RESTAURANT, "phone", &self.phone)?;
        db::set_setting(conn, SETTINGS_RESTAURANT, "whatsapp", &self.whatsapp)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connection strings
// ---------------------------------------------------------------------------

/// Hosted backend endpoint and its public (anon) key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConnection {
    pub url: String,
    pub anon_key: String,
}

/// Decode a connection string: either a JSON object or (url-safe) base64 of
/// one, with `url` and `key` fields. Padding is optional.
fn decode_connection_payload(raw: &str) -> Option<Value> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!("{base64}{}", "=".repeat((4 - base64.len() % 4) % 4));
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

pub fn parse_connection_string(raw: &str) -> Option<SupabaseConnection> {
    let payload = decode_connection_payload(raw)?;
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| payload.get(*n).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    let url = field(&["url", "supabaseUrl"])?;
    let anon_key = field(&["key", "anonKey", "supabaseAnonKey"])?;
    Some(SupabaseConnection {
        url: normalize_supabase_url(&url),
        anon_key,
    })
}

// ---------------------------------------------------------------------------
// App configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    Supabase,
    Sqlite,
}

impl BackendMode {
    pub fn parse(raw: &str) -> Option<BackendMode> {
        match raw.trim().to_lowercase().as_str() {
            "supabase" | "remote" | "hosted" => Some(BackendMode::Supabase),
            "sqlite" | "local" => Some(BackendMode::Sqlite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendMode,
    pub supabase: Option<SupabaseConnection>,
    pub data_dir: PathBuf,
    /// Interval of the change poller behind `kitchen --watch`.
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    /// Service charge of the orders screen, as a fraction.
    pub service_rate: f64,
    pub restaurant: RestaurantInfo,
    service_rate_from_env: bool,
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .or_else(|_| std::env::var("LOCALAPPDATA"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".local")
                .join("share")
        })
        .join("mont-pos")
}

fn parse_rate(raw: &str) -> Result<f64, String> {
    let rate: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{ENV_SERVICE_RATE}: '{raw}' is not a number"))?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("{ENV_SERVICE_RATE}: {rate} is outside 0..=1"));
    }
    Ok(rate)
}

fn parse_secs(name: &str, raw: &str) -> Result<Duration, String> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(format!("{name}: expected a positive number of seconds")),
        Ok(secs) => Ok(Duration::from_secs(secs)),
    }
}

impl AppConfig {
    /// Load `.env`, then resolve from the process environment and the
    /// keyring.
    pub fn load() -> Result<Self, String> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), ".env loaded"),
            Err(e) if e.not_found() => {}
            Err(e) => warn!(error = %e, "ignoring unreadable .env"),
        }
        Self::resolve(|key| std::env::var(key).ok(), storage::get_credential)
    }

    /// Resolve from an arbitrary environment and credential store.
    pub fn resolve(
        env: impl Fn(&str) -> Option<String>,
        credentials: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, String> {
        let env_any = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| env(n))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let supabase = match env_any(&[ENV_CONNECTION]) {
            Some(raw) => Some(
                parse_connection_string(&raw)
                    .ok_or_else(|| format!("{ENV_CONNECTION} is not a valid connection string"))?,
            ),
            None => {
                let url = env_any(ENV_SUPABASE_URL)
                    .or_else(|| credentials(storage::KEY_SUPABASE_URL));
                let key = env_any(ENV_SUPABASE_ANON_KEY)
                    .or_else(|| credentials(storage::KEY_SUPABASE_ANON_KEY));
                match (url, key) {
                    (Some(url), Some(anon_key)) => Some(SupabaseConnection {
                        url: normalize_supabase_url(&url),
                        anon_key: anon_key.trim().to_string(),
                    }),
                    _ => None,
                }
            }
        };

        let backend = match env_any(&[ENV_BACKEND]) {
            Some(raw) => BackendMode::parse(&raw)
                .ok_or_else(|| format!("{ENV_BACKEND}: unknown backend '{raw}'"))?,
            None if supabase.is_some() => BackendMode::Supabase,
            None => BackendMode::Sqlite,
        };
        if backend == BackendMode::Supabase && supabase.is_none() {
            return Err(
                "Supabase backend selected but no URL/key configured (set SUPABASE_URL and SUPABASE_ANON_KEY, or run `mont-pos configure`)"
                    .into(),
            );
        }

        let service_rate = env_any(&[ENV_SERVICE_RATE])
            .map(|raw| parse_rate(&raw))
            .transpose()?;
        let config = Self {
            backend,
            supabase,
            data_dir: env_any(&[ENV_DATA_DIR])
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            poll_interval: env_any(&[ENV_POLL_SECS])
                .map(|raw| parse_secs(ENV_POLL_SECS, &raw))
                .transpose()?
                .unwrap_or(Duration::from_secs(DEFAULT_POLL_SECS)),
            http_timeout: env_any(&[ENV_HTTP_TIMEOUT_SECS])
                .map(|raw| parse_secs(ENV_HTTP_TIMEOUT_SECS, &raw))
                .transpose()?
                .unwrap_or(DEFAULT_TIMEOUT),
            service_rate: service_rate.unwrap_or(DEFAULT_SERVICE_RATE),
            restaurant: RestaurantInfo::default(),
            service_rate_from_env: service_rate.is_some(),
        };
        info!(
            backend = ?config.backend,
            data_dir = %config.data_dir.display(),
            "configuration resolved"
        );
        Ok(config)
    }

    /// Apply `local_settings` overrides. The environment still wins for the
    /// service rate.
    pub fn apply_local_settings(&mut self, conn: &Connection) {
        self.restaurant = RestaurantInfo::load(conn);
        if self.service_rate_from_env {
            return;
        }
        if let Some(raw) = db::get_setting(conn, SETTINGS_POS, "service_rate") {
            match parse_rate(&raw) {
                Ok(rate) => self.service_rate = rate,
                Err(e) => warn!(error = %e, "ignoring stored service rate"),
            }
        }
    }
}

/// Persist a service-rate override for this terminal.
pub fn save_service_rate(conn: &Connection, rate: f64) -> Result<(), String> {
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("service rate {rate} is outside 0..=1"));
    }
    db::set_setting(conn, SETTINGS_POS, "service_rate", &rate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn no_credentials(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_to_local_backend() {
        let config = AppConfig::resolve(env_of(&[]), no_credentials).expect("config");
        assert_eq!(config.backend, BackendMode::Sqlite);
        assert!(config.supabase.is_none());
        assert_eq!(config.service_rate, DEFAULT_SERVICE_RATE);
        assert_eq!(config.http_timeout, DEFAULT_TIMEOUT);
        assert!(config.data_dir.ends_with("mont-pos"));
    }

    #[test]
    fn test_expo_variables_select_supabase() {
        let config = AppConfig::resolve(
            env_of(&[
                ("EXPO_PUBLIC_SUPABASE_URL", "abcd.supabase.co/rest/v1/"),
                ("EXPO_PUBLIC_SUPABASE_ANON_KEY", " anon "),
            ]),
            no_credentials,
        )
        .expect("config");
        assert_eq!(config.backend, BackendMode::Supabase);
        let conn = config.supabase.expect("connection");
        assert_eq!(conn.url, "https://abcd.supabase.co");
        assert_eq!(conn.anon_key, "anon");
    }

    #[test]
    fn test_keyring_fallback() {
        let creds = |key: &str| match key {
            storage::KEY_SUPABASE_URL => Some("https://k.supabase.co".to_string()),
            storage::KEY_SUPABASE_ANON_KEY => Some("stored-key".to_string()),
            _ => None,
        };
        let config = AppConfig::resolve(env_of(&[]), creds).expect("config");
        assert_eq!(config.supabase.expect("connection").anon_key, "stored-key");
    }

    #[test]
    fn test_connection_string_json_and_base64() {
        let json = r#"{"url":"https://p.supabase.co/","key":"k-123"}"#;
        let from_json = parse_connection_string(json).expect("json form");
        assert_eq!(from_json.url, "https://p.supabase.co");

        let encoded = BASE64_STANDARD.encode(json);
        let url_safe = encoded.trim_end_matches('=').replace('+', "-").replace('/', "_");
        assert_eq!(parse_connection_string(&url_safe), Some(from_json));
        assert!(parse_connection_string("short").is_none());
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(AppConfig::resolve(env_of(&[(ENV_SERVICE_RATE, "2")]), no_credentials).is_err());
        assert!(AppConfig::resolve(env_of(&[(ENV_POLL_SECS, "0")]), no_credentials).is_err());
        assert!(AppConfig::resolve(env_of(&[(ENV_BACKEND, "supabase")]), no_credentials).is_err());
        assert!(AppConfig::resolve(env_of(&[(ENV_CONNECTION, "not-a-connection-string!!")]), no_credentials).is_err());
    }

    #[test]
    fn test_local_settings_override() {
        let conn = db::open_in_memory().expect("db");
        save_service_rate(&conn, 0.1).expect("save rate");
        let info = RestaurantInfo {
            name: "Chez Awa".into(),
            ..RestaurantInfo::default()
        };
        info.save(&conn).expect("save info");

        let mut config = AppConfig::resolve(env_of(&[]), no_credentials).expect("config");
        config.apply_local_settings(&conn);
        assert_eq!(config.service_rate, 0.1);
        assert_eq!(config.restaurant.name, "Chez Awa");
        assert_eq!(config.restaurant.city(), "Korhogo");

        let mut env_wins = AppConfig::resolve(env_of(&[(ENV_SERVICE_RATE, "0.02")]), no_credentials)
            .expect("config");
        env_wins.apply_local_settings(&conn);
        assert_eq!(env_wins.service_rate, 0.02);
    }

    #[test]
    #[serial]
    fn test_load_reads_process_environment() {
        std::env::set_var(ENV_DATA_DIR, "/tmp/mont-pos-config-test");
        std::env::set_var(ENV_BACKEND, "sqlite");
        let config = AppConfig::load().expect("config");
        std::env::remove_var(ENV_DATA_DIR);
        std::env::remove_var(ENV_BACKEND);

        assert_eq!(config.backend, BackendMode::Sqlite);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/mont-pos-config-test"));
    }
}
