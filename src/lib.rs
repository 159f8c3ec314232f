//! O'PIED DU MONT - point-of-sale core.
//!
//! Cart and application state reducers, stock reconciliation against recipe
//! links, kitchen tickets, optimistic stock edits and the sale/report
//! operations, all running over the [`backend::Backend`] seam (hosted
//! Supabase or a local SQLite store).

use std::path::Path;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod app_state;
pub mod auth;
pub mod backend;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod employees;
pub mod error;
pub mod formatting;
pub mod kitchen;
pub mod marketing;
pub mod optimistic;
pub mod realtime;
pub mod reports;
pub mod stock;
pub mod storage;
pub mod types;
pub mod validation;

pub use error::{BackendError, PosError, ValidationError};

// ---------------------------------------------------------------------------
// Row field helpers
// ---------------------------------------------------------------------------
//
// Backend rows arrive with French column names while older screens wrote
// English ones. These helpers read the first key present.

pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Numbers may come back as JSON strings from `numeric` columns.
pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match v.get(*key) {
            Some(serde_json::Value::Number(n)) => {
                if let Some(f) = n.as_f64() {
                    return Some(f);
                }
            }
            Some(serde_json::Value::String(s)) => {
                if let Ok(f) = s.trim().parse::<f64>() {
                    return Some(f);
                }
            }
            _ => {}
        }
    }
    None
}

pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_i64()) {
            return Some(n);
        }
        if let Some(f) = v.get(*key).and_then(|x| x.as_f64()) {
            if f.fract() == 0.0 {
                return Some(f as i64);
            }
        }
    }
    None
}

pub(crate) fn value_bool(v: &serde_json::Value, keys: &[&str]) -> Option<bool> {
    for key in keys {
        let value = match v.get(*key) {
            Some(value) => value,
            None => continue,
        };

        if let Some(flag) = value.as_bool() {
            return Some(flag);
        }
        if let Some(flag) = value.as_i64() {
            return Some(flag == 1);
        }
        if let Some(flag) = value.as_str() {
            let normalized = flag.trim().to_ascii_lowercase();
            if matches!(normalized.as_str(), "true" | "1" | "yes" | "on") {
                return Some(true);
            }
            if matches!(normalized.as_str(), "false" | "0" | "no" | "off") {
                return Some(false);
            }
        }
    }
    None
}

/// Row identifiers are SERIAL integers remotely; canonically a string here.
pub(crate) fn value_id(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    value_str(v, keys).or_else(|| value_i64(v, keys).map(|n| n.to_string()))
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Initialize structured logging (console + daily rolling file under
/// `{data_dir}/logs`). The returned guard must be kept alive; dropping it
/// flushes the file writer.
pub fn init_tracing(data_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mont_pos_lib=debug"));

    let log_dir = diagnostics::log_dir(data_dir);
    diagnostics::prune_old_logs(&log_dir);
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "pos");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = env!("BUILD_GIT_SHA"),
        "Starting O'PIED DU MONT POS"
    );
    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_helpers_accept_either_naming_convention() {
        let row = json!({ "nom": "Attiéké", "quantite": "12.5", "id": 7, "actif": 1 });
        assert_eq!(value_str(&row, &["name", "nom"]).as_deref(), Some("Attiéké"));
        assert_eq!(value_f64(&row, &["quantity", "quantite"]), Some(12.5));
        assert_eq!(value_id(&row, &["id"]).as_deref(), Some("7"));
        assert_eq!(value_bool(&row, &["est_actif", "actif"]), Some(true));
    }

    #[test]
    fn value_str_skips_blank_values() {
        let row = json!({ "name": "   ", "nom": "Bissap" });
        assert_eq!(value_str(&row, &["name", "nom"]).as_deref(), Some("Bissap"));
    }

    #[test]
    fn value_i64_accepts_integral_floats() {
        let row = json!({ "table_numero": 4.0, "bad": 1.5 });
        assert_eq!(value_i64(&row, &["table_numero"]), Some(4));
        assert_eq!(value_i64(&row, &["bad"]), None);
    }
}
