//! Diagnostics for `mont-pos doctor`.
//!
//! - **About info**: version, build timestamp, git SHA, platform
//! - **System health**: schema version, database size, row counts per table
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files.

use crate::backend::Table;
use crate::db::DbState;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

const LOG_PREFIX: &str = "pos.";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// System health
// ---------------------------------------------------------------------------

/// Health of the local store. Tables that cannot be counted report `null`.
pub fn get_system_health(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let schema_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let mut row_counts = Map::new();
    for table in Table::ALL {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count = match conn.query_row(&sql, [], |row| row.get::<_, i64>(0)) {
            Ok(n) => json!(n),
            Err(e) => {
                warn!(table = table.name(), error = %e, "row count failed");
                Value::Null
            }
        };
        row_counts.insert(table.name().to_string(), count);
    }

    let stock_alerts: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM stock WHERE quantite <= seuil_alerte",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    Ok(json!({
        "schemaVersion": schema_version,
        "dbPath": db.db_path.display().to_string(),
        "dbSizeBytes": db_size,
        "rowCounts": row_counts,
        "stockAlerts": stock_alerts,
    }))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_PREFIX))
        })
        .filter(|entry| entry.path().is_file())
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
