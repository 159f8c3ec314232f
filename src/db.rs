//! Local SQLite database layer.
//!
//! Uses rusqlite with WAL mode. Holds the same collections as the hosted
//! Supabase project (so the POS can run standalone) plus the
//! `local_settings` table used for terminal-level overrides.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Shared handle on the local database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

pub const DB_FILE_NAME: &str = "mont-pos.db";

/// Initialize the database at `{data_dir}/mont-pos.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join(DB_FILE_NAME);
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Migrated in-memory database (standalone demos and tests).
pub fn open_in_memory() -> Result<Connection, String> {
    let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// v1: settings, catalog, stock, staff, register sales and kitchen tickets.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS local_settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nom TEXT NOT NULL,
            couleur TEXT DEFAULT '#EAB308',
            icone TEXT DEFAULT '🍴',
            created_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS menu (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nom TEXT NOT NULL,
            categorie_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
            prix REAL NOT NULL,
            description TEXT,
            actif INTEGER NOT NULL DEFAULT 1,
            image TEXT,
            created_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS stock (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nom TEXT NOT NULL,
            categorie TEXT,
            quantite REAL NOT NULL DEFAULT 0,
            seuil_alerte REAL DEFAULT 5,
            unite TEXT DEFAULT 'pcs',
            prix_unitaire REAL,
            fournisseur TEXT,
            derniere_mise_a_jour TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_stock_nom ON stock(nom);

        CREATE TABLE IF NOT EXISTS employes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nom TEXT NOT NULL,
            telephone TEXT,
            role TEXT NOT NULL DEFAULT 'staff',
            code_pin TEXT,
            actif INTEGER NOT NULL DEFAULT 1,
            password TEXT,
            created_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_employes_telephone ON employes(telephone);

        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            montant_total REAL NOT NULL,
            sous_total REAL,
            mode_paiement TEXT NOT NULL,
            items TEXT NOT NULL DEFAULT '[]',
            caissier TEXT,
            table_numero INTEGER,
            creee_a TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            payee_a TEXT
        );

        CREATE TABLE IF NOT EXISTS preparation_cuisine (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id TEXT,
            table_numero INTEGER,
            items TEXT NOT NULL DEFAULT '[]',
            statut TEXT NOT NULL DEFAULT 'en_attente',
            creee_a TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_preparation_statut ON preparation_cuisine(statut);

        INSERT INTO schema_version (version) VALUES (1);

        COMMIT;
        ",
    )
    .map_err(|e| format!("migrate_v1: {e}"))?;

    info!("Applied migration v1");
    Ok(())
}

/// v2: recipe links between menu items and stock units.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS menu_recettes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            menu_id INTEGER NOT NULL REFERENCES menu(id) ON DELETE CASCADE,
            stock_id INTEGER NOT NULL REFERENCES stock(id) ON DELETE CASCADE,
            quantite_consommee REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_menu_recettes_menu ON menu_recettes(menu_id);

        INSERT INTO schema_version (version) VALUES (2);

        COMMIT;
        ",
    )
    .map_err(|e| format!("migrate_v2: {e}"))?;

    info!("Applied migration v2");
    Ok(())
}

/// v3: customers and customer checkout orders.
fn migrate_v3(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS clients (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nom TEXT,
            telephone TEXT NOT NULL UNIQUE,
            derniere_visite TEXT,
            created_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS commandes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id INTEGER REFERENCES clients(id) ON DELETE SET NULL,
            total REAL NOT NULL DEFAULT 0,
            articles TEXT NOT NULL DEFAULT '[]',
            statut TEXT NOT NULL DEFAULT 'complete',
            payment_method TEXT,
            created_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_commandes_created_at ON commandes(created_at);

        INSERT INTO schema_version (version) VALUES (3);

        COMMIT;
        ",
    )
    .map_err(|e| format!("migrate_v3: {e}"))?;

    info!("Applied migration v3");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
