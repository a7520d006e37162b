//! Local SQLite store for la Playita POS.
//!
//! Holds the values a browser build kept in `localStorage`: the cart
//! (`carrito_pos`), the active table (`mesa_activa`), reception drafts
//! (`draft_<orderId>`) and terminal settings. Uses WAL mode and versioned
//! migrations so the file survives upgrades.

use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

const DB_FILE: &str = "playita.db";

/// Shared handle to the local database.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Wrap an already-migrated connection (used for in-memory stores).
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }
    }
}

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

/// Applied in order; append only.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "local_settings",
        sql: "CREATE TABLE IF NOT EXISTS local_settings (
                  setting_category TEXT NOT NULL,
                  setting_key      TEXT NOT NULL,
                  setting_value    TEXT NOT NULL,
                  updated_at       TEXT NOT NULL DEFAULT (datetime('now')),
                  PRIMARY KEY (setting_category, setting_key)
              );",
    },
];

fn latest_version() -> i32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Open (or create) `{data_dir}/playita.db` and bring it up to date.
///
/// A file that cannot be opened is discarded together with its WAL/SHM
/// siblings and recreated once; it only holds the terminal's local mirror.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;
    let db_path = data_dir.join(DB_FILE);
    info!("Opening database at {}", db_path.display());

    let conn = open_and_configure(&db_path).or_else(|first_err| {
        warn!(error = %first_err, "database unusable, recreating");
        for suffix in ["", "-wal", "-shm"] {
            let mut sibling = db_path.clone().into_os_string();
            sibling.push(suffix);
            if let Err(e) = fs::remove_file(&sibling) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not remove {}: {e}", PathBuf::from(&sibling).display());
                }
            }
        }
        open_and_configure(&db_path).map_err(|e| format!("Database open failed after retry: {e}"))
    })?;

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// In-memory store with the full schema applied.
pub fn open_in_memory() -> Result<DbState, String> {
    let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
    run_migrations(&conn)?;
    Ok(DbState::from_connection(conn))
}

fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Highest applied migration, 0 for a fresh file.
pub fn schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
        .unwrap_or(0)
}

fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current = schema_version(conn);
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    for m in pending {
        let apply = || -> rusqlite::Result<()> {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(m.sql)?;
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", params![m.version])?;
            tx.commit()
        };
        apply().map_err(|e| {
            error!(version = m.version, "migration {} failed: {e}", m.name);
            format!("migration v{} ({}): {e}", m.version, m.name)
        })?;
        info!(version = m.version, "applied migration {}", m.name);
    }
    info!("Database schema at v{}", latest_version());
    Ok(())
}

// ---------------------------------------------------------------------------
// Key/value helpers
// ---------------------------------------------------------------------------

pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings
         WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .optional()
    .unwrap_or_else(|e| {
        warn!(category, key, "setting read failed: {e}");
        None
    })
}

/// Insert or overwrite.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(setting_category, setting_key)
         DO UPDATE SET setting_value = excluded.setting_value, updated_at = datetime('now')",
        params![category, key, value],
    )
    .map(|_| ())
    .map_err(|e| format!("set_setting {category}.{key}: {e}"))
}

/// Returns whether a row existed.
pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> Result<bool, String> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
    )
    .map(|n| n > 0)
    .map_err(|e| format!("delete_setting {category}.{key}: {e}"))
}

/// Keys in a category that start with `prefix`, sorted.
pub fn setting_keys_with_prefix(
    conn: &Connection,
    category: &str,
    prefix: &str,
) -> Result<Vec<String>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT setting_key FROM local_settings
             WHERE setting_category = ?1 AND substr(setting_key, 1, length(?2)) = ?2
             ORDER BY setting_key",
        )
        .map_err(|e| format!("setting_keys_with_prefix prepare: {e}"))?;
    let rows = stmt
        .query_map(params![category, prefix], |row| row.get::<_, String>(0))
        .map_err(|e| format!("setting_keys_with_prefix query: {e}"))?;
    Ok(rows.flatten().collect())
}

pub fn delete_all_settings(conn: &Connection, category: &str) -> Result<(), String> {
    conn.execute("DELETE FROM local_settings WHERE setting_category = ?1", params![category])
        .map(|_| ())
        .map_err(|e| format!("delete_all_settings {category}: {e}"))
}

#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}
