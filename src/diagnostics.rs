//! Diagnostics: about info, local health and log directory helpers used by
//! `lib.rs` to configure rolling log files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use serde_json::{json, Value};
use tracing::warn;

use crate::data_helpers::LOCAL_CATEGORY;
use crate::reception::DRAFT_PREFIX;
use crate::{db, lock, AppState, APP_START_EPOCH};

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

const APP_DIR: &str = "co.laplayita.pos";
const LOG_PREFIX: &str = "pos.";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

fn uptime_secs() -> u64 {
    let started = APP_START_EPOCH.load(Ordering::Relaxed);
    if started == 0 {
        return 0;
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    now.saturating_sub(started)
}

/// Returns version, build timestamp, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "uptimeSecs": uptime_secs(),
    })
}

// ---------------------------------------------------------------------------
// Local health
// ---------------------------------------------------------------------------

/// Snapshot of the local store and in-memory session.
pub fn get_local_health(state: &AppState) -> Result<Value, String> {
    let (schema_version, drafts) = {
        let conn = lock(&state.db.conn, "db")?;
        let schema_version = db::schema_version(&conn);
        let drafts = db::setting_keys_with_prefix(&conn, LOCAL_CATEGORY, DRAFT_PREFIX)?;
        (schema_version, drafts)
    };
    let db_size = fs::metadata(&state.db.db_path).map(|m| m.len()).unwrap_or(0);
    let cart_lines = lock(&state.cart, "cart")?.len();
    let active_table = *lock(&state.active_table, "active table")?;
    let reception = lock(&state.reception, "reception")?
        .as_ref()
        .map(|s| s.order_id);

    Ok(json!({
        "schemaVersion": schema_version,
        "dbSizeBytes": db_size,
        "cartLines": cart_lines,
        "activeTable": active_table,
        "openReception": reception,
        "pendingDrafts": drafts,
        "uptimeSecs": uptime_secs(),
    }))
}

// ---------------------------------------------------------------------------
// Directories and log rotation
// ---------------------------------------------------------------------------

fn platform_data_base() -> PathBuf {
    std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        })
}

/// Directory holding the SQLite database.
pub fn get_data_dir() -> PathBuf {
    platform_data_base().join(APP_DIR)
}

pub fn get_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs() {
    prune_logs_in(&get_log_dir(), MAX_LOG_FILES);
}

/// Remove all but the `keep` newest `pos.*` files in `log_dir`. Returns how
/// many were removed.
pub fn prune_logs_in(log_dir: &Path, keep: usize) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
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

    // Newest first; ties broken by name so daily files sort by date.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::state;

    #[test]
    fn test_about_info_has_required_fields() {
        let info = get_about_info();
        assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
        assert!(info["gitSha"].is_string());
        assert!(info["platform"].is_string());
        assert!(info["uptimeSecs"].is_u64());
    }

    #[test]
    fn test_log_dir_lives_under_data_dir() {
        let log_dir = get_log_dir();
        assert!(log_dir.starts_with(get_data_dir()));
        assert!(get_data_dir().ends_with(APP_DIR));
    }

    #[test]
    fn test_prune_keeps_newest_pos_files() {
        let dir = std::env::temp_dir().join(format!("playita-logs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("dir");
        for day in 1..=5 {
            fs::write(dir.join(format!("pos.2024-06-0{day}")), "x").expect("write");
        }
        fs::write(dir.join("other.log"), "x").expect("write");

        let removed = prune_logs_in(&dir, 3);
        assert_eq!(removed, 2);
        assert!(dir.join("other.log").exists());
        let remaining = fs::read_dir(&dir)
            .expect("read")
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(LOG_PREFIX))
            .count();
        assert_eq!(remaining, 3);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        assert_eq!(prune_logs_in(Path::new("/nonexistent/playita/logs"), 1), 0);
    }

    #[test]
    fn test_local_health_counts_drafts() {
        let (state, _) = state();
        crate::data_helpers::write_local_json(&state.db, "draft_12", &json!([])).expect("draft");
        let health = get_local_health(&state).expect("health");
        assert_eq!(health["schemaVersion"], 1);
        assert_eq!(health["pendingDrafts"], json!(["draft_12"]));
        assert_eq!(health["cartLines"], 0);
    }
}
