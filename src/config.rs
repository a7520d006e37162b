//! Terminal configuration.
//!
//! Non-secret settings live in `local_settings` under the `terminal` category
//! and fall back to defaults when absent. The backend URL comes from the
//! keyring, overridable with `PLAYITA_BACKEND_URL`.

use serde::Serialize;
use tracing::warn;

use crate::cart::{TaxMode, TaxPolicy, DEFAULT_TAX_RATE};
use crate::db;

pub(crate) const TERMINAL_CATEGORY: &str = "terminal";
pub(crate) const BACKEND_URL_ENV: &str = "PLAYITA_BACKEND_URL";

/// Customer id of the walk-in "Consumidor Final" account.
pub const WALK_IN_CUSTOMER_ID: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminalConfig {
    pub tax: TaxPolicy,
    pub table_poll_secs: u64,
    pub draft_autosave_secs: u64,
    pub default_cliente_id: i64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            tax: TaxPolicy::default(),
            table_poll_secs: 15,
            draft_autosave_secs: 30,
            default_cliente_id: WALK_IN_CUSTOMER_ID,
        }
    }
}

impl TerminalConfig {
    pub fn load(db: &db::DbState) -> Result<Self, String> {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        let get = |key: &str| db::get_setting(&conn, TERMINAL_CATEGORY, key);
        let defaults = Self::default();

        let mode = TaxMode::from_value(get("tax_mode").as_deref());
        let rate = parse_or(get("tax_rate"), DEFAULT_TAX_RATE, "tax_rate");
        let rate = if (0.0..1.0).contains(&rate) {
            rate
        } else {
            warn!(rate, "tax_rate out of range, using default");
            DEFAULT_TAX_RATE
        };

        Ok(Self {
            tax: TaxPolicy { mode, rate },
            table_poll_secs: parse_or(get("table_poll_secs"), defaults.table_poll_secs, "table_poll_secs")
                .max(1),
            draft_autosave_secs: parse_or(
                get("draft_autosave_secs"),
                defaults.draft_autosave_secs,
                "draft_autosave_secs",
            )
            .max(1),
            default_cliente_id: parse_or(
                get("default_cliente_id"),
                defaults.default_cliente_id,
                "default_cliente_id",
            ),
        })
    }

    pub fn save(&self, db: &db::DbState) -> Result<(), String> {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        db::set_setting(&conn, TERMINAL_CATEGORY, "tax_mode", self.tax.mode.as_str())?;
        db::set_setting(&conn, TERMINAL_CATEGORY, "tax_rate", &self.tax.rate.to_string())?;
        db::set_setting(
            &conn,
            TERMINAL_CATEGORY,
            "table_poll_secs",
            &self.table_poll_secs.to_string(),
        )?;
        db::set_setting(
            &conn,
            TERMINAL_CATEGORY,
            "draft_autosave_secs",
            &self.draft_autosave_secs.to_string(),
        )?;
        db::set_setting(
            &conn,
            TERMINAL_CATEGORY,
            "default_cliente_id",
            &self.default_cliente_id.to_string(),
        )
    }
}

fn parse_or<T: std::str::FromStr + Copy>(raw: Option<String>, default: T, key: &str) -> T {
    match raw {
        Some(s) => match s.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %s, "ignoring malformed terminal setting");
                default
            }
        },
        None => default,
    }
}

/// Backend base URL, normalised. The environment override wins over the
/// keyring so a terminal can be pointed at staging without re-pairing.
pub fn backend_url() -> Option<String> {
    std::env::var(BACKEND_URL_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| crate::storage::get_credential(crate::storage::KEY_BACKEND_URL))
        .map(|s| crate::api::normalize_base_url(&s))
        .filter(|s| !s.is_empty())
}
