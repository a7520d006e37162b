//! La Playita POS client.
//!
//! Controllers in [`commands`] are the entry points a shell calls. They
//! work on one shared [`AppState`], talk to the backend through
//! [`api::BackendClient`], persist local state in SQLite and report every
//! view change through an [`events::EventSink`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod allocation;
pub mod api;
pub mod cart;
pub mod commands;
pub mod config;
pub mod data_helpers;
pub mod db;
pub mod diagnostics;
pub mod events;
pub mod monitors;
pub mod order_form;
pub mod reception;
pub mod schema;
pub mod storage;
pub mod tables;
pub mod views;

/// App start time for uptime calculation (epoch seconds).
pub(crate) static APP_START_EPOCH: AtomicU64 = AtomicU64::new(0);

pub(crate) const EXTERNAL_URL_MAX_LEN: usize = 2048;

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

/// Numbers may arrive as JSON numbers or as numeric strings.
pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match v.get(*key) {
            Some(serde_json::Value::Number(n)) => return n.as_f64(),
            Some(serde_json::Value::String(s)) => {
                if let Ok(n) = s.trim().parse::<f64>() {
                    return Some(n);
                }
            }
            _ => {}
        }
    }
    None
}

pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        match v.get(*key) {
            Some(serde_json::Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    return Some(i);
                }
            }
            Some(serde_json::Value::String(s)) => {
                if let Ok(i) = s.trim().parse::<i64>() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

pub(crate) fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, String> {
    m.lock().map_err(|e| format!("{what} lock poisoned: {e}"))
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// Everything the controllers share. One instance per process.
pub struct AppState {
    pub db: db::DbState,
    pub events: Arc<dyn events::EventSink>,
    pub config: Mutex<config::TerminalConfig>,
    pub cart: Mutex<cart::Cart>,
    pub ledger: Mutex<cart::StockLedger>,
    pub active_table: Mutex<Option<i64>>,
    pub product_modal: Mutex<Option<views::ProductModal>>,
    pub reception: Mutex<Option<reception::ReceptionSession>>,
    pub order_form: Mutex<order_form::OrderForm>,
    pub search_generation: api::RequestGeneration,
    pub tables_generation: api::RequestGeneration,
    pub supplier_generation: api::RequestGeneration,
    pub search_debounce: monitors::Debouncer,
    pub reception_filter_debounce: monitors::Debouncer,
    pub supplier_debounce: monitors::Debouncer,
    backend: Mutex<Option<api::BackendClient>>,
}

impl AppState {
    /// Build state from the local store: terminal config, the saved cart
    /// and the remembered active table.
    pub fn new(db: db::DbState, events: Arc<dyn events::EventSink>) -> Result<Self, String> {
        let config = config::TerminalConfig::load(&db)?;
        let cart = cart::load_cart(&db).unwrap_or_else(|e| {
            warn!(error = %e, "could not restore cart, starting empty");
            cart::Cart::default()
        });
        let active_table = tables::load_active_table(&db)?;
        info!(
            lines = cart.len(),
            active_table = ?active_table,
            "local state restored"
        );
        Ok(Self {
            db,
            events,
            config: Mutex::new(config),
            cart: Mutex::new(cart),
            ledger: Mutex::new(cart::StockLedger::default()),
            active_table: Mutex::new(active_table),
            product_modal: Mutex::new(None),
            reception: Mutex::new(None),
            order_form: Mutex::new(order_form::OrderForm::default()),
            search_generation: api::RequestGeneration::default(),
            tables_generation: api::RequestGeneration::default(),
            supplier_generation: api::RequestGeneration::default(),
            search_debounce: monitors::Debouncer::new(monitors::SEARCH_DEBOUNCE),
            reception_filter_debounce: monitors::Debouncer::new(monitors::RECEPTION_FILTER_DEBOUNCE),
            supplier_debounce: monitors::Debouncer::new(monitors::SUPPLIER_SEARCH_DEBOUNCE),
            backend: Mutex::new(None),
        })
    }

    /// Use a specific backend client instead of the stored configuration.
    pub fn set_backend(&self, client: Option<api::BackendClient>) {
        if let Ok(mut slot) = self.backend.lock() {
            *slot = client;
        }
    }

    /// Backend client, built from the keyring on first use.
    pub fn client(&self) -> Result<api::BackendClient, String> {
        let mut slot = lock(&self.backend, "backend")?;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = api::BackendClient::from_stored().map_err(|e| e.to_string())?;
        *slot = Some(client.clone());
        Ok(client)
    }

    pub fn terminal_config(&self) -> config::TerminalConfig {
        self.config
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run() -> anyhow::Result<()> {
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    APP_START_EPOCH.store(epoch, Ordering::Relaxed);

    // Initialize structured logging (console + rolling file)
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,playita_pos_lib=debug"));

    diagnostics::prune_old_logs();

    let log_dir = diagnostics::get_log_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "pos");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Flushes on drop; the process owns the writer until exit.
    std::mem::forget(_guard);

    info!("Starting La Playita POS v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = diagnostics::get_data_dir();
    let db_state = db::init(&data_dir).map_err(anyhow::Error::msg)?;
    let state = Arc::new(AppState::new(db_state, Arc::new(events::LogSink)).map_err(anyhow::Error::msg)?);

    if let Err(e) = commands::tables::tables_restore_active(&state).await {
        warn!(error = %e, "active table not restored");
    }

    let monitors = monitors::MonitorState::default();
    let config = state.terminal_config();
    monitors::start_table_monitor(state.clone(), &monitors, config.table_poll_secs);
    monitors::start_reception_autosave(state.clone(), &monitors, config.draft_autosave_secs);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    monitors.stop();
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::events::RecordingSink;
    use crate::{db, AppState};

    /// In-memory state wired to a recording sink.
    pub fn state() -> (Arc<AppState>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let db = db::open_in_memory().expect("db");
        let state = AppState::new(db, sink.clone()).expect("state");
        (Arc::new(state), sink)
    }

    /// Same, with the backend pointed at a mock server.
    pub fn state_with_backend(uri: &str) -> (Arc<AppState>, Arc<RecordingSink>) {
        let (state, sink) = state();
        let cookies = crate::storage::SessionCookies {
            session_id: Some("sess".into()),
            csrf_token: Some("tok".into()),
        };
        state.set_backend(Some(
            crate::api::BackendClient::new(uri, cookies).expect("client"),
        ));
        (state, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_helpers_accept_strings() {
        let v = json!({"a": " x ", "n": "12", "f": "2.5", "m": 3});
        assert_eq!(value_str(&v, &["missing", "a"]).as_deref(), Some("x"));
        assert_eq!(value_i64(&v, &["n"]), Some(12));
        assert_eq!(value_i64(&v, &["m"]), Some(3));
        assert_eq!(value_f64(&v, &["f"]), Some(2.5));
        assert_eq!(value_f64(&v, &["a"]), None);
    }

    #[test]
    fn test_state_restores_saved_cart_and_table() {
        let db = db::open_in_memory().expect("db");
        let mut saved = cart::Cart::default();
        saved
            .add(cart::CartLine {
                producto_id: 1,
                nombre: "Pan".into(),
                precio: 500.0,
                cantidad: 2,
                lote_id: 3,
                max_stock: 4,
            })
            .expect("add");
        cart::save_cart(&db, &saved).expect("save");
        tables::save_active_table(&db, 7).expect("table");

        let state = AppState::new(db, Arc::new(events::RecordingSink::default())).expect("state");
        assert_eq!(state.cart.lock().expect("cart").item_count(), 2);
        assert_eq!(*state.active_table.lock().expect("table"), Some(7));
    }

    #[test]
    fn test_client_prefers_injected_backend() {
        let (state, _) = test_support::state_with_backend("http://127.0.0.1:9");
        let client = state.client().expect("client");
        assert_eq!(client.base_url(), "http://127.0.0.1:9");
    }
}
