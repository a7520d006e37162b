//! Terminal settings, backend session and local reset.

use serde_json::{json, Value};
use tracing::info;

use crate::cart::{Cart, TaxMode};
use crate::config::{TerminalConfig, TERMINAL_CATEGORY};
use crate::data_helpers::LOCAL_CATEGORY;
use crate::order_form::OrderForm;
use crate::{db, diagnostics, lock, storage, value_f64, value_i64, value_str, AppState};

const MIN_INTERVAL_SECS: u64 = 1;
const MAX_INTERVAL_SECS: u64 = 3600;

/// Apply the fields present in `payload` to `config`. Rates above 1 are
/// read as percentages.
fn apply_terminal_payload(config: &mut TerminalConfig, payload: &Value) -> Result<(), String> {
    if let Some(mode) = value_str(payload, &["taxMode", "tax_mode"]) {
        config.tax.mode = match mode.to_ascii_lowercase().as_str() {
            "included" | "incluido" => TaxMode::Included,
            "additive" | "aditivo" => TaxMode::Additive,
            other => return Err(format!("Modo de impuesto no válido: {other}")),
        };
    }
    if let Some(rate) = value_f64(payload, &["taxRate", "tax_rate"]) {
        let rate = if rate >= 1.0 { rate / 100.0 } else { rate };
        if !(0.0..1.0).contains(&rate) {
            return Err("La tasa de impuesto debe estar entre 0 y 100".into());
        }
        config.tax.rate = rate;
    }
    for (keys, slot) in [
        (&["tablePollSecs", "table_poll_secs"], &mut config.table_poll_secs),
        (&["draftAutosaveSecs", "draft_autosave_secs"], &mut config.draft_autosave_secs),
    ] {
        if let Some(secs) = value_i64(payload, keys) {
            let secs = u64::try_from(secs).unwrap_or(0);
            if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&secs) {
                return Err(format!(
                    "El intervalo debe estar entre {MIN_INTERVAL_SECS} y {MAX_INTERVAL_SECS} segundos"
                ));
            }
            *slot = secs;
        }
    }
    if let Some(id) = value_i64(payload, &["defaultClienteId", "default_cliente_id"]) {
        if id <= 0 {
            return Err("Cliente por defecto inválido".into());
        }
        config.default_cliente_id = id;
    }
    Ok(())
}

pub fn settings_get(state: &AppState) -> Result<Value, String> {
    Ok(json!({
        "terminal": state.terminal_config(),
        "session": storage::get_session_summary(),
    }))
}

/// Update terminal settings. Interval changes apply from the next start.
pub fn settings_update_terminal(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.unwrap_or_else(|| json!({}));
    let mut config = state.terminal_config();
    apply_terminal_payload(&mut config, &payload)?;
    config.save(&state.db)?;
    *lock(&state.config, "config")? = config.clone();
    info!(
        tax_mode = config.tax.mode.as_str(),
        tax_rate = config.tax.rate,
        "terminal settings updated"
    );
    // Totals depend on the tax policy.
    super::cart::publish_cart(state, &[])?;
    Ok(json!({ "success": true, "terminal": config }))
}

/// Store the backend URL and session cookies handed over by the shell.
pub fn settings_update_session(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.unwrap_or_else(|| json!({}));
    let out = storage::update_session(&payload)?;
    state.set_backend(None);
    Ok(out)
}

pub fn settings_clear_session(state: &AppState) -> Result<Value, String> {
    storage::clear_session()?;
    state.set_backend(None);
    Ok(json!({ "success": true }))
}

/// Forget local state: cart, active table, drafts and terminal settings.
pub fn clear_local_state(state: &AppState) -> Result<(), String> {
    {
        let conn = lock(&state.db.conn, "db")?;
        db::delete_all_settings(&conn, LOCAL_CATEGORY)?;
        db::delete_all_settings(&conn, TERMINAL_CATEGORY)?;
    }
    *lock(&state.cart, "cart")? = Cart::default();
    *lock(&state.active_table, "active table")? = None;
    *lock(&state.product_modal, "product modal")? = None;
    *lock(&state.reception, "reception")? = None;
    *lock(&state.order_form, "order form")? = OrderForm::default();
    *lock(&state.config, "config")? = TerminalConfig::default();
    Ok(())
}

/// Delete stored credentials and all local state.
pub fn settings_factory_reset(state: &AppState) -> Result<Value, String> {
    storage::factory_reset()?;
    clear_local_state(state)?;
    state.set_backend(None);
    info!("factory reset complete");
    Ok(json!({ "success": true }))
}

pub fn settings_get_about() -> Result<Value, String> {
    Ok(diagnostics::get_about_info())
}

pub fn settings_get_health(state: &AppState) -> Result<Value, String> {
    diagnostics::get_local_health(state)
}
