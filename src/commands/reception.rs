//! Reception controllers: load an order for receiving, edit lines with a
//! draft kept after every change, and confirm.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::parse_payload;
use crate::api::ApiError;
use crate::events;
use crate::reception::{load_draft, remove_draft, save_draft, ReceptionSession};
use crate::schema::{de_i64, ReabastecimientoDetalle, RecibirResponse};
use crate::views::{self, notify, NotificationLevel};
use crate::{lock, AppState};

pub fn details_path(order_id: i64) -> String {
    format!("/suppliers/reabastecimientos/{order_id}/details_api/")
}

pub fn receive_path(order_id: i64) -> String {
    format!("/suppliers/reabastecimientos/{order_id}/recibir/")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload {
    #[serde(alias = "order_id", alias = "reabastecimientoId", alias = "id", deserialize_with = "de_i64")]
    order_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineEditPayload {
    #[serde(alias = "detalle_id", alias = "id", deserialize_with = "de_i64")]
    detalle_id: i64,
    #[serde(default, alias = "cantidad_recibida", alias = "cantidad")]
    cantidad_recibida: Option<i64>,
    #[serde(default, alias = "fecha_caducidad", alias = "fecha")]
    fecha_caducidad: Option<String>,
    #[serde(default, alias = "numero_lote", alias = "lote")]
    numero_lote: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ExpiryPayload {
    #[serde(default, alias = "fecha_caducidad")]
    fecha: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FilterPayload {
    #[serde(default, alias = "query")]
    q: String,
}

fn publish(state: &AppState, session: &ReceptionSession) -> Value {
    let view = json!(views::reception_view(session));
    state.events.emit(events::RECEPTION_UPDATED, view.clone());
    view
}

/// Apply an edit to the open session, snapshot the draft and re-render.
fn edit<T>(
    state: &AppState,
    f: impl FnOnce(&mut ReceptionSession) -> Result<T, String>,
) -> Result<Value, String> {
    let mut slot = lock(&state.reception, "reception")?;
    let session = slot.as_mut().ok_or("No hay una recepción abierta")?;
    f(session)?;
    if let Err(e) = save_draft(&state.db, session) {
        warn!(order_id = session.order_id, error = %e, "draft not saved");
    }
    Ok(publish(state, session))
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

pub async fn reception_load(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: OrderPayload = parse_payload(arg0, "reception")?;
    let client = state.client()?;
    let details: ReabastecimientoDetalle = client
        .get(&details_path(payload.order_id))
        .await
        .map_err(|e| e.to_string())?;

    let mut session = ReceptionSession::from_details(&details);
    match load_draft(&state.db, details.id) {
        Ok(Some(draft)) => {
            let restored = session.apply_draft(&draft);
            info!(order_id = details.id, restored, "reception draft restored");
            notify(&*state.events, NotificationLevel::Info, "Borrador cargado");
        }
        Ok(None) => {}
        Err(e) => warn!(order_id = details.id, error = %e, "could not read reception draft"),
    }

    let view = publish(state, &session);
    *lock(&state.reception, "reception")? = Some(session);
    Ok(view)
}

pub fn reception_close(state: &AppState) -> Result<Value, String> {
    *lock(&state.reception, "reception")? = None;
    Ok(json!({ "success": true }))
}

pub fn reception_view(state: &AppState) -> Result<Value, String> {
    let slot = lock(&state.reception, "reception")?;
    let session = slot.as_ref().ok_or("No hay una recepción abierta")?;
    Ok(publish(state, session))
}

// ---------------------------------------------------------------------------
// Editing
// ---------------------------------------------------------------------------

pub fn reception_update_line(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: LineEditPayload = parse_payload(arg0, "reception line")?;
    edit(state, |session| {
        if let Some(cantidad) = payload.cantidad_recibida {
            session.set_received(payload.detalle_id, cantidad)?;
        }
        if let Some(fecha) = payload.fecha_caducidad.as_deref() {
            session.set_expiry(payload.detalle_id, fecha)?;
        }
        if let Some(lote) = payload.numero_lote.as_deref() {
            session.set_lot(payload.detalle_id, lote)?;
        }
        Ok(())
    })
}

pub fn reception_mark_all_received(state: &AppState) -> Result<Value, String> {
    edit(state, |session| {
        session.mark_all_received();
        Ok(())
    })
}

pub fn reception_apply_general_expiry(
    state: &AppState,
    arg0: Option<Value>,
) -> Result<Value, String> {
    let payload: ExpiryPayload = parse_payload(arg0, "general expiry")?;
    edit(state, |session| session.apply_general_expiry(&payload.fecha))
}

pub fn reception_filter(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: FilterPayload = parse_payload(arg0, "reception filter")?;
    let mut slot = lock(&state.reception, "reception")?;
    let session = slot.as_mut().ok_or("No hay una recepción abierta")?;
    session.set_filter(&payload.q);
    Ok(publish(state, session))
}

pub fn reception_filter_debounced(state: &Arc<AppState>, arg0: Option<Value>) -> Value {
    let task_state = state.clone();
    state.reception_filter_debounce.call(move || async move {
        if let Err(e) = reception_filter(&task_state, arg0) {
            debug!(error = %e, "reception filter skipped");
        }
    });
    json!({ "scheduled": true })
}

// ---------------------------------------------------------------------------
// Drafts
// ---------------------------------------------------------------------------

pub fn reception_save_draft(state: &AppState) -> Result<Value, String> {
    let slot = lock(&state.reception, "reception")?;
    let session = slot.as_ref().ok_or("No hay una recepción abierta")?;
    save_draft(&state.db, session)?;
    drop(slot);
    notify(&*state.events, NotificationLevel::Success, "Borrador guardado");
    Ok(json!({ "success": true }))
}

/// Silent periodic snapshot. Returns whether a session was open.
pub fn reception_autosave(state: &AppState) -> Result<bool, String> {
    let slot = lock(&state.reception, "reception")?;
    match slot.as_ref() {
        Some(session) => {
            save_draft(&state.db, session)?;
            debug!(order_id = session.order_id, "reception draft autosaved");
            Ok(true)
        }
        None => Ok(false),
    }
}

// ---------------------------------------------------------------------------
// Confirmation
// ---------------------------------------------------------------------------

pub async fn reception_confirm(state: &AppState) -> Result<Value, String> {
    let (order_id, body) = {
        let slot = lock(&state.reception, "reception")?;
        let session = slot.as_ref().ok_or("No hay una recepción abierta")?;
        match session.submission() {
            Ok(body) => (session.order_id, body),
            Err(message) => {
                drop(slot);
                notify(&*state.events, NotificationLevel::Warning, message.clone());
                return Ok(json!({ "success": false, "message": message }));
            }
        }
    };

    let client = state.client()?;
    let resp: RecibirResponse = match client.post_json(&receive_path(order_id), &body).await {
        Ok(resp) => resp,
        Err(e) => {
            let message = match &e {
                ApiError::Status { message, .. } => message.clone(),
                _ => "Error al confirmar recepción".to_string(),
            };
            warn!(order_id, error = %e, "reception confirm failed");
            notify(&*state.events, NotificationLevel::Danger, message.clone());
            return Err(message);
        }
    };
    if let Some(error) = resp.error {
        notify(&*state.events, NotificationLevel::Danger, error.clone());
        return Err(error);
    }

    if let Err(e) = remove_draft(&state.db, order_id) {
        warn!(order_id, error = %e, "draft not removed after confirmation");
    }
    {
        let mut slot = lock(&state.reception, "reception")?;
        // another order may have been opened while the request was out
        if slot.as_ref().map(|s| s.order_id) == Some(order_id) {
            *slot = None;
        } else {
            debug!(order_id, "reception session changed during confirm; kept");
        }
    }
    info!(order_id, lines = body.detalles.len(), estado = ?resp.estado, "reception confirmed");
    notify(&*state.events, NotificationLevel::Success, "Recepción confirmada ✓");
    Ok(json!({
        "success": true,
        "message": resp.message,
        "estado": resp.estado,
    }))
}
