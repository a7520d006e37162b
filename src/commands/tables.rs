//! Dine-in table controllers: the widget refresh, the active table, table
//! CRUD and moving items between the cart and a table's bill.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::cart::{publish_cart, PAYMENT_METHODS};
use super::parse_payload;
use crate::cart::save_cart;
use crate::events;
use crate::schema::{
    de_i64, AbrirMesaRequest, AgregarItemsRequest, CerrarMesaRequest, EditarItemRequest,
    MesaAccionResponse, MesaForm, MesaItemsResponse, MesasResponse,
};
use crate::tables::{
    bill_to_cart, cart_to_table_items, clear_active_table, save_active_table,
    validate_active_table, validate_annotation, validate_table_name, widget_stats,
};
use crate::views::{self, notify, NotificationLevel};
use crate::{lock, AppState};

pub const TABLES_PATH: &str = "/pos/api/mesas/";
pub const CREATE_TABLE_PATH: &str = "/pos/api/mesa/crear/";

fn table_path(mesa_id: i64, action: &str) -> String {
    format!("/pos/api/mesa/{mesa_id}/{action}/")
}

fn item_path(mesa_id: i64, item_id: i64, action: &str) -> String {
    format!("/pos/api/mesa/{mesa_id}/item/{item_id}/{action}/")
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TablePayload {
    #[serde(alias = "mesa_id", alias = "id", deserialize_with = "de_i64")]
    mesa_id: i64,
    #[serde(default, alias = "cliente_id")]
    cliente_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableFormPayload {
    #[serde(default, alias = "mesa_id", alias = "id")]
    mesa_id: Option<i64>,
    #[serde(default)]
    nombre: String,
    #[serde(default)]
    descripcion: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemPayload {
    #[serde(alias = "mesa_id", deserialize_with = "de_i64")]
    mesa_id: i64,
    #[serde(alias = "item_id", deserialize_with = "de_i64")]
    item_id: i64,
    #[serde(default)]
    anotacion: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SendCartPayload {
    #[serde(default)]
    anotacion: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClosePayload {
    #[serde(alias = "mesa_id", alias = "id", deserialize_with = "de_i64")]
    mesa_id: i64,
    #[serde(default, alias = "metodo_pago")]
    metodo_pago: String,
    #[serde(default, alias = "monto_recibido")]
    monto_recibido: Option<f64>,
    #[serde(default, alias = "cliente_id")]
    cliente_id: Option<i64>,
}

/// Table mutations answer 200 with `success: false` for business errors.
fn accepted(resp: MesaAccionResponse) -> Result<MesaAccionResponse, String> {
    if resp.success {
        Ok(resp)
    } else {
        Err(resp
            .error
            .unwrap_or_else(|| "La operación sobre la mesa falló".into()))
    }
}

fn set_active(state: &AppState, mesa_id: Option<i64>) -> Result<(), String> {
    let mut active = lock(&state.active_table, "active table")?;
    if *active == mesa_id {
        return Ok(());
    }
    match mesa_id {
        Some(id) => save_active_table(&state.db, id)?,
        None => clear_active_table(&state.db)?,
    }
    *active = mesa_id;
    drop(active);
    state
        .events
        .emit(events::ACTIVE_TABLE_CHANGED, json!({ "mesaId": mesa_id }));
    Ok(())
}

fn active_table(state: &AppState) -> Result<Option<i64>, String> {
    Ok(*lock(&state.active_table, "active table")?)
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Refresh the table widget. A reply that arrives after a newer refresh
/// was started is dropped.
pub async fn tables_refresh(state: &AppState) -> Result<Value, String> {
    let ticket = state.tables_generation.next();
    let client = state.client()?;
    let resp: MesasResponse = client.get(TABLES_PATH).await.map_err(|e| e.to_string())?;
    if let Some(error) = resp.error {
        return Err(error);
    }
    if !state.tables_generation.is_current(ticket) {
        debug!(ticket, "discarding stale table list");
        return Ok(json!({ "stale": true }));
    }

    let stats = widget_stats(&resp.mesas, Utc::now());
    if stats.alertas > 0 {
        debug!(alertas = stats.alertas, "tables open past the alert threshold");
    }
    let view = json!({
        "mesas": resp.mesas,
        "stats": stats,
        "activeTable": active_table(state)?,
        "html": views::render_table_widget_html(&stats),
    });
    state.events.emit(events::TABLES_UPDATED, view.clone());
    Ok(view)
}

/// Check the remembered table against the backend; forget it when it is
/// gone or its bill was closed elsewhere.
pub async fn tables_restore_active(state: &AppState) -> Result<Value, String> {
    let stored = active_table(state)?;
    if stored.is_none() {
        return Ok(json!({ "mesaId": null }));
    }
    let client = state.client()?;
    let resp: MesasResponse = client.get(TABLES_PATH).await.map_err(|e| e.to_string())?;
    let valid = validate_active_table(stored, &resp.mesas);
    if valid.is_none() {
        info!(mesa_id = ?stored, "stored active table no longer has an open bill");
        set_active(state, None)?;
    }
    Ok(json!({ "mesaId": valid }))
}

pub fn tables_select_active(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TablePayload = parse_payload(arg0, "table")?;
    set_active(state, Some(payload.mesa_id))?;
    Ok(json!({ "mesaId": payload.mesa_id }))
}

pub fn tables_clear_active(state: &AppState) -> Result<Value, String> {
    set_active(state, None)?;
    Ok(json!({ "mesaId": null }))
}

// ---------------------------------------------------------------------------
// Table CRUD
// ---------------------------------------------------------------------------

pub async fn tables_save(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TableFormPayload = parse_payload(arg0, "table form")?;
    let form = MesaForm {
        nombre: validate_table_name(&payload.nombre)?,
        descripcion: payload.descripcion.trim().to_string(),
    };
    let path = match payload.mesa_id {
        Some(id) => table_path(id, "editar"),
        None => CREATE_TABLE_PATH.to_string(),
    };
    let client = state.client()?;
    let resp = accepted(client.post_json(&path, &form).await.map_err(|e| e.to_string())?)?;
    let mensaje = resp
        .mensaje
        .clone()
        .unwrap_or_else(|| format!("Mesa \"{}\" guardada", form.nombre));
    notify(&*state.events, NotificationLevel::Success, mensaje.clone());
    Ok(json!({ "success": true, "mesaId": resp.mesa_id.or(payload.mesa_id), "mensaje": mensaje }))
}

pub async fn tables_delete(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TablePayload = parse_payload(arg0, "table")?;
    let client = state.client()?;
    accepted(
        client
            .post_empty(&table_path(payload.mesa_id, "eliminar"))
            .await
            .map_err(|e| e.to_string())?,
    )?;
    if active_table(state)? == Some(payload.mesa_id) {
        set_active(state, None)?;
    }
    Ok(json!({ "success": true }))
}

pub async fn tables_open(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TablePayload = parse_payload(arg0, "table")?;
    let body = AbrirMesaRequest {
        cliente_id: payload
            .cliente_id
            .unwrap_or(state.terminal_config().default_cliente_id),
    };
    let client = state.client()?;
    let resp = accepted(
        client
            .post_json(&table_path(payload.mesa_id, "abrir"), &body)
            .await
            .map_err(|e| e.to_string())?,
    )?;
    set_active(state, Some(payload.mesa_id))?;
    info!(mesa_id = payload.mesa_id, "table opened");
    Ok(json!({ "success": true, "mesaId": payload.mesa_id, "mesaNumero": resp.mesa_numero }))
}

// ---------------------------------------------------------------------------
// Bill items
// ---------------------------------------------------------------------------

/// Send every cart line to the active table's bill, then take the sent
/// units out of the cart. Lines added while the request is out stay.
pub async fn tables_send_cart(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SendCartPayload = parse_payload(arg0, "send cart")?;
    let anotacion = validate_annotation(&payload.anotacion)?;
    let mesa_id = active_table(state)?.ok_or("No hay una mesa activa")?;
    let items = {
        let cart = lock(&state.cart, "cart")?;
        cart_to_table_items(&cart, &anotacion)
    };
    let sent: Vec<(i64, i64, i64)> = items
        .iter()
        .map(|item| (item.producto_id, item.lote_id, item.cantidad))
        .collect();
    if items.is_empty() {
        return Err("El carrito está vacío".into());
    }

    let client = state.client()?;
    let count = items.len();
    let resp = accepted(
        client
            .post_json(&table_path(mesa_id, "agregar-item"), &AgregarItemsRequest { items })
            .await
            .map_err(|e| e.to_string())?,
    )?;

    let touched = {
        let mut cart = lock(&state.cart, "cart")?;
        let touched = cart.subtract_sent(&sent);
        save_cart(&state.db, &cart)?;
        touched
    };
    publish_cart(state, &touched)?;
    let total = resp.total_cuenta.unwrap_or_default();
    notify(
        &*state.events,
        NotificationLevel::Success,
        format!(
            "{count} producto(s) agregado(s) a la mesa. Total: {}",
            views::money(total)
        ),
    );
    Ok(json!({ "success": true, "mesaId": mesa_id, "totalCuenta": total }))
}

pub async fn tables_get_items(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TablePayload = parse_payload(arg0, "table")?;
    let client = state.client()?;
    let resp: MesaItemsResponse = client
        .get(&table_path(payload.mesa_id, "items"))
        .await
        .map_err(|e| e.to_string())?;
    if let Some(error) = resp.error {
        return Err(error);
    }
    Ok(json!({ "success": true, "items": resp.items, "total": resp.total }))
}

/// Replace the cart with a table's bill so it can be charged at the POS.
pub async fn tables_load_bill(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TablePayload = parse_payload(arg0, "table")?;
    let client = state.client()?;
    let resp: MesaItemsResponse = client
        .get(&table_path(payload.mesa_id, "items"))
        .await
        .map_err(|e| e.to_string())?;
    if let Some(error) = resp.error {
        return Err(error);
    }

    let bill = bill_to_cart(&resp.items);
    let ids = {
        let mut cart = lock(&state.cart, "cart")?;
        let mut ids = cart.product_ids();
        ids.extend(bill.product_ids());
        *cart = bill;
        save_cart(&state.db, &cart)?;
        ids
    };
    publish_swapped_cart(state, ids)
}

fn publish_swapped_cart(state: &AppState, mut ids: Vec<i64>) -> Result<Value, String> {
    ids.sort_unstable();
    ids.dedup();
    let view = publish_cart(state, &ids)?;
    Ok(json!({ "success": true, "cart": view }))
}

pub async fn tables_edit_item(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: ItemPayload = parse_payload(arg0, "table item")?;
    let body = EditarItemRequest {
        anotacion: validate_annotation(&payload.anotacion)?,
    };
    let client = state.client()?;
    accepted(
        client
            .post_json(&item_path(payload.mesa_id, payload.item_id, "editar"), &body)
            .await
            .map_err(|e| e.to_string())?,
    )?;
    Ok(json!({ "success": true }))
}

pub async fn tables_delete_item(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: ItemPayload = parse_payload(arg0, "table item")?;
    let client = state.client()?;
    let resp = accepted(
        client
            .post_empty(&item_path(payload.mesa_id, payload.item_id, "eliminar"))
            .await
            .map_err(|e| e.to_string())?,
    )?;
    Ok(json!({ "success": true, "totalCuenta": resp.total_cuenta }))
}

/// Charge and close a table's bill.
pub async fn tables_close(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: ClosePayload = parse_payload(arg0, "close table")?;
    let metodo_pago = payload.metodo_pago.trim().to_string();
    if metodo_pago.is_empty() {
        return Err("Por favor seleccione un Método de Pago".into());
    }
    if !PAYMENT_METHODS.contains(&metodo_pago.as_str()) {
        return Err(format!("Método de pago no válido: {metodo_pago}"));
    }
    let body = CerrarMesaRequest {
        metodo_pago,
        monto_recibido: payload.monto_recibido,
        cliente_id: payload
            .cliente_id
            .unwrap_or(state.terminal_config().default_cliente_id),
    };
    let client = state.client()?;
    let resp = match client
        .post_json::<_, MesaAccionResponse>(&table_path(payload.mesa_id, "cerrar"), &body)
        .await
    {
        Ok(resp) => accepted(resp),
        Err(e) => Err(e.to_string()),
    };
    let resp = match resp {
        Ok(resp) => resp,
        Err(message) => {
            warn!(mesa_id = payload.mesa_id, error = %message, "closing table failed");
            notify(&*state.events, NotificationLevel::Danger, message.clone());
            return Err(message);
        }
    };

    if active_table(state)? == Some(payload.mesa_id) {
        set_active(state, None)?;
    }
    let mensaje = resp
        .mensaje
        .unwrap_or_else(|| "Mesa cerrada exitosamente".into());
    notify(&*state.events, NotificationLevel::Success, mensaje.clone());
    info!(mesa_id = payload.mesa_id, venta_id = ?resp.venta_id, "table closed");
    Ok(json!({ "success": true, "ventaId": resp.venta_id, "mensaje": mensaje }))
}
