//! Restock order controllers: the line editor, submission, export links and
//! the order list actions (supplier lookup, edit, delete, audit history and
//! spreadsheet import).

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::reception::details_path;
use super::{parse_payload, today};
use crate::api::ApiError;
use crate::data_helpers::validate_external_url;
use crate::events;
use crate::order_form::{OrderForm, OrderState, PaymentForm};
use crate::reception::remove_draft;
use crate::schema::{
    de_i64, AuditoriaResponse, Catalogo, CrearReabastecimientoResponse, EliminarResponse,
    ImportacionExcel, ProveedoresBusqueda, ReabastecimientoDetalle,
};
use crate::views::{self, notify, NotificationLevel};
use crate::{lock, AppState};

pub const SUPPLIER_SEARCH_PATH: &str = "/suppliers/api/search_proveedores/";
pub const IMPORT_PATH: &str = "/suppliers/reabastecimientos/import/excel/";
const IMPORT_FIELD: &str = "file";
const MIN_SUPPLIER_CHARS: usize = 2;

pub fn export_path(order_id: i64) -> String {
    format!("/suppliers/reabastecimientos/{order_id}/download/excel/")
}

pub fn delete_path(order_id: i64) -> String {
    format!("/suppliers/reabastecimientos/{order_id}/eliminar/")
}

pub fn audit_path(order_id: i64) -> String {
    format!("/suppliers/reabastecimientos/{order_id}/audit_history/")
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct HeaderPayload {
    #[serde(default, alias = "proveedor_id", alias = "proveedor")]
    proveedor_id: Option<Value>,
    #[serde(default, alias = "forma_pago")]
    forma_pago: Option<String>,
    #[serde(default)]
    estado: Option<String>,
    #[serde(default)]
    observaciones: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RowPayload {
    #[serde(alias = "row_id")]
    row_id: Uuid,
    #[serde(default, alias = "producto_id", alias = "producto")]
    producto_id: Option<Value>,
    #[serde(default)]
    cantidad: Option<Value>,
    #[serde(default, alias = "costo_unitario", alias = "costo")]
    costo_unitario: Option<Value>,
    #[serde(default, alias = "fecha_caducidad", alias = "fecha")]
    fecha_caducidad: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SubmitPayload {
    #[serde(default, alias = "as_draft", alias = "borrador")]
    as_draft: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload {
    #[serde(alias = "order_id", alias = "id", deserialize_with = "de_i64")]
    order_id: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SupplierSearchPayload {
    #[serde(default, alias = "query")]
    q: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportPayload {
    path: String,
}

/// Text of a form input that may arrive as a string or a number.
fn input_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// A select value: blank or null means "nothing selected".
fn selected_id(v: &Value) -> Result<Option<i64>, String> {
    let text = input_text(v);
    if text.is_empty() {
        return Ok(None);
    }
    text.parse()
        .map(Some)
        .map_err(|_| format!("Identificador inválido: {text}"))
}

fn form_view(form: &OrderForm, today: NaiveDate) -> Value {
    let (line_totals, totals) = views::order_totals_view(form);
    let lines: Vec<Value> = form
        .lines
        .iter()
        .zip(line_totals)
        .map(|(line, totals)| {
            let checks = line.producto_id.map(|_| line.checks(today));
            json!({ "line": line, "totals": totals, "checks": checks })
        })
        .collect();
    json!({
        "editing": form.editing,
        "proveedorId": form.proveedor_id,
        "formaPago": form.forma_pago,
        "estado": form.estado,
        "observaciones": form.observaciones,
        "lines": lines,
        "totals": totals,
        "valid": form.is_valid(today),
        "problem": form.first_problem(today),
    })
}

fn publish(state: &AppState, form: &OrderForm) -> Value {
    let view = form_view(form, today());
    state.events.emit(events::ORDER_FORM_UPDATED, view.clone());
    view
}

fn edit<T>(
    state: &AppState,
    f: impl FnOnce(&mut OrderForm) -> Result<T, String>,
) -> Result<(T, Value), String> {
    let mut form = lock(&state.order_form, "order form")?;
    let out = f(&mut form)?;
    Ok((out, publish(state, &form)))
}

// ---------------------------------------------------------------------------
// Editor
// ---------------------------------------------------------------------------

/// Start a new order. The page supplies the product catalog and tax rates.
pub fn restock_new_order(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let catalog: Option<Catalogo> = match arg0 {
        Some(Value::Null) | None => None,
        Some(v) => Some(serde_json::from_value(v).map_err(|e| format!("Invalid catalog payload: {e}"))?),
    };
    let (_, view) = edit(state, |form| {
        let catalog = catalog.unwrap_or_else(|| form.catalog().clone());
        *form = OrderForm::new(catalog);
        Ok(())
    })?;
    Ok(view)
}

pub fn restock_update_header(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: HeaderPayload = parse_payload(arg0, "order header")?;
    let (_, view) = edit(state, |form| {
        if let Some(proveedor) = payload.proveedor_id.as_ref() {
            form.proveedor_id = selected_id(proveedor)?;
        }
        if let Some(raw) = payload.forma_pago.as_deref() {
            form.forma_pago =
                PaymentForm::parse(raw).ok_or_else(|| format!("Forma de pago no válida: {raw}"))?;
        }
        if let Some(raw) = payload.estado.as_deref() {
            form.estado = OrderState::parse(raw).ok_or_else(|| format!("Estado no válido: {raw}"))?;
        }
        if let Some(obs) = payload.observaciones {
            form.observaciones = obs.trim().to_string();
        }
        Ok(())
    })?;
    Ok(view)
}

pub fn restock_add_line(state: &AppState) -> Result<Value, String> {
    let (row_id, view) = edit(state, OrderForm::add_line)?;
    Ok(json!({ "rowId": row_id, "form": view }))
}

pub fn restock_duplicate_line(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: RowPayload = parse_payload(arg0, "order line")?;
    let (row_id, view) = edit(state, |form| form.duplicate_line(payload.row_id))?;
    Ok(json!({ "rowId": row_id, "form": view }))
}

pub fn restock_remove_line(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: RowPayload = parse_payload(arg0, "order line")?;
    let (_, view) = edit(state, |form| form.remove_line(payload.row_id))?;
    Ok(view)
}

/// Update any subset of a line's inputs. Values are the raw input text.
pub fn restock_update_line(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: RowPayload = parse_payload(arg0, "order line")?;
    let row = payload.row_id;
    let (_, view) = edit(state, |form| {
        if let Some(producto) = payload.producto_id.as_ref() {
            form.select_product(row, selected_id(producto)?)?;
        }
        if let Some(cantidad) = payload.cantidad.as_ref() {
            form.set_quantity(row, &input_text(cantidad))?;
        }
        if let Some(costo) = payload.costo_unitario.as_ref() {
            form.set_cost(row, &input_text(costo))?;
        }
        if let Some(fecha) = payload.fecha_caducidad.as_ref() {
            form.set_expiry(row, &input_text(fecha))?;
        }
        Ok(())
    })?;
    Ok(view)
}

pub fn restock_view(state: &AppState) -> Result<Value, String> {
    let form = lock(&state.order_form, "order form")?;
    Ok(publish(state, &form))
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

pub async fn restock_submit(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SubmitPayload = parse_payload(arg0, "submit")?;
    let (fields, target, editing) = {
        let form = lock(&state.order_form, "order form")?;
        let fields = if payload.as_draft {
            form.draft_submission()
        } else {
            form.submission(today())
        };
        match fields {
            Ok(fields) => (fields, form.submit_path(), form.editing),
            Err(message) => {
                drop(form);
                notify(&*state.events, NotificationLevel::Warning, message.clone());
                return Ok(json!({ "success": false, "message": message }));
            }
        }
    };

    let client = state.client()?;
    let resp: CrearReabastecimientoResponse = match client.post_form(&target, &fields).await {
        Ok(resp) => resp,
        Err(e) => {
            let message = e.to_string();
            warn!(error = %message, path = %target, "restock order not saved");
            notify(&*state.events, NotificationLevel::Danger, message.clone());
            return Err(message);
        }
    };
    if let Some(message) = resp.error_message() {
        notify(&*state.events, NotificationLevel::Danger, message.clone());
        return Err(message);
    }

    let message = match (payload.as_draft, editing) {
        (true, _) => "Borrador guardado",
        (false, Some(_)) => "Reabastecimiento actualizado",
        (false, None) => "Reabastecimiento creado",
    };
    info!(order_id = ?resp.id.or(editing), draft = payload.as_draft, "restock order saved");
    {
        let mut form = lock(&state.order_form, "order form")?;
        let catalog = form.catalog().clone();
        *form = OrderForm::new(catalog);
        publish(state, &form);
    }
    notify(&*state.events, NotificationLevel::Success, message);
    Ok(json!({
        "success": true,
        "id": resp.id.or(editing),
        "estado": resp.estado,
        "costoTotal": resp.costo_total,
        "message": message,
    }))
}

/// Validated absolute URL of an order's spreadsheet export.
pub fn export_url(state: &AppState, order_id: i64) -> Result<Url, String> {
    let client = state.client()?;
    validate_external_url(&client.url_for(&export_path(order_id)), client.base_url())
}

pub fn restock_open_export(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: OrderPayload = parse_payload(arg0, "export")?;
    let url = export_url(state, payload.order_id)?;
    webbrowser::open(url.as_str()).map_err(|e| format!("No se pudo abrir la exportación: {e}"))?;
    Ok(json!({ "success": true, "url": url.as_str() }))
}

// ---------------------------------------------------------------------------
// Order list
// ---------------------------------------------------------------------------

/// Supplier suggestions for the list filter. Replies to a superseded query
/// are dropped.
pub async fn restock_list_search_suppliers(
    state: &AppState,
    arg0: Option<Value>,
) -> Result<Value, String> {
    let payload: SupplierSearchPayload = parse_payload(arg0, "supplier search")?;
    let query = payload.q.trim().to_string();
    let ticket = state.supplier_generation.next();

    if query.chars().count() < MIN_SUPPLIER_CHARS {
        let empty = json!({ "query": query, "results": [] });
        state.events.emit(events::SUPPLIER_SUGGESTIONS, empty.clone());
        return Ok(empty);
    }

    let client = state.client()?;
    let resp: ProveedoresBusqueda = client
        .get_query(SUPPLIER_SEARCH_PATH, &[("q", query.as_str())])
        .await
        .map_err(|_| "Error en búsqueda".to_string())?;
    if !state.supplier_generation.is_current(ticket) {
        debug!(ticket, query = %query, "discarding stale supplier suggestions");
        return Ok(json!({ "query": query, "stale": true }));
    }

    let result = json!({ "query": query, "results": resp.results });
    state.events.emit(events::SUPPLIER_SUGGESTIONS, result.clone());
    Ok(result)
}

pub fn restock_list_search_suppliers_debounced(state: &Arc<AppState>, arg0: Option<Value>) -> Value {
    let task_state = state.clone();
    state.supplier_debounce.call(move || async move {
        if let Err(e) = restock_list_search_suppliers(&task_state, arg0).await {
            warn!(error = %e, "supplier search failed");
            notify(&*task_state.events, NotificationLevel::Danger, e);
        }
    });
    json!({ "scheduled": true })
}

/// Load a stored order into the editor so it can be changed and resubmitted.
pub async fn restock_list_edit(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: OrderPayload = parse_payload(arg0, "edit order")?;
    let client = state.client()?;
    let details: ReabastecimientoDetalle = match client.get(&details_path(payload.order_id)).await {
        Ok(details) => details,
        Err(e) => {
            warn!(order_id = payload.order_id, error = %e, "order details not loaded");
            let message = "Error al cargar".to_string();
            notify(&*state.events, NotificationLevel::Danger, message.clone());
            return Err(message);
        }
    };

    let loaded = {
        let mut form = lock(&state.order_form, "order form")?;
        OrderForm::load_existing(form.catalog().clone(), &details).map(|loaded| {
            *form = loaded;
            publish(state, &form)
        })
    };
    match loaded {
        Ok(view) => {
            info!(order_id = payload.order_id, "restock order opened for edit");
            Ok(view)
        }
        Err(message) => {
            notify(&*state.events, NotificationLevel::Warning, message.clone());
            Ok(json!({ "success": false, "message": message }))
        }
    }
}

pub async fn restock_list_delete(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: OrderPayload = parse_payload(arg0, "delete order")?;
    let order_id = payload.order_id;
    let client = state.client()?;
    let resp: EliminarResponse = match client.post_empty(&delete_path(order_id)).await {
        Ok(resp) => resp,
        Err(e) => {
            let message = match &e {
                ApiError::Status { message, .. } => message.clone(),
                _ => "Error al eliminar".to_string(),
            };
            warn!(order_id, error = %e, "restock order not deleted");
            notify(&*state.events, NotificationLevel::Danger, message.clone());
            return Err(message);
        }
    };
    if let Some(error) = resp.error {
        notify(&*state.events, NotificationLevel::Danger, error.clone());
        return Err(error);
    }

    if let Err(e) = remove_draft(&state.db, order_id) {
        warn!(order_id, error = %e, "reception draft not removed after delete");
    }
    {
        let mut form = lock(&state.order_form, "order form")?;
        if form.editing == Some(order_id) {
            let catalog = form.catalog().clone();
            *form = OrderForm::new(catalog);
            publish(state, &form);
        }
    }
    info!(order_id, "restock order deleted");
    state.events.emit(events::ORDER_DELETED, json!({ "orderId": order_id }));
    let message = resp
        .message
        .unwrap_or_else(|| "Reabastecimiento eliminado correctamente".into());
    notify(&*state.events, NotificationLevel::Success, message.clone());
    Ok(json!({ "success": true, "orderId": order_id, "message": message }))
}

/// Change history of an order, newest first.
pub async fn restock_list_audit_history(
    state: &AppState,
    arg0: Option<Value>,
) -> Result<Value, String> {
    let payload: OrderPayload = parse_payload(arg0, "audit history")?;
    let client = state.client()?;
    let resp: AuditoriaResponse = client.get(&audit_path(payload.order_id)).await.map_err(|e| {
        warn!(order_id = payload.order_id, error = %e, "audit history not loaded");
        let message = "Error al cargar historial de auditoría".to_string();
        notify(&*state.events, NotificationLevel::Danger, message.clone());
        message
    })?;

    let entries: Vec<Value> = resp
        .auditorias
        .iter()
        .map(|a| {
            let change = a
                .cantidad_anterior
                .map(|before| format!("Cantidad: {before} → {}", a.cantidad_nueva.unwrap_or(0)));
            json!({ "entry": a, "change": change })
        })
        .collect();
    let empty = entries.is_empty().then_some("Sin cambios registrados");
    Ok(json!({
        "orderId": payload.order_id,
        "title": format!("Historial - Orden #{}", payload.order_id),
        "entries": entries,
        "emptyMessage": empty,
    }))
}

/// Upload a restock spreadsheet and replace the editor's lines with the
/// parsed rows.
pub async fn restock_import_excel(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: ImportPayload = parse_payload(arg0, "import")?;
    let path = Path::new(payload.path.trim());
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("No se pudo leer el archivo: {e}"))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("reabastecimiento.xlsx")
        .to_string();

    let client = state.client()?;
    let parsed: ImportacionExcel = client
        .post_file(IMPORT_PATH, IMPORT_FIELD, &file_name, bytes)
        .await
        .map_err(|e| {
            let message = e.to_string();
            warn!(error = %message, "restock import failed");
            notify(&*state.events, NotificationLevel::Danger, message.clone());
            message
        })?;
    apply_import(state, parsed)
}

fn apply_import(state: &AppState, parsed: ImportacionExcel) -> Result<Value, String> {
    if !parsed.success || !parsed.errors.is_empty() {
        let message = if parsed.errors.is_empty() {
            "No se pudo procesar el archivo".to_string()
        } else {
            parsed.errors.join("\n")
        };
        notify(&*state.events, NotificationLevel::Warning, message.clone());
        return Ok(json!({
            "success": false,
            "message": message,
            "errors": parsed.errors,
            "warnings": parsed.warnings,
        }));
    }

    let outcome = {
        let mut form = lock(&state.order_form, "order form")?;
        let outcome = form.replace_lines_from_import(&parsed.data);
        if outcome.is_ok() {
            publish(state, &form);
        }
        outcome
    };
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(message) => {
            notify(&*state.events, NotificationLevel::Warning, message.clone());
            return Ok(json!({ "success": false, "message": message }));
        }
    };

    let mut warnings = parsed.warnings;
    warnings.extend(
        outcome
            .skipped
            .iter()
            .map(|id| format!("Producto {id} no está en el catálogo")),
    );
    for warning in &warnings {
        notify(&*state.events, NotificationLevel::Warning, warning.clone());
    }
    info!(imported = outcome.imported, skipped = outcome.skipped.len(), "restock lines imported");
    notify(
        &*state.events,
        NotificationLevel::Success,
        format!("{} producto(s) importado(s)", outcome.imported),
    );
    Ok(json!({ "success": true, "imported": outcome.imported, "warnings": warnings }))
}
