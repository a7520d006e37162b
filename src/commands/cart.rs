//! Point-of-sale controllers: product search, the product modal, cart
//! editing and checkout.

use std::sync::Arc;

use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::parse_payload;
use crate::allocation::allocate;
use crate::cart::{save_cart, Cart, QuantityUpdate};
use crate::data_helpers::validate_external_url;
use crate::events;
use crate::schema::{
    de_i64, BuscarProductosResponse, ClientesResponse, ProcesarVentaRequest,
    ProcesarVentaResponse, ProductoDetalle, VentaItem,
};
use crate::views::{self, notify, NotificationLevel, ProductModal, SaleReceipt};
use crate::{lock, AppState};

pub const SEARCH_PATH: &str = "/pos/api/buscar-productos/";
pub const CLIENTS_PATH: &str = "/pos/api/obtener-clientes/";
pub const SALE_PATH: &str = "/pos/api/procesar-venta/";
pub const MIN_SEARCH_CHARS: usize = 2;

pub const PAYMENT_METHODS: [&str; 5] = [
    "efectivo",
    "tarjeta_debito",
    "tarjeta_credito",
    "transferencia",
    "cheque",
];
pub const SALES_CHANNELS: [&str; 4] = ["mostrador", "telefono", "online", "delivery"];
const DEFAULT_CHANNEL: &str = "mostrador";
const CASH: &str = "efectivo";

pub fn product_path(producto_id: i64) -> String {
    format!("/pos/api/producto/{producto_id}/")
}

pub fn invoice_path(venta_id: i64) -> String {
    format!("/pos/venta/{venta_id}/descargar/")
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPayload {
    #[serde(default, alias = "query", alias = "termino")]
    q: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductPayload {
    #[serde(alias = "producto_id", alias = "id", deserialize_with = "de_i64")]
    producto_id: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct QuantityPayload {
    #[serde(default)]
    cantidad: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinePayload {
    #[serde(alias = "producto_id", deserialize_with = "de_i64")]
    producto_id: i64,
    #[serde(alias = "lote_id", deserialize_with = "de_i64")]
    lote_id: i64,
    #[serde(default, deserialize_with = "de_i64")]
    cantidad: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CheckoutPayload {
    #[serde(default, alias = "metodo_pago")]
    metodo_pago: String,
    #[serde(default, alias = "canal_venta")]
    canal_venta: Option<String>,
    #[serde(default, alias = "cliente_id")]
    cliente_id: Option<i64>,
    #[serde(default, alias = "monto_recibido")]
    monto_recibido: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoicePayload {
    #[serde(alias = "venta_id", alias = "id", deserialize_with = "de_i64")]
    venta_id: i64,
}

// ---------------------------------------------------------------------------
// View refresh
// ---------------------------------------------------------------------------

/// Emit the cart view and the badges of `producto_ids`.
pub(crate) fn publish_cart(state: &AppState, producto_ids: &[i64]) -> Result<Value, String> {
    let policy = state.terminal_config().tax;
    let cart = lock(&state.cart, "cart")?;
    let ledger = lock(&state.ledger, "stock ledger")?;
    let view = views::cart_view(&cart, cart.totals(policy));
    let badges: Vec<Value> = ledger
        .badges(producto_ids, &cart)
        .iter()
        .map(|b| json!({ "badge": b, "html": views::render_badge_html(b) }))
        .collect();
    drop(ledger);
    drop(cart);

    let view = json!(view);
    state.events.emit(events::CART_UPDATED, view.clone());
    if !badges.is_empty() {
        state.events.emit(events::STOCK_BADGES, json!(badges));
    }
    Ok(view)
}

fn persist(state: &AppState, cart: &Cart) -> Result<(), String> {
    save_cart(&state.db, cart).map_err(|e| format!("No se pudo guardar el carrito: {e}"))
}

fn rejected(state: &AppState, level: NotificationLevel, message: String) -> Result<Value, String> {
    notify(&*state.events, level, message.clone());
    Ok(json!({ "success": false, "message": message }))
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

pub async fn pos_search_products(
    state: &AppState,
    arg0: Option<Value>,
) -> Result<Value, String> {
    let payload: SearchPayload = parse_payload(arg0, "search")?;
    let query = payload.q.trim().to_string();
    // a new search always supersedes the one in flight
    let ticket = state.search_generation.next();

    if query.chars().count() < MIN_SEARCH_CHARS {
        let empty = json!({ "query": query, "productos": [], "badges": [] });
        state.events.emit(events::SEARCH_RESULTS, empty.clone());
        return Ok(empty);
    }

    let client = state.client()?;
    let resp: BuscarProductosResponse = client
        .get_query(SEARCH_PATH, &[("q", query.as_str())])
        .await
        .map_err(|e| e.to_string())?;

    if !state.search_generation.is_current(ticket) {
        debug!(ticket, query = %query, "discarding stale search results");
        return Ok(json!({ "query": query, "stale": true }));
    }

    let badges = {
        let cart = lock(&state.cart, "cart")?;
        let mut ledger = lock(&state.ledger, "stock ledger")?;
        for p in &resp.productos {
            ledger.observe(p.id, p.stock);
        }
        let ids: Vec<i64> = resp.productos.iter().map(|p| p.id).collect();
        ledger.badges(&ids, &cart)
    };

    let result = json!({
        "query": query,
        "productos": resp.productos,
        "badges": badges
            .iter()
            .map(|b| json!({ "badge": b, "html": views::render_badge_html(b) }))
            .collect::<Vec<_>>(),
    });
    state.events.emit(events::SEARCH_RESULTS, result.clone());
    Ok(result)
}

/// Debounced search: only the last call within the window reaches the
/// backend. Results arrive as a `search_results` event.
pub fn pos_search_products_debounced(state: &Arc<AppState>, arg0: Option<Value>) -> Value {
    let task_state = state.clone();
    state.search_debounce.call(move || async move {
        if let Err(e) = pos_search_products(&task_state, arg0).await {
            warn!(error = %e, "product search failed");
            notify(&*task_state.events, NotificationLevel::Danger, e);
        }
    });
    json!({ "scheduled": true })
}

// ---------------------------------------------------------------------------
// Product modal
// ---------------------------------------------------------------------------

pub async fn pos_open_product(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: ProductPayload = parse_payload(arg0, "product")?;
    let client = state.client()?;
    let detail: ProductoDetalle = client
        .get(&product_path(payload.producto_id))
        .await
        .map_err(|e| e.to_string())?;

    let mut slot = lock(&state.product_modal, "product modal")?;
    match ProductModal::open(&detail) {
        Err(notice) => {
            *slot = None;
            drop(slot);
            notice.emit(&*state.events);
            Ok(json!({ "success": false, "message": notice.message }))
        }
        Ok(modal) => {
            if detail.error.is_none() {
                lock(&state.ledger, "stock ledger")?.observe(detail.id, detail.stock);
            }
            let view = json!({
                "success": true,
                "modal": modal,
                "quickQuantities": modal.quick_quantities(),
                "subtotal": views::money(modal.subtotal()),
                "html": modal.render_html(),
            });
            *slot = Some(modal);
            Ok(view)
        }
    }
}

pub fn pos_modal_set_quantity(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: QuantityPayload = parse_payload(arg0, "quantity")?;
    let mut slot = lock(&state.product_modal, "product modal")?;
    let modal = slot.as_mut().ok_or("No hay producto seleccionado")?;
    let cantidad = modal.set_quantity(payload.cantidad.unwrap_or(1));
    Ok(json!({
        "cantidad": cantidad,
        "max": modal.stock_total,
        "subtotal": views::money(modal.subtotal()),
    }))
}

pub fn pos_close_product(state: &AppState) -> Result<Value, String> {
    *lock(&state.product_modal, "product modal")? = None;
    Ok(json!({ "success": true }))
}

// ---------------------------------------------------------------------------
// Cart editing
// ---------------------------------------------------------------------------

/// Add the modal's product, spreading the quantity over its lots soonest
/// expiry first.
pub fn pos_add_to_cart(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: QuantityPayload = parse_payload(arg0, "add to cart")?;
    let mut modal = lock(&state.product_modal, "product modal")?
        .clone()
        .ok_or("No hay producto seleccionado")?;
    let requested = modal.set_quantity(payload.cantidad.unwrap_or(modal.cantidad));
    let allocation = allocate(modal.lots(), requested);

    if allocation.lines.is_empty() {
        return rejected(
            state,
            NotificationLevel::Danger,
            format!("No hay stock disponible para \"{}\"", modal.nombre),
        );
    }
    if allocation.shortfall > 0 {
        warn!(
            producto_id = modal.producto_id,
            requested,
            shortfall = allocation.shortfall,
            "allocation could not cover the request"
        );
        notify(
            &*state.events,
            NotificationLevel::Warning,
            format!(
                "Solo se asignaron {} de {} unidades de \"{}\"",
                allocation.allocated(),
                requested,
                modal.nombre
            ),
        );
    }

    {
        let mut cart = lock(&state.cart, "cart")?;
        // all slices or none
        let mut next = cart.clone();
        if let Err(e) =
            next.add_allocation(modal.producto_id, &modal.nombre, modal.precio, &allocation)
        {
            drop(cart);
            return rejected(state, NotificationLevel::Warning, e.to_string());
        }
        persist(state, &next)?;
        *cart = next;
    }
    *lock(&state.product_modal, "product modal")? = None;

    info!(
        producto_id = modal.producto_id,
        cantidad = allocation.allocated(),
        lots = allocation.lines.len(),
        "added to cart"
    );
    let view = publish_cart(state, &[modal.producto_id])?;
    notify(
        &*state.events,
        NotificationLevel::Success,
        format!("{} agregado al carrito", modal.nombre),
    );
    Ok(json!({ "success": true, "allocation": allocation, "cart": view }))
}

pub fn pos_update_quantity(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: LinePayload = parse_payload(arg0, "update quantity")?;
    let outcome = {
        let mut cart = lock(&state.cart, "cart")?;
        let outcome = cart.set_quantity(payload.producto_id, payload.lote_id, payload.cantidad);
        if outcome == QuantityUpdate::NotInCart {
            return Err("El producto no está en el carrito".into());
        }
        persist(state, &cart)?;
        outcome
    };
    if let QuantityUpdate::Clamped { max } = outcome {
        notify(
            &*state.events,
            NotificationLevel::Warning,
            format!("Solo hay {max} unidades disponibles de este lote."),
        );
    }
    let view = publish_cart(state, &[payload.producto_id])?;
    let cantidad = match outcome {
        QuantityUpdate::Updated(q) => q,
        QuantityUpdate::Clamped { max } => max,
        _ => 0,
    };
    Ok(json!({ "success": true, "cantidad": cantidad, "cart": view }))
}

pub fn pos_remove_from_cart(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: LinePayload = parse_payload(arg0, "remove from cart")?;
    let removed = {
        let mut cart = lock(&state.cart, "cart")?;
        let removed = cart.remove(payload.producto_id, payload.lote_id);
        if removed.is_some() {
            persist(state, &cart)?;
        }
        removed
    };
    let view = publish_cart(state, &[payload.producto_id])?;
    Ok(json!({ "success": removed.is_some(), "cart": view }))
}

pub fn pos_clear_cart(state: &AppState) -> Result<Value, String> {
    let ids = {
        let mut cart = lock(&state.cart, "cart")?;
        let ids = cart.clear();
        persist(state, &cart)?;
        ids
    };
    let view = publish_cart(state, &ids)?;
    Ok(json!({ "success": true, "cart": view }))
}

pub fn pos_get_cart(state: &AppState) -> Result<Value, String> {
    let ids = lock(&state.cart, "cart")?.product_ids();
    publish_cart(state, &ids)
}

/// Seed the ledger from badge text already on screen (`Stock: 12`).
pub fn pos_observe_badges(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let entries = match arg0 {
        Some(Value::Array(entries)) => entries,
        Some(v) => vec![v],
        None => Vec::new(),
    };
    let mut ids = Vec::new();
    {
        let mut ledger = lock(&state.ledger, "stock ledger")?;
        for entry in &entries {
            let Some(id) = crate::value_i64(entry, &["productoId", "producto_id", "id"]) else {
                continue;
            };
            let text = crate::value_str(entry, &["text", "badge"]).unwrap_or_default();
            ledger.observe_badge_text(id, &text);
            ids.push(id);
        }
    }
    publish_cart(state, &ids)?;
    Ok(json!({ "observed": ids.len() }))
}

// ---------------------------------------------------------------------------
// Customers and checkout
// ---------------------------------------------------------------------------

pub async fn pos_get_clients(state: &AppState) -> Result<Value, String> {
    let client = state.client()?;
    let resp: ClientesResponse = client.get(CLIENTS_PATH).await.map_err(|e| e.to_string())?;
    if let Some(error) = resp.error {
        return Err(error);
    }
    Ok(json!({ "success": true, "clientes": resp.clientes }))
}

pub async fn pos_checkout(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: CheckoutPayload = parse_payload(arg0, "checkout")?;
    let config = state.terminal_config();

    let (items, totals) = {
        let cart = lock(&state.cart, "cart")?;
        let items: Vec<VentaItem> = cart
            .lines()
            .iter()
            .map(|l| VentaItem {
                producto_id: l.producto_id,
                lote_id: l.lote_id,
                cantidad: l.cantidad,
                precio: l.precio,
            })
            .collect();
        (items, cart.totals(config.tax))
    };
    let sent: Vec<(i64, i64, i64)> = items
        .iter()
        .map(|item| (item.producto_id, item.lote_id, item.cantidad))
        .collect();

    if items.is_empty() {
        return rejected(state, NotificationLevel::Warning, "El carrito está vacío".into());
    }
    let metodo_pago = payload.metodo_pago.trim().to_string();
    if metodo_pago.is_empty() {
        return rejected(
            state,
            NotificationLevel::Warning,
            "Por favor seleccione un Método de Pago".into(),
        );
    }
    if !PAYMENT_METHODS.contains(&metodo_pago.as_str()) {
        return rejected(
            state,
            NotificationLevel::Warning,
            format!("Método de pago no válido: {metodo_pago}"),
        );
    }
    let canal_venta = payload
        .canal_venta
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
    if !SALES_CHANNELS.contains(&canal_venta.as_str()) {
        return rejected(
            state,
            NotificationLevel::Warning,
            "Por favor seleccione un Canal de Venta".into(),
        );
    }
    let monto_recibido = payload.monto_recibido.filter(|_| metodo_pago == CASH);
    if let Some(monto) = monto_recibido {
        if monto < totals.total {
            return rejected(
                state,
                NotificationLevel::Warning,
                "Monto recibido insuficiente".into(),
            );
        }
    }

    let request = ProcesarVentaRequest {
        cliente_id: payload.cliente_id.unwrap_or(config.default_cliente_id),
        metodo_pago,
        canal_venta,
        monto_recibido,
        items,
    };
    let client = state.client()?;
    let resp: ProcesarVentaResponse = match client.post_json(SALE_PATH, &request).await {
        Ok(resp) => resp,
        Err(e) => {
            let message = e.to_string();
            warn!(error = %message, "sale failed");
            notify(&*state.events, NotificationLevel::Danger, format!("Error: {message}"));
            return Err(message);
        }
    };
    let venta_id = match (resp.success, resp.venta_id) {
        (true, Some(id)) => id,
        _ => {
            let message = resp.error.unwrap_or_else(|| "Error desconocido".into());
            notify(&*state.events, NotificationLevel::Danger, format!("Error: {message}"));
            return Err(message);
        }
    };

    let mut mensaje = resp
        .mensaje
        .unwrap_or_else(|| "Venta procesada exitosamente".into());
    if let Some(puntos) = resp.puntos_ganados.filter(|p| *p > 0.0) {
        mensaje.push_str(&format!(" ¡Has ganado {puntos:.2} puntos!"));
    }
    let total = resp.total.unwrap_or(totals.total);
    let receipt = SaleReceipt {
        venta_id,
        total,
        monto_recibido,
        cambio: monto_recibido.map(|m| m - total),
        mensaje: mensaje.clone(),
    };

    // Only the sold units leave; lines added during the request stay.
    let touched = {
        let mut cart = lock(&state.cart, "cart")?;
        let touched = cart.subtract_sent(&sent);
        persist(state, &cart)?;
        touched
    };
    info!(venta_id, total, "sale completed");
    publish_cart(state, &touched)?;
    notify(&*state.events, NotificationLevel::Success, mensaje);

    Ok(json!({
        "success": true,
        "ventaId": venta_id,
        "receipt": receipt,
        "receiptHtml": views::render_sale_receipt_html(&receipt),
        "invoiceUrl": client.url_for(&invoice_path(venta_id)),
    }))
}

/// Validated absolute URL of a sale's invoice download.
pub fn invoice_url(state: &AppState, venta_id: i64) -> Result<Url, String> {
    let client = state.client()?;
    validate_external_url(&client.url_for(&invoice_path(venta_id)), client.base_url())
}

pub fn pos_open_invoice(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: InvoicePayload = parse_payload(arg0, "invoice")?;
    let url = invoice_url(state, payload.venta_id)?;
    webbrowser::open(url.as_str()).map_err(|e| format!("No se pudo abrir la factura: {e}"))?;
    Ok(json!({ "success": true, "url": url.as_str() }))
}
