//! View models and the HTML fragments the shell drops into the page.

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::allocation::{consumption_order, Lot};
use crate::cart::{Cart, CartTotals, StockBadge};
use crate::events::{self, EventSink};
use crate::order_form::{LineTotals, OrderForm};
use crate::reception::{Progress, ReceptionAlert, ReceptionSession};
use crate::schema::ProductoDetalle;
use crate::tables::WidgetStats;

pub const QUICK_QUANTITIES: [i64; 3] = [1, 5, 10];

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

pub fn esc(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn group_thousands(digits: &str, sep: char) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(ch);
    }
    out
}

/// POS money: `$1,234.50`.
pub fn money(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, dec_part) = fixed.split_once('.').unwrap_or((&fixed, "00"));
    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}${}.{dec_part}", group_thousands(int_part, ','))
}

/// Colombian pesos without decimals: `$ 1.234.567`.
pub fn format_cop(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let sign = if rounded < 0.0 { "-" } else { "" };
    format!("{sign}$ {}", group_thousands(&digits, '.'))
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            level,
            message: message.into(),
        }
    }

    pub fn emit(&self, sink: &dyn EventSink) {
        sink.emit(events::NOTIFICATION, json!(self));
    }
}

pub fn notify(sink: &dyn EventSink, level: NotificationLevel, message: impl Into<String>) {
    Notification::new(level, message).emit(sink);
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLineView {
    pub producto_id: i64,
    pub lote_id: i64,
    pub nombre: String,
    pub cantidad: i64,
    pub max_stock: i64,
    pub precio: String,
    pub subtotal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLineView>,
    pub totals: CartTotals,
    pub subtotal: String,
    pub impuesto: String,
    pub total: String,
    pub html: String,
}

pub fn cart_view(cart: &Cart, totals: CartTotals) -> CartView {
    let lines: Vec<CartLineView> = cart
        .lines()
        .iter()
        .map(|l| CartLineView {
            producto_id: l.producto_id,
            lote_id: l.lote_id,
            nombre: l.nombre.clone(),
            cantidad: l.cantidad,
            max_stock: l.max_stock,
            precio: money(l.precio),
            subtotal: money(l.subtotal()),
        })
        .collect();
    let html = render_cart_html(&lines);
    CartView {
        lines,
        totals,
        subtotal: money(totals.subtotal),
        impuesto: money(totals.impuesto),
        total: money(totals.total),
        html,
    }
}

fn render_cart_html(lines: &[CartLineView]) -> String {
    if lines.is_empty() {
        return "<tr><td colspan=\"5\" class=\"text-center text-muted\">El carrito está vacío</td></tr>"
            .to_string();
    }
    lines
        .iter()
        .map(|l| {
            format!(
                "<tr data-producto-id=\"{}\" data-lote-id=\"{}\"><td>{}</td>\
                 <td><input type=\"number\" class=\"form-control form-control-sm\" min=\"1\" max=\"{}\" value=\"{}\"/></td>\
                 <td>{}</td><td>{}</td>\
                 <td><button class=\"btn btn-sm btn-danger\">Eliminar</button></td></tr>",
                l.producto_id,
                l.lote_id,
                esc(&l.nombre),
                l.max_stock,
                l.cantidad,
                l.precio,
                l.subtotal
            )
        })
        .collect()
}

pub fn render_badge_html(badge: &StockBadge) -> String {
    format!(
        "<span class=\"badge {}\" data-producto-id=\"{}\">{}</span>",
        badge.css_class,
        badge.producto_id,
        esc(&badge.text)
    )
}

// ---------------------------------------------------------------------------
// Product modal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LotView {
    pub id: i64,
    pub numero_lote: String,
    pub cantidad: i64,
    pub fecha_caducidad: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductModal {
    pub producto_id: i64,
    pub nombre: String,
    pub precio: f64,
    pub stock_total: i64,
    pub cantidad: i64,
    /// Lots in the order they will be consumed.
    pub lotes: Vec<LotView>,
    #[serde(skip)]
    lots: Vec<Lot>,
}

impl ProductModal {
    /// Build the modal, or the notification to show instead of it.
    pub fn open(detail: &ProductoDetalle) -> Result<Self, Notification> {
        if let Some(error) = detail.error.as_deref() {
            return Err(Notification::new(
                NotificationLevel::Danger,
                format!("Error: {error}"),
            ));
        }
        if detail.lotes.is_empty() {
            return Err(Notification::new(
                NotificationLevel::Warning,
                format!("\"{}\" no tiene lotes disponibles", detail.nombre),
            ));
        }
        let lots: Vec<Lot> = detail.lotes.iter().map(Lot::from).collect();
        let ordered = consumption_order(&lots);
        if ordered.is_empty() {
            return Err(Notification::new(
                NotificationLevel::Danger,
                format!("No hay stock disponible para \"{}\"", detail.nombre),
            ));
        }
        let lotes = ordered
            .iter()
            .map(|l| LotView {
                id: l.id,
                numero_lote: l.numero_lote.clone(),
                cantidad: l.cantidad,
                fecha_caducidad: l.expiry.to_string(),
            })
            .collect();
        let stock_total = ordered.iter().map(|l| l.cantidad).sum();
        Ok(Self {
            producto_id: detail.id,
            nombre: detail.nombre.clone(),
            precio: detail.precio,
            stock_total,
            cantidad: 1,
            lotes,
            lots,
        })
    }

    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    /// Clamp to `[1, stock_total]`.
    pub fn set_quantity(&mut self, cantidad: i64) -> i64 {
        self.cantidad = cantidad.clamp(1, self.stock_total.max(1));
        self.cantidad
    }

    /// Quick-pick buttons: 1, 5, 10 and the maximum, without repeats.
    pub fn quick_quantities(&self) -> Vec<i64> {
        let mut out: Vec<i64> = QUICK_QUANTITIES
            .into_iter()
            .filter(|q| *q < self.stock_total)
            .collect();
        out.push(self.stock_total);
        out
    }

    pub fn subtotal(&self) -> f64 {
        self.precio * self.cantidad as f64
    }

    pub fn render_html(&self) -> String {
        let mut body = format!(
            "<h5>{}</h5><div class=\"line\"><span>Precio</span><span>{}</span></div>\
             <div class=\"line\"><span>Disponible</span><span>{}</span></div><ul class=\"list-group\">",
            esc(&self.nombre),
            money(self.precio),
            self.stock_total
        );
        for lot in &self.lotes {
            body.push_str(&format!(
                "<li class=\"list-group-item\">Lote {} · {} u. · Vence {}</li>",
                esc(&lot.numero_lote),
                lot.cantidad,
                esc(&lot.fecha_caducidad)
            ));
        }
        body.push_str("</ul><div class=\"btn-group\">");
        for q in self.quick_quantities() {
            body.push_str(&format!(
                "<button class=\"btn btn-outline-secondary btn-sm\" data-qty=\"{q}\">{q}</button>"
            ));
        }
        body.push_str(&format!(
            "</div><div class=\"line\"><strong>Subtotal</strong><strong>{}</strong></div>",
            money(self.subtotal())
        ));
        body
    }
}

// ---------------------------------------------------------------------------
// Tables widget
// ---------------------------------------------------------------------------

pub fn render_table_widget_html(stats: &WidgetStats) -> String {
    let mut body = format!(
        "<div class=\"d-flex gap-2\"><span class=\"badge bg-success\">{}</span>\
         <span class=\"badge bg-danger\">{}</span><span class=\"badge bg-warning text-dark\">{}</span></div>\
         <div id=\"widget-total\">{}</div>",
        stats.disponibles,
        stats.ocupadas,
        stats.reservadas,
        format_cop(stats.total_abierto)
    );
    if stats.abiertas.is_empty() {
        body.push_str("<div class=\"text-muted small\">Sin mesas abiertas</div>");
    }
    for mesa in &stats.abiertas {
        let cls = if mesa.alerta { "mesa-item alerta" } else { "mesa-item" };
        body.push_str(&format!(
            "<div class=\"{cls}\" data-mesa-id=\"{}\" title=\"Mesa {} - {} - {}\">{} · {}</div>",
            mesa.id,
            esc(&mesa.numero),
            money(mesa.total_cuenta),
            esc(&mesa.tiempo),
            esc(&mesa.nombre),
            esc(&mesa.tiempo)
        ));
    }
    body
}

// ---------------------------------------------------------------------------
// Reception
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceptionView {
    pub order_id: i64,
    pub proveedor_nombre: String,
    pub header_total: String,
    pub progress: Progress,
    pub progress_label: String,
    pub alert: ReceptionAlert,
    pub can_confirm: bool,
    pub rows_html: String,
}

pub fn reception_view(session: &ReceptionSession) -> ReceptionView {
    let progress = session.progress();
    ReceptionView {
        order_id: session.order_id,
        proveedor_nombre: session.proveedor_nombre.clone(),
        header_total: format_cop(session.header_total()),
        progress_label: progress.label(),
        progress,
        alert: session.alert(),
        can_confirm: session.can_confirm(),
        rows_html: render_reception_rows_html(session),
    }
}

fn render_reception_rows_html(session: &ReceptionSession) -> String {
    session
        .visible_lines()
        .iter()
        .map(|line| {
            let status = line.status();
            let problem = line
                .problem()
                .map(|p| format!("<div class=\"invalid-feedback d-block\">{}</div>", esc(&p)))
                .unwrap_or_default();
            format!(
                "<tr data-detalle-id=\"{}\"><td>{}</td><td>{}</td>\
                 <td><input type=\"number\" min=\"0\" max=\"{}\" value=\"{}\"/>{problem}</td>\
                 <td><input type=\"date\" value=\"{}\"/></td><td><input type=\"text\" value=\"{}\"/></td>\
                 <td><span class=\"badge status-{}\">{}</span></td></tr>",
                line.id,
                esc(&line.producto_nombre),
                line.cantidad,
                line.cantidad,
                line.cantidad_recibida,
                esc(&line.fecha_caducidad),
                esc(&line.numero_lote),
                serde_json::to_value(status)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                status.label()
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Order form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTotalsView {
    pub subtotal: String,
    pub iva: String,
    pub total: String,
}

impl From<LineTotals> for OrderTotalsView {
    fn from(t: LineTotals) -> Self {
        Self {
            subtotal: format_cop(t.subtotal),
            iva: format_cop(t.iva),
            total: format_cop(t.total),
        }
    }
}

pub fn order_totals_view(form: &OrderForm) -> (Vec<OrderTotalsView>, OrderTotalsView) {
    let lines = form
        .lines
        .iter()
        .map(|l| form.line_totals(l).into())
        .collect();
    (lines, form.totals().into())
}

// ---------------------------------------------------------------------------
// Sale receipt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleReceipt {
    pub venta_id: i64,
    pub total: f64,
    pub monto_recibido: Option<f64>,
    pub cambio: Option<f64>,
    pub mensaje: String,
}

pub fn render_sale_receipt_html(receipt: &SaleReceipt) -> String {
    let mut body = format!(
        "<div class=\"center\">La Playita</div><div class=\"section\">\
         <div class=\"line\"><span>Venta</span><span>#{}</span></div>\
         <div class=\"line\"><strong>Total</strong><strong>{}</strong></div>",
        receipt.venta_id,
        money(receipt.total)
    );
    if let (Some(recibido), Some(cambio)) = (receipt.monto_recibido, receipt.cambio) {
        body.push_str(&format!(
            "<div class=\"line\"><span>Recibido</span><span>{}</span></div>\
             <div class=\"line\"><span>Cambio</span><span>{}</span></div>",
            money(recibido),
            money(cambio)
        ));
    }
    body.push_str(&format!(
        "</div><div class=\"note center\">{}</div>",
        esc(&receipt.mensaje)
    ));
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::{CartLine, TaxPolicy};
    use crate::events::RecordingSink;
    use crate::schema::LoteDto;

    #[test]
    fn test_money_formats() {
        assert_eq!(money(30.0), "$30.00");
        assert_eq!(money(1234567.891), "$1,234,567.89");
        assert_eq!(money(-1500.5), "-$1,500.50");
        assert_eq!(money(999.999), "$1,000.00");
        assert_eq!(format_cop(1234567.4), "$ 1.234.567");
        assert_eq!(format_cop(950.0), "$ 950");
        assert_eq!(format_cop(0.0), "$ 0");
    }

    #[test]
    fn test_esc() {
        assert_eq!(esc("<b>\"Pan\" & Co</b>"), "&lt;b&gt;&quot;Pan&quot; &amp; Co&lt;/b&gt;");
    }

    #[test]
    fn test_notification_event() {
        let sink = RecordingSink::default();
        notify(&sink, NotificationLevel::Warning, "Stock insuficiente. Disponible: 2");
        let sent = sink.named(events::NOTIFICATION);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["level"], "warning");
        assert_eq!(sent[0]["message"], "Stock insuficiente. Disponible: 2");
    }

    #[test]
    fn test_cart_view_escapes_names() {
        let cart = Cart::from_lines(vec![CartLine {
            producto_id: 1,
            nombre: "Galletas <Noel>".into(),
            precio: 10.0,
            cantidad: 3,
            lote_id: 4,
            max_stock: 5,
        }]);
        let view = cart_view(&cart, cart.totals(TaxPolicy::default()));
        assert_eq!(view.subtotal, "$30.00");
        assert!(view.html.contains("Galletas &lt;Noel&gt;"));
        let empty = cart_view(&Cart::default(), Cart::default().totals(TaxPolicy::default()));
        assert!(empty.html.contains("El carrito está vacío"));
    }

    fn detail(lotes: Vec<LoteDto>, error: Option<&str>) -> ProductoDetalle {
        serde_json::from_value(json!({
            "id": 9,
            "nombre": "Atún Van Camps",
            "precio": 5200,
            "stock": 0,
            "lotes": lotes,
            "error": error,
        }))
        .expect("detail")
    }

    fn lote(id: i64, cantidad: i64, fecha: &str) -> LoteDto {
        LoteDto {
            id,
            numero_lote: format!("L{id}"),
            cantidad,
            fecha_caducidad: fecha.to_string(),
        }
    }

    #[test]
    fn test_product_modal_guards() {
        let err = ProductModal::open(&detail(vec![], Some("Producto no encontrado"))).unwrap_err();
        assert_eq!(err.level, NotificationLevel::Danger);
        assert_eq!(err.message, "Error: Producto no encontrado");

        let err = ProductModal::open(&detail(vec![], None)).unwrap_err();
        assert_eq!(err.level, NotificationLevel::Warning);
        assert_eq!(err.message, "\"Atún Van Camps\" no tiene lotes disponibles");

        let err = ProductModal::open(&detail(vec![lote(1, 0, "2025-01-01")], None)).unwrap_err();
        assert_eq!(err.message, "No hay stock disponible para \"Atún Van Camps\"");
    }

    #[test]
    fn test_product_modal_orders_lots_and_clamps() {
        let mut modal = ProductModal::open(&detail(
            vec![
                lote(1, 3, "N/A"),
                lote(2, 4, "2025-03-01"),
                lote(3, 0, "2024-01-01"),
            ],
            None,
        ))
        .expect("modal");
        let ids: Vec<i64> = modal.lotes.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(modal.stock_total, 7);
        assert_eq!(modal.set_quantity(50), 7);
        assert_eq!(modal.set_quantity(0), 1);
        assert_eq!(modal.quick_quantities(), vec![1, 5, 7]);
        modal.set_quantity(2);
        assert_eq!(modal.subtotal(), 10_400.0);
        assert!(modal.render_html().contains("$10,400.00"));
    }
}
