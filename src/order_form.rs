//! Restock order editor: header fields, line items, validation and the
//! form-encoded body the backend's formset expects.

use chrono::{Months, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use crate::schema::{Catalogo, CatalogoProducto, FilaImportada, ReabastecimientoDetalle};

pub const CREATE_PATH: &str = "/suppliers/reabastecimientos/crear/";
pub const FORMSET_PREFIX: &str = "reabastecimientodetalle_set";
pub const MAX_FORMS: usize = 1000;

const MAX_QUANTITY: i64 = 999_999;
const HIGH_QUANTITY: i64 = 1000;
const MAX_COST: f64 = 999_999_999.0;
const NEAR_EXPIRY_DAYS: i64 = 30;
const MAX_EXPIRY_MONTHS: u32 = 60;
const MIN_SUGGESTED_QUANTITY: i64 = 10;

pub fn update_path(order_id: i64) -> String {
    format!("/suppliers/reabastecimientos/{order_id}/actualizar/")
}

/// Accepts `YYYY-MM-DD` with or without a time suffix.
fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentForm {
    #[default]
    Transferencia,
    Efectivo,
    Cheque,
    Pse,
    TarjetaCredito,
    Consignacion,
}

impl PaymentForm {
    pub const ALL: [PaymentForm; 6] = [
        Self::Transferencia,
        Self::Efectivo,
        Self::Cheque,
        Self::Pse,
        Self::TarjetaCredito,
        Self::Consignacion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transferencia => "transferencia",
            Self::Efectivo => "efectivo",
            Self::Cheque => "cheque",
            Self::Pse => "pse",
            Self::TarjetaCredito => "tarjeta_credito",
            Self::Consignacion => "consignacion",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == raw.trim())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Borrador,
    #[default]
    Solicitado,
    Recibido,
    Cancelado,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Borrador => "borrador",
            Self::Solicitado => "solicitado",
            Self::Recibido => "recibido",
            Self::Cancelado => "cancelado",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [Self::Borrador, Self::Solicitado, Self::Recibido, Self::Cancelado]
            .into_iter()
            .find(|s| s.as_str() == raw.trim())
    }
}

/// Outcome of validating one field. Warnings never block submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum FieldCheck {
    Ok,
    Warning(String),
    Invalid(String),
}

impl FieldCheck {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

pub fn check_product(producto_id: Option<i64>) -> FieldCheck {
    match producto_id {
        Some(_) => FieldCheck::Ok,
        None => FieldCheck::Invalid("Selecciona un producto".into()),
    }
}

pub fn check_quantity(cantidad: Option<i64>) -> FieldCheck {
    match cantidad {
        None => FieldCheck::Invalid("Cantidad requerida".into()),
        Some(q) if q <= 0 => FieldCheck::Invalid("Cantidad debe ser > 0".into()),
        Some(q) if q > MAX_QUANTITY => FieldCheck::Invalid("Cantidad muy alta".into()),
        Some(q) if q > HIGH_QUANTITY => FieldCheck::Warning("Cantidad alta, verifica".into()),
        Some(_) => FieldCheck::Ok,
    }
}

pub fn check_cost(costo: Option<f64>) -> FieldCheck {
    match costo {
        Some(c) if c > MAX_COST => FieldCheck::Invalid("Costo muy alto".into()),
        Some(c) if c > 0.0 => FieldCheck::Ok,
        _ => FieldCheck::Invalid("Costo debe ser > 0".into()),
    }
}

pub fn check_expiry(fecha: Option<NaiveDate>, today: NaiveDate) -> FieldCheck {
    let Some(fecha) = fecha else {
        return FieldCheck::Invalid("Fecha requerida".into());
    };
    if fecha < today {
        return FieldCheck::Invalid("Fecha no puede ser pasada".into());
    }
    let limit = today
        .checked_add_months(Months::new(MAX_EXPIRY_MONTHS))
        .unwrap_or(NaiveDate::MAX);
    if fecha > limit {
        return FieldCheck::Invalid("Fecha muy lejana (máx 5 años)".into());
    }
    let days = (fecha - today).num_days();
    if days < NEAR_EXPIRY_DAYS {
        return FieldCheck::Warning(format!("Vence en {days} días"));
    }
    FieldCheck::Ok
}

/// `max(10, ceil(stock × 0.5))`
pub fn suggested_quantity(stock_actual: i64) -> i64 {
    let half = (stock_actual.max(0) + 1) / 2;
    half.max(MIN_SUGGESTED_QUANTITY)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderLine {
    pub row_id: Uuid,
    /// Server id of the detail row when editing a stored order.
    pub detalle_id: Option<i64>,
    pub producto_id: Option<i64>,
    pub cantidad: Option<i64>,
    pub costo_unitario: Option<f64>,
    pub fecha_caducidad: Option<NaiveDate>,
    pub tasa_iva_id: Option<i64>,
    pub suggested_quantity: Option<i64>,
}

impl OrderLine {
    pub fn empty() -> Self {
        Self {
            row_id: Uuid::new_v4(),
            detalle_id: None,
            producto_id: None,
            cantidad: None,
            costo_unitario: None,
            fecha_caducidad: None,
            tasa_iva_id: None,
            suggested_quantity: None,
        }
    }

    pub fn subtotal(&self) -> f64 {
        self.cantidad.unwrap_or(0) as f64 * self.costo_unitario.unwrap_or(0.0)
    }

    pub fn checks(&self, today: NaiveDate) -> LineChecks {
        LineChecks {
            row_id: self.row_id,
            producto: check_product(self.producto_id),
            cantidad: check_quantity(self.cantidad),
            costo_unitario: check_cost(self.costo_unitario),
            fecha_caducidad: check_expiry(self.fecha_caducidad, today),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineChecks {
    pub row_id: Uuid,
    pub producto: FieldCheck,
    pub cantidad: FieldCheck,
    pub costo_unitario: FieldCheck,
    pub fecha_caducidad: FieldCheck,
}

impl LineChecks {
    pub fn is_valid(&self) -> bool {
        ![
            &self.producto,
            &self.cantidad,
            &self.costo_unitario,
            &self.fecha_caducidad,
        ]
        .iter()
        .any(|c| c.is_invalid())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LineTotals {
    pub subtotal: f64,
    pub iva: f64,
    pub total: f64,
}

/// Result of replacing the lines with a spreadsheet import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    pub imported: usize,
    /// Product ids the catalog does not know; those rows are dropped.
    pub skipped: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderForm {
    /// Set when the form edits a stored order instead of creating one.
    pub editing: Option<i64>,
    pub proveedor_id: Option<i64>,
    pub forma_pago: PaymentForm,
    pub estado: OrderState,
    pub observaciones: String,
    pub lines: Vec<OrderLine>,
    /// Stored detail rows dropped during an edit.
    pub removed_detalles: Vec<i64>,
    #[serde(skip)]
    catalog: Catalogo,
}

impl Default for OrderForm {
    fn default() -> Self {
        Self::new(Catalogo::default())
    }
}

impl OrderForm {
    /// A fresh form starts with one empty line.
    pub fn new(catalog: Catalogo) -> Self {
        Self {
            editing: None,
            proveedor_id: None,
            forma_pago: PaymentForm::default(),
            estado: OrderState::default(),
            observaciones: String::new(),
            lines: vec![OrderLine::empty()],
            removed_detalles: Vec::new(),
            catalog,
        }
    }

    /// Prefill the form from a stored order so it can be edited. Received
    /// orders are final.
    pub fn load_existing(catalog: Catalogo, details: &ReabastecimientoDetalle) -> Result<Self, String> {
        let estado = OrderState::parse(&details.estado).unwrap_or_default();
        if estado == OrderState::Recibido {
            return Err("No se puede editar un reabastecimiento recibido.".into());
        }
        let mut form = Self::new(catalog);
        form.editing = Some(details.id);
        form.proveedor_id = details.proveedor_id;
        form.estado = estado;
        form.forma_pago = details
            .forma_pago
            .as_deref()
            .and_then(PaymentForm::parse)
            .unwrap_or_default();
        form.observaciones = details.observaciones.clone().unwrap_or_default();

        let lines: Vec<OrderLine> = details
            .detalles
            .iter()
            .map(|d| {
                let product = d.producto_id.and_then(|id| form.product(id));
                OrderLine {
                    detalle_id: Some(d.id),
                    producto_id: d.producto_id,
                    cantidad: Some(d.cantidad),
                    costo_unitario: Some(d.costo_unitario),
                    fecha_caducidad: d.fecha_caducidad.as_deref().and_then(parse_day),
                    tasa_iva_id: product.and_then(|p| p.tasa_iva_id),
                    suggested_quantity: product.map(|p| suggested_quantity(p.stock_actual)),
                    ..OrderLine::empty()
                }
            })
            .collect();
        if !lines.is_empty() {
            form.lines = lines;
        }
        Ok(form)
    }

    /// Swap every line for the rows of a spreadsheet import. Nothing changes
    /// when no row names a catalog product.
    pub fn replace_lines_from_import(&mut self, rows: &[FilaImportada]) -> Result<ImportOutcome, String> {
        if rows.len() > MAX_FORMS {
            return Err(format!("Máximo {MAX_FORMS} productos por pedido"));
        }
        let mut skipped = Vec::new();
        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(product) = self.product(row.producto_id) else {
                skipped.push(row.producto_id);
                continue;
            };
            lines.push(OrderLine {
                producto_id: Some(product.id),
                cantidad: Some(row.cantidad),
                costo_unitario: Some(row.costo_unitario),
                fecha_caducidad: row.fecha_caducidad.as_deref().and_then(parse_day),
                tasa_iva_id: row.tasa_iva_id.or(product.tasa_iva_id),
                suggested_quantity: Some(suggested_quantity(product.stock_actual)),
                ..OrderLine::empty()
            });
        }
        if lines.is_empty() {
            return Err("No se pudo procesar ningún producto del archivo.".into());
        }
        let dropped = self.lines.iter().filter_map(|l| l.detalle_id);
        self.removed_detalles.extend(dropped);
        let imported = lines.len();
        self.lines = lines;
        Ok(ImportOutcome { imported, skipped })
    }

    /// Where the form posts: create for new orders, update when editing.
    pub fn submit_path(&self) -> String {
        self.editing.map(update_path).unwrap_or_else(|| CREATE_PATH.to_string())
    }

    pub fn catalog(&self) -> &Catalogo {
        &self.catalog
    }

    fn product(&self, producto_id: i64) -> Option<&CatalogoProducto> {
        self.catalog.productos.iter().find(|p| p.id == producto_id)
    }

    fn line_mut(&mut self, row_id: Uuid) -> Result<&mut OrderLine, String> {
        self.lines
            .iter_mut()
            .find(|l| l.row_id == row_id)
            .ok_or_else(|| format!("Fila {row_id} no encontrada"))
    }

    pub fn add_line(&mut self) -> Result<Uuid, String> {
        if self.lines.len() >= MAX_FORMS {
            return Err(format!("Máximo {MAX_FORMS} productos por pedido"));
        }
        let line = OrderLine::empty();
        let id = line.row_id;
        self.lines.push(line);
        Ok(id)
    }

    /// Remove a line; the last remaining line is reset instead.
    pub fn remove_line(&mut self, row_id: Uuid) -> Result<(), String> {
        let idx = self
            .lines
            .iter()
            .position(|l| l.row_id == row_id)
            .ok_or_else(|| format!("Fila {row_id} no encontrada"))?;
        if let Some(detalle_id) = self.lines[idx].detalle_id {
            self.removed_detalles.push(detalle_id);
        }
        if self.lines.len() == 1 {
            self.lines[0] = OrderLine::empty();
        } else {
            self.lines.remove(idx);
        }
        Ok(())
    }

    /// Copy a line right after itself under a new row id.
    pub fn duplicate_line(&mut self, row_id: Uuid) -> Result<Uuid, String> {
        if self.lines.len() >= MAX_FORMS {
            return Err(format!("Máximo {MAX_FORMS} productos por pedido"));
        }
        let idx = self
            .lines
            .iter()
            .position(|l| l.row_id == row_id)
            .ok_or_else(|| format!("Fila {row_id} no encontrada"))?;
        let mut copy = self.lines[idx].clone();
        copy.row_id = Uuid::new_v4();
        copy.detalle_id = None;
        let id = copy.row_id;
        self.lines.insert(idx + 1, copy);
        Ok(id)
    }

    /// Choose a product for a line, filling cost and tax rate from the catalog.
    pub fn select_product(&mut self, row_id: Uuid, producto_id: Option<i64>) -> Result<(), String> {
        let Some(producto_id) = producto_id else {
            let line = self.line_mut(row_id)?;
            line.producto_id = None;
            line.tasa_iva_id = None;
            line.suggested_quantity = None;
            return Ok(());
        };
        let product = self
            .product(producto_id)
            .cloned()
            .ok_or_else(|| format!("Producto {producto_id} no está en el catálogo"))?;
        let line = self.line_mut(row_id)?;
        line.producto_id = Some(product.id);
        line.costo_unitario = Some(product.precio_unitario);
        line.tasa_iva_id = product.tasa_iva_id;
        line.suggested_quantity = Some(suggested_quantity(product.stock_actual));
        Ok(())
    }

    pub fn set_quantity(&mut self, row_id: Uuid, raw: &str) -> Result<(), String> {
        self.line_mut(row_id)?.cantidad = raw.trim().parse().ok();
        Ok(())
    }

    pub fn set_cost(&mut self, row_id: Uuid, raw: &str) -> Result<(), String> {
        self.line_mut(row_id)?.costo_unitario = raw.trim().parse().ok();
        Ok(())
    }

    pub fn set_expiry(&mut self, row_id: Uuid, raw: &str) -> Result<(), String> {
        self.line_mut(row_id)?.fecha_caducidad =
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok();
        Ok(())
    }

    fn tax_percent(&self, tasa_iva_id: Option<i64>) -> f64 {
        tasa_iva_id
            .and_then(|id| self.catalog.tasas_iva.iter().find(|t| t.id == id))
            .map(|t| t.porcentaje)
            .unwrap_or(0.0)
    }

    pub fn line_totals(&self, line: &OrderLine) -> LineTotals {
        let subtotal = line.subtotal();
        let iva = subtotal * self.tax_percent(line.tasa_iva_id) / 100.0;
        LineTotals {
            subtotal,
            iva,
            total: subtotal + iva,
        }
    }

    pub fn totals(&self) -> LineTotals {
        self.lines
            .iter()
            .map(|l| self.line_totals(l))
            .fold(LineTotals::default(), |acc, t| LineTotals {
                subtotal: acc.subtotal + t.subtotal,
                iva: acc.iva + t.iva,
                total: acc.total + t.total,
            })
    }

    /// Lines that carry a product. Empty rows are ignored everywhere.
    pub fn filled_lines(&self) -> impl Iterator<Item = &OrderLine> {
        self.lines.iter().filter(|l| l.producto_id.is_some())
    }

    pub fn line_checks(&self, today: NaiveDate) -> Vec<LineChecks> {
        self.filled_lines().map(|l| l.checks(today)).collect()
    }

    pub fn is_valid(&self, today: NaiveDate) -> bool {
        self.first_problem(today).is_none()
    }

    pub fn first_problem(&self, today: NaiveDate) -> Option<String> {
        if self.proveedor_id.is_none() {
            return Some("Selecciona un proveedor".into());
        }
        if self.filled_lines().next().is_none() {
            return Some("Agrega al menos un producto".into());
        }
        for (n, checks) in self.line_checks(today).iter().enumerate() {
            for check in [
                &checks.cantidad,
                &checks.costo_unitario,
                &checks.fecha_caducidad,
            ] {
                if let FieldCheck::Invalid(msg) = check {
                    return Some(format!("Producto {}: {msg}", n + 1));
                }
            }
        }
        None
    }

    /// Body for a full submission.
    pub fn submission(&self, today: NaiveDate) -> Result<Vec<(String, String)>, String> {
        if let Some(problem) = self.first_problem(today) {
            return Err(problem);
        }
        Ok(self.to_form_fields(self.estado))
    }

    /// Body for "save draft": only a supplier is required.
    pub fn draft_submission(&self) -> Result<Vec<(String, String)>, String> {
        if self.proveedor_id.is_none() {
            return Err("Selecciona un proveedor".into());
        }
        Ok(self.to_form_fields(OrderState::Borrador))
    }

    /// Encode header and filled lines as Django formset fields.
    pub fn to_form_fields(&self, estado: OrderState) -> Vec<(String, String)> {
        let mut fields = vec![
            (
                "proveedor".to_string(),
                self.proveedor_id.map(|id| id.to_string()).unwrap_or_default(),
            ),
            ("forma_pago".to_string(), self.forma_pago.as_str().to_string()),
            ("estado".to_string(), estado.as_str().to_string()),
            ("observaciones".to_string(), self.observaciones.clone()),
        ];
        // stored rows come first, as the formset's initial forms
        let (stored, added): (Vec<&OrderLine>, Vec<&OrderLine>) =
            self.filled_lines().partition(|l| l.detalle_id.is_some());
        // a stored row whose product was cleared is dropped too
        let removed: Vec<i64> = self
            .removed_detalles
            .iter()
            .copied()
            .chain(
                self.lines
                    .iter()
                    .filter(|l| l.producto_id.is_none())
                    .filter_map(|l| l.detalle_id),
            )
            .collect();
        let initial = stored.len() + removed.len();
        let management = [
            ("TOTAL_FORMS", (initial + added.len()).to_string()),
            ("INITIAL_FORMS", initial.to_string()),
            ("MIN_NUM_FORMS", "0".to_string()),
            ("MAX_NUM_FORMS", MAX_FORMS.to_string()),
        ];
        for (name, value) in management {
            fields.push((format!("{FORMSET_PREFIX}-{name}"), value));
        }
        for (i, detalle_id) in removed.iter().enumerate() {
            let i = stored.len() + i;
            fields.push((format!("{FORMSET_PREFIX}-{i}-id"), detalle_id.to_string()));
            fields.push((format!("{FORMSET_PREFIX}-{i}-DELETE"), "on".to_string()));
        }
        let ordered = stored.iter().enumerate().chain(
            added.iter().enumerate().map(|(i, line)| (initial + i, line)),
        );
        for (i, line) in ordered {
            let field = |name: &str| format!("{FORMSET_PREFIX}-{i}-{name}");
            if let Some(detalle_id) = line.detalle_id {
                fields.push((field("id"), detalle_id.to_string()));
            }
            fields.push((
                field("producto"),
                line.producto_id.map(|v| v.to_string()).unwrap_or_default(),
            ));
            fields.push((
                field("cantidad"),
                line.cantidad.map(|v| v.to_string()).unwrap_or_default(),
            ));
            fields.push((
                field("costo_unitario"),
                line.costo_unitario.map(|v| v.to_string()).unwrap_or_default(),
            ));
            fields.push((
                field("fecha_caducidad"),
                line.fecha_caducidad
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
            ));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TasaIva;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn catalog() -> Catalogo {
        Catalogo {
            productos: vec![
                CatalogoProducto {
                    id: 7,
                    nombre: "Leche Alquería 1L".into(),
                    precio_unitario: 3200.0,
                    tasa_iva_id: Some(2),
                    stock_actual: 31,
                },
                CatalogoProducto {
                    id: 8,
                    nombre: "Huevos AA x30".into(),
                    precio_unitario: 14_000.0,
                    tasa_iva_id: None,
                    stock_actual: 4,
                },
            ],
            tasas_iva: vec![TasaIva {
                id: 2,
                nombre: "IVA 19%".into(),
                porcentaje: 19.0,
            }],
        }
    }

    fn value<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
        fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_quantity_rules() {
        assert_eq!(check_quantity(None), FieldCheck::Invalid("Cantidad requerida".into()));
        assert_eq!(check_quantity(Some(0)), FieldCheck::Invalid("Cantidad debe ser > 0".into()));
        assert_eq!(check_quantity(Some(1_000_000)), FieldCheck::Invalid("Cantidad muy alta".into()));
        assert_eq!(check_quantity(Some(1001)), FieldCheck::Warning("Cantidad alta, verifica".into()));
        assert_eq!(check_quantity(Some(1000)), FieldCheck::Ok);
    }

    #[test]
    fn test_cost_rules() {
        assert!(check_cost(None).is_invalid());
        assert_eq!(check_cost(Some(0.0)), FieldCheck::Invalid("Costo debe ser > 0".into()));
        assert_eq!(check_cost(Some(1e9)), FieldCheck::Invalid("Costo muy alto".into()));
        assert_eq!(check_cost(Some(0.5)), FieldCheck::Ok);
    }

    #[test]
    fn test_expiry_rules() {
        let today = day("2024-06-15");
        assert_eq!(check_expiry(None, today), FieldCheck::Invalid("Fecha requerida".into()));
        assert_eq!(
            check_expiry(Some(day("2024-06-14")), today),
            FieldCheck::Invalid("Fecha no puede ser pasada".into())
        );
        assert_eq!(
            check_expiry(Some(day("2029-06-16")), today),
            FieldCheck::Invalid("Fecha muy lejana (máx 5 años)".into())
        );
        assert_eq!(check_expiry(Some(day("2029-06-15")), today), FieldCheck::Ok);
        assert_eq!(
            check_expiry(Some(day("2024-06-25")), today),
            FieldCheck::Warning("Vence en 10 días".into())
        );
        assert_eq!(check_expiry(Some(day("2024-07-15")), today), FieldCheck::Ok);
    }

    #[test]
    fn test_suggested_quantity() {
        assert_eq!(suggested_quantity(31), 16);
        assert_eq!(suggested_quantity(4), 10);
        assert_eq!(suggested_quantity(-3), 10);
        assert_eq!(suggested_quantity(40), 20);
    }

    #[test]
    fn test_select_product_fills_cost_and_rate() {
        let mut form = OrderForm::new(catalog());
        let row = form.lines[0].row_id;
        form.select_product(row, Some(7)).expect("select");
        let line = &form.lines[0];
        assert_eq!(line.costo_unitario, Some(3200.0));
        assert_eq!(line.tasa_iva_id, Some(2));
        assert_eq!(line.suggested_quantity, Some(16));
        assert!(form.select_product(row, Some(99)).is_err());
        form.select_product(row, None).expect("clear");
        assert_eq!(form.lines[0].producto_id, None);
    }

    #[test]
    fn test_totals() {
        let mut form = OrderForm::new(catalog());
        let a = form.lines[0].row_id;
        form.select_product(a, Some(7)).expect("select");
        form.set_quantity(a, "10").expect("qty");
        let b = form.add_line().expect("add");
        form.select_product(b, Some(8)).expect("select");
        form.set_quantity(b, "2").expect("qty");

        let first = form.line_totals(&form.lines[0]);
        assert_eq!(first.subtotal, 32_000.0);
        assert!((first.iva - 6080.0).abs() < 1e-6);
        let grand = form.totals();
        assert_eq!(grand.subtotal, 60_000.0);
        assert!((grand.total - 66_080.0).abs() < 1e-6);
    }

    #[test]
    fn test_add_remove_duplicate() {
        let mut form = OrderForm::new(catalog());
        let a = form.lines[0].row_id;
        form.select_product(a, Some(8)).expect("select");
        let copy = form.duplicate_line(a).expect("dup");
        assert_ne!(copy, a);
        assert_eq!(form.lines[1].producto_id, Some(8));

        form.remove_line(a).expect("remove");
        assert_eq!(form.lines.len(), 1);
        form.remove_line(copy).expect("remove last");
        assert_eq!(form.lines.len(), 1);
        assert_eq!(form.lines[0].producto_id, None);
        assert!(form.remove_line(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_form_validity_ignores_empty_rows() {
        let today = day("2024-06-15");
        let mut form = OrderForm::new(catalog());
        assert_eq!(form.first_problem(today).as_deref(), Some("Selecciona un proveedor"));
        form.proveedor_id = Some(3);
        assert_eq!(form.first_problem(today).as_deref(), Some("Agrega al menos un producto"));

        let row = form.lines[0].row_id;
        form.select_product(row, Some(7)).expect("select");
        form.set_quantity(row, "").expect("qty");
        assert_eq!(
            form.first_problem(today).as_deref(),
            Some("Producto 1: Cantidad requerida")
        );
        form.set_quantity(row, "12").expect("qty");
        form.set_expiry(row, "2024-08-01").expect("date");
        form.add_line().expect("empty row");
        assert!(form.is_valid(today));
    }

    #[test]
    fn test_form_fields_encoding() {
        let today = day("2024-06-15");
        let mut form = OrderForm::new(catalog());
        form.proveedor_id = Some(3);
        form.forma_pago = PaymentForm::Pse;
        form.observaciones = "Entregar en la mañana".into();
        let row = form.lines[0].row_id;
        form.select_product(row, Some(7)).expect("select");
        form.set_quantity(row, "12").expect("qty");
        form.set_expiry(row, "2024-08-01").expect("date");
        form.add_line().expect("empty row");

        let fields = form.submission(today).expect("fields");
        assert_eq!(value(&fields, "proveedor"), Some("3"));
        assert_eq!(value(&fields, "forma_pago"), Some("pse"));
        assert_eq!(value(&fields, "estado"), Some("solicitado"));
        assert_eq!(value(&fields, "reabastecimientodetalle_set-TOTAL_FORMS"), Some("1"));
        assert_eq!(value(&fields, "reabastecimientodetalle_set-0-producto"), Some("7"));
        assert_eq!(value(&fields, "reabastecimientodetalle_set-0-costo_unitario"), Some("3200"));
        assert_eq!(
            value(&fields, "reabastecimientodetalle_set-0-fecha_caducidad"),
            Some("2024-08-01")
        );
        assert_eq!(value(&fields, "reabastecimientodetalle_set-1-producto"), None);
    }

    #[test]
    fn test_draft_needs_only_supplier_and_forces_borrador() {
        let mut form = OrderForm::new(catalog());
        assert!(form.draft_submission().is_err());
        form.proveedor_id = Some(1);
        form.estado = OrderState::Recibido;
        let fields = form.draft_submission().expect("draft");
        assert_eq!(value(&fields, "estado"), Some("borrador"));
        assert_eq!(value(&fields, "reabastecimientodetalle_set-TOTAL_FORMS"), Some("0"));
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(PaymentForm::parse("tarjeta_credito"), Some(PaymentForm::TarjetaCredito));
        assert_eq!(PaymentForm::parse("bitcoin"), None);
        assert_eq!(OrderState::parse(" cancelado "), Some(OrderState::Cancelado));
    }

    fn stored_order() -> ReabastecimientoDetalle {
        serde_json::from_value(serde_json::json!({
            "id": 55,
            "proveedor_id": 3,
            "proveedor_nombre": "Lácteos del Caribe",
            "fecha": "2024-06-01T09:30:00",
            "estado": "solicitado",
            "forma_pago": "cheque",
            "observaciones": "Llamar antes",
            "costo_total": "76160",
            "iva": "12160",
            "detalles": [
                {"id": 501, "producto_id": 7, "producto_nombre": "Leche Alquería 1L",
                 "cantidad": 20, "costo_unitario": "3200", "fecha_caducidad": "2024-09-01"},
                {"id": 502, "producto_id": 8, "producto_nombre": "Huevos AA x30",
                 "cantidad": 2, "costo_unitario": "14000", "fecha_caducidad": null}
            ]
        }))
        .expect("details")
    }

    #[test]
    fn test_load_existing_prefills_header_and_lines() {
        let form = OrderForm::load_existing(catalog(), &stored_order()).expect("load");
        assert_eq!(form.editing, Some(55));
        assert_eq!(form.proveedor_id, Some(3));
        assert_eq!(form.forma_pago, PaymentForm::Cheque);
        assert_eq!(form.observaciones, "Llamar antes");
        assert_eq!(form.lines.len(), 2);
        assert_eq!(form.lines[0].detalle_id, Some(501));
        assert_eq!(form.lines[0].tasa_iva_id, Some(2));
        assert_eq!(form.lines[0].fecha_caducidad, Some(day("2024-09-01")));
        assert_eq!(form.lines[1].fecha_caducidad, None);
        assert_eq!(form.submit_path(), "/suppliers/reabastecimientos/55/actualizar/");
        assert_eq!(OrderForm::new(catalog()).submit_path(), CREATE_PATH);

        let mut received = stored_order();
        received.estado = "recibido".into();
        assert_eq!(
            OrderForm::load_existing(catalog(), &received).unwrap_err(),
            "No se puede editar un reabastecimiento recibido."
        );
    }

    #[test]
    fn test_edit_fields_mark_stored_and_deleted_rows() {
        let today = day("2024-06-15");
        let mut form = OrderForm::load_existing(catalog(), &stored_order()).expect("load");
        let huevos = form.lines[1].row_id;
        form.remove_line(huevos).expect("remove");
        let row = form.add_line().expect("add");
        form.select_product(row, Some(8)).expect("select");
        form.set_quantity(row, "3").expect("qty");
        form.set_expiry(row, "2024-07-30").expect("date");

        let fields = form.submission(today).expect("fields");
        let prefix = "reabastecimientodetalle_set";
        assert_eq!(value(&fields, &format!("{prefix}-TOTAL_FORMS")), Some("3"));
        assert_eq!(value(&fields, &format!("{prefix}-INITIAL_FORMS")), Some("2"));
        assert_eq!(value(&fields, &format!("{prefix}-0-id")), Some("501"));
        assert_eq!(value(&fields, &format!("{prefix}-0-cantidad")), Some("20"));
        assert_eq!(value(&fields, &format!("{prefix}-1-id")), Some("502"));
        assert_eq!(value(&fields, &format!("{prefix}-1-DELETE")), Some("on"));
        assert_eq!(value(&fields, &format!("{prefix}-2-id")), None);
        assert_eq!(value(&fields, &format!("{prefix}-2-producto")), Some("8"));
    }

    #[test]
    fn test_import_replaces_every_line() {
        let mut form = OrderForm::load_existing(catalog(), &stored_order()).expect("load");
        let rows = vec![
            FilaImportada {
                producto_id: 8,
                producto_nombre: "Huevos AA x30".into(),
                cantidad: 6,
                costo_unitario: 13_500.0,
                fecha_caducidad: Some("2024-07-20".into()),
                tasa_iva_id: None,
            },
            FilaImportada {
                producto_id: 99,
                producto_nombre: "Desconocido".into(),
                cantidad: 1,
                costo_unitario: 10.0,
                fecha_caducidad: None,
                tasa_iva_id: None,
            },
        ];
        let outcome = form.replace_lines_from_import(&rows).expect("import");
        assert_eq!(outcome, ImportOutcome { imported: 1, skipped: vec![99] });
        assert_eq!(form.lines.len(), 1);
        assert_eq!(form.lines[0].producto_id, Some(8));
        assert_eq!(form.lines[0].cantidad, Some(6));
        assert_eq!(form.lines[0].costo_unitario, Some(13_500.0));
        assert_eq!(form.lines[0].fecha_caducidad, Some(day("2024-07-20")));
        assert_eq!(form.lines[0].detalle_id, None);
        assert_eq!(form.removed_detalles, vec![501, 502]);

        let before = form.lines.clone();
        assert!(form.replace_lines_from_import(&rows[1..]).is_err());
        assert!(form.replace_lines_from_import(&[]).is_err());
        assert_eq!(form.lines, before);
    }
}
