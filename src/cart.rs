//! Cart state, lot ceilings and stock badge reconciliation.
//!
//! A cart line is keyed by (product, lot). Its quantity never exceeds the
//! lot quantity last observed for that lot. Badges show the product's real
//! stock minus what is already in the cart.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::allocation::Allocation;
use crate::data_helpers::{read_local_as, write_local_as};
use crate::db;

/// Local storage key for the serialized cart.
pub const CART_KEY: &str = "carrito_pos";

pub const DEFAULT_TAX_RATE: f64 = 0.19;

/// Badge threshold below which stock is highlighted.
pub const LOW_STOCK_THRESHOLD: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub producto_id: i64,
    pub nombre: String,
    pub precio: f64,
    pub cantidad: i64,
    pub lote_id: i64,
    pub max_stock: i64,
}

impl CartLine {
    pub fn subtotal(&self) -> f64 {
        self.precio * self.cantidad as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("No puedes agregar más. Stock máximo disponible: {max}")]
    ExceedsLotCeiling { max: i64 },
    #[error("Stock insuficiente. Disponible: {available}")]
    InsufficientStock { available: i64 },
    #[error("Cantidad inválida")]
    InvalidQuantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityUpdate {
    Removed,
    Updated(i64),
    /// Requested more than the lot holds; quantity set to the ceiling.
    Clamped { max: i64 },
    NotInCart,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// Rebuild a cart from stored lines, merging duplicate (product, lot)
    /// pairs and clamping quantities to their ceilings.
    pub fn from_lines(lines: Vec<CartLine>) -> Self {
        let mut cart = Cart::default();
        for line in lines {
            if line.cantidad <= 0 {
                continue;
            }
            match cart.position(line.producto_id, line.lote_id) {
                Some(idx) => {
                    let existing = &mut cart.lines[idx];
                    existing.max_stock = line.max_stock;
                    existing.cantidad = (existing.cantidad + line.cantidad).min(line.max_stock);
                }
                None => {
                    let cantidad = line.cantidad.min(line.max_stock);
                    cart.lines.push(CartLine { cantidad, ..line });
                }
            }
        }
        cart.lines.retain(|l| l.cantidad > 0);
        cart
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    fn position(&self, producto_id: i64, lote_id: i64) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| l.producto_id == producto_id && l.lote_id == lote_id)
    }

    pub fn line(&self, producto_id: i64, lote_id: i64) -> Option<&CartLine> {
        self.position(producto_id, lote_id).map(|i| &self.lines[i])
    }

    /// Add units of one lot. Merges into an existing line after refreshing
    /// its ceiling to `line.max_stock`; rejects the added units when the
    /// result would exceed that ceiling. Returns the line's new quantity.
    pub fn add(&mut self, line: CartLine) -> Result<i64, CartError> {
        if line.cantidad <= 0 {
            return Err(CartError::InvalidQuantity);
        }
        match self.position(line.producto_id, line.lote_id) {
            Some(idx) => {
                let existing = &mut self.lines[idx];
                existing.max_stock = line.max_stock;
                // lot shrank since the line was created
                existing.cantidad = existing.cantidad.min(existing.max_stock);
                let merged = existing.cantidad + line.cantidad;
                if merged > existing.max_stock {
                    return Err(CartError::ExceedsLotCeiling {
                        max: existing.max_stock,
                    });
                }
                existing.cantidad = merged;
                Ok(merged)
            }
            None => {
                if line.cantidad > line.max_stock {
                    return Err(CartError::InsufficientStock {
                        available: line.max_stock,
                    });
                }
                let cantidad = line.cantidad;
                self.lines.push(line);
                Ok(cantidad)
            }
        }
    }

    /// Add every slice of an allocation as its own line. Stops at the first
    /// rejected slice and reports it.
    pub fn add_allocation(
        &mut self,
        producto_id: i64,
        nombre: &str,
        precio: f64,
        allocation: &Allocation,
    ) -> Result<i64, CartError> {
        let mut added = 0;
        for slice in &allocation.lines {
            self.add(CartLine {
                producto_id,
                nombre: nombre.to_string(),
                precio,
                cantidad: slice.cantidad,
                lote_id: slice.lote_id,
                max_stock: slice.max_stock,
            })?;
            added += slice.cantidad;
        }
        Ok(added)
    }

    pub fn set_quantity(&mut self, producto_id: i64, lote_id: i64, cantidad: i64) -> QuantityUpdate {
        let Some(idx) = self.position(producto_id, lote_id) else {
            return QuantityUpdate::NotInCart;
        };
        if cantidad <= 0 {
            self.lines.remove(idx);
            return QuantityUpdate::Removed;
        }
        let line = &mut self.lines[idx];
        if cantidad > line.max_stock {
            line.cantidad = line.max_stock;
            return QuantityUpdate::Clamped {
                max: line.max_stock,
            };
        }
        line.cantidad = cantidad;
        QuantityUpdate::Updated(cantidad)
    }

    pub fn remove(&mut self, producto_id: i64, lote_id: i64) -> Option<CartLine> {
        self.position(producto_id, lote_id)
            .map(|idx| self.lines.remove(idx))
    }

    /// Empty the cart, returning the products whose badges need a refresh.
    pub fn clear(&mut self) -> Vec<i64> {
        let ids = self.product_ids();
        self.lines.clear();
        ids
    }

    /// Take back units that left the cart in a request, given as
    /// `(producto_id, lote_id, cantidad)`. Lines added or grown since the
    /// snapshot keep the difference. Returns the products touched.
    pub fn subtract_sent(&mut self, sent: &[(i64, i64, i64)]) -> Vec<i64> {
        let mut touched: Vec<i64> = Vec::new();
        for &(producto_id, lote_id, cantidad) in sent {
            let Some(idx) = self.position(producto_id, lote_id) else {
                continue;
            };
            let line = &mut self.lines[idx];
            line.cantidad -= cantidad;
            if line.cantidad <= 0 {
                self.lines.remove(idx);
            }
            if !touched.contains(&producto_id) {
                touched.push(producto_id);
            }
        }
        touched
    }

    pub fn quantity_for_product(&self, producto_id: i64) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.producto_id == producto_id)
            .map(|l| l.cantidad)
            .sum()
    }

    /// Distinct product ids in insertion order.
    pub fn product_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = Vec::new();
        for line in &self.lines {
            if !ids.contains(&line.producto_id) {
                ids.push(line.producto_id);
            }
        }
        ids
    }

    pub fn item_count(&self) -> i64 {
        self.lines.iter().map(|l| l.cantidad).sum()
    }

    pub fn subtotal(&self) -> f64 {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    pub fn totals(&self, policy: TaxPolicy) -> CartTotals {
        let subtotal = self.subtotal();
        let impuesto = subtotal * policy.rate;
        let total = match policy.mode {
            TaxMode::Included => subtotal,
            TaxMode::Additive => subtotal + impuesto,
        };
        CartTotals {
            subtotal,
            impuesto,
            total,
            items: self.item_count(),
            tax_mode: policy.mode,
        }
    }
}

// ---------------------------------------------------------------------------
// Totals
// ---------------------------------------------------------------------------

/// Whether the tax figure is already inside the prices or added on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaxMode {
    #[default]
    Included,
    Additive,
}

impl TaxMode {
    pub fn from_value(value: Option<&str>) -> Self {
        match value.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            Some("additive") | Some("aditivo") => Self::Additive,
            _ => Self::Included,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Included => "included",
            Self::Additive => "additive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaxPolicy {
    pub mode: TaxMode,
    pub rate: f64,
}

impl Default for TaxPolicy {
    fn default() -> Self {
        Self {
            mode: TaxMode::Included,
            rate: DEFAULT_TAX_RATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CartTotals {
    pub subtotal: f64,
    pub impuesto: f64,
    pub total: f64,
    pub items: i64,
    pub tax_mode: TaxMode,
}

// ---------------------------------------------------------------------------
// Stock badges
// ---------------------------------------------------------------------------

/// Rendered state of one product card's stock badge and add button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockBadge {
    pub producto_id: i64,
    pub real: i64,
    pub in_cart: i64,
    pub available: i64,
    pub text: String,
    pub css_class: &'static str,
    pub button_disabled: bool,
    pub button_label: &'static str,
}

/// Cached real stock per product, read once from the first rendering of
/// each card and never refetched.
#[derive(Debug, Clone, Default)]
pub struct StockLedger {
    real: HashMap<i64, i64>,
}

impl StockLedger {
    /// Record the stock shown on a freshly rendered card. Later observations
    /// for the same product are ignored.
    pub fn observe(&mut self, producto_id: i64, stock: i64) -> i64 {
        *self.real.entry(producto_id).or_insert(stock)
    }

    /// Infer stock from badge text such as `Stock: 12`.
    pub fn observe_badge_text(&mut self, producto_id: i64, text: &str) -> i64 {
        let parsed = first_integer(text).unwrap_or(0);
        self.observe(producto_id, parsed)
    }

    pub fn real_stock(&self, producto_id: i64) -> Option<i64> {
        self.real.get(&producto_id).copied()
    }

    pub fn forget(&mut self, producto_id: i64) {
        self.real.remove(&producto_id);
    }

    /// Badge for a product, `None` when no card has been observed for it.
    pub fn badge(&self, producto_id: i64, cart: &Cart) -> Option<StockBadge> {
        let real = self.real_stock(producto_id)?;
        let in_cart = cart.quantity_for_product(producto_id);
        let available = real - in_cart;

        let (text, css_class) = if in_cart > 0 {
            (
                format!("Stock: {available} ({in_cart} en carrito)"),
                "bg-warning text-dark",
            )
        } else if real <= LOW_STOCK_THRESHOLD {
            (format!("Stock: {real}"), "bg-warning text-dark")
        } else {
            (format!("Stock: {real}"), "bg-info")
        };

        let button_disabled = available <= 0;
        Some(StockBadge {
            producto_id,
            real,
            in_cart,
            available,
            text,
            css_class,
            button_disabled,
            button_label: if button_disabled { "Sin stock" } else { "Agregar" },
        })
    }

    /// Badges for several products, skipping unobserved ones.
    pub fn badges(&self, producto_ids: &[i64], cart: &Cart) -> Vec<StockBadge> {
        producto_ids
            .iter()
            .filter_map(|id| self.badge(*id, cart))
            .collect()
    }
}

/// First run of ASCII digits in `text`.
pub fn first_integer(text: &str) -> Option<i64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

pub fn load_cart(db: &db::DbState) -> Result<Cart, String> {
    let lines: Option<Vec<CartLine>> = read_local_as(db, CART_KEY)?;
    Ok(Cart::from_lines(lines.unwrap_or_default()))
}

pub fn save_cart(db: &db::DbState, cart: &Cart) -> Result<(), String> {
    write_local_as(db, CART_KEY, &cart.lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{allocate, Expiry, Lot};

    fn line(producto_id: i64, lote_id: i64, cantidad: i64, max_stock: i64) -> CartLine {
        CartLine {
            producto_id,
            nombre: format!("Producto {producto_id}"),
            precio: 10.0,
            cantidad,
            lote_id,
            max_stock,
        }
    }

    #[test]
    fn test_add_merges_same_product_and_lot() {
        let mut cart = Cart::default();
        assert_eq!(cart.add(line(1, 10, 2, 5)), Ok(2));
        assert_eq!(cart.add(line(1, 10, 3, 5)), Ok(5));
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.add(line(1, 11, 1, 5)), Ok(1));
        assert_eq!(cart.len(), 2);
    }

    #[test]
    fn test_merge_over_ceiling_rejected_without_change() {
        let mut cart = Cart::default();
        cart.add(line(1, 10, 4, 5)).expect("add");
        let err = cart.add(line(1, 10, 2, 5)).expect_err("over ceiling");
        assert_eq!(err, CartError::ExceedsLotCeiling { max: 5 });
        assert_eq!(
            err.to_string(),
            "No puedes agregar más. Stock máximo disponible: 5"
        );
        assert_eq!(cart.line(1, 10).map(|l| l.cantidad), Some(4));
    }

    #[test]
    fn test_merge_uses_latest_observed_ceiling() {
        let mut cart = Cart::default();
        cart.add(line(1, 10, 2, 8)).expect("add");
        // lot shrank to 3 since the first add
        assert_eq!(
            cart.add(line(1, 10, 2, 3)),
            Err(CartError::ExceedsLotCeiling { max: 3 })
        );
        assert_eq!(cart.line(1, 10).map(|l| l.max_stock), Some(3));
    }

    #[test]
    fn test_new_line_over_stock_rejected() {
        let mut cart = Cart::default();
        let err = cart.add(line(2, 20, 6, 5)).expect_err("too many");
        assert_eq!(err.to_string(), "Stock insuficiente. Disponible: 5");
        assert!(cart.is_empty());
        assert_eq!(cart.add(line(2, 20, 0, 5)), Err(CartError::InvalidQuantity));
    }

    #[test]
    fn test_quantity_never_exceeds_last_ceiling_over_sequences() {
        let ceilings = [5, 3, 7, 2, 9, 1];
        let mut cart = Cart::default();
        for ceiling in ceilings {
            for qty in 1..=3 {
                let _ = cart.add(line(1, 10, qty, ceiling));
                if let Some(l) = cart.line(1, 10) {
                    assert_eq!(l.max_stock, ceiling);
                    assert!(l.cantidad <= ceiling, "{} > {ceiling}", l.cantidad);
                }
            }
        }
    }

    #[test]
    fn test_set_quantity_clamps_and_removes() {
        let mut cart = Cart::default();
        cart.add(line(1, 10, 2, 5)).expect("add");
        assert_eq!(cart.set_quantity(1, 10, 4), QuantityUpdate::Updated(4));
        assert_eq!(cart.set_quantity(1, 10, 9), QuantityUpdate::Clamped { max: 5 });
        assert_eq!(cart.line(1, 10).map(|l| l.cantidad), Some(5));
        assert_eq!(cart.set_quantity(1, 10, 0), QuantityUpdate::Removed);
        assert!(cart.is_empty());
        assert_eq!(cart.set_quantity(1, 10, 1), QuantityUpdate::NotInCart);
    }

    #[test]
    fn test_subtract_sent_keeps_later_additions() {
        let mut cart = Cart::default();
        cart.add(line(1, 10, 2, 5)).expect("add");
        cart.add(line(2, 20, 1, 5)).expect("add");
        let sent = [(1, 10, 2), (2, 20, 1)];
        // grown and added while the request was out
        cart.add(line(1, 10, 1, 5)).expect("grow");
        cart.add(line(7, 70, 3, 9)).expect("new");

        let touched = cart.subtract_sent(&sent);
        assert_eq!(touched, vec![1, 2]);
        assert_eq!(cart.line(1, 10).map(|l| l.cantidad), Some(1));
        assert!(cart.line(2, 20).is_none());
        assert_eq!(cart.line(7, 70).map(|l| l.cantidad), Some(3));
        assert!(cart.subtract_sent(&[(9, 90, 1)]).is_empty());
    }

    #[test]
    fn test_clear_reports_affected_products() {
        let mut cart = Cart::default();
        cart.add(line(1, 10, 1, 5)).expect("add");
        cart.add(line(2, 20, 1, 5)).expect("add");
        cart.add(line(1, 11, 1, 5)).expect("add");
        assert_eq!(cart.clear(), vec![1, 2]);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_totals_single_line() {
        let mut cart = Cart::default();
        cart.add(line(1, 10, 3, 5)).expect("add");
        let t = cart.totals(TaxPolicy::default());
        assert!((t.subtotal - 30.0).abs() < 1e-9);
        assert!((t.impuesto - 5.7).abs() < 1e-9);
        assert!((t.total - 30.0).abs() < 1e-9);
        assert_eq!(t.items, 3);

        let additive = cart.totals(TaxPolicy {
            mode: TaxMode::Additive,
            rate: DEFAULT_TAX_RATE,
        });
        assert!((additive.total - 35.7).abs() < 1e-9);
    }

    #[test]
    fn test_tax_mode_from_value() {
        assert_eq!(TaxMode::from_value(Some(" Additive ")), TaxMode::Additive);
        assert_eq!(TaxMode::from_value(Some("included")), TaxMode::Included);
        assert_eq!(TaxMode::from_value(None), TaxMode::Included);
    }

    #[test]
    fn test_allocation_becomes_distinct_lines() {
        let lots = vec![
            Lot {
                id: 1,
                numero_lote: "A".into(),
                cantidad: 5,
                expiry: Expiry::parse("2025-01-01"),
            },
            Lot {
                id: 2,
                numero_lote: "B".into(),
                cantidad: 3,
                expiry: Expiry::Never,
            },
        ];
        let mut cart = Cart::default();
        let added = cart
            .add_allocation(7, "Arroz", 2500.0, &allocate(&lots, 6))
            .expect("add allocation");
        assert_eq!(added, 6);
        assert_eq!(cart.line(7, 1).map(|l| (l.cantidad, l.max_stock)), Some((5, 5)));
        assert_eq!(cart.line(7, 2).map(|l| (l.cantidad, l.max_stock)), Some((1, 3)));
    }

    #[test]
    fn test_badge_tracks_cart_quantities() {
        let mut ledger = StockLedger::default();
        assert_eq!(ledger.observe_badge_text(1, "Stock: 12"), 12);
        // cached: a later badge text does not override
        assert_eq!(ledger.observe_badge_text(1, "Stock: 9 (3 en carrito)"), 12);

        let mut cart = Cart::default();
        let badge = ledger.badge(1, &cart).expect("badge");
        assert_eq!(badge.text, "Stock: 12");
        assert_eq!(badge.css_class, "bg-info");
        assert!(!badge.button_disabled);

        cart.add(line(1, 10, 5, 8)).expect("add");
        cart.add(line(1, 11, 4, 4)).expect("add");
        let badge = ledger.badge(1, &cart).expect("badge");
        assert_eq!(badge.available, 3);
        assert_eq!(badge.text, "Stock: 3 (9 en carrito)");
        assert_eq!(badge.css_class, "bg-warning text-dark");

        cart.set_quantity(1, 10, 8);
        let badge = ledger.badge(1, &cart).expect("badge");
        assert_eq!(badge.available, 0);
        assert!(badge.button_disabled);
        assert_eq!(badge.button_label, "Sin stock");

        assert!(ledger.badge(99, &cart).is_none());
    }

    #[test]
    fn test_low_stock_badge_without_cart_items() {
        let mut ledger = StockLedger::default();
        ledger.observe(3, 4);
        let badge = ledger.badge(3, &Cart::default()).expect("badge");
        assert_eq!(badge.text, "Stock: 4");
        assert_eq!(badge.css_class, "bg-warning text-dark");
    }

    #[test]
    fn test_first_integer() {
        assert_eq!(first_integer("Stock: 42 unidades"), Some(42));
        assert_eq!(first_integer("sin datos"), None);
    }

    #[test]
    fn test_from_lines_merges_and_clamps() {
        let cart = Cart::from_lines(vec![
            line(1, 10, 3, 5),
            line(1, 10, 4, 5),
            line(2, 20, 9, 2),
            line(3, 30, 0, 2),
        ]);
        assert_eq!(cart.line(1, 10).map(|l| l.cantidad), Some(5));
        assert_eq!(cart.line(2, 20).map(|l| l.cantidad), Some(2));
        assert!(cart.line(3, 30).is_none());
    }

    #[test]
    fn test_cart_persists_under_carrito_pos() {
        let db = db::open_in_memory().expect("db");
        assert!(load_cart(&db).expect("load").is_empty());

        let mut cart = Cart::default();
        cart.add(line(1, 10, 2, 5)).expect("add");
        save_cart(&db, &cart).expect("save");

        let raw = crate::data_helpers::read_local_json(&db, CART_KEY).expect("raw");
        assert_eq!(raw[0]["producto_id"], 1);
        assert_eq!(raw[0]["max_stock"], 5);
        assert_eq!(load_cart(&db).expect("load"), cart);
    }
}
