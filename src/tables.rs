//! Dine-in tables (mesas): active table, widget statistics and bill
//! conversions.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use crate::cart::{Cart, CartLine};
use crate::data_helpers::{read_local_json, remove_local, write_local_json};
use crate::db;
use crate::schema::{EstadoMesa, MesaDto, MesaItemDto, MesaItemNuevo};

/// Local storage key for the active table id.
pub const ACTIVE_TABLE_KEY: &str = "mesa_activa";

/// Minutes a bill may stay open before the table is flagged.
pub const ALERT_AFTER_MINUTES: i64 = 90;

pub const MAX_ANNOTATION_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Parse the backend's opening timestamp. Offset-less values are local time.
pub fn parse_opened_at(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
}

pub fn minutes_open(opened: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - opened).num_minutes().max(0)
}

/// `Xh Ym` when at least an hour has passed, otherwise `Ym`.
pub fn elapsed_label(opened: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = minutes_open(opened, now);
    let (hours, rest) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}h {rest}m")
    } else {
        format!("{rest}m")
    }
}

pub fn needs_attention(mesa: &MesaDto, now: DateTime<Utc>) -> bool {
    mesa.fecha_apertura
        .as_deref()
        .and_then(parse_opened_at)
        .map(|opened| minutes_open(opened, now) >= ALERT_AFTER_MINUTES)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Widget statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupiedTable {
    pub id: i64,
    pub numero: String,
    pub nombre: String,
    pub total_cuenta: f64,
    pub tiempo: String,
    pub alerta: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WidgetStats {
    pub disponibles: usize,
    pub ocupadas: usize,
    pub reservadas: usize,
    pub total_abierto: f64,
    pub abiertas: Vec<OccupiedTable>,
    pub alertas: usize,
}

pub fn widget_stats(mesas: &[MesaDto], now: DateTime<Utc>) -> WidgetStats {
    let count = |estado: EstadoMesa| mesas.iter().filter(|m| m.estado == estado).count();

    let abiertas: Vec<OccupiedTable> = mesas
        .iter()
        .filter(|m| m.cuenta_abierta)
        .map(|m| OccupiedTable {
            id: m.id,
            numero: m.numero.clone(),
            nombre: m.nombre.clone(),
            total_cuenta: m.total_cuenta,
            tiempo: m
                .fecha_apertura
                .as_deref()
                .and_then(parse_opened_at)
                .map(|opened| elapsed_label(opened, now))
                .unwrap_or_default(),
            alerta: needs_attention(m, now),
        })
        .collect();

    WidgetStats {
        disponibles: count(EstadoMesa::Disponible),
        ocupadas: count(EstadoMesa::Ocupada),
        reservadas: count(EstadoMesa::Reservada),
        total_abierto: abiertas.iter().map(|m| m.total_cuenta).sum(),
        alertas: mesas.iter().filter(|m| needs_attention(m, now)).count(),
        abiertas,
    }
}

// ---------------------------------------------------------------------------
// Active table
// ---------------------------------------------------------------------------

pub fn load_active_table(db: &db::DbState) -> Result<Option<i64>, String> {
    let value = read_local_json(db, ACTIVE_TABLE_KEY)?;
    Ok(value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok())))
}

pub fn save_active_table(db: &db::DbState, mesa_id: i64) -> Result<(), String> {
    write_local_json(db, ACTIVE_TABLE_KEY, &serde_json::json!(mesa_id))
}

pub fn clear_active_table(db: &db::DbState) -> Result<(), String> {
    remove_local(db, ACTIVE_TABLE_KEY).map(|_| ())
}

/// Keep a stored table only if the backend still lists it with an open
/// bill.
pub fn validate_active_table(stored: Option<i64>, mesas: &[MesaDto]) -> Option<i64> {
    let id = stored?;
    mesas
        .iter()
        .find(|m| m.id == id && m.cuenta_abierta)
        .map(|m| m.id)
}

// ---------------------------------------------------------------------------
// Bills and validation
// ---------------------------------------------------------------------------

/// Turn a table bill into cart lines for checkout. Each bill item's own
/// quantity is its ceiling; repeated (product, lot) items are merged.
pub fn bill_to_cart(items: &[MesaItemDto]) -> Cart {
    Cart::from_lines(
        items
            .iter()
            .filter(|item| item.cantidad > 0)
            .map(|item| CartLine {
                producto_id: item.producto_id,
                nombre: item.producto.clone(),
                precio: item.precio_unitario,
                cantidad: item.cantidad,
                lote_id: item.lote_id,
                max_stock: bill_quantity_for(items, item.producto_id, item.lote_id),
            })
            .collect(),
    )
}

fn bill_quantity_for(items: &[MesaItemDto], producto_id: i64, lote_id: i64) -> i64 {
    items
        .iter()
        .filter(|i| i.producto_id == producto_id && i.lote_id == lote_id)
        .map(|i| i.cantidad.max(0))
        .sum()
}

/// Cart lines as items for `mesa/<id>/agregar-item/`.
pub fn cart_to_table_items(cart: &Cart, anotacion: &str) -> Vec<MesaItemNuevo> {
    cart.lines()
        .iter()
        .map(|line| MesaItemNuevo {
            producto_id: line.producto_id,
            lote_id: line.lote_id,
            cantidad: line.cantidad,
            anotacion: anotacion.to_string(),
        })
        .collect()
}

pub fn validate_table_name(nombre: &str) -> Result<String, String> {
    let trimmed = nombre.trim();
    if trimmed.is_empty() {
        return Err("El nombre de la mesa es obligatorio".into());
    }
    Ok(trimmed.to_string())
}

pub fn validate_annotation(anotacion: &str) -> Result<String, String> {
    let trimmed = anotacion.trim();
    if trimmed.chars().count() > MAX_ANNOTATION_CHARS {
        return Err(format!(
            "La anotación no puede superar {MAX_ANNOTATION_CHARS} caracteres"
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn mesa(id: i64, estado: EstadoMesa, abierta: bool, total: f64, apertura: Option<&str>) -> MesaDto {
        MesaDto {
            id,
            numero: id.to_string(),
            nombre: format!("Mesa {id}"),
            estado,
            cuenta_abierta: abierta,
            total_cuenta: total,
            fecha_apertura: apertura.map(str::to_string),
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T14:00:00Z")
            .expect("now")
            .with_timezone(&Utc)
    }

    #[test]
    fn test_elapsed_label() {
        let n = now();
        assert_eq!(elapsed_label(n - Duration::minutes(45), n), "45m");
        assert_eq!(elapsed_label(n - Duration::minutes(125), n), "2h 5m");
        assert_eq!(elapsed_label(n + Duration::minutes(5), n), "0m");
    }

    #[test]
    fn test_alert_at_ninety_minutes() {
        let n = now();
        let at_89 = mesa(1, EstadoMesa::Ocupada, true, 0.0, Some("2024-05-01T12:31:00Z"));
        let at_90 = mesa(2, EstadoMesa::Ocupada, true, 0.0, Some("2024-05-01T12:30:00Z"));
        let never_opened = mesa(3, EstadoMesa::Disponible, false, 0.0, None);
        assert!(!needs_attention(&at_89, n));
        assert!(needs_attention(&at_90, n));
        assert!(!needs_attention(&never_opened, n));
    }

    #[test]
    fn test_widget_stats() {
        let mesas = vec![
            mesa(1, EstadoMesa::Disponible, false, 0.0, None),
            mesa(2, EstadoMesa::Ocupada, true, 15000.0, Some("2024-05-01T13:20:00Z")),
            mesa(3, EstadoMesa::Ocupada, true, 8000.5, Some("2024-05-01T11:00:00+00:00")),
            mesa(4, EstadoMesa::Reservada, false, 0.0, None),
            mesa(5, EstadoMesa::Disponible, false, 0.0, None),
        ];
        let stats = widget_stats(&mesas, now());
        assert_eq!(stats.disponibles, 2);
        assert_eq!(stats.ocupadas, 2);
        assert_eq!(stats.reservadas, 1);
        assert!((stats.total_abierto - 23000.5).abs() < 1e-9);
        assert_eq!(stats.abiertas.len(), 2);
        assert_eq!(stats.abiertas[0].tiempo, "40m");
        assert!(!stats.abiertas[0].alerta);
        assert_eq!(stats.abiertas[1].tiempo, "3h 0m");
        assert!(stats.abiertas[1].alerta);
        assert_eq!(stats.alertas, 1);
    }

    #[test]
    fn test_validate_active_table() {
        let mesas = vec![
            mesa(1, EstadoMesa::Disponible, false, 0.0, None),
            mesa(2, EstadoMesa::Ocupada, true, 100.0, None),
        ];
        assert_eq!(validate_active_table(Some(2), &mesas), Some(2));
        assert_eq!(validate_active_table(Some(1), &mesas), None);
        assert_eq!(validate_active_table(Some(9), &mesas), None);
        assert_eq!(validate_active_table(None, &mesas), None);
    }

    #[test]
    fn test_active_table_persistence() {
        let db = db::open_in_memory().expect("db");
        assert_eq!(load_active_table(&db).expect("load"), None);
        save_active_table(&db, 6).expect("save");
        assert_eq!(load_active_table(&db).expect("load"), Some(6));
        clear_active_table(&db).expect("clear");
        assert_eq!(load_active_table(&db).expect("load"), None);
    }

    #[test]
    fn test_active_table_stored_as_string_is_read() {
        let db = db::open_in_memory().expect("db");
        write_local_json(&db, ACTIVE_TABLE_KEY, &serde_json::json!("12")).expect("write");
        assert_eq!(load_active_table(&db).expect("load"), Some(12));
    }

    #[test]
    fn test_bill_to_cart_uses_bill_quantities_as_ceiling() {
        let item = |id, producto_id, lote_id, cantidad| MesaItemDto {
            id,
            producto_id,
            producto: format!("P{producto_id}"),
            precio_unitario: 1000.0,
            cantidad,
            lote_id,
            anotacion: String::new(),
            subtotal: 1000.0 * cantidad as f64,
        };
        let cart = bill_to_cart(&[item(1, 5, 50, 2), item(2, 5, 50, 1), item(3, 6, 60, 4)]);
        assert_eq!(cart.len(), 2);
        let merged = cart.line(5, 50).expect("merged line");
        assert_eq!((merged.cantidad, merged.max_stock), (3, 3));
        assert!((cart.subtotal() - 7000.0).abs() < 1e-9);

        let items = cart_to_table_items(&cart, "sin hielo");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].anotacion, "sin hielo");
    }

    #[test]
    fn test_name_and_annotation_validation() {
        assert!(validate_table_name("   ").is_err());
        assert_eq!(validate_table_name(" Terraza ").as_deref(), Ok("Terraza"));
        assert!(validate_annotation(&"x".repeat(200)).is_ok());
        assert!(validate_annotation(&"x".repeat(201)).is_err());
        assert_eq!(validate_annotation("ñ".repeat(200).as_str()).map(|s| s.chars().count()), Ok(200));
    }
}
