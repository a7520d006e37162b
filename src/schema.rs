//! Request and response bodies for every backend endpoint.
//!
//! The backend serialises `Decimal` fields as strings, so money and quantity
//! fields accept either JSON numbers or numeric strings.

use serde::{Deserialize, Deserializer, Serialize};

use crate::allocation::{Expiry, Lot};

// ---------------------------------------------------------------------------
// Lenient numbers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
    Null,
}

fn lenient_f64(raw: NumberOrString) -> Result<f64, String> {
    match raw {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) if s.trim().is_empty() => Ok(0.0),
        NumberOrString::Text(s) => s
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .map_err(|_| format!("not a number: {s}")),
        NumberOrString::Null => Ok(0.0),
    }
}

pub(crate) fn de_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    lenient_f64(NumberOrString::deserialize(d)?).map_err(serde::de::Error::custom)
}

pub(crate) fn de_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let value = lenient_f64(NumberOrString::deserialize(d)?).map_err(serde::de::Error::custom)?;
    Ok(value.round() as i64)
}

fn de_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
}

// ---------------------------------------------------------------------------
// POS: products and customers
// ---------------------------------------------------------------------------

/// `GET /pos/api/buscar-productos/?q=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuscarProductosResponse {
    #[serde(default)]
    pub productos: Vec<ProductoResumen>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductoResumen {
    pub id: i64,
    pub nombre: String,
    #[serde(deserialize_with = "de_f64", default)]
    pub precio: f64,
    #[serde(deserialize_with = "de_i64", default)]
    pub stock: i64,
    #[serde(default)]
    pub categoria: String,
    #[serde(default)]
    pub descripcion: String,
}

/// `GET /pos/api/producto/<id>/`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductoDetalle {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub nombre: String,
    #[serde(deserialize_with = "de_f64", default)]
    pub precio: f64,
    #[serde(deserialize_with = "de_i64", default)]
    pub stock: i64,
    #[serde(default)]
    pub categoria: String,
    #[serde(default)]
    pub descripcion: String,
    #[serde(default)]
    pub lotes: Vec<LoteDto>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoteDto {
    pub id: i64,
    #[serde(default)]
    pub numero_lote: String,
    #[serde(deserialize_with = "de_i64", default)]
    pub cantidad: i64,
    #[serde(default)]
    pub fecha_caducidad: String,
}

impl From<&LoteDto> for Lot {
    fn from(dto: &LoteDto) -> Self {
        Lot {
            id: dto.id,
            numero_lote: dto.numero_lote.clone(),
            cantidad: dto.cantidad,
            expiry: Expiry::parse(&dto.fecha_caducidad),
        }
    }
}

/// `GET /pos/api/obtener-clientes/`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientesResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub clientes: Vec<ClienteDto>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClienteDto {
    pub id: i64,
    pub nombre: String,
}

// ---------------------------------------------------------------------------
// POS: sales
// ---------------------------------------------------------------------------

/// `POST /pos/api/procesar-venta/`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcesarVentaRequest {
    pub cliente_id: i64,
    pub metodo_pago: String,
    pub canal_venta: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monto_recibido: Option<f64>,
    pub items: Vec<VentaItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VentaItem {
    pub producto_id: i64,
    pub lote_id: i64,
    pub cantidad: i64,
    pub precio: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcesarVentaResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub venta_id: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub total: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub puntos_ganados: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub mensaje: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub error: Option<String>,
}

fn de_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    match NumberOrString::deserialize(d)? {
        NumberOrString::Null => Ok(None),
        other => lenient_f64(other).map(Some).map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// POS: tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstadoMesa {
    Disponible,
    Ocupada,
    Reservada,
    #[serde(other)]
    Desconocido,
}

/// `GET /pos/api/mesas/`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MesasResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub mesas: Vec<MesaDto>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MesaDto {
    pub id: i64,
    #[serde(default)]
    pub numero: String,
    #[serde(default)]
    pub nombre: String,
    pub estado: EstadoMesa,
    #[serde(default)]
    pub cuenta_abierta: bool,
    #[serde(deserialize_with = "de_f64", default)]
    pub total_cuenta: f64,
    #[serde(default)]
    pub fecha_apertura: Option<String>,
}

/// Body for `mesa/crear/` and `mesa/<id>/editar/`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MesaForm {
    pub nombre: String,
    pub descripcion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbrirMesaRequest {
    pub cliente_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgregarItemsRequest {
    pub items: Vec<MesaItemNuevo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MesaItemNuevo {
    pub producto_id: i64,
    pub lote_id: i64,
    pub cantidad: i64,
    pub anotacion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditarItemRequest {
    pub anotacion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CerrarMesaRequest {
    pub metodo_pago: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monto_recibido: Option<f64>,
    pub cliente_id: i64,
}

/// Generic `{success, ...}` reply of table mutations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MesaAccionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub mesa_id: Option<i64>,
    #[serde(default)]
    pub mesa_numero: Option<String>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub total_cuenta: Option<f64>,
    #[serde(default)]
    pub venta_id: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub mensaje: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub error: Option<String>,
}

/// `GET /pos/api/mesa/<id>/items/`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MesaItemsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub items: Vec<MesaItemDto>,
    #[serde(deserialize_with = "de_f64", default)]
    pub total: f64,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MesaItemDto {
    pub id: i64,
    pub producto_id: i64,
    #[serde(default)]
    pub producto: String,
    #[serde(deserialize_with = "de_f64", default)]
    pub precio_unitario: f64,
    #[serde(deserialize_with = "de_i64", default)]
    pub cantidad: i64,
    pub lote_id: i64,
    #[serde(default)]
    pub anotacion: String,
    #[serde(deserialize_with = "de_f64", default)]
    pub subtotal: f64,
}

// ---------------------------------------------------------------------------
// Suppliers: reception
// ---------------------------------------------------------------------------

/// `GET /suppliers/reabastecimientos/<id>/details_api/`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReabastecimientoDetalle {
    pub id: i64,
    #[serde(default)]
    pub proveedor_id: Option<i64>,
    #[serde(default)]
    pub proveedor_nombre: String,
    #[serde(default)]
    pub fecha: String,
    #[serde(default)]
    pub estado: String,
    #[serde(deserialize_with = "de_f64", default)]
    pub costo_total: f64,
    #[serde(deserialize_with = "de_f64", default)]
    pub iva: f64,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub forma_pago: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub observaciones: Option<String>,
    #[serde(default)]
    pub detalles: Vec<DetalleDto>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetalleDto {
    pub id: i64,
    #[serde(default)]
    pub producto_id: Option<i64>,
    #[serde(default)]
    pub producto_nombre: String,
    #[serde(deserialize_with = "de_i64", default)]
    pub cantidad: i64,
    #[serde(deserialize_with = "de_i64", default)]
    pub cantidad_recibida: i64,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub fecha_caducidad: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub numero_lote: Option<String>,
    #[serde(deserialize_with = "de_f64", default)]
    pub costo_unitario: f64,
}

/// Body of `POST /suppliers/reabastecimientos/<id>/recibir/`; also the shape
/// of the local `draft_<id>` snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecepcionPayload {
    #[serde(default)]
    pub detalles: Vec<RecepcionLinea>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecepcionLinea {
    pub id: i64,
    #[serde(deserialize_with = "de_i64", default)]
    pub cantidad_recibida: i64,
    #[serde(default)]
    pub fecha_caducidad: String,
    #[serde(default)]
    pub numero_lote: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecibirResponse {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub estado: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Suppliers: order creation
// ---------------------------------------------------------------------------

/// Reply of `POST /suppliers/reabastecimientos/crear/`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrearReabastecimientoResponse {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub fecha: Option<String>,
    #[serde(default)]
    pub proveedor: Option<String>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub costo_total: Option<f64>,
    #[serde(default)]
    pub forma_pago: Option<String>,
    #[serde(default)]
    pub estado: Option<String>,
    #[serde(default)]
    pub observaciones: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub error: Option<String>,
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
    #[serde(default)]
    pub formset_errors: Option<serde_json::Value>,
}

impl CrearReabastecimientoResponse {
    /// Flatten server-side form errors into one message.
    pub fn error_message(&self) -> Option<String> {
        if let Some(err) = self.error.as_deref() {
            return Some(err.to_string());
        }
        let mut parts = Vec::new();
        for value in [self.errors.as_ref(), self.formset_errors.as_ref()]
            .into_iter()
            .flatten()
        {
            collect_error_strings(value, &mut parts);
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

/// `GET /suppliers/api/search_proveedores/?q=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProveedoresBusqueda {
    #[serde(default)]
    pub results: Vec<ProveedorOpcion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProveedorOpcion {
    pub id: i64,
    #[serde(default)]
    pub text: String,
}

/// `GET /suppliers/reabastecimientos/<id>/audit_history/`, newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditoriaResponse {
    #[serde(default)]
    pub auditorias: Vec<AuditoriaEntrada>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditoriaEntrada {
    #[serde(default)]
    pub accion: String,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub usuario: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub fecha: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub descripcion: Option<String>,
    #[serde(default)]
    pub cantidad_anterior: Option<i64>,
    #[serde(default)]
    pub cantidad_nueva: Option<i64>,
}

/// Reply of `POST /suppliers/reabastecimientos/<id>/eliminar/`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EliminarResponse {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub error: Option<String>,
}

/// Reply of `POST /suppliers/reabastecimientos/import/excel/`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportacionExcel {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Vec<FilaImportada>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// One product row parsed from the restock spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilaImportada {
    #[serde(deserialize_with = "de_i64")]
    pub producto_id: i64,
    #[serde(default)]
    pub producto_nombre: String,
    #[serde(deserialize_with = "de_i64", default)]
    pub cantidad: i64,
    #[serde(deserialize_with = "de_f64", default)]
    pub costo_unitario: f64,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub fecha_caducidad: Option<String>,
    #[serde(default)]
    pub tasa_iva_id: Option<i64>,
}

fn collect_error_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_error_strings(v, out)),
        serde_json::Value::Object(map) => {
            for (field, v) in map {
                let mut inner = Vec::new();
                collect_error_strings(v, &mut inner);
                out.extend(inner.into_iter().map(|msg| {
                    if field == "__all__" {
                        msg
                    } else {
                        format!("{field}: {msg}")
                    }
                }));
            }
        }
        _ => {}
    }
}

/// Product entry of the restocking catalog embedded in the order page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogoProducto {
    pub id: i64,
    pub nombre: String,
    #[serde(deserialize_with = "de_f64", default)]
    pub precio_unitario: f64,
    #[serde(default)]
    pub tasa_iva_id: Option<i64>,
    #[serde(deserialize_with = "de_i64", default)]
    pub stock_actual: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasaIva {
    pub id: i64,
    #[serde(default)]
    pub nombre: String,
    #[serde(deserialize_with = "de_f64", default)]
    pub porcentaje: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalogo {
    #[serde(default)]
    pub productos: Vec<CatalogoProducto>,
    #[serde(default, alias = "tasasIva")]
    pub tasas_iva: Vec<TasaIva>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_strings_accepted() {
        let detail: ProductoDetalle = serde_json::from_value(serde_json::json!({
            "id": 3,
            "nombre": "Arroz",
            "precio": "2500.00",
            "stock": 8,
            "lotes": [
                {"id": 1, "numero_lote": "A1", "cantidad": 5, "fecha_caducidad": "2025-01-01"},
                {"id": 2, "numero_lote": "A2", "cantidad": "3", "fecha_caducidad": "N/A"}
            ]
        }))
        .expect("parse");
        assert_eq!(detail.precio, 2500.0);
        assert_eq!(detail.lotes[1].cantidad, 3);
        let lot = Lot::from(&detail.lotes[1]);
        assert_eq!(lot.expiry, Expiry::Never);
        assert!(detail.error.is_none());
    }

    #[test]
    fn test_blank_error_is_none() {
        let resp: ProcesarVentaResponse =
            serde_json::from_str(r#"{"success": true, "venta_id": 9, "error": ""}"#).expect("parse");
        assert!(resp.success);
        assert_eq!(resp.venta_id, Some(9));
        assert!(resp.error.is_none());
        assert!(resp.total.is_none());
    }

    #[test]
    fn test_unknown_table_state_tolerated() {
        let resp: MesasResponse = serde_json::from_value(serde_json::json!({
            "success": true,
            "mesas": [
                {"id": 1, "numero": "1", "nombre": "Terraza", "estado": "ocupada",
                 "cuenta_abierta": true, "total_cuenta": 12000.5,
                 "fecha_apertura": "2024-05-01T12:00:00Z"},
                {"id": 2, "numero": "2", "nombre": "Barra", "estado": "limpieza",
                 "cuenta_abierta": false, "total_cuenta": 0, "fecha_apertura": null}
            ]
        }))
        .expect("parse");
        assert_eq!(resp.mesas[0].estado, EstadoMesa::Ocupada);
        assert_eq!(resp.mesas[1].estado, EstadoMesa::Desconocido);
    }

    #[test]
    fn test_venta_request_omits_missing_cash_amount() {
        let req = ProcesarVentaRequest {
            cliente_id: 1,
            metodo_pago: "tarjeta_debito".into(),
            canal_venta: "mostrador".into(),
            monto_recibido: None,
            items: vec![VentaItem {
                producto_id: 3,
                lote_id: 1,
                cantidad: 2,
                precio: 2500.0,
            }],
        };
        let json = serde_json::to_value(&req).expect("serialize");
        assert!(json.get("monto_recibido").is_none());
        assert_eq!(json["items"][0]["lote_id"], 1);
    }

    #[test]
    fn test_form_errors_flattened() {
        let resp: CrearReabastecimientoResponse = serde_json::from_value(serde_json::json!({
            "errors": {"proveedor": ["Este campo es obligatorio."]},
            "formset_errors": [{}, {"cantidad": ["Debe ser mayor que 0."]}, {"__all__": ["Fila duplicada"]}]
        }))
        .expect("parse");
        assert_eq!(
            resp.error_message().as_deref(),
            Some("proveedor: Este campo es obligatorio.; cantidad: Debe ser mayor que 0.; Fila duplicada")
        );
    }
}
