//! Restocking reception: what actually arrived against what was ordered.
//!
//! Received quantities are clamped to `[0, requested]`. Each line derives a
//! status, the session derives progress and whether it can be confirmed,
//! and in-progress input is snapshotted to a local draft.

use chrono::NaiveDate;
use serde::Serialize;

use crate::data_helpers::{read_local_as, remove_local, write_local_as};
use crate::db;
use crate::schema::{RecepcionLinea, RecepcionPayload, ReabastecimientoDetalle};
use crate::views::NotificationLevel;

/// Local storage key of an order's reception draft.
pub const DRAFT_PREFIX: &str = "draft_";

pub fn draft_key(order_id: i64) -> String {
    format!("{DRAFT_PREFIX}{order_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Pending,
    Partial,
    Complete,
}

impl LineStatus {
    pub fn of(received: i64, requested: i64) -> Self {
        if received == 0 {
            Self::Pending
        } else if received == requested {
            Self::Complete
        } else {
            Self::Partial
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pendiente",
            Self::Partial => "Parcial",
            Self::Complete => "Completo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceptionLine {
    pub id: i64,
    pub producto_nombre: String,
    pub cantidad: i64,
    pub cantidad_recibida: i64,
    pub fecha_caducidad: String,
    pub numero_lote: String,
    pub costo_unitario: f64,
}

impl ReceptionLine {
    pub fn status(&self) -> LineStatus {
        LineStatus::of(self.cantidad_recibida, self.cantidad)
    }

    /// First problem that blocks confirming this line, if any.
    pub fn problem(&self) -> Option<String> {
        if self.cantidad_recibida > self.cantidad {
            return Some(format!("No puede exceder {}", self.cantidad));
        }
        if self.cantidad_recibida > 0 {
            let expiry = self.fecha_caducidad.trim();
            if expiry.is_empty() {
                return Some("Fecha requerida".into());
            }
            if NaiveDate::parse_from_str(expiry, "%Y-%m-%d").is_err() {
                return Some("Fecha inválida".into());
            }
        }
        None
    }

    pub fn is_valid(&self) -> bool {
        self.problem().is_none()
    }

    fn clamp_received(&self, value: i64) -> i64 {
        value.clamp(0, self.cantidad.max(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub complete: usize,
    pub partial: usize,
    pub pending: usize,
    pub total: usize,
    pub percent: u32,
}

impl Progress {
    /// `<complete+partial> de <total>`
    pub fn label(&self) -> String {
        format!("{} de {}", self.complete + self.partial, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceptionAlert {
    pub level: NotificationLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceptionSession {
    pub order_id: i64,
    pub proveedor_nombre: String,
    pub costo_total: f64,
    pub iva: f64,
    pub lines: Vec<ReceptionLine>,
    pub filter: String,
}

impl ReceptionSession {
    pub fn from_details(details: &ReabastecimientoDetalle) -> Self {
        let lines = details
            .detalles
            .iter()
            .map(|d| {
                let mut line = ReceptionLine {
                    id: d.id,
                    producto_nombre: d.producto_nombre.clone(),
                    cantidad: d.cantidad,
                    cantidad_recibida: 0,
                    fecha_caducidad: d.fecha_caducidad.clone().unwrap_or_default(),
                    numero_lote: d.numero_lote.clone().unwrap_or_default(),
                    costo_unitario: d.costo_unitario,
                };
                line.cantidad_recibida = line.clamp_received(d.cantidad_recibida);
                line
            })
            .collect();
        Self {
            order_id: details.id,
            proveedor_nombre: details.proveedor_nombre.clone(),
            costo_total: details.costo_total,
            iva: details.iva,
            lines,
            filter: String::new(),
        }
    }

    pub fn header_total(&self) -> f64 {
        self.costo_total + self.iva
    }

    fn line_mut(&mut self, id: i64) -> Result<&mut ReceptionLine, String> {
        self.lines
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| format!("Línea {id} no pertenece a este pedido"))
    }

    /// Overlay draft values onto matching lines. Returns how many lines
    /// were restored.
    pub fn apply_draft(&mut self, draft: &RecepcionPayload) -> usize {
        let mut restored = 0;
        for saved in &draft.detalles {
            if let Ok(line) = self.line_mut(saved.id) {
                line.cantidad_recibida = line.clamp_received(saved.cantidad_recibida);
                line.fecha_caducidad = saved.fecha_caducidad.clone();
                line.numero_lote = saved.numero_lote.clone();
                restored += 1;
            }
        }
        restored
    }

    pub fn draft(&self) -> RecepcionPayload {
        RecepcionPayload {
            detalles: self.lines.iter().map(to_payload_line).collect(),
        }
    }

    /// Set a received quantity, clamped to the requested amount.
    pub fn set_received(&mut self, id: i64, cantidad: i64) -> Result<i64, String> {
        let line = self.line_mut(id)?;
        line.cantidad_recibida = line.clamp_received(cantidad);
        Ok(line.cantidad_recibida)
    }

    pub fn set_expiry(&mut self, id: i64, fecha: &str) -> Result<(), String> {
        self.line_mut(id)?.fecha_caducidad = fecha.trim().to_string();
        Ok(())
    }

    pub fn set_lot(&mut self, id: i64, numero_lote: &str) -> Result<(), String> {
        self.line_mut(id)?.numero_lote = numero_lote.trim().to_string();
        Ok(())
    }

    pub fn mark_all_received(&mut self) {
        for line in &mut self.lines {
            line.cantidad_recibida = line.cantidad.max(0);
        }
    }

    /// Use one expiry date for every line. Returns how many lines changed.
    pub fn apply_general_expiry(&mut self, fecha: &str) -> Result<usize, String> {
        let fecha = fecha.trim();
        if fecha.is_empty() {
            return Err("Selecciona una fecha de caducidad".into());
        }
        NaiveDate::parse_from_str(fecha, "%Y-%m-%d").map_err(|_| "Fecha inválida".to_string())?;
        for line in &mut self.lines {
            line.fecha_caducidad = fecha.to_string();
        }
        Ok(self.lines.len())
    }

    pub fn set_filter(&mut self, query: &str) {
        self.filter = query.trim().to_lowercase();
    }

    /// Lines whose product name contains the current filter.
    pub fn visible_lines(&self) -> Vec<&ReceptionLine> {
        self.lines
            .iter()
            .filter(|l| self.filter.is_empty() || l.producto_nombre.to_lowercase().contains(&self.filter))
            .collect()
    }

    pub fn progress(&self) -> Progress {
        let mut progress = Progress {
            complete: 0,
            partial: 0,
            pending: 0,
            total: self.lines.len(),
            percent: 0,
        };
        for line in &self.lines {
            match line.status() {
                LineStatus::Complete => progress.complete += 1,
                LineStatus::Partial => progress.partial += 1,
                LineStatus::Pending => progress.pending += 1,
            }
        }
        if progress.total > 0 {
            progress.percent =
                ((progress.complete as f64 / progress.total as f64) * 100.0).round() as u32;
        }
        progress
    }

    pub fn has_received(&self) -> bool {
        self.lines.iter().any(|l| l.cantidad_recibida > 0)
    }

    /// Confirmation needs at least one received line and no invalid ones.
    pub fn can_confirm(&self) -> bool {
        self.has_received() && self.lines.iter().all(ReceptionLine::is_valid)
    }

    pub fn alert(&self) -> ReceptionAlert {
        let partial = self
            .lines
            .iter()
            .filter(|l| l.status() == LineStatus::Partial)
            .count();
        if !self.has_received() {
            ReceptionAlert {
                level: NotificationLevel::Danger,
                message: "Debes recibir al menos 1 producto".into(),
            }
        } else if let Some((line, problem)) = self
            .lines
            .iter()
            .find_map(|l| l.problem().map(|p| (l, p)))
        {
            ReceptionAlert {
                level: NotificationLevel::Danger,
                message: format!("{}: {problem}", line.producto_nombre),
            }
        } else if partial > 0 {
            ReceptionAlert {
                level: NotificationLevel::Warning,
                message: format!("{partial} producto(s) con recepción parcial"),
            }
        } else {
            ReceptionAlert {
                level: NotificationLevel::Success,
                message: "Todos los productos completos".into(),
            }
        }
    }

    /// Body for the confirm request: received lines only.
    pub fn submission(&self) -> Result<RecepcionPayload, String> {
        if !self.has_received() {
            return Err("Debes recibir al menos 1 producto".into());
        }
        if let Some(line) = self.lines.iter().find(|l| !l.is_valid()) {
            let problem = line.problem().unwrap_or_default();
            return Err(format!("{}: {problem}", line.producto_nombre));
        }
        Ok(RecepcionPayload {
            detalles: self
                .lines
                .iter()
                .filter(|l| l.cantidad_recibida > 0)
                .map(to_payload_line)
                .collect(),
        })
    }
}

fn to_payload_line(line: &ReceptionLine) -> RecepcionLinea {
    RecepcionLinea {
        id: line.id,
        cantidad_recibida: line.cantidad_recibida,
        fecha_caducidad: line.fecha_caducidad.clone(),
        numero_lote: line.numero_lote.clone(),
    }
}

// ---------------------------------------------------------------------------
// Drafts
// ---------------------------------------------------------------------------

pub fn load_draft(db: &db::DbState, order_id: i64) -> Result<Option<RecepcionPayload>, String> {
    read_local_as(db, &draft_key(order_id))
}

pub fn save_draft(db: &db::DbState, session: &ReceptionSession) -> Result<(), String> {
    write_local_as(db, &draft_key(session.order_id), &session.draft())
}

pub fn remove_draft(db: &db::DbState, order_id: i64) -> Result<bool, String> {
    remove_local(db, &draft_key(order_id))
}
