//! FIFO-by-expiry lot allocation.
//!
//! A requested quantity of one product is spread over its lots, consuming the
//! soonest-expiring lot first. Lots without an expiry date sort last.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Sentinel the backend sends for lots that never expire.
pub const NO_EXPIRY: &str = "N/A";

/// Expiry of a lot. `Never` orders after every date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expiry {
    On(NaiveDate),
    Never,
}

impl Expiry {
    /// Parse a `YYYY-MM-DD` date; `N/A`, blanks and anything unparseable
    /// count as no expiry.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NO_EXPIRY) {
            return Self::Never;
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(Self::On)
            .unwrap_or(Self::Never)
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Self::On(d) => Some(*d),
            Self::Never => None,
        }
    }
}

impl std::fmt::Display for Expiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::On(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Never => f.write_str(NO_EXPIRY),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lot {
    pub id: i64,
    pub numero_lote: String,
    pub cantidad: i64,
    pub expiry: Expiry,
}

/// One slice of an allocation; becomes one cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedLine {
    pub lote_id: i64,
    pub cantidad: i64,
    /// Lot quantity observed at allocation time; the cart line ceiling.
    pub max_stock: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub requested: i64,
    pub lines: Vec<AllocatedLine>,
    /// Part of the request no lot could cover.
    pub shortfall: i64,
}

impl Allocation {
    pub fn allocated(&self) -> i64 {
        self.lines.iter().map(|l| l.cantidad).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.shortfall == 0
    }
}

/// Lots with stock, in the order they will be consumed.
pub fn consumption_order(lots: &[Lot]) -> Vec<&Lot> {
    let mut ordered: Vec<&Lot> = lots.iter().filter(|l| l.cantidad > 0).collect();
    // sort_by_key is stable: equal expiries keep the backend order
    ordered.sort_by_key(|l| l.expiry);
    ordered
}

pub fn available_total(lots: &[Lot]) -> i64 {
    lots.iter().map(|l| l.cantidad.max(0)).sum()
}

/// Spread `requested` units over `lots`, earliest expiry first.
///
/// Never assigns more than a lot holds nor more than requested in total.
/// Whatever the lots cannot cover is returned as `shortfall`.
pub fn allocate(lots: &[Lot], requested: i64) -> Allocation {
    let requested = requested.max(0);
    let mut remaining = requested;
    let mut lines = Vec::new();

    for lot in consumption_order(lots) {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(lot.cantidad);
        lines.push(AllocatedLine {
            lote_id: lot.id,
            cantidad: take,
            max_stock: lot.cantidad,
        });
        remaining -= take;
    }

    Allocation {
        requested,
        lines,
        shortfall: remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(id: i64, cantidad: i64, exp: &str) -> Lot {
        Lot {
            id,
            numero_lote: format!("L-{id}"),
            cantidad,
            expiry: Expiry::parse(exp),
        }
    }

    #[test]
    fn test_expiry_parsing_and_ordering() {
        assert_eq!(Expiry::parse("N/A"), Expiry::Never);
        assert_eq!(Expiry::parse(""), Expiry::Never);
        assert_eq!(Expiry::parse("31/12/2025"), Expiry::Never);
        let d = Expiry::parse("2025-01-01");
        assert_eq!(d.date(), NaiveDate::from_ymd_opt(2025, 1, 1));
        assert!(d < Expiry::Never);
        assert!(Expiry::parse("2024-12-31") < d);
        assert_eq!(d.to_string(), "2025-01-01");
        assert_eq!(Expiry::Never.to_string(), "N/A");
    }

    #[test]
    fn test_dated_lot_consumed_before_undated() {
        let lots = vec![lot(2, 3, "N/A"), lot(1, 5, "2025-01-01")];
        let a = allocate(&lots, 6);
        assert_eq!(
            a.lines,
            vec![
                AllocatedLine {
                    lote_id: 1,
                    cantidad: 5,
                    max_stock: 5
                },
                AllocatedLine {
                    lote_id: 2,
                    cantidad: 1,
                    max_stock: 3
                },
            ]
        );
        assert!(a.is_complete());
    }

    #[test]
    fn test_request_within_first_lot_uses_one_line() {
        let lots = vec![lot(1, 10, "2025-03-01"), lot(2, 10, "2025-02-01")];
        let a = allocate(&lots, 4);
        assert_eq!(a.lines.len(), 1);
        assert_eq!(a.lines[0].lote_id, 2);
        assert_eq!(a.allocated(), 4);
    }

    #[test]
    fn test_shortfall_reported() {
        let lots = vec![lot(1, 2, "2025-01-01"), lot(2, 1, "N/A")];
        let a = allocate(&lots, 5);
        assert_eq!(a.allocated(), 3);
        assert_eq!(a.shortfall, 2);
        assert!(!a.is_complete());
    }

    #[test]
    fn test_empty_and_negative_lots_skipped() {
        let lots = vec![lot(1, 0, "2024-01-01"), lot(2, -3, "2024-02-01"), lot(3, 4, "2024-03-01")];
        let a = allocate(&lots, 2);
        assert_eq!(a.lines.len(), 1);
        assert_eq!(a.lines[0].lote_id, 3);
        assert_eq!(available_total(&lots), 4);
    }

    #[test]
    fn test_zero_request_allocates_nothing() {
        let lots = vec![lot(1, 5, "2025-01-01")];
        let a = allocate(&lots, 0);
        assert!(a.lines.is_empty());
        assert_eq!(a.shortfall, 0);
    }

    #[test]
    fn test_allocation_properties_over_many_requests() {
        let lots = vec![
            lot(1, 4, "2025-06-01"),
            lot(2, 2, "N/A"),
            lot(3, 3, "2025-01-15"),
            lot(4, 1, "2025-01-15"),
        ];
        let order: Vec<i64> = consumption_order(&lots).iter().map(|l| l.id).collect();
        assert_eq!(order, vec![3, 4, 1, 2]);

        for requested in 0..=12 {
            let a = allocate(&lots, requested);
            assert!(a.allocated() <= requested);
            assert_eq!(a.allocated() + a.shortfall, requested);
            for line in &a.lines {
                let source = lots.iter().find(|l| l.id == line.lote_id).expect("lot");
                assert!(line.cantidad <= source.cantidad);
                assert!(line.cantidad > 0);
            }
            // every line except the last drains its lot
            if a.lines.len() > 1 {
                for line in &a.lines[..a.lines.len() - 1] {
                    assert_eq!(line.cantidad, line.max_stock);
                }
            }
        }
    }
}
