//! Outbound UI events.
//!
//! Controllers never touch a view directly: they emit named events with a
//! JSON payload and the embedding shell re-renders from them.

use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

pub const NOTIFICATION: &str = "notification";
pub const CART_UPDATED: &str = "cart_updated";
pub const STOCK_BADGES: &str = "stock_badges";
pub const SEARCH_RESULTS: &str = "search_results";
pub const TABLES_UPDATED: &str = "tables_updated";
pub const ACTIVE_TABLE_CHANGED: &str = "active_table_changed";
pub const RECEPTION_UPDATED: &str = "reception_updated";
pub const ORDER_FORM_UPDATED: &str = "order_form_updated";
pub const SUPPLIER_SUGGESTIONS: &str = "supplier_suggestions";
pub const ORDER_DELETED: &str = "order_deleted";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiEvent {
    pub name: String,
    pub payload: Value,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

/// Fan-out to any number of subscribers. Events emitted with nobody
/// listening are dropped.
pub struct BroadcastSink {
    tx: broadcast::Sender<UiEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &str, payload: Value) {
        let _ = self.tx.send(UiEvent {
            name: event.to_string(),
            payload,
        });
    }
}

/// Sink for headless runs: events only reach the log.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &str, payload: Value) {
        debug!(event, %payload, "ui event");
    }
}

/// Keeps every event in memory. Used by tests and by shells that poll.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<UiEvent> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }

    pub fn named(&self, name: &str) -> Vec<Value> {
        self.events
            .lock()
            .map(|e| {
                e.iter()
                    .filter(|ev| ev.name == name)
                    .map(|ev| ev.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &str, payload: Value) {
        if let Ok(mut events) = self.events.lock() {
            events.push(UiEvent {
                name: event.to_string(),
                payload,
            });
        }
    }
}
