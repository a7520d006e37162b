//! Background loops and input debouncing.
//!
//! The table monitor refreshes the table list on a fixed interval and the
//! reception autosave snapshots the open reception as a draft. Both stop
//! when [`MonitorState::stop`] is called. [`Debouncer`] delays an action
//! until input has been quiet for a while, cancelling superseded calls.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::{reception, tables};
use crate::AppState;

pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);
pub const RECEPTION_FILTER_DEBOUNCE: Duration = Duration::from_millis(150);
pub const SUPPLIER_SEARCH_DEBOUNCE: Duration = Duration::from_millis(150);

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

/// Runs only the last action scheduled within `delay`.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<CancellationToken>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Schedule `f`, cancelling whatever was scheduled before. Must be
    /// called inside a tokio runtime.
    pub fn call<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        match self.pending.lock() {
            Ok(mut slot) => {
                if let Some(previous) = slot.replace(token.clone()) {
                    previous.cancel();
                }
            }
            Err(e) => warn!("debouncer lock poisoned: {e}"),
        }

        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => f().await,
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Periodic monitors
// ---------------------------------------------------------------------------

/// Shared run flag for every monitor started from one `MonitorState`.
#[derive(Clone)]
pub struct MonitorState {
    pub is_running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }
}

impl MonitorState {
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

/// Refresh the table list every `interval_secs`.
pub fn start_table_monitor(state: Arc<AppState>, monitors: &MonitorState, interval_secs: u64) {
    start_table_monitor_every(state, monitors, Duration::from_secs(interval_secs.max(1)));
}

pub(crate) fn start_table_monitor_every(
    state: Arc<AppState>,
    monitors: &MonitorState,
    interval: Duration,
) {
    let is_running = monitors.is_running.clone();
    let cancel = monitors.cancel.clone();
    is_running.store(true, Ordering::SeqCst);

    tokio::spawn(async move {
        info!("Table monitor started (interval: {interval:?})");
        let mut previous_ok: Option<bool> = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if !is_running.load(Ordering::SeqCst) {
                break;
            }
            match tables::tables_refresh(&state).await {
                Ok(_) => {
                    if previous_ok == Some(false) {
                        info!("Table refresh recovered");
                    }
                    previous_ok = Some(true);
                }
                Err(e) => {
                    // Only the first failure in a row is worth a warning.
                    if previous_ok != Some(false) {
                        warn!(error = %e, "table refresh failed");
                    } else {
                        debug!(error = %e, "table refresh still failing");
                    }
                    previous_ok = Some(false);
                }
            }
        }
        info!("Table monitor stopped");
    });
}

/// Save the open reception as a draft every `interval_secs`.
pub fn start_reception_autosave(state: Arc<AppState>, monitors: &MonitorState, interval_secs: u64) {
    start_reception_autosave_every(state, monitors, Duration::from_secs(interval_secs.max(1)));
}

pub(crate) fn start_reception_autosave_every(
    state: Arc<AppState>,
    monitors: &MonitorState,
    interval: Duration,
) {
    let is_running = monitors.is_running.clone();
    let cancel = monitors.cancel.clone();
    is_running.store(true, Ordering::SeqCst);

    tokio::spawn(async move {
        info!("Reception autosave started (interval: {interval:?})");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if !is_running.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = reception::reception_autosave(&state) {
                warn!(error = %e, "reception autosave failed");
            }
        }
        info!("Reception autosave stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reception::{load_draft, ReceptionSession};
    use crate::schema::ReabastecimientoDetalle;
    use crate::test_support::{state, state_with_backend};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_debouncer_runs_only_last_call() {
        let debouncer = Debouncer::new(Duration::from_millis(40));
        let runs = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicUsize::new(0));
        for i in 1..=3 {
            let runs = runs.clone();
            let last = last.clone();
            debouncer.call(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                last.store(i, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_debouncer_spaced_calls_all_run() {
        let debouncer = Debouncer::new(Duration::from_millis(10));
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let runs = runs.clone();
            debouncer.call(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reception_autosave_writes_draft_until_stopped() {
        let (state, _) = state();
        let details: ReabastecimientoDetalle = serde_json::from_value(json!({
            "id": 9,
            "proveedor_nombre": "Distribuidora Norte",
            "costo_total": "1000",
            "iva": "190",
            "detalles": [
                {"id": 1, "producto_nombre": "Agua", "cantidad": 4, "costo_unitario": "250"}
            ]
        }))
        .expect("details");
        let mut session = ReceptionSession::from_details(&details);
        session.set_received(1, 2).expect("received");
        *state.reception.lock().expect("reception") = Some(session);

        let monitors = MonitorState::default();
        start_reception_autosave_every(state.clone(), &monitors, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;
        monitors.stop();
        assert!(!monitors.is_running.load(Ordering::SeqCst));

        let draft = load_draft(&state.db, 9).expect("load").expect("draft saved");
        assert_eq!(draft.detalles[0].cantidad_recibida, 2);
    }

    #[tokio::test]
    async fn test_table_monitor_polls_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(tables::TABLES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "mesas": []
            })))
            .expect(2..)
            .mount(&server)
            .await;
        let (state, sink) = state_with_backend(&server.uri());
        let monitors = MonitorState::default();
        start_table_monitor_every(state, &monitors, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;
        monitors.stop();
        assert!(!sink.named(crate::events::TABLES_UPDATED).is_empty());
    }
}
