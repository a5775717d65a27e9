//! Single-settlement core shared by every connection backend.
//!
//! Funnels a backend's discrete terminal events into one single-assignment
//! outcome: the first of completion / network failure / abort wins, every
//! later event for the same exchange is discarded, and all waiters on the
//! completion signal wake exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::{ErrorCode, ListenerId, ProgressListener, UploadProgress, STATUS_UNAVAILABLE};

/// `Idle` and `InFlight` are transient; a settled phase is terminal and
/// immutable.
enum Phase {
    Idle,
    InFlight,
    Settled(Outcome),
}

/// Terminal state of an exchange
pub(crate) struct Outcome {
    pub(crate) code: ErrorCode,
    pub(crate) status: Option<u16>,
    pub(crate) body: String,
    /// Response headers, names lowercased for case-insensitive lookup
    pub(crate) headers: HashMap<String, String>,
}

impl Outcome {
    pub(crate) fn completed(status: u16, body: String, headers: HashMap<String, String>) -> Self {
        Self {
            code: ErrorCode::NoError,
            status: Some(status),
            body,
            headers,
        }
    }

    pub(crate) fn network_error() -> Self {
        Self {
            code: ErrorCode::NetworkError,
            status: None,
            body: String::new(),
            headers: HashMap::new(),
        }
    }

    pub(crate) fn aborted() -> Self {
        Self {
            code: ErrorCode::Abort,
            status: None,
            body: String::new(),
            headers: HashMap::new(),
        }
    }
}

/// Per-connection state machine plus the progress-listener registry.
///
/// Settlement is a mutex-guarded single assignment, so the first-event-wins
/// rule holds under the multi-threaded runtime without backend cooperation.
pub(crate) struct Exchange {
    phase: Mutex<Phase>,
    settled_tx: watch::Sender<bool>,
    settled_rx: watch::Receiver<bool>,
    listeners: Mutex<Vec<(ListenerId, ProgressListener)>>,
    next_listener: AtomicU64,
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

impl Exchange {
    pub(crate) fn new() -> Self {
        let (settled_tx, settled_rx) = watch::channel(false);
        Self {
            phase: Mutex::new(Phase::Idle),
            settled_tx,
            settled_rx,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Flip the one-shot sent gate.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::AlreadySent`] on any call after the
    /// first.
    pub(crate) fn mark_sent(&self) -> Result<()> {
        let mut phase = lock(&self.phase);
        match *phase {
            Phase::Idle => {
                *phase = Phase::InFlight;
                Ok(())
            }
            _ => Err(TransportError::AlreadySent),
        }
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        matches!(*lock(&self.phase), Phase::InFlight)
    }

    /// Record the terminal outcome. First event wins; anything later is
    /// discarded without re-settlement.
    pub(crate) fn settle(&self, outcome: Outcome) {
        let mut phase = lock(&self.phase);
        match *phase {
            Phase::InFlight => {
                debug!(code = ?outcome.code, status = outcome.status, "exchange settled");
                *phase = Phase::Settled(outcome);
                let _ = self.settled_tx.send(true);
            }
            Phase::Settled(ref settled) => {
                debug!(
                    ignored = ?outcome.code,
                    settled = ?settled.code,
                    "terminal event after settlement ignored"
                );
            }
            Phase::Idle => {
                debug!(ignored = ?outcome.code, "terminal event before send ignored");
            }
        }
    }

    /// Resolves when the exchange settles; immediately if it already has.
    pub(crate) async fn settled(&self) {
        let mut rx = self.settled_rx.clone();
        // the sender lives as long as self, so wait_for cannot fail
        let _ = rx.wait_for(|done| *done).await;
    }

    pub(crate) fn error_code(&self) -> Result<ErrorCode> {
        match *lock(&self.phase) {
            Phase::Idle => Err(TransportError::not_yet_sent("read the error code")),
            Phase::InFlight => Ok(ErrorCode::NoError),
            Phase::Settled(ref outcome) => Ok(outcome.code),
        }
    }

    pub(crate) fn status(&self) -> Result<i32> {
        match *lock(&self.phase) {
            Phase::Idle => Err(TransportError::not_yet_sent("read the status")),
            Phase::InFlight => Ok(STATUS_UNAVAILABLE),
            Phase::Settled(ref outcome) => {
                Ok(outcome.status.map(i32::from).unwrap_or(STATUS_UNAVAILABLE))
            }
        }
    }

    pub(crate) fn response_text(&self) -> Result<String> {
        match *lock(&self.phase) {
            Phase::Idle => Err(TransportError::not_yet_sent("read the response text")),
            Phase::InFlight => Ok(String::new()),
            Phase::Settled(ref outcome) => Ok(outcome.body.clone()),
        }
    }

    pub(crate) fn response_header(&self, name: &str) -> Option<String> {
        match *lock(&self.phase) {
            Phase::Settled(ref outcome) => outcome.headers.get(&name.to_ascii_lowercase()).cloned(),
            _ => None,
        }
    }

    pub(crate) fn add_listener(&self, listener: ProgressListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, listener));
        id
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) {
        lock(&self.listeners).retain(|(registered, _)| *registered != id);
    }

    /// Deliver a progress snapshot to the current listeners, in registration
    /// order. Callbacks run outside the registry lock so a listener may
    /// remove itself.
    pub(crate) fn notify_progress(&self, progress: UploadProgress) {
        let listeners: Vec<ProgressListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        if listeners.is_empty() {
            return;
        }
        trace!(
            bytes_sent = progress.bytes_sent,
            total_bytes = progress.total_bytes,
            "upload progress"
        );
        for listener in listeners {
            listener(progress);
        }
    }
}

/// Lock that survives poisoning; no invariant spans a panic inside a guard.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn sent_gate_flips_once() {
        let exchange = Exchange::new();
        assert!(exchange.mark_sent().is_ok());
        assert!(matches!(
            exchange.mark_sent(),
            Err(TransportError::AlreadySent)
        ));
    }

    #[test]
    fn first_settlement_wins() {
        let exchange = Exchange::new();
        exchange.mark_sent().unwrap();

        exchange.settle(Outcome::completed(200, "first".into(), HashMap::new()));
        exchange.settle(Outcome::network_error());
        exchange.settle(Outcome::aborted());

        assert_eq!(exchange.error_code().unwrap(), ErrorCode::NoError);
        assert_eq!(exchange.status().unwrap(), 200);
        assert_eq!(exchange.response_text().unwrap(), "first");
    }

    #[test]
    fn settlement_before_send_is_discarded() {
        let exchange = Exchange::new();
        exchange.settle(Outcome::network_error());
        assert!(exchange.error_code().is_err());

        exchange.mark_sent().unwrap();
        assert_eq!(exchange.error_code().unwrap(), ErrorCode::NoError);
    }

    #[test]
    fn in_flight_accessor_values() {
        let exchange = Exchange::new();
        exchange.mark_sent().unwrap();

        assert_eq!(exchange.error_code().unwrap(), ErrorCode::NoError);
        assert_eq!(exchange.status().unwrap(), STATUS_UNAVAILABLE);
        assert_eq!(exchange.response_text().unwrap(), "");
        assert_eq!(exchange.response_header("anything"), None);
    }

    #[test]
    fn listener_registry_orders_and_removes() {
        let exchange = Exchange::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let seen = seen.clone();
            exchange.add_listener(Arc::new(move |p: UploadProgress| {
                lock(&seen).push(("first", p.bytes_sent));
            }))
        };
        let _second = {
            let seen = seen.clone();
            exchange.add_listener(Arc::new(move |p: UploadProgress| {
                lock(&seen).push(("second", p.bytes_sent));
            }))
        };

        exchange.notify_progress(UploadProgress {
            bytes_sent: 10,
            total_bytes: 20,
        });
        exchange.remove_listener(first);
        exchange.notify_progress(UploadProgress {
            bytes_sent: 20,
            total_bytes: 20,
        });

        let seen = lock(&seen).clone();
        assert_eq!(seen, vec![("first", 10), ("second", 10), ("second", 20)]);
    }

    #[test]
    fn listener_may_remove_itself_from_its_callback() {
        let exchange = Arc::new(Exchange::new());
        let count = Arc::new(Mutex::new(0u32));
        let id_cell = Arc::new(Mutex::new(None::<ListenerId>));

        let id = exchange.add_listener(Arc::new({
            let exchange = exchange.clone();
            let count = count.clone();
            let id_cell = id_cell.clone();
            move |_| {
                *lock(&count) += 1;
                if let Some(id) = *lock(&id_cell) {
                    exchange.remove_listener(id);
                }
            }
        }));
        *lock(&id_cell) = Some(id);

        let progress = UploadProgress {
            bytes_sent: 1,
            total_bytes: 2,
        };
        exchange.notify_progress(progress);
        exchange.notify_progress(progress);

        assert_eq!(*lock(&count), 1);
    }

    #[test]
    fn removing_unknown_listener_is_noop() {
        let exchange = Exchange::new();
        let id = exchange.add_listener(Arc::new(|_| {}));
        exchange.remove_listener(id);
        exchange.remove_listener(id);
    }

    #[tokio::test]
    async fn settled_resolves_immediately_after_settlement() {
        let exchange = Exchange::new();
        exchange.mark_sent().unwrap();
        exchange.settle(Outcome::aborted());
        exchange.settled().await;
        assert_eq!(exchange.error_code().unwrap(), ErrorCode::Abort);
    }
}
