//! Error router
//!
//! Collects failure records from every delivery path and hands them to the
//! single registered failure handler. Records travel through a bounded queue
//! to a dedicated worker, so a slow handler never stalls delivery workers.

use crate::messaging::message::FailureRecord;
use crate::messaging::metrics::MESSAGING_METRICS;
use crate::messaging::traits::FailureHandler;
use futures::FutureExt;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, warn};

type SharedHandler = Arc<RwLock<Option<Arc<dyn FailureHandler>>>>;

/// Routes failure records to the process-wide failure handler
pub struct ErrorRouter {
    tx: mpsc::Sender<FailureRecord>,
    handler: SharedHandler,
    dropped: Arc<AtomicU64>,
}

impl ErrorRouter {
    /// Create a router with a bounded queue and spawn its worker.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let handler: SharedHandler = Arc::new(RwLock::new(None));
        let dropped = Arc::new(AtomicU64::new(0));

        tokio::spawn(run_worker(rx, handler.clone(), dropped.clone()));

        Self {
            tx,
            handler,
            dropped,
        }
    }

    /// Register the failure handler, replacing any previous one
    pub fn on_failure<H: FailureHandler>(&self, handler: H) {
        self.set_handler(Arc::new(handler));
    }

    /// Register an already shared failure handler, replacing any previous one
    pub fn set_handler(&self, handler: Arc<dyn FailureHandler>) {
        if self.handler.write().replace(handler).is_some() {
            warn!("Replacing previously registered failure handler");
        }
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Queue a failure record without waiting.
    ///
    /// A full queue drops the record; the caller is never blocked and never
    /// sees an error.
    pub fn route(&self, record: FailureRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                self.record_drop("queue_full");
                warn!(
                    cause = %record.cause,
                    channel = %record.channel,
                    destination = %record.destination,
                    error = %record.error,
                    "Failure queue full, dropping failure record"
                );
            }
            Err(TrySendError::Closed(record)) => {
                self.record_drop("closed");
                warn!(
                    cause = %record.cause,
                    channel = %record.channel,
                    "Failure router stopped, dropping failure record"
                );
            }
        }
    }

    /// Failure records dropped so far
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        MESSAGING_METRICS
            .failures_dropped
            .with_label_values(&[reason])
            .inc();
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<FailureRecord>,
    handler: SharedHandler,
    dropped: Arc<AtomicU64>,
) {
    while let Some(record) = rx.recv().await {
        let current = handler.read().clone();

        let Some(current) = current else {
            dropped.fetch_add(1, Ordering::Relaxed);
            MESSAGING_METRICS
                .failures_dropped
                .with_label_values(&["no_handler"])
                .inc();
            error!(
                cause = %record.cause,
                channel = %record.channel,
                destination = %record.destination,
                error = %record.error,
                "Error Processing Message (no failure handler registered)"
            );
            continue;
        };

        let cause = record.cause.to_string();
        if AssertUnwindSafe(current.handle(record))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(cause = %cause, "Failure handler panicked");
        }

        MESSAGING_METRICS
            .failures_routed
            .with_label_values(&[cause.as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::FailureCause;
    use crate::messaging::traits::failure_handler_fn;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::{mpsc::UnboundedSender, Notify};
    use tokio::time::timeout;

    fn record(channel: &str) -> FailureRecord {
        FailureRecord::new(FailureCause::Handler, "boom", channel, "invoice-topic")
    }

    #[tokio::test]
    async fn test_routes_to_handler() {
        let router = ErrorRouter::new(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.on_failure(failure_handler_fn(move |record| {
            let _ = tx.send(record);
        }));

        router.route(record("invoiceInput"));

        let received = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(received.channel, "invoiceInput");
        assert_eq!(received.cause, FailureCause::Handler);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let router = ErrorRouter::new(8);
        let (first_tx, mut first_rx) = mpsc::unbounded_channel::<FailureRecord>();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel::<FailureRecord>();

        router.on_failure(failure_handler_fn(move |record| {
            let _ = first_tx.send(record);
        }));
        router.on_failure(failure_handler_fn(move |record| {
            let _ = second_tx.send(record);
        }));

        router.route(record("invoiceInput"));

        assert!(timeout(Duration::from_secs(1), second_rx.recv()).await.unwrap().is_some());
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_handler_drops() {
        let router = ErrorRouter::new(8);
        assert!(!router.has_handler());

        router.route(record("invoiceInput"));

        for _ in 0..50 {
            if router.dropped_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(router.dropped_count(), 1);
    }

    struct Blocking {
        started: UnboundedSender<()>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl FailureHandler for Blocking {
        async fn handle(&self, _record: FailureRecord) {
            let _ = self.started.send(());
            self.release.notified().await;
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let router = ErrorRouter::new(1);
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        router.on_failure(Blocking {
            started: started_tx,
            release: release.clone(),
        });

        // First record occupies the worker, second fills the queue
        router.route(record("a"));
        timeout(Duration::from_secs(1), started_rx.recv()).await.unwrap();
        router.route(record("b"));
        router.route(record("c"));

        assert_eq!(router.dropped_count(), 1);
        release.notify_waiters();
    }

    #[tokio::test]
    async fn test_panicking_handler_keeps_worker_alive() {
        let router = ErrorRouter::new(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.on_failure(failure_handler_fn(move |record: FailureRecord| {
            if record.channel == "explode" {
                panic!("failure handler bug");
            }
            let _ = tx.send(record);
        }));

        router.route(record("explode"));
        router.route(record("invoiceInput"));

        let received = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(received.channel, "invoiceInput");
    }
}
