use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stream_relay::messaging::{
    handler_fn, Binder, BinderKind, BinderRegistry, BindingConfig, Message, MessageStream,
    MessagingError, MessagingResult, Role, StreamConfig, StreamContext,
};
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

/// Counters shared between the handler and the broker stream
#[derive(Default)]
struct Ledger {
    completed: AtomicUsize,
    acks: AtomicUsize,
    /// Acks that arrived before as many handlers had completed
    early_acks: AtomicUsize,
}

/// Single-destination broker that counts acknowledgements
struct CountingBinder {
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    ledger: Arc<Ledger>,
}

impl CountingBinder {
    fn new(ledger: Arc<Ledger>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            ledger,
        }
    }
}

struct CountingStream {
    rx: mpsc::UnboundedReceiver<Message>,
    ledger: Arc<Ledger>,
}

#[async_trait]
impl MessageStream for CountingStream {
    async fn next(&mut self) -> MessagingResult<Option<Message>> {
        Ok(self.rx.recv().await)
    }

    async fn ack(&mut self) -> MessagingResult<()> {
        let acks = self.ledger.acks.fetch_add(1, Ordering::SeqCst) + 1;
        if acks > self.ledger.completed.load(Ordering::SeqCst) {
            self.ledger.early_acks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl Binder for CountingBinder {
    fn kind(&self) -> BinderKind {
        BinderKind::InMemory
    }

    async fn publish(&self, _destination: &str, message: &Message) -> MessagingResult<()> {
        self.tx
            .send(message.clone())
            .map_err(|e| MessagingError::Delivery(e.to_string()))
    }

    async fn subscribe(
        &self,
        destination: &str,
        _group: Option<&str>,
    ) -> MessagingResult<Box<dyn MessageStream>> {
        let rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| MessagingError::SubscribeFailed(destination.to_string()))?;
        Ok(Box::new(CountingStream {
            rx,
            ledger: self.ledger.clone(),
        }))
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn close(&self) -> MessagingResult<()> {
        Ok(())
    }
}

fn binding(channel: &str, role: Role) -> BindingConfig {
    BindingConfig {
        channel: channel.to_string(),
        destination: "jobs".to_string(),
        role,
        group: None,
        binder: None,
    }
}

fn context(ledger: Arc<Ledger>, max_in_flight: usize) -> StreamContext {
    let mut registry = BinderRegistry::new();
    registry
        .register("counting", Arc::new(CountingBinder::new(ledger)))
        .unwrap();
    registry.mark_active("counting").unwrap();

    let config = StreamConfig {
        bindings: vec![binding("jobsOut", Role::Producer), binding("jobsIn", Role::Consumer)],
        max_in_flight,
        ..StreamConfig::default()
    };
    StreamContext::with_registry(registry, &config).unwrap()
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_concurrent_handlers_respect_limit_and_ack_after_completion() {
    let ledger = Arc::new(Ledger::default());
    let context = context(ledger.clone(), 3);

    let gate = Arc::new(Semaphore::new(0));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (started_tx, mut started) = mpsc::unbounded_channel();

    {
        let gate = gate.clone();
        let running = running.clone();
        let peak = peak.clone();
        let ledger = ledger.clone();
        context
            .dispatcher()
            .subscribe(
                "jobsIn",
                handler_fn(move |message: Message| {
                    let gate = gate.clone();
                    let running = running.clone();
                    let peak = peak.clone();
                    let ledger = ledger.clone();
                    let started_tx = started_tx.clone();
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        let _ = started_tx.send(message.payload_str().into_owned());

                        gate.acquire().await?.forget();

                        running.fetch_sub(1, Ordering::SeqCst);
                        ledger.completed.fetch_add(1, Ordering::SeqCst);
                        anyhow::Ok(())
                    }
                }),
            )
            .await
            .unwrap();
    }

    for i in 0..5 {
        context
            .dispatcher()
            .send("jobsOut", format!("job-{}", i))
            .await
            .unwrap();
    }

    for _ in 0..3 {
        timeout(WAIT, started.recv()).await.unwrap().unwrap();
    }
    // Limit reached: nothing else starts and nothing is acknowledged
    assert!(timeout(QUIET, started.recv()).await.is_err());
    assert_eq!(running.load(Ordering::SeqCst), 3);
    assert_eq!(ledger.acks.load(Ordering::SeqCst), 0);

    gate.add_permits(5);
    for _ in 0..2 {
        timeout(WAIT, started.recv()).await.unwrap().unwrap();
    }

    wait_for(|| ledger.acks.load(Ordering::SeqCst) == 5).await;
    assert_eq!(ledger.completed.load(Ordering::SeqCst), 5);
    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert_eq!(ledger.early_acks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_acks_follow_delivery_order() {
    let ledger = Arc::new(Ledger::default());
    let context = context(ledger.clone(), 2);

    let slow_release = Arc::new(Notify::new());
    let (done_tx, mut done) = mpsc::unbounded_channel();

    {
        let slow_release = slow_release.clone();
        let ledger = ledger.clone();
        context
            .dispatcher()
            .subscribe(
                "jobsIn",
                handler_fn(move |message: Message| {
                    let slow_release = slow_release.clone();
                    let ledger = ledger.clone();
                    let done_tx = done_tx.clone();
                    async move {
                        let payload = message.payload_str().into_owned();
                        if payload == "slow" {
                            slow_release.notified().await;
                        }
                        ledger.completed.fetch_add(1, Ordering::SeqCst);
                        let _ = done_tx.send(payload);
                        anyhow::Ok(())
                    }
                }),
            )
            .await
            .unwrap();
    }

    context.dispatcher().send("jobsOut", "slow").await.unwrap();
    context.dispatcher().send("jobsOut", "fast").await.unwrap();

    // The later message finishes first but cannot be acknowledged ahead of
    // the earlier one
    assert_eq!(timeout(WAIT, done.recv()).await.unwrap().unwrap(), "fast");
    tokio::time::sleep(QUIET).await;
    assert_eq!(ledger.acks.load(Ordering::SeqCst), 0);

    slow_release.notify_one();
    assert_eq!(timeout(WAIT, done.recv()).await.unwrap().unwrap(), "slow");
    wait_for(|| ledger.acks.load(Ordering::SeqCst) == 2).await;
    assert_eq!(ledger.early_acks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_single_in_flight_acks_each_message_after_its_handler() {
    let ledger = Arc::new(Ledger::default());
    let context = context(ledger.clone(), 1);

    let gate = Arc::new(Semaphore::new(0));
    let (started_tx, mut started) = mpsc::unbounded_channel();
    {
        let gate = gate.clone();
        let ledger = ledger.clone();
        context
            .dispatcher()
            .subscribe(
                "jobsIn",
                handler_fn(move |message: Message| {
                    let gate = gate.clone();
                    let ledger = ledger.clone();
                    let started_tx = started_tx.clone();
                    async move {
                        let _ = started_tx.send(message.payload_str().into_owned());
                        gate.acquire().await?.forget();
                        ledger.completed.fetch_add(1, Ordering::SeqCst);
                        anyhow::Ok(())
                    }
                }),
            )
            .await
            .unwrap();
    }

    context.dispatcher().send("jobsOut", "job-0").await.unwrap();
    context.dispatcher().send("jobsOut", "job-1").await.unwrap();

    assert_eq!(timeout(WAIT, started.recv()).await.unwrap().unwrap(), "job-0");
    assert!(timeout(QUIET, started.recv()).await.is_err());
    assert_eq!(ledger.acks.load(Ordering::SeqCst), 0);

    gate.add_permits(1);
    assert_eq!(timeout(WAIT, started.recv()).await.unwrap().unwrap(), "job-1");
    wait_for(|| ledger.acks.load(Ordering::SeqCst) == 1).await;

    gate.add_permits(1);
    wait_for(|| ledger.acks.load(Ordering::SeqCst) == 2).await;
    assert_eq!(ledger.early_acks.load(Ordering::SeqCst), 0);
}
