//! Dispatcher
//!
//! Outbound, resolves a channel's producer binding and hands the message to the
//! active binder. Inbound, subscribes a handler to a channel's consumer binding
//! and runs a delivery worker that invokes the handler once per message.

use crate::messaging::bindings::{Binding, BindingTable, Role};
use crate::messaging::config::{RetryPolicy, StreamConfig};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::error_router::ErrorRouter;
use crate::messaging::message::{FailureCause, FailureRecord, Message};
use crate::messaging::metrics::MESSAGING_METRICS;
use crate::messaging::traits::{Binder, MessageHandler, MessageStream};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{FuturesOrdered, StreamExt};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a broker-reported stream error before polling again
const BROKER_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// How inbound messages are handed to handlers
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Handler retry policy
    pub retry: RetryPolicy,

    /// Concurrent handler invocations per subscription. With 1, messages are
    /// handled in the order the binder delivers them. Acknowledgements always
    /// follow delivery order, whatever the value.
    pub max_in_flight: usize,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_in_flight: 1,
        }
    }
}

impl From<&StreamConfig> for DeliveryOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            max_in_flight: config.max_in_flight.max(1),
        }
    }
}

/// Routes messages between application code and the active binder
pub struct Dispatcher {
    bindings: Arc<BindingTable>,
    binder: Arc<dyn Binder>,
    router: Arc<ErrorRouter>,
    options: DeliveryOptions,
    subscriptions: Arc<DashMap<String, Subscription>>,
    next_subscription: AtomicU64,
}

/// A claimed consumer channel; the handle is set once the worker runs
struct Subscription {
    id: u64,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(
        bindings: Arc<BindingTable>,
        binder: Arc<dyn Binder>,
        router: Arc<ErrorRouter>,
        options: DeliveryOptions,
    ) -> Self {
        Self {
            bindings,
            binder,
            router,
            options,
            subscriptions: Arc::new(DashMap::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Send a payload on a channel
    pub async fn send(&self, channel: &str, payload: impl Into<Vec<u8>>) -> MessagingResult<()> {
        self.send_message(Message::new(channel, payload)).await
    }

    /// Send a prepared message on its channel.
    ///
    /// An unbound channel fails with [`MessagingError::UnboundChannel`] before
    /// anything reaches the binder. A failed hand-off is returned to the caller
    /// and also reported to the error router.
    pub async fn send_message(&self, message: Message) -> MessagingResult<()> {
        let binding = self.bindings.lookup(message.channel(), Role::Producer)?;
        let binder_id = self.bindings.binder();
        let start = Instant::now();

        match self.binder.publish(&binding.destination, &message).await {
            Ok(()) => {
                MESSAGING_METRICS
                    .messages_published
                    .with_label_values(&[binding.channel.as_str(), binder_id])
                    .inc();
                MESSAGING_METRICS
                    .publish_latency
                    .with_label_values(&[binding.channel.as_str(), binder_id])
                    .observe(start.elapsed().as_secs_f64());

                debug!(
                    channel = %binding.channel,
                    destination = %binding.destination,
                    message_id = %message.id(),
                    "Message handed to binder"
                );
                Ok(())
            }
            Err(e) => {
                let err = match e {
                    MessagingError::Delivery(_) => e,
                    other => MessagingError::Delivery(other.to_string()),
                };

                MESSAGING_METRICS
                    .publish_failures
                    .with_label_values(&[binding.channel.as_str(), binder_id])
                    .inc();
                error!(
                    channel = %binding.channel,
                    destination = %binding.destination,
                    message_id = %message.id(),
                    error = %err,
                    "Publish failed"
                );

                self.router.route(
                    FailureRecord::new(
                        FailureCause::Publish,
                        err.to_string(),
                        &binding.channel,
                        &binding.destination,
                    )
                    .with_message(message),
                );
                Err(err)
            }
        }
    }

    /// Subscribe a handler to a channel's consumer binding.
    ///
    /// Subscribing the same channel twice fails with
    /// [`MessagingError::DuplicateBinding`].
    pub async fn subscribe<H: MessageHandler>(&self, channel: &str, handler: H) -> MessagingResult<()> {
        self.subscribe_shared(channel, Arc::new(handler)).await
    }

    /// Subscribe an already shared handler to a channel's consumer binding
    pub async fn subscribe_shared(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> MessagingResult<()> {
        let binding = self.bindings.lookup(channel, Role::Consumer)?.clone();
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);

        match self.subscriptions.entry(channel.to_string()) {
            Entry::Occupied(_) => return Err(MessagingError::duplicate(channel, Role::Consumer)),
            Entry::Vacant(slot) => {
                slot.insert(Subscription { id, handle: None });
            }
        }

        let stream = match self
            .binder
            .subscribe(&binding.destination, binding.group.as_deref())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.subscriptions.remove_if(channel, |_, sub| sub.id == id);
                return Err(e);
            }
        };

        info!(
            channel = %binding.channel,
            destination = %binding.destination,
            group = ?binding.group,
            max_in_flight = self.options.max_in_flight,
            "Handler subscribed"
        );

        let worker = DeliveryWorker {
            binding,
            binder_id: self.bindings.binder().to_string(),
            handler,
            router: self.router.clone(),
            retry: self.options.retry.clone(),
        };
        let subscriptions = self.subscriptions.clone();
        let owner = channel.to_string();
        let max_in_flight = self.options.max_in_flight;
        let handle = tokio::spawn(async move {
            worker.run(stream, max_in_flight).await;
            subscriptions.remove_if(&owner, |_, sub| sub.id == id);
        });

        // The claim is gone if shutdown ran while the binder was subscribing
        // or the stream already ended
        match self.subscriptions.get_mut(channel) {
            Some(mut sub) if sub.id == id => {
                sub.handle = Some(handle);
                Ok(())
            }
            _ => {
                handle.abort();
                Err(MessagingError::SubscribeFailed(format!(
                    "subscription for channel '{}' was cancelled while subscribing",
                    channel
                )))
            }
        }
    }

    /// Whether a handler is subscribed to the channel
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.contains_key(channel)
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn router(&self) -> &Arc<ErrorRouter> {
        &self.router
    }

    /// Stop every delivery worker
    pub fn shutdown(&self) {
        for mut entry in self.subscriptions.iter_mut() {
            if let Some(handle) = entry.value_mut().handle.take() {
                handle.abort();
            }
        }
        self.subscriptions.clear();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Delivers one subscription's messages to its handler
struct DeliveryWorker {
    binding: Binding,
    binder_id: String,
    handler: Arc<dyn MessageHandler>,
    router: Arc<ErrorRouter>,
    retry: RetryPolicy,
}

impl DeliveryWorker {
    /// Pull messages and hand them to the handler, at most `max_in_flight` at
    /// a time. A message is acknowledged only once its handler has finished
    /// and every earlier message has been acknowledged.
    async fn run(self, mut stream: Box<dyn MessageStream>, max_in_flight: usize) {
        let worker = Arc::new(self);
        let max_in_flight = max_in_flight.max(1);
        let mut in_flight = FuturesOrdered::new();

        loop {
            tokio::select! {
                Some(_) = in_flight.next(), if !in_flight.is_empty() => {
                    worker.ack(&mut stream).await;
                }
                next = stream.next(), if in_flight.len() < max_in_flight => match next {
                    Ok(Some(message)) => {
                        let message = message.received_on(&worker.binding.channel);
                        let worker = worker.clone();
                        in_flight.push_back(tokio::spawn(async move { worker.deliver(message).await }));
                    }
                    Ok(None) => {
                        info!(
                            channel = %worker.binding.channel,
                            destination = %worker.binding.destination,
                            "Subscription stream ended"
                        );
                        break;
                    }
                    Err(e) => {
                        warn!(
                            channel = %worker.binding.channel,
                            destination = %worker.binding.destination,
                            error = %e,
                            "Broker reported a delivery failure"
                        );
                        worker.router.route(FailureRecord::new(
                            FailureCause::Broker,
                            e.to_string(),
                            &worker.binding.channel,
                            &worker.binding.destination,
                        ));
                        tokio::time::sleep(BROKER_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        while in_flight.next().await.is_some() {
            worker.ack(&mut stream).await;
        }
    }

    async fn ack(&self, stream: &mut Box<dyn MessageStream>) {
        if let Err(e) = stream.ack().await {
            warn!(
                channel = %self.binding.channel,
                error = %e,
                "Failed to acknowledge message"
            );
        }
    }

    /// Invoke the handler, retrying per policy, and report a final failure.
    ///
    /// Each invocation runs in its own task so a panicking handler only takes
    /// down that invocation.
    async fn deliver(&self, message: Message) {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let handler = self.handler.clone();
            let invocation = message.clone();
            let outcome = tokio::spawn(async move { handler.handle(invocation).await }).await;

            let error = match outcome {
                Ok(Ok(())) => {
                    MESSAGING_METRICS
                        .messages_consumed
                        .with_label_values(&[self.binding.channel.as_str(), self.binder_id.as_str()])
                        .inc();
                    return;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(e) if e.is_panic() => format!("handler panicked: {}", panic_message(e.into_panic())),
                Err(e) => format!("handler task failed: {}", e),
            };

            if attempt >= max_attempts {
                MESSAGING_METRICS
                    .handler_failures
                    .with_label_values(&[self.binding.channel.as_str(), self.binder_id.as_str()])
                    .inc();
                warn!(
                    channel = %self.binding.channel,
                    message_id = %message.id(),
                    attempts = attempt,
                    error = %error,
                    "Handler failed"
                );

                self.router.route(
                    FailureRecord::new(
                        FailureCause::Handler,
                        error,
                        &self.binding.channel,
                        &self.binding.destination,
                    )
                    .with_message(message)
                    .with_attempts(attempt),
                );
                return;
            }

            let delay = self.retry.backoff(attempt);
            debug!(
                channel = %self.binding.channel,
                message_id = %message.id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying handler"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
