//! NATS binder
//!
//! Destinations are NATS subjects. A consumer group maps onto a NATS queue
//! group, so each message goes to one member of the group.

use crate::messaging::config::{BinderKind, NatsConfig};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::message::Message;
use crate::messaging::traits::{Binder, MessageStream};
use async_nats::{Client, ConnectOptions, HeaderMap};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Binder publishing to and subscribing from NATS subjects
pub struct NatsBinder {
    client: Client,
}

impl NatsBinder {
    /// Connect to the configured NATS servers
    pub async fn connect(config: NatsConfig) -> MessagingResult<Self> {
        if config.servers.is_empty() {
            return Err(MessagingError::Configuration(
                "NATS binder needs at least one server".to_string(),
            ));
        }

        let client = ConnectOptions::new()
            .name(&config.connection_name)
            .max_reconnects(config.max_reconnects)
            .ping_interval(Duration::from_secs(config.ping_interval_secs))
            .request_timeout(Some(Duration::from_millis(config.request_timeout_ms)))
            .connect(config.servers.join(","))
            .await
            .map_err(|e| MessagingError::ConnectionFailed(format!("NATS connection failed: {}", e)))?;

        info!(servers = ?config.servers, "NATS binder connected");

        Ok(Self { client })
    }
}

#[async_trait]
impl Binder for NatsBinder {
    fn kind(&self) -> BinderKind {
        BinderKind::Nats
    }

    async fn publish(&self, destination: &str, message: &Message) -> MessagingResult<()> {
        let mut headers = HeaderMap::new();
        for (key, value) in message.wire_headers() {
            headers.insert(key.as_str(), value.as_str());
        }

        self.client
            .publish_with_headers(destination.to_string(), headers, message.payload().to_vec().into())
            .await
            .map_err(|e| MessagingError::Delivery(format!("NATS publish failed: {}", e)))
    }

    async fn subscribe(
        &self,
        destination: &str,
        group: Option<&str>,
    ) -> MessagingResult<Box<dyn MessageStream>> {
        let subscriber = match group {
            Some(group) => self
                .client
                .queue_subscribe(destination.to_string(), group.to_string())
                .await,
            None => self.client.subscribe(destination.to_string()).await,
        }
        .map_err(|e| MessagingError::SubscribeFailed(format!("NATS subscribe failed: {}", e)))?;

        info!(destination, group = ?group, "NATS subscription opened");

        Ok(Box::new(NatsMessageStream { subscriber }))
    }

    async fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    async fn close(&self) -> MessagingResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| MessagingError::Delivery(format!("NATS flush failed: {}", e)))
    }
}

/// NATS message stream
pub struct NatsMessageStream {
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl MessageStream for NatsMessageStream {
    async fn next(&mut self) -> MessagingResult<Option<Message>> {
        Ok(self.subscriber.next().await.map(|msg| {
            let headers: HashMap<String, String> = msg
                .headers
                .as_ref()
                .map(|headers| {
                    headers
                        .iter()
                        .filter_map(|(name, values)| {
                            values.first().map(|value| (name.to_string(), value.to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default();
            Message::from_wire(msg.payload.to_vec(), headers)
        }))
    }

    async fn ack(&mut self) -> MessagingResult<()> {
        // NATS core doesn't require explicit acks (use JetStream for that)
        Ok(())
    }
}
