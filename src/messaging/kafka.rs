//! Kafka binder

use crate::messaging::config::{BinderKind, KafkaConfig};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::message::Message;
use crate::messaging::traits::{Binder, MessageStream};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Message as _, Offset, TopicPartitionList};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info};

/// Binder publishing to and consuming from Kafka topics
pub struct KafkaBinder {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaBinder {
    /// Create a new Kafka binder.
    ///
    /// librdkafka connects lazily, so this only fails on invalid client settings.
    pub fn new(config: KafkaConfig) -> MessagingResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("compression.type", &config.compression_type)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("retries", config.retries.to_string())
            .create()
            .map_err(|e| MessagingError::ConnectionFailed(format!("Kafka producer creation failed: {}", e)))?;

        info!(bootstrap_servers = %config.bootstrap_servers, "Kafka binder created");

        Ok(Self { producer, config })
    }

    fn consumer(&self, group: &str) -> MessagingResult<StreamConsumer> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .set("group.id", group)
            .set("client.id", &self.config.client_id)
            .set("enable.auto.commit", self.config.enable_auto_commit.to_string())
            // Auto-commit only covers offsets stored by ack
            .set("enable.auto.offset.store", "false")
            .set(
                "auto.commit.interval.ms",
                self.config.auto_commit_interval_ms.to_string(),
            )
            .set("session.timeout.ms", self.config.session_timeout_ms.to_string())
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .create()
            .map_err(|e| MessagingError::ConnectionFailed(format!("Kafka consumer creation failed: {}", e)))
    }
}

#[async_trait]
impl Binder for KafkaBinder {
    fn kind(&self) -> BinderKind {
        BinderKind::Kafka
    }

    async fn publish(&self, destination: &str, message: &Message) -> MessagingResult<()> {
        let wire_headers = message.wire_headers();
        let mut headers = OwnedHeaders::new_with_capacity(wire_headers.len());
        for (key, value) in &wire_headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            });
        }

        let record: FutureRecord<'_, str, [u8]> = FutureRecord::to(destination)
            .payload(message.payload())
            .headers(headers);

        let (partition, offset) = self
            .producer
            .send(record, Duration::from_secs(0))
            .await
            .map_err(|(e, _)| MessagingError::Delivery(format!("Kafka publish failed: {}", e)))?;

        debug!(destination, partition, offset, message_id = %message.id(), "Kafka publish acknowledged");
        Ok(())
    }

    async fn subscribe(
        &self,
        destination: &str,
        group: Option<&str>,
    ) -> MessagingResult<Box<dyn MessageStream>> {
        // Kafka has no ungrouped consumers; an anonymous group sees every message
        let group = match group {
            Some(group) => group.to_string(),
            None => format!("{}-anonymous-{}", self.config.client_id, uuid::Uuid::new_v4()),
        };

        let consumer = self.consumer(&group)?;
        consumer
            .subscribe(&[destination])
            .map_err(|e| MessagingError::SubscribeFailed(format!("Kafka subscribe failed: {}", e)))?;

        info!(destination, group = %group, "Kafka consumer subscribed");

        Ok(Box::new(KafkaMessageStream {
            consumer,
            manual_commit: !self.config.enable_auto_commit,
            unacked: VecDeque::new(),
        }))
    }

    async fn is_connected(&self) -> bool {
        // Kafka producer doesn't have an explicit connected state
        true
    }

    async fn close(&self) -> MessagingResult<()> {
        self.producer
            .flush(Duration::from_secs(5))
            .map_err(|e| MessagingError::Delivery(format!("Kafka flush failed: {}", e)))
    }
}

/// Kafka message stream
pub struct KafkaMessageStream {
    consumer: StreamConsumer,
    manual_commit: bool,
    /// Topic, partition and offset of delivered messages not yet acknowledged
    unacked: VecDeque<(String, i32, i64)>,
}

#[async_trait]
impl MessageStream for KafkaMessageStream {
    async fn next(&mut self) -> MessagingResult<Option<Message>> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| MessagingError::ConsumeFailed(format!("Kafka recv failed: {}", e)))?;

        let payload = msg.payload().map(<[u8]>::to_vec).unwrap_or_default();
        let headers: HashMap<String, String> = msg
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|header| {
                        header
                            .value
                            .map(|value| (header.key.to_string(), String::from_utf8_lossy(value).into_owned()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.unacked
            .push_back((msg.topic().to_string(), msg.partition(), msg.offset()));

        Ok(Some(Message::from_wire(payload, headers)))
    }

    async fn ack(&mut self) -> MessagingResult<()> {
        let Some((topic, partition, offset)) = self.unacked.pop_front() else {
            return Ok(());
        };

        // Stored and committed offsets point at the next message to read
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| MessagingError::ConsumeFailed(format!("Kafka ack failed: {}", e)))?;

        if self.manual_commit {
            self.consumer
                .commit(&tpl, CommitMode::Async)
                .map_err(|e| MessagingError::ConsumeFailed(format!("Kafka commit failed: {}", e)))?;
        } else {
            self.consumer
                .store_offsets(&tpl)
                .map_err(|e| MessagingError::ConsumeFailed(format!("Kafka offset store failed: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kafka_binder_creation_is_lazy() {
        // No broker needed: librdkafka only validates settings here
        let binder = KafkaBinder::new(KafkaConfig::default()).unwrap();
        assert_eq!(binder.kind(), BinderKind::Kafka);
    }

    #[test]
    fn test_invalid_compression_rejected() {
        let config = KafkaConfig {
            compression_type: "not-a-codec".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            KafkaBinder::new(config),
            Err(MessagingError::ConnectionFailed(_))
        ));
    }
}
