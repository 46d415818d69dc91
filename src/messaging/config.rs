//! Messaging configuration

use crate::messaging::bindings::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Binder backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BinderKind {
    /// Kafka - distributed event streaming platform
    Kafka,
    /// NATS - lightweight queue-based messaging
    Nats,
    /// Process-local topics, for tests and single-node runs
    InMemory,
}

impl fmt::Display for BinderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinderKind::Kafka => write!(f, "kafka"),
            BinderKind::Nats => write!(f, "nats"),
            BinderKind::InMemory => write!(f, "in_memory"),
        }
    }
}

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URLs
    pub servers: Vec<String>,

    /// Connection name
    pub connection_name: String,

    /// Maximum reconnect attempts
    pub max_reconnects: Option<usize>,

    /// Ping interval in seconds
    pub ping_interval_secs: u64,

    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            connection_name: "stream-relay".to_string(),
            max_reconnects: Some(10),
            ping_interval_secs: 60,
            request_timeout_ms: 5000,
        }
    }
}

/// Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,

    /// Client ID
    pub client_id: String,

    /// Enable auto commit
    pub enable_auto_commit: bool,

    /// Auto commit interval in milliseconds
    pub auto_commit_interval_ms: u64,

    /// Session timeout in milliseconds
    pub session_timeout_ms: u64,

    /// Where a new consumer group starts (earliest, latest)
    pub auto_offset_reset: String,

    /// Compression type (none, gzip, snappy, lz4, zstd)
    pub compression_type: String,

    /// Message timeout in milliseconds
    pub message_timeout_ms: u64,

    /// Number of retries
    pub retries: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "stream-relay".to_string(),
            enable_auto_commit: true,
            auto_commit_interval_ms: 5000,
            session_timeout_ms: 30000,
            auto_offset_reset: "earliest".to_string(),
            compression_type: "snappy".to_string(),
            message_timeout_ms: 30000,
            retries: 3,
        }
    }
}

/// One configured binder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinderConfig {
    /// Backend to build
    #[serde(rename = "type")]
    pub kind: BinderKind,

    /// Whether this binder serves the process's bindings
    #[serde(default)]
    pub active: bool,

    #[serde(default)]
    pub kafka: KafkaConfig,

    #[serde(default)]
    pub nats: NatsConfig,
}

impl BinderConfig {
    pub fn new(kind: BinderKind) -> Self {
        Self {
            kind,
            active: false,
            kafka: KafkaConfig::default(),
            nats: NatsConfig::default(),
        }
    }

    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }
}

/// One channel binding as declared in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Logical channel name used by application code
    pub channel: String,

    /// Physical destination (topic, subject, queue)
    pub destination: String,

    pub role: Role,

    /// Consumer group, consumer role only
    #[serde(default)]
    pub group: Option<String>,

    /// Binder serving this binding; defaults to the active binder
    #[serde(default)]
    pub binder: Option<String>,
}

/// Handler retry policy.
///
/// `max_attempts` counts the first invocation, so the default of 1 means a
/// failed handler is reported without being retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 100,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// No retries
    pub fn none() -> Self {
        Self::default()
    }

    /// Delay before the given retry (1 = first retry)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

/// Channel binding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Binders keyed by binder id
    #[serde(default)]
    pub binders: BTreeMap<String, BinderConfig>,

    #[serde(default)]
    pub bindings: Vec<BindingConfig>,

    /// Capacity of the failure queue in front of the failure handler
    #[serde(default = "default_error_queue_size")]
    pub error_queue_size: usize,

    /// Concurrent handler invocations per subscription
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let mut binders = BTreeMap::new();
        binders.insert(
            "memory".to_string(),
            BinderConfig::new(BinderKind::InMemory).active(),
        );

        Self {
            binders,
            bindings: Vec::new(),
            error_queue_size: default_error_queue_size(),
            max_in_flight: default_max_in_flight(),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_error_queue_size() -> usize {
    1024
}

fn default_max_in_flight() -> usize {
    1
}
