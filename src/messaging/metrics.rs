//! Prometheus metrics for messaging

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

/// Messaging metrics
pub struct MessagingMetrics {
    /// Messages handed to the binder
    pub messages_published: CounterVec,

    /// Messages handled successfully by a consumer handler
    pub messages_consumed: CounterVec,

    /// Binder hand-off failures
    pub publish_failures: CounterVec,

    /// Handler invocations that ended in a failure record
    pub handler_failures: CounterVec,

    /// Failure records delivered to the failure handler, by cause
    pub failures_routed: CounterVec,

    /// Failure records dropped (no handler or queue full), by reason
    pub failures_dropped: CounterVec,

    /// Message publish latency
    pub publish_latency: HistogramVec,
}

lazy_static! {
    pub static ref MESSAGING_METRICS: MessagingMetrics = MessagingMetrics {
        messages_published: register_counter_vec!(
            "relay_messages_published_total",
            "Total number of messages published",
            &["channel", "binder"]
        )
        .unwrap(),

        messages_consumed: register_counter_vec!(
            "relay_messages_consumed_total",
            "Total number of messages consumed",
            &["channel", "binder"]
        )
        .unwrap(),

        publish_failures: register_counter_vec!(
            "relay_publish_failures_total",
            "Total number of publish failures",
            &["channel", "binder"]
        )
        .unwrap(),

        handler_failures: register_counter_vec!(
            "relay_handler_failures_total",
            "Total number of handler failures",
            &["channel", "binder"]
        )
        .unwrap(),

        failures_routed: register_counter_vec!(
            "relay_failures_routed_total",
            "Total number of failure records delivered to the failure handler",
            &["cause"]
        )
        .unwrap(),

        failures_dropped: register_counter_vec!(
            "relay_failures_dropped_total",
            "Total number of failure records dropped",
            &["reason"]
        )
        .unwrap(),

        publish_latency: register_histogram_vec!(
            "relay_publish_latency_seconds",
            "Message publish latency in seconds",
            &["channel", "binder"]
        )
        .unwrap(),
    };
}

/// Initialize messaging metrics
pub fn init_messaging_metrics() {
    lazy_static::initialize(&MESSAGING_METRICS);
}

/// Export the default registry in Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
