//! Channel binding layer over pluggable message brokers
//!
//! Application code talks in logical channels (`invoiceOutput`,
//! `invoiceInput`); configuration decides which broker backend is active and
//! which physical destination each channel maps to. Swapping Kafka for NATS is
//! a configuration change, not a code change.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 Dispatcher                       │
//! ├─────────────────────────────────────────────────┤
//! │  - send(channel, payload)                        │
//! │  - subscribe(channel, handler)                   │
//! └─────────────────────────────────────────────────┘
//!           │                        │
//!           ▼                        ▼
//! ┌──────────────────┐    ┌──────────────────────────┐
//! │  Binding Table   │    │  Error Router            │
//! │ channel+role →   │    │ failures → bounded queue │
//! │ destination      │    │ → failure handler        │
//! └──────────────────┘    └──────────────────────────┘
//!           │
//!           ▼
//! ┌─────────────────────────────────────────────────┐
//! │       Binder Registry (exactly one active)       │
//! └─────────────────────────────────────────────────┘
//!      │                  │                   │
//!      ▼                  ▼                   ▼
//! ┌──────────┐     ┌──────────┐       ┌────────────┐
//! │  Kafka   │     │   NATS   │       │ In-memory  │
//! └──────────┘     └──────────┘       └────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stream_relay::messaging::{handler_fn, Message, StreamConfig, StreamContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let context = StreamContext::from_config(&StreamConfig::default()).await?;
//!     let dispatcher = context.dispatcher();
//!
//!     dispatcher
//!         .subscribe("invoiceInput", handler_fn(|message: Message| async move {
//!             println!("{}", message.payload_str());
//!             Ok(())
//!         }))
//!         .await?;
//!
//!     dispatcher.send("invoiceOutput", "INV-1").await?;
//!     Ok(())
//! }
//! ```

mod bindings;
mod config;
mod dispatcher;
mod error;
mod error_router;
mod kafka;
mod memory;
mod message;
mod metrics;
mod nats;
mod registry;
mod service;
mod traits;

pub use bindings::{Binding, BindingTable, Role};
pub use config::{
    BinderConfig, BinderKind, BindingConfig, KafkaConfig, NatsConfig, RetryPolicy, StreamConfig,
};
pub use dispatcher::{DeliveryOptions, Dispatcher};
pub use error::{MessagingError, MessagingResult};
pub use error_router::ErrorRouter;
pub use kafka::KafkaBinder;
pub use memory::InMemoryBinder;
pub use message::{
    FailureCause, FailureRecord, Message, HEADER_CHANNEL, HEADER_MESSAGE_ID, HEADER_TIMESTAMP,
};
pub use metrics::{gather_metrics, init_messaging_metrics, MESSAGING_METRICS};
pub use nats::NatsBinder;
pub use registry::BinderRegistry;
pub use service::StreamContext;
pub use traits::{
    failure_handler_fn, handler_fn, Binder, FailureHandler, FnFailureHandler, FnHandler,
    MessageHandler, MessageStream,
};
