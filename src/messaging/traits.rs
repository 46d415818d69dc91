//! Messaging trait abstractions

use crate::messaging::config::BinderKind;
use crate::messaging::error::MessagingResult;
use crate::messaging::message::{FailureRecord, Message};
use async_trait::async_trait;
use std::future::Future;

/// A broker backend exposing uniform publish/subscribe primitives.
///
/// Destinations are physical broker names (topics, subjects, queues); the
/// binder never sees logical channel names except as message metadata.
#[async_trait]
pub trait Binder: Send + Sync {
    /// The backend variant behind this binder
    fn kind(&self) -> BinderKind;

    /// Hand a message to the broker for a destination.
    ///
    /// Success means the broker client accepted the message, not that any
    /// consumer received it.
    async fn publish(&self, destination: &str, message: &Message) -> MessagingResult<()>;

    /// Open a stream of messages arriving on a destination.
    ///
    /// With a consumer group, each message is delivered to one member of the
    /// group; without one, the subscription sees every message.
    async fn subscribe(
        &self,
        destination: &str,
        group: Option<&str>,
    ) -> MessagingResult<Box<dyn MessageStream>>;

    /// Check if the binder is connected
    async fn is_connected(&self) -> bool;

    /// Close the binder connection
    async fn close(&self) -> MessagingResult<()>;
}

/// Message stream trait for consuming messages
#[async_trait]
pub trait MessageStream: Send {
    /// Get the next message from the stream. `Ok(None)` means the stream ended.
    async fn next(&mut self) -> MessagingResult<Option<Message>>;

    /// Acknowledge the oldest delivered message not yet acknowledged.
    ///
    /// Callers ack once per message, in the order `next` returned them, and
    /// only after the message has been handled.
    async fn ack(&mut self) -> MessagingResult<()>;
}

/// Business logic invoked once per inbound message.
///
/// Handlers may be invoked concurrently from several delivery workers, and
/// more than once for the same message when the binder redelivers.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message) -> anyhow::Result<()>;
}

/// Receiver of failure records routed by the error router
#[async_trait]
pub trait FailureHandler: Send + Sync + 'static {
    async fn handle(&self, record: FailureRecord);
}

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        (self.0)(message).await
    }
}

/// Adapter turning a plain closure into a [`FailureHandler`]
pub struct FnFailureHandler<F>(F);

/// Wrap a closure as a [`FailureHandler`]
pub fn failure_handler_fn<F>(f: F) -> FnFailureHandler<F>
where
    F: Fn(FailureRecord) + Send + Sync + 'static,
{
    FnFailureHandler(f)
}

#[async_trait]
impl<F> FailureHandler for FnFailureHandler<F>
where
    F: Fn(FailureRecord) + Send + Sync + 'static,
{
    async fn handle(&self, record: FailureRecord) {
        (self.0)(record)
    }
}
