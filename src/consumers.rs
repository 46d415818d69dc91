//! Application consumers: log what arrives and log what fails

use crate::messaging::{
    Dispatcher, ErrorRouter, FailureHandler, FailureRecord, Message, MessageHandler, MessagingError,
    MessagingResult,
};
use async_trait::async_trait;
use tracing::{error, info};

/// Channel carrying invoices to this service
pub const INVOICE_INPUT: &str = "invoiceInput";

/// Channel carrying orders to this service
pub const ORDER_INPUT: &str = "orderInput";

/// Logs every invoice message it receives
pub struct InvoiceConsumer;

#[async_trait]
impl MessageHandler for InvoiceConsumer {
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        info!(message_id = %message.id(), "Received invoice message: {}", message.payload_str());
        Ok(())
    }
}

/// Logs every order message it receives
pub struct OrderConsumer;

#[async_trait]
impl MessageHandler for OrderConsumer {
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        info!(message_id = %message.id(), "Received order message: {}", message.payload_str());
        Ok(())
    }
}

/// Process-wide failure handler: logs each failure record
pub struct LoggingFailureHandler;

#[async_trait]
impl FailureHandler for LoggingFailureHandler {
    async fn handle(&self, record: FailureRecord) {
        error!(
            cause = %record.cause,
            channel = %record.channel,
            destination = %record.destination,
            attempts = record.attempts,
            message_id = ?record.message.as_ref().map(Message::id),
            error = %record.error,
            "Error Processing Message"
        );
    }
}

/// Register the failure handler and subscribe the consumers to their channels.
///
/// A consumer channel without a binding in the active profile is skipped with
/// a log line; any other subscribe error aborts startup.
pub async fn register(dispatcher: &Dispatcher, router: &ErrorRouter) -> MessagingResult<()> {
    router.on_failure(LoggingFailureHandler);

    for (channel, result) in [
        (INVOICE_INPUT, dispatcher.subscribe(INVOICE_INPUT, InvoiceConsumer).await),
        (ORDER_INPUT, dispatcher.subscribe(ORDER_INPUT, OrderConsumer).await),
    ] {
        match result {
            Ok(()) => {}
            Err(MessagingError::UnboundChannel { .. }) => {
                info!(channel, "No consumer binding in this profile, consumer not started");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}
