//! Error types for messaging operations

use crate::error::AppError;
use crate::messaging::bindings::Role;

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Errors that can occur during messaging operations
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Missing, ambiguous or malformed binder/binding configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No binder registered under the requested id
    #[error("Binder not found: {0}")]
    BinderNotFound(String),

    /// Send or subscribe on a channel with no binding for that role
    #[error("Channel '{channel}' has no {role} binding")]
    UnboundChannel { channel: String, role: Role },

    /// A binding already exists for the channel and role
    #[error("Channel '{channel}' already has a {role} binding")]
    DuplicateBinding { channel: String, role: Role },

    /// The binder failed to take a message
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// A consumer handler failed
    #[error("Handler failed: {0}")]
    Handler(String),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Subscribe failed
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Consume failed
    #[error("Consume failed: {0}")]
    ConsumeFailed(String),
}

impl MessagingError {
    pub(crate) fn unbound(channel: &str, role: Role) -> Self {
        MessagingError::UnboundChannel {
            channel: channel.to_string(),
            role,
        }
    }

    pub(crate) fn duplicate(channel: &str, role: Role) -> Self {
        MessagingError::DuplicateBinding {
            channel: channel.to_string(),
            role,
        }
    }
}

impl From<MessagingError> for AppError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::Configuration(msg) => AppError::Configuration(msg),
            MessagingError::BinderNotFound(_)
            | MessagingError::UnboundChannel { .. }
            | MessagingError::DuplicateBinding { .. } => AppError::Configuration(err.to_string()),
            MessagingError::Delivery(_) | MessagingError::ConnectionFailed(_) => {
                AppError::Network(err.to_string())
            }
            _ => AppError::Internal(err.to_string()),
        }
    }
}
