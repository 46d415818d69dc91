//! Message and failure record types carried through the binding layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Header carrying the message id across a broker hop
pub const HEADER_MESSAGE_ID: &str = "relay-message-id";

/// Header carrying the producing channel across a broker hop
pub const HEADER_CHANNEL: &str = "relay-channel";

/// Header carrying the creation timestamp (RFC 3339) across a broker hop
pub const HEADER_TIMESTAMP: &str = "relay-timestamp";

const RESERVED_HEADERS: [&str; 3] = [HEADER_MESSAGE_ID, HEADER_CHANNEL, HEADER_TIMESTAMP];

/// A message travelling over a logical channel.
///
/// Fields are private: a message is assembled with the builder methods before
/// it is handed to the dispatcher and is read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    id: Uuid,
    channel: String,
    payload: Vec<u8>,
    headers: HashMap<String, String>,
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message for a channel
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            payload: payload.into(),
            headers: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Add a custom header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Rebuild a message from what a broker handed back.
    ///
    /// Reserved headers are lifted into the typed fields; when they are
    /// missing (a producer outside this relay), a fresh id and the receive
    /// time are used instead.
    pub fn from_wire(payload: Vec<u8>, mut headers: HashMap<String, String>) -> Self {
        let id = headers
            .remove(HEADER_MESSAGE_ID)
            .and_then(|raw| Uuid::parse_str(&raw).ok())
            .unwrap_or_else(Uuid::new_v4);
        let channel = headers.remove(HEADER_CHANNEL).unwrap_or_default();
        let timestamp = headers
            .remove(HEADER_TIMESTAMP)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Self {
            id,
            channel,
            payload,
            headers,
            timestamp,
        }
    }

    /// Headers to put on the wire, reserved ones included
    pub fn wire_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(key, _)| !RESERVED_HEADERS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        headers.push((HEADER_MESSAGE_ID.to_string(), self.id.to_string()));
        headers.push((HEADER_CHANNEL.to_string(), self.channel.clone()));
        headers.push((HEADER_TIMESTAMP.to_string(), self.timestamp.to_rfc3339()));
        headers
    }

    /// Re-address a received message to the consuming channel.
    ///
    /// The producing channel is kept under [`HEADER_CHANNEL`] so handlers can
    /// still see where the message came from.
    pub(crate) fn received_on(mut self, channel: &str) -> Self {
        if !self.channel.is_empty() {
            self.headers
                .insert(HEADER_CHANNEL.to_string(), std::mem::take(&mut self.channel));
        }
        self.channel = channel.to_string();
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as UTF-8 text, lossily decoded
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Where a failure happened
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The binder refused or failed the publish hand-off
    Publish,
    /// A consumer handler returned an error or panicked
    Handler,
    /// The broker reported an error on a subscription stream
    Broker,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Publish => write!(f, "publish"),
            FailureCause::Handler => write!(f, "handler"),
            FailureCause::Broker => write!(f, "broker"),
        }
    }
}

/// A terminal record of a failed delivery or handler invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The message involved, when the failure happened with one in hand
    pub message: Option<Message>,
    pub cause: FailureCause,
    pub error: String,
    pub channel: String,
    pub destination: String,
    /// Handler attempts made before giving up (1 for publish and broker failures)
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(
        cause: FailureCause,
        error: impl Into<String>,
        channel: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            message: None,
            cause,
            error: error.into(),
            channel: channel.into(),
            destination: destination.into(),
            attempts: 1,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}
