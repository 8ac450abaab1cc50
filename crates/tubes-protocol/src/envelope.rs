//! Envelope types for the Tubes protocol.
//!
//! Every application-level transport message carries exactly one envelope:
//! a message type, the concrete channel path it targets and an opaque payload.

use bytes::Bytes;
use std::fmt;

/// Envelope type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Join the subscriber set of a channel path.
    Subscribe,
    /// Leave the subscriber set of a channel path.
    Unsubscribe,
    /// Publish a payload to the handlers of a channel path.
    Message,
}

impl MessageType {
    /// Wire name of this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
            MessageType::Message => "message",
        }
    }
}

impl TryFrom<&str> for MessageType {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "subscribe" => Ok(MessageType::Subscribe),
            "unsubscribe" => Ok(MessageType::Unsubscribe),
            "message" => Ok(MessageType::Message),
            _ => Err("Invalid message type"),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded protocol envelope.
///
/// `payload` holds the raw JSON text of the `payload` field exactly as it was
/// received, or the decoded bytes of a base64 payload. It is empty when the
/// field was absent or `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope type.
    pub kind: MessageType,
    /// Concrete channel path.
    pub channel: String,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new Subscribe envelope.
    #[must_use]
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Subscribe,
            channel: channel.into(),
            payload: Bytes::new(),
        }
    }

    /// Create a new Unsubscribe envelope.
    #[must_use]
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Unsubscribe,
            channel: channel.into(),
            payload: Bytes::new(),
        }
    }

    /// Create a new Message envelope.
    #[must_use]
    pub fn message(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageType::Message,
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Check whether the envelope carries a payload.
    #[must_use]
    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }
}
