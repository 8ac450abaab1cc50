//! Codec for encoding and decoding Tubes envelopes.
//!
//! Envelopes travel as JSON objects with the fields `type`, `channel` and
//! `payload`. A JSON payload is never decoded: its raw text is carried through
//! as bytes in both directions. Any other payload travels as a base64 string
//! and the envelope is marked with `"encoding":"base64"`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::value::RawValue;
use thiserror::Error;

use crate::envelope::{Envelope, MessageType};

/// Maximum envelope size (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Value of the `encoding` field for base64 payloads.
pub const BASE64_ENCODING: &str = "base64";

/// Protocol errors that can occur during decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Envelope exceeds the size limit.
    #[error("Message size {size} exceeds maximum {limit}")]
    MessageTooLarge {
        /// Received size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The data is not a well-formed envelope.
    #[error("Malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope type is not one of the recognized values.
    #[error("Unknown message type: '{0}'")]
    UnknownType(String),

    /// An encoded payload could not be decoded.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

#[derive(Deserialize)]
struct InboundEnvelope {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    payload: Option<Box<RawValue>>,
    #[serde(default)]
    encoding: Option<String>,
}

/// Decode an envelope from bytes.
///
/// # Errors
///
/// Returns an error if the data is too large, is not a well-formed envelope,
/// names an unknown type or carries an undecodable payload.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    decode_with_limit(data, MAX_MESSAGE_SIZE)
}

/// Decode an envelope, rejecting data larger than `limit` bytes.
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_with_limit(data: &[u8], limit: usize) -> Result<Envelope, ProtocolError> {
    if data.len() > limit {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            limit,
        });
    }

    let inbound: InboundEnvelope = serde_json::from_slice(data)?;
    let kind = MessageType::try_from(inbound.kind.as_str())
        .map_err(|_| ProtocolError::UnknownType(inbound.kind.clone()))?;

    let payload = match (inbound.payload, inbound.encoding.as_deref()) {
        (None, _) => Bytes::new(),
        (Some(raw), None) => Bytes::copy_from_slice(raw.get().as_bytes()),
        (Some(raw), Some(BASE64_ENCODING)) => {
            let text: String = serde_json::from_str(raw.get())
                .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
            let bytes = STANDARD
                .decode(text)
                .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
            Bytes::from(bytes)
        }
        (Some(_), Some(other)) => {
            return Err(ProtocolError::InvalidPayload(format!(
                "unsupported encoding '{other}'"
            )))
        }
    };

    Ok(Envelope {
        kind,
        channel: inbound.channel,
        payload,
    })
}

/// Encode an envelope to bytes.
///
/// An empty payload is omitted from the output. Payload bytes that are not a
/// single JSON value are sent base64-encoded.
#[must_use]
pub fn encode(envelope: &Envelope) -> Bytes {
    encode_parts(envelope.kind, &envelope.channel, &envelope.payload)
}

/// Encode a `message` envelope for a channel without building an [`Envelope`].
#[must_use]
pub fn encode_message(channel: &str, payload: &[u8]) -> Bytes {
    encode_parts(MessageType::Message, channel, payload)
}

fn encode_parts(kind: MessageType, channel: &str, payload: &[u8]) -> Bytes {
    let mut out = format!(
        r#"{{"type":"{}","channel":{}"#,
        kind.as_str(),
        serde_json::Value::from(channel)
    );

    if !payload.is_empty() {
        match serde_json::from_slice::<&RawValue>(payload) {
            Ok(raw) => {
                out.push_str(r#","payload":"#);
                out.push_str(raw.get());
            }
            Err(_) => {
                out.push_str(r#","payload":""#);
                out.push_str(&STANDARD.encode(payload));
                out.push_str(r#"","encoding":"base64""#);
            }
        }
    }

    out.push('}');
    Bytes::from(out)
}

/// Codec carrying a per-deployment size limit.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    max_message_size: usize,
}

impl EnvelopeCodec {
    /// Create a codec with the given inbound size limit.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size: max_message_size.min(MAX_MESSAGE_SIZE),
        }
    }

    /// Get the inbound size limit.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Decode an envelope from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        decode_with_limit(data, self.max_message_size)
    }

    /// Encode an envelope to bytes.
    #[must_use]
    pub fn encode(&self, envelope: &Envelope) -> Bytes {
        encode(envelope)
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}
