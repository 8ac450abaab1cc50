//! # tubes-protocol
//!
//! Wire protocol definitions for the Tubes channel router.
//!
//! Clients and servers exchange JSON envelopes:
//!
//! ```json
//! {"type": "subscribe", "channel": "room/42"}
//! {"type": "message", "channel": "room/42", "payload": {"text": "hi"}}
//! ```
//!
//! - `subscribe` / `unsubscribe` - Channel membership
//! - `message` - Publish a payload to a channel's handlers
//!
//! The payload is opaque to the protocol: JSON payloads pass through as raw
//! JSON, anything else as a base64 string marked `"encoding": "base64"`.
//!
//! ## Example
//!
//! ```rust
//! use tubes_protocol::{codec, Envelope};
//!
//! let data = codec::encode(&Envelope::message("room/42", &b"{\"text\":\"hi\"}"[..]));
//! let decoded = codec::decode(&data).unwrap();
//! assert_eq!(decoded.channel, "room/42");
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, EnvelopeCodec, ProtocolError, BASE64_ENCODING, MAX_MESSAGE_SIZE};
pub use envelope::{Envelope, MessageType};
