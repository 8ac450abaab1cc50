//! Transport abstraction for Tubes connectors.
//!
//! A transport accepts physical connections and drives a [`Connector`] for
//! each of them: join on establishment, one message call per received
//! payload, and one leave when the connection ends.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tubes_core::{ClientSink, Connector};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The WebSocket handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A transport that accepts connections and feeds them to a [`Connector`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept connections until the listener fails.
    ///
    /// Every accepted connection is served on its own task.
    async fn serve(&self, connector: Connector) -> Result<(), TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

/// Create the outbound queue of one connection.
///
/// The sink half is handed to [`Connector::join`]; the receiver must be
/// drained by a single writer task, which serializes every write to the
/// connection.
#[must_use]
pub fn outbound_queue() -> (Arc<dyn ClientSink>, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    (Arc::new(tx), rx)
}

/// Outbound frames are JSON and go out as text; anything else as binary.
pub(crate) fn into_text(data: Bytes) -> Result<String, Vec<u8>> {
    String::from_utf8(data.to_vec()).map_err(|e| e.into_bytes())
}
