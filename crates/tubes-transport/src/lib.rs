//! # tubes-transport
//!
//! WebSocket connectors for the Tubes channel router.
//!
//! Every connector follows the same contract: join the [`tubes_core::Connector`]
//! once a connection is established, forward each received payload in order,
//! and leave exactly once when the connection ends. Writes to a connection go
//! through a per-connection queue drained by a single writer task.
//!
//! - **websocket** - Standalone tokio-tungstenite listener (default)
//! - **axum** - Glue for sockets upgraded by an axum handler
//!
//! ```rust,ignore
//! use tubes_transport::{Transport, WebSocketTransport};
//!
//! let transport = WebSocketTransport::bind("127.0.0.1:9090".parse()?).await?;
//! transport.serve(connector).await?;
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "axum")]
pub mod axum;

pub use traits::{outbound_queue, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
