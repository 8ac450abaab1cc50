//! # tubes-core
//!
//! Channel registration, path matching and subscription dispatch for the
//! Tubes realtime router.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Client** - Connected clients and their registry
//! - **Channel** - Path-pattern templates and per-path subscription contexts
//! - **Store** - Resolves a concrete path to every matching template
//! - **Router** - Interprets the client protocol and pushes server messages
//! - **Connector** - Lifecycle entry points for transports
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐     ┌─────────────────┐
//! │  Connector  │────▶│   Router    │────▶│ ChannelStore │────▶│ ChannelTemplate │
//! └─────────────┘     └─────────────┘     └──────────────┘     └─────────────────┘
//!                            │                                          │
//!                            ▼                                          ▼
//!                     ┌─────────────┐                         ┌─────────────────────┐
//!                     │ ClientStore │                         │ SubscriptionContext │
//!                     └─────────────┘                         └─────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tubes_core::{ChannelHandlers, Connector, Properties, Router};
//!
//! let mut router = Router::new();
//! router
//!     .register_channel("room/{id}", ChannelHandlers::new())
//!     .unwrap();
//! let connector = Connector::new(Arc::new(router));
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<bytes::Bytes>();
//! let client = connector.join(Arc::new(tx), Properties::new());
//! connector.message(client.id(), br#"{"type":"subscribe","channel":"room/42"}"#);
//!
//! connector.router().send("room/42", client.id(), br#""hello""#).unwrap();
//! assert!(rx.try_recv().is_ok());
//! ```

pub mod channel;
pub mod client;
pub mod connector;
pub mod error;
pub mod router;
pub mod store;

pub use channel::{ChannelHandlers, ChannelPattern, ChannelTemplate, Params, SubscriptionContext};
pub use client::{Client, ClientId, ClientSink, ClientStore, FnSink, Properties, SendError};
pub use connector::Connector;
pub use error::{ErrorHandler, ErrorKind, TubeError};
pub use router::{Router, RouterConfig, RouterStats};
pub use store::{ChannelMatch, ChannelStore};
