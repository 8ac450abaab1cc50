//! Connected clients and the client registry.
//!
//! A [`Client`] is created when a connection is established and lives in the
//! [`ClientStore`] until the connection goes away.

use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// A client identifier.
pub type ClientId = String;

/// Properties attached to a client at connect time (e.g. auth context).
pub type Properties = HashMap<String, Value>;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique client ID.
#[must_use]
pub fn generate_client_id() -> ClientId {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("client_{timestamp:x}_{counter:x}")
}

/// Errors returned by a client's send capability.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection is gone.
    #[error("Connection closed")]
    Closed,

    /// The transport refused the payload.
    #[error("Send failed: {0}")]
    Failed(String),
}

/// Outbound send capability of a single connection.
///
/// Implementations must serialize writers to the same physical connection and
/// must not block. They are called while subscription state is being read, so
/// they must not call back into the tube system.
pub trait ClientSink: Send + Sync {
    /// Attempt to deliver a payload.
    fn send(&self, payload: Bytes) -> Result<(), SendError>;
}

/// Queue-backed sink: a single writer task drains the receiver.
impl ClientSink for mpsc::UnboundedSender<Bytes> {
    fn send(&self, payload: Bytes) -> Result<(), SendError> {
        mpsc::UnboundedSender::send(self, payload).map_err(|_| SendError::Closed)
    }
}

/// Adapter turning a closure into a [`ClientSink`].
pub struct FnSink<F>(pub F);

impl<F> ClientSink for FnSink<F>
where
    F: Fn(Bytes) -> Result<(), SendError> + Send + Sync,
{
    fn send(&self, payload: Bytes) -> Result<(), SendError> {
        (self.0)(payload)
    }
}

/// A connected client.
pub struct Client {
    id: ClientId,
    sink: Arc<dyn ClientSink>,
    properties: Properties,
}

impl Client {
    /// Create a client with a freshly generated ID.
    #[must_use]
    pub fn new(sink: Arc<dyn ClientSink>, properties: Properties) -> Self {
        Self::with_id(generate_client_id(), sink, properties)
    }

    /// Create a client with a caller-chosen ID.
    #[must_use]
    pub fn with_id(
        id: impl Into<ClientId>,
        sink: Arc<dyn ClientSink>,
        properties: Properties,
    ) -> Self {
        Self {
            id: id.into(),
            sink,
            properties,
        }
    }

    /// Get the client ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get all properties.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get a single property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Deliver a payload through the client's send capability.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if delivery fails.
    pub fn send(&self, payload: Bytes) -> Result<(), SendError> {
        self.sink.send(payload)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Registry of connected clients.
#[derive(Debug, Default)]
pub struct ClientStore {
    clients: DashMap<ClientId, Arc<Client>>,
}

impl ClientStore {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client.
    pub fn join(&self, client: Arc<Client>) {
        debug!(client = %client.id(), "Client joined");
        self.clients.insert(client.id.clone(), client);
    }

    /// Look up a client.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Evict a client, returning it if it was registered.
    pub fn remove(&self, id: &str) -> Option<Arc<Client>> {
        let removed = self.clients.remove(id).map(|(_, c)| c);
        if removed.is_some() {
            debug!(client = %id, "Client removed");
        }
        removed
    }

    /// Check whether a client is registered.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    /// Get the number of connected clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Check whether no clients are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Get all connected client IDs.
    #[must_use]
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }
}
