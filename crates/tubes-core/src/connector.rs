//! Connection lifecycle entry points.
//!
//! Transports drive a [`Connector`]: [`Connector::join`] once a connection is
//! established, [`Connector::message`] once per received payload, and
//! [`Connector::leave`] exactly once when the connection ends. The connector is
//! built from an already constructed [`Router`], so events are routed straight
//! into it.

use crate::client::{Client, ClientSink, Properties};
use crate::router::Router;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle bridge between a transport and a [`Router`].
#[derive(Clone)]
pub struct Connector {
    router: Arc<Router>,
}

impl Connector {
    /// Create a connector feeding `router`.
    #[must_use]
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    /// Get the router this connector feeds.
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Register a new connection.
    ///
    /// `sink` is the connection's serialized writer; `properties` are attached
    /// to the client for channel handlers to inspect.
    pub fn join(&self, sink: Arc<dyn ClientSink>, properties: Properties) -> Arc<Client> {
        let client = Arc::new(Client::new(sink, properties));
        self.router.clients().join(Arc::clone(&client));
        debug!(client = %client.id(), "Client connected");
        client
    }

    /// Handle one application-level payload received from a client.
    pub fn message(&self, client_id: &str, data: &[u8]) {
        match self.router.clients().get(client_id) {
            Some(client) => self.router.dispatch(&client, data),
            None => warn!(client = %client_id, "Message from unknown client dropped"),
        }
    }

    /// Tear down a connection: drop every subscription, then the client.
    pub fn leave(&self, client_id: &str) {
        self.router.channels().unsubscribe_all(client_id);
        if self.router.clients().remove(client_id).is_some() {
            debug!(client = %client_id, "Client disconnected");
        } else {
            debug!(client = %client_id, "Leave for unknown client");
        }
    }
}
