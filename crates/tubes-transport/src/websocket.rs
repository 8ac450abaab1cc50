//! WebSocket transport implementation.
//!
//! This module provides a standalone WebSocket listener using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, info, warn};
use tubes_core::{Connector, Properties};

use crate::traits::{into_text, outbound_queue, Transport, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

/// WebSocket transport.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener })
    }

    /// Create a new WebSocket transport bound to `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig { bind_addr: addr }).await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn serve(&self, connector: Connector) -> Result<(), TransportError> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            debug!("Accepted TCP connection from {}", addr);

            let connector = connector.clone();
            tokio::spawn(async move {
                let ws = match handshake(stream).await {
                    Ok(ws) => ws,
                    Err(e) => {
                        error!(remote = %addr, error = %e, "WebSocket handshake rejected");
                        return;
                    }
                };

                let mut properties = Properties::new();
                properties.insert("remote_addr".into(), addr.to_string().into());
                serve_connection(ws, connector, properties).await;
            });
        }
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Perform the server side of the WebSocket handshake on a raw stream.
///
/// # Errors
///
/// Returns [`TransportError::Handshake`] if the peer does not complete a valid
/// upgrade.
pub async fn handshake<S>(stream: S) -> Result<WebSocketStream<S>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    accept_async(stream)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))
}

/// Serve one established WebSocket connection until it closes.
///
/// Joins the connector, forwards every text or binary message in receive
/// order, and leaves exactly once when the read side ends.
pub async fn serve_connection<S>(ws: WebSocketStream<S>, connector: Connector, properties: Properties)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, mut receiver) = ws.split();
    let (sink, mut outbound) = outbound_queue();
    let client_id = connector.join(sink, properties).id().to_string();

    let writer_id = client_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(data) = outbound.recv().await {
            let message = match into_text(data) {
                Ok(text) => Message::Text(text),
                Err(bytes) => Message::Binary(bytes),
            };
            if let Err(e) = sender.send(message).await {
                debug!(client = %writer_id, error = %e, "Write failed");
                break;
            }
        }
    });

    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => connector.message(&client_id, text.as_bytes()),
            Some(Ok(Message::Binary(data))) => connector.message(&client_id, &data),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(_))) => {
                debug!(client = %client_id, "Received close frame");
                break;
            }
            Some(Err(WsError::ConnectionClosed)) => {
                debug!(client = %client_id, "Connection closed");
                break;
            }
            Some(Err(e)) => {
                warn!(client = %client_id, error = %e, "WebSocket error");
                break;
            }
            None => {
                debug!(client = %client_id, "WebSocket stream ended");
                break;
            }
        }
    }

    connector.leave(&client_id);
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_rejects_non_websocket_request() {
        use tokio::io::AsyncWriteExt;

        let (mut client, server) = tokio::io::duplex(4096);
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let result = handshake(server).await;
        assert!(matches!(result, Err(TransportError::Handshake(_))));
    }

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.bind_addr.port(), 9090);
    }
}
