//! Connector glue for axum WebSocket upgrades.

use ::axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};
use tubes_core::{Connector, Properties};

use crate::traits::{into_text, outbound_queue};

/// Serve an upgraded axum WebSocket until it closes.
///
/// Joins the connector, forwards every text or binary message in receive
/// order, and leaves exactly once when the read side ends.
pub async fn serve_socket(socket: WebSocket, connector: Connector, properties: Properties) {
    let (mut sender, mut receiver) = socket.split();
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
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) => {
                debug!(client = %client_id, "Received close frame");
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
