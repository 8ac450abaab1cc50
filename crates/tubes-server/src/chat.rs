//! Demo chat channel.
//!
//! Clients subscribe to `<prefix>/{room}`; every message received on a room
//! is broadcast to all of its subscribers, sender included.

use crate::metrics;
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use tubes_core::{ChannelHandlers, ChannelTemplate, Router, TubeError};

/// Register the chat channel on `router`.
///
/// The handler holds a weak reference so the router does not keep itself
/// alive; build the router with [`Arc::new_cyclic`] to obtain it.
///
/// # Errors
///
/// Returns an error if the channel pattern is rejected.
pub fn register(
    router: &mut Router,
    prefix: &str,
    weak: Weak<Router>,
) -> Result<Arc<ChannelTemplate>, TubeError> {
    let room_prefix = prefix.to_string();

    let handlers = ChannelHandlers::new()
        .on_subscribe(|client, params| {
            info!(client = %client.id(), room = params.get("room").unwrap_or_default(), "Joined chat room");
        })
        .on_unsubscribe(|client_id, params| {
            debug!(client = %client_id, room = params.get("room").unwrap_or_default(), "Left chat room");
        })
        .on_message(move |client, payload, params| {
            let Some(router) = weak.upgrade() else {
                return;
            };
            let Some(room) = params.get("room") else {
                return;
            };
            let path = format!("{room_prefix}/{room}");

            match router.broadcast(&path, payload) {
                Ok(recipients) => {
                    metrics::record_message(payload.len(), "broadcast");
                    debug!(client = %client.id(), path = %path, recipients, "Chat message relayed");
                }
                Err(e) => router.report(e),
            }
        });

    router.register_channel(&format!("{prefix}/{{room}}"), handlers)
}
