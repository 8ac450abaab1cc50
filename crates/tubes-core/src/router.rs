//! Message router for Tubes.
//!
//! The router interprets the client protocol (subscribe / unsubscribe /
//! message), owns the client registry and channel store, and exposes the
//! server-initiated [`Router::send`] and [`Router::broadcast`] APIs.

use crate::channel::{ChannelHandlers, ChannelTemplate};
use crate::client::{Client, ClientStore};
use crate::error::{ErrorHandler, ErrorKind, TubeError};
use crate::store::ChannelStore;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use tubes_protocol::{codec, EnvelopeCodec, MessageType};

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum inbound envelope size in bytes.
    pub max_message_size: usize,
    /// Whether to drop subscription contexts once their last subscriber leaves.
    pub prune_empty_contexts: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024,
            prune_empty_contexts: true,
        }
    }
}

/// The central message router.
pub struct Router {
    /// Connected clients.
    clients: ClientStore,
    /// Registered channel templates.
    channels: ChannelStore,
    codec: EnvelopeCodec,
    error_handler: Option<ErrorHandler>,
}

impl Router {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            clients: ClientStore::new(),
            channels: ChannelStore::new(config.prune_empty_contexts),
            codec: EnvelopeCodec::new(config.max_message_size),
            error_handler: None,
        }
    }

    /// Set the callback receiving errors caused by client traffic.
    #[must_use]
    pub fn on_error(mut self, handler: impl Fn(&TubeError) + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Register a channel template.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidChannel`] error if the pattern is
    /// malformed or already registered.
    pub fn register_channel(
        &mut self,
        pattern: &str,
        handlers: ChannelHandlers,
    ) -> Result<Arc<ChannelTemplate>, TubeError> {
        self.channels.register(pattern, handlers)
    }

    /// Get the client registry.
    #[must_use]
    pub fn clients(&self) -> &ClientStore {
        &self.clients
    }

    /// Get the channel store.
    #[must_use]
    pub fn channels(&self) -> &ChannelStore {
        &self.channels
    }

    /// Check whether a client is connected.
    #[must_use]
    pub fn is_connected(&self, client_id: &str) -> bool {
        self.clients.exists(client_id)
    }

    /// Check whether a client is subscribed to `path` under every matching
    /// channel template.
    #[must_use]
    pub fn is_subscribed(&self, path: &str, client_id: &str) -> bool {
        self.channels.is_subscribed(client_id, path)
    }

    /// Get the channel template registered under exactly `path`.
    #[must_use]
    pub fn get_channel(&self, path: &str) -> Option<Arc<ChannelTemplate>> {
        self.channels.get_by_exact_path(path)
    }

    /// Interpret one inbound envelope from a client.
    ///
    /// Failures are reported to the error handler; they never propagate to the
    /// caller, so the connection stays open.
    pub fn dispatch(&self, client: &Client, data: &[u8]) {
        let envelope = match self.codec.decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.report(e.into());
                return;
            }
        };

        trace!(client = %client.id(), kind = %envelope.kind, channel = %envelope.channel, "Dispatch");

        let result = match envelope.kind {
            MessageType::Subscribe => self.channels.subscribe(client, &envelope.channel),
            MessageType::Unsubscribe => self.channels.unsubscribe(client.id(), &envelope.channel),
            MessageType::Message => self.channels.on_message(client, &envelope),
        };

        if let Err(e) = result {
            self.report(e);
        }
    }

    /// Push a payload to one client on one concrete path.
    ///
    /// The client must be subscribed under every template matching `path`.
    /// The payload is delivered once per matching template; success requires
    /// every delivery to succeed. The payload is opaque: any bytes are framed
    /// and delivered.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::UnknownChannel`] if no template matches.
    /// - [`ErrorKind::ClientNotSubscribed`] if the subscription does not hold;
    ///   nothing is delivered.
    /// - [`ErrorKind::Aggregate`] with one child per failed template.
    pub fn send(&self, path: &str, client_id: &str, payload: &[u8]) -> Result<(), TubeError> {
        let matches = self.channels.get(path);
        if matches.is_empty() {
            return Err(TubeError::unknown_channel(path));
        }
        if !ChannelStore::subscribed_to_all(&matches, client_id) {
            return Err(TubeError::not_subscribed(client_id, path));
        }
        let client = self
            .clients
            .get(client_id)
            .ok_or_else(|| TubeError::not_subscribed(client_id, path))?;
        let frame = codec::encode_message(path, payload);

        let errors: Vec<TubeError> = matches
            .iter()
            .filter_map(|m| m.template().send(&client, path, frame.clone()).err())
            .collect();

        if errors.is_empty() {
            trace!(channel = %path, client = %client_id, templates = matches.len(), "Sent");
            Ok(())
        } else {
            warn!(channel = %path, client = %client_id, failures = errors.len(), "Send failed");
            Err(TubeError::aggregate(
                "failed to send over at least one channel",
                errors,
            ))
        }
    }

    /// Push a payload once to every client subscribed to `path`.
    ///
    /// Returns the number of clients the payload was delivered to.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::UnknownChannel`] if no template matches.
    /// - [`ErrorKind::Aggregate`] with one child per failed delivery.
    pub fn broadcast(&self, path: &str, payload: &[u8]) -> Result<usize, TubeError> {
        let matches = self.channels.get(path);
        let Some(first) = matches.first() else {
            return Err(TubeError::unknown_channel(path));
        };
        let frame = codec::encode_message(path, payload);

        let mut delivered = 0;
        let mut errors = Vec::new();
        for client_id in first.template().subscribers(path) {
            if !ChannelStore::subscribed_to_all(&matches, &client_id) {
                continue;
            }
            let Some(client) = self.clients.get(&client_id) else {
                continue;
            };
            match client.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => errors.push(
                    TubeError::new(
                        ErrorKind::DeliveryFailed,
                        format!("failed to deliver to client '{client_id}' on channel '{path}'"),
                    )
                    .with_source(e),
                ),
            }
        }

        debug!(channel = %path, recipients = delivered, failures = errors.len(), "Broadcast");

        if errors.is_empty() {
            Ok(delivered)
        } else {
            Err(TubeError::aggregate(
                format!("failed to broadcast to {} client(s)", errors.len()),
                errors,
            ))
        }
    }

    /// Report an error caused by client traffic.
    pub fn report(&self, err: TubeError) {
        warn!(kind = %err.kind(), error = %err, "Client request failed");
        if let Some(handler) = &self.error_handler {
            handler(&err);
        }
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        let templates = self.channels.templates();
        RouterStats {
            channel_count: templates.len(),
            context_count: templates.iter().map(|t| t.context_count()).sum(),
            client_count: self.clients.len(),
            total_subscriptions: templates.iter().map(|t| t.subscription_count()).sum(),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of registered channel templates.
    pub channel_count: usize,
    /// Number of live subscription contexts.
    pub context_count: usize,
    /// Number of connected clients.
    pub client_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FnSink, Properties, SendError};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn join(router: &Router, id: &str) -> (Arc<Client>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let client = Arc::new(Client::with_id(id, Arc::new(tx), Properties::new()));
        router.clients().join(Arc::clone(&client));
        (client, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<Bytes> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn recording_router() -> (Router, Arc<Mutex<Vec<ErrorKind>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let router = Router::new().on_error(move |e| sink.lock().unwrap().push(e.kind()));
        (router, errors)
    }

    #[test]
    fn test_dispatch_subscribe_unsubscribe() {
        let mut router = Router::new();
        router
            .register_channel("room/{id}", ChannelHandlers::new())
            .unwrap();
        let (c1, _rx) = join(&router, "c1");

        router.dispatch(&c1, br#"{"type":"subscribe","channel":"room/42"}"#);
        assert!(router.is_subscribed("room/42", "c1"));

        let matches = router.channels().get("room/42");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].params().get("id"), Some("42"));

        router.dispatch(&c1, br#"{"type":"unsubscribe","channel":"room/42"}"#);
        assert!(!router.is_subscribed("room/42", "c1"));
    }

    #[test]
    fn test_dispatch_unknown_type() {
        let (mut router, errors) = recording_router();
        router.register_channel("chat", ChannelHandlers::new()).unwrap();
        let (c1, _rx) = join(&router, "c1");

        router.dispatch(&c1, br#"{"type":"ping"}"#);
        router.dispatch(&c1, br#"{"channel":"chat"}"#);

        assert_eq!(
            *errors.lock().unwrap(),
            vec![ErrorKind::UnknownType, ErrorKind::UnknownType]
        );
        assert!(router.is_connected("c1"));
    }

    #[test]
    fn test_dispatch_invalid_message() {
        let (router, errors) = recording_router();
        let (c1, _rx) = join(&router, "c1");

        router.dispatch(&c1, b"{not json");
        router.dispatch(&c1, br#"{"type":"subscribe","channel":["a"]}"#);

        assert_eq!(
            *errors.lock().unwrap(),
            vec![ErrorKind::InvalidMessage, ErrorKind::InvalidMessage]
        );
    }

    #[test]
    fn test_dispatch_oversized_message() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let router = Router::with_config(RouterConfig {
            max_message_size: 8,
            ..Default::default()
        })
        .on_error(move |e| sink.lock().unwrap().push(e.kind()));
        let (c1, _rx) = join(&router, "c1");

        router.dispatch(&c1, br#"{"type":"subscribe","channel":"room/1"}"#);
        assert_eq!(*errors.lock().unwrap(), vec![ErrorKind::InvalidMessage]);
    }

    #[test]
    fn test_dispatch_unknown_channel() {
        let (router, errors) = recording_router();
        let (c1, _rx) = join(&router, "c1");

        router.dispatch(&c1, br#"{"type":"subscribe","channel":"nowhere"}"#);
        router.dispatch(&c1, br#"{"type":"message","channel":"nowhere","payload":1}"#);

        assert_eq!(
            *errors.lock().unwrap(),
            vec![ErrorKind::UnknownChannel, ErrorKind::UnknownChannel]
        );
    }

    #[test]
    fn test_dispatch_message_to_handler() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let mut router = Router::new();
        router
            .register_channel(
                "room/{id}",
                ChannelHandlers::new().on_message(move |client, payload, params| {
                    sink.lock().unwrap().push((
                        client.id().to_string(),
                        params.get("id").unwrap_or_default().to_string(),
                        payload.clone(),
                    ));
                }),
            )
            .unwrap();
        let (c1, _rx) = join(&router, "c1");

        router.dispatch(
            &c1,
            br#"{"type":"message","channel":"room/3","payload":{"text":"hi"}}"#,
        );

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "c1");
        assert_eq!(received[0].1, "3");
        assert_eq!(&received[0].2[..], br#"{"text":"hi"}"#);
    }

    #[test]
    fn test_send_only_to_target_client() {
        let mut router = Router::new();
        router
            .register_channel("room/{id}", ChannelHandlers::new())
            .unwrap();
        let (c1, mut rx1) = join(&router, "c1");
        let (c2, mut rx2) = join(&router, "c2");
        router.channels().subscribe(&c1, "room/42").unwrap();
        router.channels().subscribe(&c2, "room/42").unwrap();

        router.send("room/42", "c1", br#"{"n":1}"#).unwrap();

        let got = drain(&mut rx1);
        assert_eq!(got.len(), 1);
        assert_eq!(
            &got[0][..],
            br#"{"type":"message","channel":"room/42","payload":{"n":1}}"#
        );
        assert!(drain(&mut rx2).is_empty());
    }

    #[test]
    fn test_send_once_per_matching_template() {
        let mut router = Router::new();
        router
            .register_channel("room/{id}", ChannelHandlers::new())
            .unwrap();
        router
            .register_channel("room/{name}", ChannelHandlers::new())
            .unwrap();
        let (c1, mut rx1) = join(&router, "c1");
        router.channels().subscribe(&c1, "room/42").unwrap();

        router.send("room/42", "c1", b"1").unwrap();
        assert_eq!(drain(&mut rx1).len(), 2);
    }

    #[test]
    fn test_send_unknown_channel() {
        let router = Router::new();
        let err = router.send("room/42", "c1", b"1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownChannel);
    }

    #[test]
    fn test_send_requires_subscription_under_all_templates() {
        let mut router = Router::new();
        let by_id = router
            .register_channel("room/{id}", ChannelHandlers::new())
            .unwrap();
        router
            .register_channel("room/{name}", ChannelHandlers::new())
            .unwrap();
        let (c1, mut rx1) = join(&router, "c1");
        router.channels().subscribe(&c1, "room/42").unwrap();
        by_id.unsubscribe("c1", "room/42");

        let err = router.send("room/42", "c1", b"1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientNotSubscribed);
        assert!(drain(&mut rx1).is_empty());
    }

    #[test]
    fn test_send_aggregates_delivery_failures() {
        let mut router = Router::new();
        router
            .register_channel("room/{id}", ChannelHandlers::new())
            .unwrap();
        router
            .register_channel("room/{name}", ChannelHandlers::new())
            .unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let sink = FnSink(move |_: Bytes| -> Result<(), SendError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(SendError::Closed)
        });
        let client = Arc::new(Client::with_id("c1", Arc::new(sink), Properties::new()));
        router.clients().join(Arc::clone(&client));
        router.channels().subscribe(&client, "room/42").unwrap();

        let err = router.send("room/42", "c1", b"1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aggregate);
        assert_eq!(err.children().len(), 2);
        assert!(err
            .children()
            .iter()
            .all(|c| c.kind() == ErrorKind::DeliveryFailed));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_send_reports_subscription_lost_during_delivery() {
        let mut router = Router::new();
        router
            .register_channel("room/{id}", ChannelHandlers::new())
            .unwrap();
        let by_name = router
            .register_channel("room/{name}", ChannelHandlers::new())
            .unwrap();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        // The first delivery drops the client from the second template.
        let sink = FnSink(move |_: Bytes| -> Result<(), SendError> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                by_name.unsubscribe("c1", "room/42");
            }
            Ok(())
        });
        let client = Arc::new(Client::with_id("c1", Arc::new(sink), Properties::new()));
        router.clients().join(Arc::clone(&client));
        router.channels().subscribe(&client, "room/42").unwrap();

        let err = router.send("room/42", "c1", b"1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aggregate);
        assert_eq!(err.children().len(), 1);
        assert_eq!(err.children()[0].kind(), ErrorKind::ClientNotSubscribed);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_races_unsubscribe() {
        let mut router = Router::new();
        router
            .register_channel("room/{id}", ChannelHandlers::new())
            .unwrap();
        router
            .register_channel("room/{name}", ChannelHandlers::new())
            .unwrap();
        let (c1, mut rx1) = join(&router, "c1");
        router.channels().subscribe(&c1, "room/42").unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..2_000 {
                    router.channels().unsubscribe("c1", "room/42").unwrap();
                    router.channels().subscribe(&c1, "room/42").unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..2_000 {
                    if let Err(e) = router.send("room/42", "c1", br#"{"n":1}"#) {
                        assert!(
                            e.contains_kind(ErrorKind::ClientNotSubscribed),
                            "unexpected error: {e:?}"
                        );
                        assert!(!e.contains_kind(ErrorKind::DeliveryFailed));
                    }
                }
            });
        });

        assert!(router.is_subscribed("room/42", "c1"));
        let stats = router.stats();
        assert_eq!(stats.context_count, 2);
        assert_eq!(stats.total_subscriptions, 2);
        for frame in drain(&mut rx1) {
            assert_eq!(
                &frame[..],
                br#"{"type":"message","channel":"room/42","payload":{"n":1}}"#
            );
        }
    }

    #[test]
    fn test_send_opaque_payload() {
        let mut router = Router::new();
        router.register_channel("chat", ChannelHandlers::new()).unwrap();
        let (c1, mut rx1) = join(&router, "c1");
        router.channels().subscribe(&c1, "chat").unwrap();

        router.send("chat", "c1", b"hello world").unwrap();
        assert_eq!(router.broadcast("chat", &[0xff, 0x00]).unwrap(), 1);

        let got = drain(&mut rx1);
        assert_eq!(got.len(), 2);
        let first = tubes_protocol::decode(&got[0]).unwrap();
        assert_eq!(first.channel, "chat");
        assert_eq!(&first.payload[..], b"hello world");
        let second = tubes_protocol::decode(&got[1]).unwrap();
        assert_eq!(&second.payload[..], &[0xff, 0x00]);
    }

    #[test]
    fn test_broadcast() {
        let mut router = Router::new();
        router
            .register_channel("room/{id}", ChannelHandlers::new())
            .unwrap();
        let (c1, mut rx1) = join(&router, "c1");
        let (c2, mut rx2) = join(&router, "c2");
        let (_c3, mut rx3) = join(&router, "c3");
        router.channels().subscribe(&c1, "room/1").unwrap();
        router.channels().subscribe(&c2, "room/1").unwrap();

        assert_eq!(router.broadcast("room/1", br#""hello""#).unwrap(), 2);
        assert_eq!(drain(&mut rx1).len(), 1);
        assert_eq!(drain(&mut rx2).len(), 1);
        assert!(drain(&mut rx3).is_empty());

        assert_eq!(router.broadcast("room/2", br#""hello""#).unwrap(), 0);
        assert_eq!(
            router.broadcast("nowhere", b"1").unwrap_err().kind(),
            ErrorKind::UnknownChannel
        );
    }

    #[test]
    fn test_get_channel_and_stats() {
        let mut router = Router::new();
        router
            .register_channel("room/{id}", ChannelHandlers::new())
            .unwrap();
        router.register_channel("chat", ChannelHandlers::new()).unwrap();
        let (c1, _rx1) = join(&router, "c1");
        let (c2, _rx2) = join(&router, "c2");
        router.channels().subscribe(&c1, "room/1").unwrap();
        router.channels().subscribe(&c1, "chat").unwrap();
        router.channels().subscribe(&c2, "room/1").unwrap();

        assert!(router.get_channel("chat").is_some());
        assert!(router.get_channel("room/1").is_none());
        assert_eq!(
            router.stats(),
            RouterStats {
                channel_count: 2,
                context_count: 2,
                client_count: 2,
                total_subscriptions: 3,
            }
        );
    }
}
