//! Channel templates and subscription contexts.
//!
//! A [`ChannelTemplate`] is registered once under a path pattern such as
//! `room/{id}`. Every concrete path that matches the pattern gets its own
//! [`SubscriptionContext`] holding the bound parameters and the subscriber set
//! for that exact path.

use crate::client::{Client, ClientId};
use crate::error::{ErrorKind, TubeError};
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Separator between path segments.
pub const PATH_DELIMITER: char = '/';

/// Maximum channel pattern length.
pub const MAX_PATTERN_LENGTH: usize = 256;

/// Guard over a live subscription context.
pub type ContextRef<'a> = dashmap::mapref::one::Ref<'a, String, SubscriptionContext>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled channel pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl ChannelPattern {
    /// Compile a pattern.
    ///
    /// Segments are separated by `/`. A segment of the form `{name}` is a
    /// parameter; every other segment is matched literally.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidChannel`] error for empty or overlong
    /// patterns, malformed parameter segments and repeated parameter names.
    pub fn parse(pattern: &str) -> Result<Self, TubeError> {
        let invalid = |reason: &str| {
            TubeError::new(
                ErrorKind::InvalidChannel,
                format!("invalid channel pattern '{pattern}': {reason}"),
            )
        };

        if pattern.is_empty() {
            return Err(invalid("pattern cannot be empty"));
        }
        if pattern.len() > MAX_PATTERN_LENGTH {
            return Err(invalid("pattern too long"));
        }

        let mut segments = Vec::new();
        let mut names = HashSet::new();
        for part in pattern.split(PATH_DELIMITER) {
            match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(name) => {
                    if name.is_empty() || name.contains(['{', '}']) {
                        return Err(invalid("malformed parameter segment"));
                    }
                    if !names.insert(name) {
                        return Err(invalid("duplicate parameter name"));
                    }
                    segments.push(Segment::Param(name.to_string()));
                }
                None => {
                    if part.contains(['{', '}']) {
                        return Err(invalid("unbalanced braces"));
                    }
                    segments.push(Segment::Literal(part.to_string()));
                }
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Get the pattern as written at registration.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check whether the pattern has any parameter segments.
    #[must_use]
    pub fn is_parameterized(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Param(_)))
    }

    /// Match a concrete path, returning the bound parameters.
    ///
    /// Segment counts must be equal; a parameter binds exactly one non-empty
    /// segment.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<Params> {
        let mut params = Params::default();
        let mut parts = path.split(PATH_DELIMITER);

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.0.push((name.clone(), part.to_string()));
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

impl fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parameter bindings extracted from a concrete path, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Get the value bound to a parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Get the number of bound parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether nothing was bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Called after a client joins a subscription context.
pub type SubscribeHandler = Arc<dyn Fn(&Client, &Params) + Send + Sync>;
/// Called after a client leaves a subscription context.
pub type UnsubscribeHandler = Arc<dyn Fn(&str, &Params) + Send + Sync>;
/// Called for every payload a client publishes to a matching path.
pub type MessageHandler = Arc<dyn Fn(&Client, &Bytes, &Params) + Send + Sync>;

/// Optional callbacks attached to a channel template.
#[derive(Clone, Default)]
pub struct ChannelHandlers {
    /// Subscribe hook.
    pub on_subscribe: Option<SubscribeHandler>,
    /// Unsubscribe hook.
    pub on_unsubscribe: Option<UnsubscribeHandler>,
    /// Message hook.
    pub on_message: Option<MessageHandler>,
}

impl ChannelHandlers {
    /// Create an empty handler set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subscribe hook.
    #[must_use]
    pub fn on_subscribe(mut self, f: impl Fn(&Client, &Params) + Send + Sync + 'static) -> Self {
        self.on_subscribe = Some(Arc::new(f));
        self
    }

    /// Set the unsubscribe hook.
    #[must_use]
    pub fn on_unsubscribe(mut self, f: impl Fn(&str, &Params) + Send + Sync + 'static) -> Self {
        self.on_unsubscribe = Some(Arc::new(f));
        self
    }

    /// Set the message hook.
    #[must_use]
    pub fn on_message(
        mut self,
        f: impl Fn(&Client, &Bytes, &Params) + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for ChannelHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandlers")
            .field("on_subscribe", &self.on_subscribe.is_some())
            .field("on_unsubscribe", &self.on_unsubscribe.is_some())
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}

/// Subscriber state for one concrete path under one template.
#[derive(Debug)]
pub struct SubscriptionContext {
    path: String,
    params: Params,
    subscribers: HashSet<ClientId>,
}

impl SubscriptionContext {
    fn new(path: &str, params: Params) -> Self {
        Self {
            path: path.to_string(),
            params,
            subscribers: HashSet::new(),
        }
    }

    /// Get the concrete path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the bound parameters.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Get the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a client is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, client_id: &str) -> bool {
        self.subscribers.contains(client_id)
    }

    /// Get all subscriber IDs.
    #[must_use]
    pub fn subscribers(&self) -> Vec<ClientId> {
        self.subscribers.iter().cloned().collect()
    }

    /// Check if the context has no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver an encoded frame to a subscribed client.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ClientNotSubscribed`] if the client is not a member
    /// and [`ErrorKind::DeliveryFailed`] if its send capability fails.
    pub fn send(&self, client: &Client, frame: Bytes) -> Result<(), TubeError> {
        if !self.is_subscribed(client.id()) {
            return Err(TubeError::not_subscribed(client.id(), &self.path));
        }
        trace!(channel = %self.path, client = %client.id(), bytes = frame.len(), "Delivering");
        client.send(frame).map_err(|e| {
            TubeError::new(
                ErrorKind::DeliveryFailed,
                format!(
                    "failed to deliver to client '{}' on channel '{}'",
                    client.id(),
                    self.path
                ),
            )
            .with_source(e)
        })
    }
}

/// A registered channel definition.
#[derive(Debug)]
pub struct ChannelTemplate {
    pattern: ChannelPattern,
    handlers: ChannelHandlers,
    /// Contexts indexed by concrete path.
    contexts: DashMap<String, SubscriptionContext>,
    prune_empty: bool,
}

impl ChannelTemplate {
    pub(crate) fn new(pattern: ChannelPattern, handlers: ChannelHandlers, prune_empty: bool) -> Self {
        Self {
            pattern,
            handlers,
            contexts: DashMap::new(),
            prune_empty,
        }
    }

    /// Get the pattern string.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Get the handler set.
    #[must_use]
    pub fn handlers(&self) -> &ChannelHandlers {
        &self.handlers
    }

    /// Match a concrete path against this template.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<Params> {
        self.pattern.matches(path)
    }

    /// Get the context for a path without creating it.
    #[must_use]
    pub fn context(&self, path: &str) -> Option<ContextRef<'_>> {
        self.contexts.get(path)
    }

    /// Get the context for a path and whether the client is a member of it.
    #[must_use]
    pub fn find_context(&self, client_id: &str, path: &str) -> (Option<ContextRef<'_>>, bool) {
        let context = self.contexts.get(path);
        let member = context.as_ref().is_some_and(|c| c.is_subscribed(client_id));
        (context, member)
    }

    /// Check if a client is subscribed to a path under this template.
    #[must_use]
    pub fn is_subscribed(&self, client_id: &str, path: &str) -> bool {
        self.find_context(client_id, path).1
    }

    /// Get the subscribers of a path. A missing context has none.
    #[must_use]
    pub fn subscribers(&self, path: &str) -> Vec<ClientId> {
        self.contexts
            .get(path)
            .map(|c| c.subscribers())
            .unwrap_or_default()
    }

    /// Get the number of live contexts.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Get the number of subscriptions across all contexts.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.contexts.iter().map(|c| c.subscriber_count()).sum()
    }

    /// Add a client to the context for `path`, creating it if needed.
    ///
    /// Returns `true` if the client was not yet a member. The subscribe hook
    /// runs only in that case, after the context lock is released.
    pub(crate) fn subscribe(&self, client: &Client, path: &str, params: Params) -> bool {
        let (added, count) = {
            let mut context = self
                .contexts
                .entry(path.to_string())
                .or_insert_with(|| SubscriptionContext::new(path, params.clone()));
            let added = context.subscribers.insert(client.id().to_string());
            (added, context.subscriber_count())
        };

        if added {
            debug!(
                channel = %self.pattern,
                path = %path,
                client = %client.id(),
                subscribers = count,
                "Subscribed"
            );
            if let Some(on_subscribe) = &self.handlers.on_subscribe {
                on_subscribe(client, &params);
            }
        }
        added
    }

    /// Remove a client from the context for `path`.
    ///
    /// Returns `true` if the client was a member.
    pub(crate) fn unsubscribe(&self, client_id: &str, path: &str) -> bool {
        let params = {
            let Some(mut context) = self.contexts.get_mut(path) else {
                return false;
            };
            if !context.subscribers.remove(client_id) {
                return false;
            }
            context.params.clone()
        };

        self.prune(path);
        debug!(channel = %self.pattern, path = %path, client = %client_id, "Unsubscribed");

        if let Some(on_unsubscribe) = &self.handlers.on_unsubscribe {
            on_unsubscribe(client_id, &params);
        }
        true
    }

    /// Remove a client from every context of this template.
    ///
    /// Returns the number of contexts the client was removed from.
    pub(crate) fn unsubscribe_all(&self, client_id: &str) -> usize {
        let mut removed = Vec::new();
        for mut context in self.contexts.iter_mut() {
            if context.subscribers.remove(client_id) {
                removed.push(context.params.clone());
            }
        }

        if removed.is_empty() {
            return 0;
        }
        if self.prune_empty {
            self.contexts.retain(|_, c| !c.is_empty());
        }

        if let Some(on_unsubscribe) = &self.handlers.on_unsubscribe {
            for params in &removed {
                on_unsubscribe(client_id, params);
            }
        }
        removed.len()
    }

    /// Run the message hook for a published payload.
    pub(crate) fn on_message(&self, client: &Client, payload: &Bytes, params: &Params) {
        if let Some(on_message) = &self.handlers.on_message {
            on_message(client, payload, params);
        }
    }

    /// Deliver an encoded frame to a client through the context for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ClientNotSubscribed`] if the client is not a member
    /// at the time of delivery, or the context's delivery error.
    pub fn send(&self, client: &Client, path: &str, frame: Bytes) -> Result<(), TubeError> {
        match self.find_context(client.id(), path) {
            (Some(context), true) => context.send(client, frame),
            _ => Err(TubeError::not_subscribed(client.id(), path)),
        }
    }

    fn prune(&self, path: &str) {
        if self.prune_empty && self.contexts.remove_if(path, |_, c| c.is_empty()).is_some() {
            debug!(channel = %self.pattern, path = %path, "Pruned empty context");
        }
    }
}
