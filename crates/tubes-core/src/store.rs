//! Channel store.
//!
//! The store owns every registered [`ChannelTemplate`] and resolves a concrete
//! path to all templates whose pattern matches it. A path may match several
//! templates at once; every operation here applies to all of them.

use crate::channel::{ChannelHandlers, ChannelPattern, ChannelTemplate, ContextRef, Params};
use crate::client::Client;
use crate::error::{ErrorKind, TubeError};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};
use tubes_protocol::Envelope;

/// A template matching a concrete path, with the parameters it bound.
#[derive(Debug, Clone)]
pub struct ChannelMatch {
    template: Arc<ChannelTemplate>,
    path: String,
    params: Params,
}

impl ChannelMatch {
    /// Get the matching template.
    #[must_use]
    pub fn template(&self) -> &Arc<ChannelTemplate> {
        &self.template
    }

    /// Get the concrete path that was matched.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the parameters bound by the match.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Get the subscription context for the matched path, if one exists.
    #[must_use]
    pub fn context(&self) -> Option<ContextRef<'_>> {
        self.template.context(&self.path)
    }
}

/// Registry of channel templates.
#[derive(Debug)]
pub struct ChannelStore {
    /// Templates in registration order.
    templates: Vec<Arc<ChannelTemplate>>,
    prune_empty_contexts: bool,
}

impl ChannelStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(prune_empty_contexts: bool) -> Self {
        Self {
            templates: Vec::new(),
            prune_empty_contexts,
        }
    }

    /// Register a channel template.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidChannel`] error if the pattern is
    /// malformed or already registered.
    pub fn register(
        &mut self,
        pattern: &str,
        handlers: ChannelHandlers,
    ) -> Result<Arc<ChannelTemplate>, TubeError> {
        let pattern = ChannelPattern::parse(pattern)?;
        if self.templates.iter().any(|t| t.pattern() == pattern.as_str()) {
            return Err(TubeError::new(
                ErrorKind::InvalidChannel,
                format!("channel '{pattern}' already registered"),
            ));
        }

        info!(channel = %pattern, ?handlers, "Registered channel");
        let template = Arc::new(ChannelTemplate::new(
            pattern,
            handlers,
            self.prune_empty_contexts,
        ));
        self.templates.push(Arc::clone(&template));
        Ok(template)
    }

    /// Get the template whose pattern is literally `path`.
    #[must_use]
    pub fn get_by_exact_path(&self, path: &str) -> Option<Arc<ChannelTemplate>> {
        self.templates
            .iter()
            .find(|t| t.pattern() == path)
            .cloned()
    }

    /// Resolve every template matching a concrete path, in registration order.
    #[must_use]
    pub fn get(&self, path: &str) -> Vec<ChannelMatch> {
        self.templates
            .iter()
            .filter_map(|t| {
                t.match_path(path).map(|params| ChannelMatch {
                    template: Arc::clone(t),
                    path: path.to_string(),
                    params,
                })
            })
            .collect()
    }

    /// Check whether a path matches at least one template.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.templates.iter().any(|t| t.match_path(path).is_some())
    }

    /// Check whether a client is subscribed to `path` under every matching
    /// template. A path with no matches is never subscribed.
    #[must_use]
    pub fn is_subscribed(&self, client_id: &str, path: &str) -> bool {
        Self::subscribed_to_all(&self.get(path), client_id)
    }

    pub(crate) fn subscribed_to_all(matches: &[ChannelMatch], client_id: &str) -> bool {
        !matches.is_empty()
            && matches
                .iter()
                .all(|m| m.template.is_subscribed(client_id, &m.path))
    }

    /// Subscribe a client to a path under every matching template.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownChannel`] if nothing matches.
    pub fn subscribe(&self, client: &Client, path: &str) -> Result<(), TubeError> {
        let matches = self.get(path);
        if matches.is_empty() {
            return Err(TubeError::unknown_channel(path));
        }
        for m in matches {
            m.template.subscribe(client, &m.path, m.params);
        }
        Ok(())
    }

    /// Unsubscribe a client from a path under every matching template.
    ///
    /// Removing a client that is not a member is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownChannel`] if nothing matches.
    pub fn unsubscribe(&self, client_id: &str, path: &str) -> Result<(), TubeError> {
        let matches = self.get(path);
        if matches.is_empty() {
            return Err(TubeError::unknown_channel(path));
        }
        for m in &matches {
            m.template.unsubscribe(client_id, &m.path);
        }
        Ok(())
    }

    /// Remove a client from every context of every template.
    pub fn unsubscribe_all(&self, client_id: &str) {
        let removed: usize = self
            .templates
            .iter()
            .map(|t| t.unsubscribe_all(client_id))
            .sum();
        debug!(client = %client_id, removed, "Unsubscribed from all channels");
    }

    /// Hand a published envelope to the message hook of every matching
    /// template. Subscription is not required.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownChannel`] if nothing matches.
    pub fn on_message(&self, client: &Client, envelope: &Envelope) -> Result<(), TubeError> {
        self.publish(client, &envelope.channel, &envelope.payload)
    }

    pub(crate) fn publish(&self, client: &Client, path: &str, payload: &Bytes) -> Result<(), TubeError> {
        let matches = self.get(path);
        if matches.is_empty() {
            return Err(TubeError::unknown_channel(path));
        }
        for m in &matches {
            m.template.on_message(client, payload, &m.params);
        }
        Ok(())
    }

    /// Get all registered templates.
    #[must_use]
    pub fn templates(&self) -> &[Arc<ChannelTemplate>] {
        &self.templates
    }

    /// Get the number of registered templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Check whether no templates are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for ChannelStore {
    fn default() -> Self {
        Self::new(true)
    }
}
