//! HTTP and WebSocket handlers for the Tubes server.
//!
//! This module wires the router, the connector and the axum endpoints.

use crate::chat;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tubes_core::{Connector, Properties, Router, RouterConfig, TubeError};

/// Shared server state.
pub struct AppState {
    /// Entry point for connection events.
    pub connector: Connector,
    /// Server configuration.
    pub config: Config,
    /// Number of reserved connection slots.
    pub connections: Arc<AtomicUsize>,
}

impl AppState {
    /// Build the router and connector for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel cannot be registered.
    pub fn new(config: Config) -> Result<Self> {
        let router = build_router(&config)?;
        Ok(Self {
            connector: Connector::new(router),
            config,
            connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Get the router.
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        self.connector.router()
    }
}

/// A reserved connection slot, released on drop.
///
/// Slots are taken before the upgrade is accepted, so concurrent upgrades
/// cannot exceed the configured limit.
#[derive(Debug)]
pub struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    /// Reserve a slot if fewer than `limit` are taken.
    #[must_use]
    pub fn try_acquire(active: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        Some(Self {
            active: Arc::clone(active),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the channel router with the server's channels registered.
///
/// # Errors
///
/// Returns an error if a channel pattern is rejected.
pub fn build_router(config: &Config) -> Result<Arc<Router>> {
    let router_config = RouterConfig {
        max_message_size: config.limits.max_message_size,
        prune_empty_contexts: config.channels.prune_empty_contexts,
    };
    let chat_prefix = config.channels.chat_prefix.clone();

    let mut registration: Result<(), TubeError> = Ok(());
    let router = Arc::new_cyclic(|weak| {
        let mut router = Router::with_config(router_config)
            .on_error(|e| metrics::record_error(e.kind().as_str()));
        if !chat_prefix.is_empty() {
            registration = chat::register(&mut router, &chat_prefix, weak.clone()).map(|_| ());
        }
        router
    });
    registration?;

    Ok(router)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        metrics::spawn_stats_sampler(
            state.router().clone(),
            Duration::from_millis(config.metrics.sample_interval_ms),
        );
    }

    let app = app(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Tubes server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.connect_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Build the axum application.
pub fn app(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route(&state.config.transport.connect_path, get(connect_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router().stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": stats.channel_count,
        "contexts": stats.context_count,
        "clients": stats.client_count,
        "connections": state.connections.load(Ordering::Acquire),
        "subscriptions": stats.total_subscriptions,
    }))
}

/// WebSocket upgrade handler.
async fn connect_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let limit = state.config.limits.max_connections;
    let Some(slot) = ConnectionSlot::try_acquire(&state.connections, limit) else {
        warn!(remote = %remote, limit, "Connection limit reached");
        metrics::record_rejection();
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let properties = connection_properties(remote, query);
    let max_message_size = state.config.limits.max_message_size;

    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            let _metrics_guard = ConnectionMetricsGuard::new();
            debug!(remote = %remote, "WebSocket connected");
            tubes_transport::axum::serve_socket(socket, state.connector.clone(), properties).await;
            debug!(remote = %remote, "WebSocket disconnected");
        })
}

/// Client properties for a new connection.
fn connection_properties(remote: SocketAddr, query: HashMap<String, String>) -> Properties {
    let query: serde_json::Map<String, serde_json::Value> = query
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();

    let mut properties = Properties::new();
    properties.insert("remote_addr".into(), remote.to_string().into());
    properties.insert("query".into(), serde_json::Value::Object(query));
    properties
}
