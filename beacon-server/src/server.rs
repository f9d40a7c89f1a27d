//! Server assembly: shared state, route table, listener, and drain-on-stop.

use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::connection::ConnectionHandle;
use crate::dispatch::Dispatcher;
use crate::gate;
use crate::http;
use crate::limit::{ConnectLimiter, MessageLimiter};
use crate::presence::broadcast_presence;
use crate::registry::RoomRegistry;
use anyhow::Context as _;
use axum::extract::ws::close_code;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<RoomRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub verifier: Arc<TokenVerifier>,
    pub connect_limiter: Arc<ConnectLimiter>,
    pub message_limiter: Arc<MessageLimiter>,
    pub draining: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(RoomRegistry::new());
        let message_limiter = Arc::new(MessageLimiter::new(config.message_limit.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            message_limiter.clone(),
            config.max_frame_bytes,
        ));
        let verifier = Arc::new(TokenVerifier::new(
            config.token_secret.clone(),
            config.token_ttl,
        ));
        let connect_limiter = Arc::new(ConnectLimiter::new(config.connect_limit.clone()));

        Self {
            config,
            registry,
            dispatcher,
            verifier,
            connect_limiter,
            message_limiter,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Tear one connection down: membership out first, peers of the former
    /// room notified after. Safe to call from any path; only the caller that
    /// flips the open flag does the work.
    pub async fn disconnect(&self, conn: &Arc<ConnectionHandle>) {
        if !conn.mark_closed() {
            return;
        }

        let departure = self.registry.unregister(conn);
        self.message_limiter.forget(&conn.client_id);

        if let Some(departure) = departure {
            broadcast_presence(&departure.remaining, &departure.room_id).await;
        }
    }

    /// Stop accepting upgrades, ask every connection to close with 1001,
    /// wait for the registry to drain, then force out whatever is left.
    pub async fn shutdown(&self) {
        self.draining.store(true, Ordering::SeqCst);

        let connections = self.registry.connections_snapshot();
        info!(count = connections.len(), "closing connections for shutdown");
        for conn in &connections {
            conn.close(close_code::AWAY, "Server shutting down").await;
        }

        let deadline = Instant::now() + self.config.drain_timeout;
        while self.registry.connection_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // Whatever didn't drain in time is terminated here; presence frames
        // are pointless at this stage.
        for conn in self.registry.connections_snapshot() {
            conn.mark_closed();
            self.registry.unregister(&conn);
            self.message_limiter.forget(&conn.client_id);
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(gate::ws_handler))
        .route("/healthz", get(http::health_check))
        .route("/ice-servers", get(http::ice_servers))
        .route("/token", post(http::issue_token))
        .layer(cors)
        .with_state(state)
}

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let state = AppState::new(config);

    // Registry maintenance: expire idle connect-limiter counters.
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            sweep_state.connect_limiter.sweep();
        }
    });

    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.config.bind)
        .await
        .with_context(|| format!("bind {}", state.config.bind))?;
    info!("signaling server listening on http://{}", state.config.bind);

    let shutdown_state = state.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown_state.shutdown().await;
    })
    .await
    .context("serve")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining");
}
