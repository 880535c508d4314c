use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use secrecy::SecretString;
use tokio::sync::oneshot;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use relay_engine::session::SessionCoordinator;

use crate::handlers::{self, HandlerState, SharedState};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for any single HTTP request, `/test` included.
    pub request_timeout_secs: u64,
    pub adhoc_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9091,
            request_timeout_secs: 120,
            adhoc_timeout: Duration::from_secs(30),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: SharedState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/wx", get(handlers::verify).post(handlers::receive))
        .route("/test", get(handlers::adhoc))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    coordinator: SessionCoordinator,
    wx_token: Option<SecretString>,
) -> Result<ServerHandle, std::io::Error> {
    let mut handler_state = HandlerState::new(coordinator, wx_token);
    handler_state.adhoc_timeout = config.adhoc_timeout;

    let router = build_router(
        Arc::new(handler_state),
        Duration::from_secs(config.request_timeout_secs),
    );

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        port = local_addr.port(),
        "relay server started, try: curl 'http://127.0.0.1:{}/test?msg=hello'",
        local_addr.port()
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown: Some(shutdown_tx),
        server,
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running.
pub struct ServerHandle {
    pub port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.server).await;
    }
}
