//! Network module with deferred startup lifecycle.
//!
//! `new()` wires the session manager to a resolver, `start()` binds the TCP
//! listener, and `serve()` accepts requests until the shutdown future
//! resolves. Between `start()` and `serve()` callers can read the bound port
//! or grab the shutdown controller.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::{NetworkConfig, TlsConfig};
use super::handlers::{api_handler, health_handler, liveness_handler, readiness_handler, AppState};
use super::middleware::build_http_layers;
use super::shutdown::{DrainOutcome, ShutdownController};
use crate::bridge::{prepare_static_bodies, BridgeConfig, SessionManager};
use crate::traits::Resolver;

/// Assembles the router: health probes first, everything else goes to the
/// API handler.
///
/// Routes:
/// - `GET /health` -- detailed health JSON
/// - `GET /health/live` -- liveness probe
/// - `GET /health/ready` -- readiness probe
/// - fallback -- the resource API under `BridgeConfig::api_path`
pub fn build_router(state: AppState, config: &NetworkConfig) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .fallback(api_handler)
        .layer(build_http_layers(config))
        .with_state(state)
}

/// Owns the HTTP server lifecycle.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    sessions: Arc<SessionManager>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    ///
    /// Static error bodies are serialized here rather than on first use.
    #[must_use]
    pub fn new(config: NetworkConfig, bridge: BridgeConfig, resolver: Arc<dyn Resolver>) -> Self {
        prepare_static_bodies();
        let shutdown = Arc::new(ShutdownController::new());
        let sessions = Arc::new(SessionManager::new(
            resolver,
            Arc::new(bridge),
            Arc::clone(&shutdown),
        ));
        Self {
            config,
            listener: None,
            sessions,
            shutdown,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which differs from the configured one
    /// when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves requests until `shutdown` resolves, then drains.
    ///
    /// After the signal, new sessions are refused and in-flight ones get up
    /// to `shutdown_timeout` to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, TLS material
    /// cannot be loaded, or the server hits a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let config = self.config;
        let shutdown_ctrl = self.shutdown;

        let state = AppState {
            sessions: self.sessions,
            shutdown: Arc::clone(&shutdown_ctrl),
            start_time: Instant::now(),
        };
        let router = build_router(state, &config);

        // Flip to Draining as soon as the signal fires so requests arriving
        // during the drain get 503 instead of a new session.
        let signal = {
            let ctrl = Arc::clone(&shutdown_ctrl);
            async move {
                shutdown.await;
                info!("Shutdown signal received, draining sessions");
                ctrl.trigger_shutdown();
            }
        };

        shutdown_ctrl.set_ready();

        match &config.tls {
            Some(tls) => serve_tls(listener, router, tls, &config, &shutdown_ctrl, signal).await,
            None => serve_plain(listener, router, &config, &shutdown_ctrl, signal).await,
        }
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    config: &NetworkConfig,
    shutdown_ctrl: &Arc<ShutdownController>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("Serving plain HTTP connections");

    let mut stop = shutdown_ctrl.shutdown_receiver();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal);
    let mut server = tokio::spawn(async move { server.await });

    let signalled = stop.wait_for(|stopped| *stopped).await.is_ok();
    if !signalled {
        // Controller dropped: nothing left to coordinate with.
        server.await??;
        return Ok(());
    }

    // Connections and sessions share one bounded window.
    let deadline = tokio::time::Instant::now() + config.shutdown_timeout;
    let drained = shutdown_ctrl.wait_for_drain(config.shutdown_timeout).await;
    match tokio::time::timeout_at(deadline, &mut server).await {
        Ok(joined) => {
            joined??;
            if drained == DrainOutcome::Graceful {
                info!("HTTP server gracefully stopped");
            } else {
                warn!("HTTP server forcefully stopped after timeout");
            }
        }
        Err(_) => {
            server.abort();
            warn!("HTTP server forcefully stopped after timeout");
        }
    }
    Ok(())
}

/// Serves TLS connections using `axum-server` with rustls, reusing the
/// pre-bound listener.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    config: &NetworkConfig,
    shutdown_ctrl: &Arc<ShutdownController>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let grace = config.shutdown_timeout;

    tokio::spawn(async move {
        signal.await;
        shutdown_handle.graceful_shutdown(Some(grace));
    });

    info!("Serving TLS connections on {}", addr);

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    // Connections are closed by now; sessions get their own window.
    match shutdown_ctrl.wait_for_drain(grace).await {
        DrainOutcome::Graceful => info!("HTTP server gracefully stopped"),
        DrainOutcome::Forced => warn!("HTTP server forcefully stopped after timeout"),
    }
    Ok(())
}
