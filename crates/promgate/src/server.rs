//! HTTP server assembly.
//!
//! Wires the health endpoint, the optional access log, the authentication
//! middleware and the catch-all proxy route together, and serves them with
//! graceful shutdown on SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tracing::{info, warn};

use promgate_acl::AclRegistry;

use crate::auth::OidcValidator;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::middleware::{authenticate, log_requests, method_gate};
use crate::proxy::proxy_handler;

/// Shared state for middleware and handlers.
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration.
    pub config: Arc<Config>,
    /// Role registry, frozen after startup.
    pub registry: Arc<AclRegistry>,
    /// OIDC token validator.
    pub oidc: Arc<OidcValidator>,
    /// Upstream base URL.
    pub upstream: reqwest::Url,
    /// Client used for upstream forwarding.
    pub http: reqwest::Client,
}

impl AppState {
    /// Assemble the application state from its startup-time pieces.
    pub fn new(
        config: Config,
        registry: AclRegistry,
        oidc: OidcValidator,
    ) -> Result<Self> {
        let upstream = config.upstream()?;

        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to create upstream client: {e}")))?;

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            oidc: Arc::new(oidc),
            upstream,
            http,
        })
    }
}

/// Build the router: `/healthz` outside the auth stack, everything else
/// method-gated, authenticated and proxied.
pub fn router(state: AppState) -> Router {
    // Layers run outermost-first: the method gate answers 405 before
    // authentication is even attempted.
    let proxied = Router::new()
        .fallback(proxy_handler)
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(middleware::from_fn(method_gate));

    let mut app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(proxied)
        .with_state(state.clone());

    if state.config.log_requests || state.config.debug {
        app = app.layer(middleware::from_fn(log_requests));
    }

    app
}

/// Serve until a shutdown signal arrives, then drain within the configured
/// timeout.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let drain = state.config.graceful_shutdown_timeout();

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;

    info!(addr = %addr, "starting server");

    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(drain))
    .await
    .map_err(|e| Error::Internal(format!("server error: {e}")))?;

    info!("successfully stopped server");

    Ok(())
}

/// Resolve on SIGINT/SIGTERM and arm a watchdog that aborts the process if
/// the connection drain exceeds the configured timeout.
async fn shutdown_signal(drain: Duration) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!(
        timeout_s = drain.as_secs(),
        "caught shutdown signal, waiting for connections to close"
    );

    tokio::spawn(async move {
        tokio::time::sleep(drain).await;
        warn!("graceful-shutdown timeout exceeded, aborting");
        std::process::exit(1);
    });
}
