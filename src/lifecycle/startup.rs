//! Startup orchestration.
//!
//! # Responsibilities
//! - Install the metrics exporter when enabled
//! - Build the gateway context and bind the listener
//! - Start the admin API when enabled
//! - Run until stopped, then drain
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener starts accepting last

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use super::{signals, Shutdown};
use crate::admin::{self, AdminState};
use crate::config::GatewayConfig;
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;
use crate::proxy::{GatewayContext, GatewayServer, ProxyError};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid {field} {value:?}")]
    Address { field: &'static str, value: String },

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error(transparent)]
    Gateway(#[from] ProxyError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("admin listener {address}: {source}")]
    Admin {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run the gateway until SIGINT or SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    run_until(config, signals::wait_for_signal()).await
}

/// Run the gateway until `stop` resolves.
pub async fn run_until(
    config: GatewayConfig,
    stop: impl Future<Output = ()>,
) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr =
            config
                .observability
                .metrics_address
                .parse()
                .map_err(|_| StartupError::Address {
                    field: "observability.metrics_address",
                    value: config.observability.metrics_address.clone(),
                })?;
        metrics::init_metrics(addr)?;
    }

    let ctx = Arc::new(GatewayContext::from_config(&config)?);
    let server = Arc::new(GatewayServer::new(Arc::clone(&ctx)));
    let shutdown = Shutdown::new();
    let listener = Listener::bind(&config.listener).await?;

    let admin_task = if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address)
            .await
            .map_err(|source| StartupError::Admin {
                address: config.admin.bind_address.clone(),
                source,
            })?;
        tracing::info!(address = %config.admin.bind_address, "Admin API listening");
        let router = admin::router(AdminState::new(
            Arc::clone(&ctx),
            server.tracker().clone(),
            &config.admin.api_key,
        ));
        let signalled = shutdown.signalled();
        Some(tokio::spawn(async move {
            axum::serve(admin_listener, router)
                .with_graceful_shutdown(signalled)
                .await
        }))
    } else {
        None
    };

    let mut accept = {
        let server = Arc::clone(&server);
        let rx = shutdown.subscribe();
        tokio::spawn(async move { server.run(listener, rx).await })
    };

    tokio::select! {
        _ = stop => {}
        result = &mut accept => {
            tracing::error!(result = ?result, "Accept loop ended unexpectedly");
        }
    }
    shutdown.trigger();
    if !accept.is_finished() {
        match accept.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Accept loop failed"),
            Err(e) => tracing::error!(error = %e, "Accept task panicked"),
        }
    }

    let grace = Duration::from_secs(config.timeouts.shutdown_secs);
    let drained = server.drain(grace).await;
    if let Some(admin) = admin_task {
        match admin.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Admin server failed"),
            Err(e) => tracing::warn!(error = %e, "Admin task panicked"),
        }
    }
    tracing::info!(drained, "Shutdown complete");
    Ok(())
}
