//! Accept loop.
//!
//! # Responsibilities
//! - Accept connections within the listener's limit
//! - Sniff TLS when passthrough is configured; forward TLS opaquely
//! - Hand everything else to the HTTP bridge
//! - Drain on shutdown, force-closing pairs after the grace period

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use super::bridge::serve_accept;
use super::connector::{Connector, TcpConnector};
use super::registry::BridgeState;
use super::service::ConnectTarget;
use super::session::Session;
use super::{GatewayContext, ProxyError};
use crate::buffer::GatewayBuffer;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::tls::{looks_like_tls, ClientHelloSniffer, SniffError, SniffOutcome};

/// Service name recorded for passthrough pairs.
const PASSTHROUGH_SERVICE: &str = "tls-passthrough";

pub struct GatewayServer<C: Connector = TcpConnector> {
    ctx: Arc<GatewayContext>,
    connector: Arc<C>,
    tracker: ConnectionTracker,
}

impl GatewayServer<TcpConnector> {
    /// Server dialing backends over TCP.
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self::with_connector(ctx, TcpConnector)
    }
}

impl<C: Connector> GatewayServer<C> {
    /// Server dialing backends through `connector`.
    pub fn with_connector(ctx: Arc<GatewayContext>, connector: C) -> Self {
        Self {
            ctx,
            connector: Arc::new(connector),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.ctx
    }

    /// Tracker counting accepted connections.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept until `shutdown` fires. Connections already accepted keep
    /// running; see [`GatewayServer::drain`].
    pub async fn run(
        &self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                address = %addr,
                services = self.ctx.services.len(),
                tls_passthrough = self.ctx.tls_passthrough.is_some(),
                "Gateway accepting connections"
            );
        }
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Accept(e)) => {
                            tracing::warn!(error = %e, "Accept failed");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    let guard = self.tracker.track();
                    let ctx = Arc::clone(&self.ctx);
                    let connector = Arc::clone(&self.connector);
                    tokio::spawn(async move {
                        let _permit = permit;
                        match handle_connection(&ctx, &*connector, stream, peer).await {
                            Ok(()) => {}
                            Err(ProxyError::Io(e)) => {
                                tracing::debug!(connection_id = %guard.id(), peer = %peer, error = %e, "Connection ended");
                            }
                            Err(e) => {
                                tracing::warn!(connection_id = %guard.id(), peer = %peer, error = %e, "Connection failed");
                            }
                        }
                        drop(guard);
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!(active = self.tracker.active_count(), "Stopped accepting connections");
                    return Ok(());
                }
            }
        }
    }

    /// Wait for open connections to finish. After `grace` the remaining
    /// pairs are closed. Returns `true` when everything drained.
    pub async fn drain(&self, grace: Duration) -> bool {
        if self.tracker.drain(grace).await {
            return true;
        }
        let closed = self.ctx.registry.close_all(true);
        tracing::warn!(closed, "Grace period elapsed, closing remaining sessions");
        self.tracker.drain(Duration::from_secs(1)).await
    }
}

async fn handle_connection<C: Connector>(
    ctx: &GatewayContext,
    connector: &C,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), ProxyError> {
    stream.set_nodelay(true)?;
    let mut accept = Session::accept(stream);
    let initial = match &ctx.tls_passthrough {
        None => GatewayBuffer::from_static(b""),
        Some(target) => {
            let first = match tokio::time::timeout(ctx.idle_timeout, accept.read()).await {
                Ok(read) => read?,
                Err(_) => None,
            };
            let Some(first) = first else {
                return Ok(());
            };
            if first.as_slice().first().is_some_and(|b| looks_like_tls(*b)) {
                return passthrough(ctx, connector, accept, peer, target, first).await;
            }
            first
        }
    };
    serve_accept(ctx, connector, accept, peer, initial).await
}

/// Sniff the ClientHello for logging and metrics, then forward every byte,
/// the sniffed ones included, to `target` unchanged.
async fn passthrough<C, S>(
    ctx: &GatewayContext,
    connector: &C,
    mut accept: Session<S>,
    peer: SocketAddr,
    target: &ConnectTarget,
    first: GatewayBuffer,
) -> Result<(), ProxyError>
where
    C: Connector,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut sniffer = ClientHelloSniffer::new();
    let mut outcome = sniff_step(&mut sniffer, first)?;
    while matches!(outcome, SniffOutcome::NeedMore) {
        let read = tokio::time::timeout(ctx.idle_timeout, accept.read()).await;
        match read {
            Ok(Ok(Some(chunk))) => outcome = sniff_step(&mut sniffer, chunk)?,
            Ok(Ok(None)) | Err(_) => return Ok(()),
            Ok(Err(e)) => return Err(e.into()),
        }
    }
    match &outcome {
        SniffOutcome::ClientHello(info) => {
            let policy = if info.requires_legacy_rc4() {
                "legacy_rc4"
            } else {
                "modern"
            };
            metrics::tls_hello(policy);
            tracing::info!(
                peer = %peer,
                version = %info.version,
                server_name = ?info.server_name,
                cipher_suites = info.cipher_suites.len(),
                rc4_suites = info.rc4_suites,
                policy,
                "TLS ClientHello sniffed"
            );
        }
        _ => tracing::debug!(peer = %peer, "Not a ClientHello, forwarding opaquely"),
    }

    let stream = match tokio::time::timeout(ctx.connect_timeout, connector.connect(target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(ProxyError::Connect {
                target: target.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(ProxyError::ConnectTimeout {
                target: target.to_string(),
            })
        }
    };
    let mut connect = Session::connect(stream);
    let guard = ctx
        .registry
        .register(accept.id(), peer, accept.close_handle().clone());
    ctx.registry.attach(
        accept.id(),
        connect.id(),
        connect.close_handle().clone(),
        PASSTHROUGH_SERVICE,
    )?;
    ctx.registry.transition(accept.id(), BridgeState::Upgrading)?;

    connect.write(sniffer.into_original()).await?;
    connect.flush().await?;
    let closed = accept.close_handle().closed();
    let result = tokio::select! {
        copied = tokio::io::copy_bidirectional(accept.stream_mut(), connect.stream_mut()) => copied.map(|_| ()),
        _ = closed => Ok(()),
    };

    if let Err(e) = ctx.registry.transition(accept.id(), BridgeState::Closing) {
        tracing::debug!(session_id = %accept.id(), error = %e, "Passthrough already closing");
    }
    accept.close(result.is_err()).await;
    connect.close(result.is_err()).await;
    drop(guard);
    result.map_err(Into::into)
}

/// A malformed hello is still forwarded; only an oversized record aborts.
fn sniff_step(sniffer: &mut ClientHelloSniffer, chunk: GatewayBuffer) -> Result<SniffOutcome, ProxyError> {
    match sniffer.offer(chunk) {
        Ok(outcome) => Ok(outcome),
        Err(SniffError::Malformed(reason)) => {
            tracing::debug!(reason, "Unparseable ClientHello");
            Ok(SniffOutcome::NotClientHello)
        }
        Err(e) => Err(e.into()),
    }
}
