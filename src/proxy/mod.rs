//! Proxy session bridging.
//!
//! # Data Flow
//! ```text
//! accepted stream
//!     → server.rs (TLS sniff: passthrough, or HTTP)
//!     → bridge.rs (accept session ⇄ connect session)
//!         request head  → headers.rs (hop-by-hop, forwarded, Via, request id)
//!                       → service.rs (prefix match, round-robin target)
//!         response head → rewrite.rs (Location, Set-Cookie)
//!                       → headers.rs (Cache-Control)
//!         event stream  → event_stream.rs (decode, re-encode, padding)
//!         101           → raw byte forwarding both ways
//!     → registry.rs (pair state, linked close handles)
//! ```
//!
//! # Design Decisions
//! - One task owns both streams of a pair; the registry only holds ids and
//!   close handles, so there are no cross-session references.
//! - Errors before the response head is written become a synthetic status;
//!   after that the pair is closed.

pub mod bridge;
pub mod connector;
pub mod event_stream;
pub mod headers;
pub mod registry;
pub mod rewrite;
pub mod server;
pub mod service;
pub mod session;

pub use bridge::serve_accept;
pub use connector::{Connector, TcpConnector};
pub use headers::LoopDetector;
pub use registry::{BridgeState, PairGuard, PairRegistry, PairSnapshot};
pub use server::GatewayServer;
pub use service::{ConnectTarget, Service, ServiceSummary, ServiceTable};
pub use session::{CloseHandle, CloseMode, Principal, Session, SessionId, SessionRole};

use std::time::Duration;

use crate::codec::CodecError;
use crate::config::GatewayConfig;
use crate::http::MessageKind;
use crate::tls::SniffError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid connect target {uri:?}: {reason}")]
    InvalidTarget { uri: String, reason: String },

    #[error("connect to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {target} timed out")]
    ConnectTimeout { target: String },

    #[error("no pair registered for {0}")]
    UnknownPair(SessionId),

    #[error("illegal pair transition {from:?} -> {to:?}")]
    Transition { from: BridgeState, to: BridgeState },

    #[error("unexpected {0:?} message")]
    UnexpectedMessage(MessageKind),

    #[error("peer closed before the message completed")]
    PeerClosed,

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Sniff(#[from] SniffError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Immutable state shared by every session task.
#[derive(Debug)]
pub struct GatewayContext {
    pub services: ServiceTable,
    pub registry: PairRegistry,
    pub loops: LoopDetector,
    pub max_header_bytes: usize,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub tls_passthrough: Option<ConnectTarget>,
}

impl GatewayContext {
    /// Build the shared context. Fails when a service or the passthrough
    /// target cannot be parsed.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ProxyError> {
        Ok(Self {
            services: ServiceTable::from_config(&config.services)?,
            registry: PairRegistry::new(),
            loops: LoopDetector::generate(),
            max_header_bytes: config.listener.max_header_bytes,
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            idle_timeout: Duration::from_secs(config.timeouts.idle_secs),
            tls_passthrough: config
                .listener
                .tls_passthrough
                .as_ref()
                .map(|p| ConnectTarget::from_authority(p.target.clone())),
        })
    }
}
