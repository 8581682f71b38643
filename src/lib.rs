//! Streaming HTTP gateway library.
//!
//! Zero-copy buffers, incremental decoders for SSE and HTTP/1.x, a TLS
//! ClientHello sniffer and the session bridge that pairs an accepted
//! client connection with a connection to a backend service.

// Wire formats
pub mod buffer;
pub mod codec;
pub mod http;
pub mod sse;
pub mod tls;

// Gateway
pub mod cache_control;
pub mod net;
pub mod proxy;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use lifecycle::Shutdown;
pub use proxy::{GatewayContext, GatewayServer};
