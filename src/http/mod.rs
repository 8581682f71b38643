//! HTTP/1.x message model and codec.
//!
//! # Data Flow
//! ```text
//! socket read → GatewayBuffer
//!     → decoder.rs (HttpDecoder: head, then body pieces)
//!     → message.rs (HttpMessage: Request | Response | Content)
//!     → [proxy bridge rewrites heads]
//!     → encoder.rs (HttpEncoder, optional gzip.rs)
//!     → socket write
//! ```
//!
//! # Design Decisions
//! - Heads are owned values; body pieces reference the read buffer.
//! - Cookies are lifted out of `Cookie`/`Set-Cookie` headers into a set on
//!   decode and written back on encode.

pub mod cookie;
pub mod decoder;
pub mod encoder;
pub mod gzip;
pub mod headers;
pub mod message;
pub mod request;
pub mod response;
pub mod upgrade;

pub use cookie::HttpCookie;
pub use decoder::HttpDecoder;
pub use encoder::HttpEncoder;
pub use gzip::{accepts_gzip, GzipContentEncoder};
pub use headers::{HeaderOrdering, HeaderTable};
pub use message::{
    ContentEncodings, HttpContentMessage, HttpMessage, HttpStartMessage, MessageKind, StartParts,
};
pub use request::{HttpRequestMessage, QueryParameters};
pub use response::HttpResponseMessage;
pub use upgrade::{is_upgrade_request, is_websocket_upgrade, upgrade_protocol};

/// Header carrying the per-request correlation id.
pub const X_REQUEST_ID: &str = "X-Request-Id";
