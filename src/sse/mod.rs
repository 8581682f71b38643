//! Server-Sent Events codec.
//!
//! # Data Flow
//! ```text
//! backend bytes → SseDecoder → SseMessage → SseEncoder → client bytes
//! ```
//!
//! # Design Decisions
//! - A single `data` line is kept as a slice of the received buffer; only
//!   a second line forces a copy.
//! - Data-only records with framing room are encoded in place.
//! - The padding record is encoded once and shared.

pub mod decoder;
pub mod encoder;
pub mod message;

pub use decoder::SseDecoder;
pub use encoder::{SseEncoder, SSE_ALLOCATOR};
pub use message::SseMessage;

/// Content type of an event stream.
pub const CONTENT_TYPE: &str = "text/event-stream";
