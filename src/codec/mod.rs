//! Incremental decoding framework.
//!
//! # Data Flow
//! ```text
//! input buffer (one socket read)
//!     → DecodingState::decode()   consumes what it can
//!         Ok(None)          need more input, state kept
//!         Ok(Some(product)) state complete, caller moves on
//!         Err(e)            protocol error
//!     → finish_decode() at end of stream flushes partial data
//! ```
//!
//! # Design Decisions
//! - States are small and composable; protocol decoders chain them.
//! - A state only copies when its product spans more than one read.

pub mod consume_to_eol;
pub mod consume_to_terminator;
pub mod whitespace;

pub use consume_to_eol::{ConsumeToEol, LineEnding};
pub use consume_to_terminator::{ConsumeToTerminator, Stop};
pub use whitespace::LinearWhitespaceSkipping;

use crate::buffer::{BufferError, GatewayBuffer};

/// Protocol decode and encode failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid retry value {0:?}")]
    InvalidRetry(String),

    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    #[error("{what} exceeds limit of {limit} bytes")]
    TooLarge { what: &'static str, limit: usize },

    #[error("stream ended inside {0}")]
    Truncated(&'static str),

    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl CodecError {
    pub(crate) fn malformed(what: &'static str, detail: impl Into<String>) -> Self {
        CodecError::Malformed {
            what,
            detail: detail.into(),
        }
    }
}

/// One node of a decoding state machine.
pub trait DecodingState {
    type Output;

    /// Consume as much of `input` as this state can use.
    fn decode(&mut self, input: &mut GatewayBuffer) -> Result<Option<Self::Output>, CodecError>;

    /// Called at end of stream; returns whatever partial product exists.
    fn finish_decode(&mut self) -> Result<Option<Self::Output>, CodecError>;
}

/// Collects a product that may span several reads.
///
/// The first piece is kept as a zero-copy slice; a second piece escalates to
/// an auto-expanding copy.
#[derive(Debug, Default)]
pub(crate) struct Accumulator {
    held: Option<GatewayBuffer>,
}

impl Accumulator {
    pub(crate) fn push(&mut self, piece: GatewayBuffer) -> Result<(), BufferError> {
        match self.held.as_mut() {
            None => self.held = Some(piece),
            Some(held) => {
                if !held.is_auto_expand() || held.is_shared() {
                    let mut grown = held.as_unshared();
                    grown.set_auto_expand(true);
                    *held = grown;
                }
                held.put_slice(piece.as_slice())?;
            }
        }
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.held.as_ref().map_or(true, |b| !b.has_remaining())
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        self.held.as_ref().map(|b| b.as_slice()).unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.held.as_ref().map_or(0, |b| b.remaining())
    }

    pub(crate) fn take(&mut self) -> GatewayBuffer {
        self.held
            .take()
            .unwrap_or_else(|| GatewayBuffer::from_static(b""))
    }
}
