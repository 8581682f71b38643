//! Buffer allocators.
//!
//! Encoders allocate through a [`BufferAllocator`] so that framed protocols
//! can reserve room for their framing when `ZERO_COPY` is requested.

use bytes::Bytes;

use super::{BufferFlags, GatewayBuffer};

/// Source of buffers for codecs.
pub trait BufferAllocator: Send + Sync + std::fmt::Debug {
    /// Allocate an empty buffer able to hold `capacity` payload bytes.
    fn allocate(&self, capacity: usize, flags: BufferFlags) -> GatewayBuffer;

    /// Wrap already-received bytes.
    fn wrap(&self, raw: Bytes, flags: BufferFlags) -> GatewayBuffer {
        GatewayBuffer::wrap(raw, flags)
    }
}

/// Plain heap allocation, no framing reserve.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, capacity: usize, flags: BufferFlags) -> GatewayBuffer {
        GatewayBuffer::allocate(capacity, flags)
    }
}

/// Reserves `prefix` bytes before and `suffix` bytes after the payload when
/// `ZERO_COPY` is requested, so an encoder can frame the payload in place.
#[derive(Debug, Clone, Copy)]
pub struct FramingAllocator {
    prefix: usize,
    suffix: usize,
}

impl FramingAllocator {
    /// Allocator reserving `prefix` bytes of headroom and `suffix` bytes of
    /// tailroom around every payload.
    pub const fn new(prefix: usize, suffix: usize) -> Self {
        Self { prefix, suffix }
    }

    /// Bytes reserved before the payload.
    pub fn prefix(&self) -> usize {
        self.prefix
    }

    /// Bytes reserved after the payload.
    pub fn suffix(&self) -> usize {
        self.suffix
    }
}

impl BufferAllocator for FramingAllocator {
    fn allocate(&self, capacity: usize, flags: BufferFlags) -> GatewayBuffer {
        if flags.contains(BufferFlags::ZERO_COPY) {
            GatewayBuffer::allocate_framed(capacity, self.prefix, self.suffix, flags)
        } else {
            GatewayBuffer::allocate(capacity, flags)
        }
    }
}
