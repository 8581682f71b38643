//! Shareable byte buffers.
//!
//! # Data Flow
//! ```text
//! socket read (Bytes)
//!     → GatewayBuffer::wrap(.., SHARED)   zero-copy, read-only
//!     → slice() for decoded fields        zero-copy
//!     → as_unshared() when a writer needs it (copy)
//!
//! encoder
//!     → BufferAllocator::allocate(.., ZERO_COPY)  framing headroom reserved
//!     → put_slice / frame_in_place
//!     → freeze() → socket write
//! ```
//!
//! # Design Decisions
//! - A buffer is a `[position, limit)` window over either an exclusive
//!   `BytesMut` or a shared `Bytes`.
//! - Shared storage is never written; any write converts the buffer to an
//!   exclusive copy of its window first.
//! - Slicing past the readable window is a programming error and panics.

pub mod allocator;

use std::fmt;
use std::ops::BitOr;

use bytes::{Bytes, BytesMut};

pub use allocator::{BufferAllocator, FramingAllocator, HeapAllocator};

/// Allocation and wrapping flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags(u8);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    /// Storage may be referenced by several owners and is read-only.
    pub const SHARED: BufferFlags = BufferFlags(0b001);
    /// Reserve framing headroom so an encoder can frame the data in place.
    pub const ZERO_COPY: BufferFlags = BufferFlags(0b010);
    /// Grow on writes past capacity instead of failing.
    pub const AUTO_EXPAND: BufferFlags = BufferFlags(0b100);

    #[inline]
    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

/// Buffer write failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer overflow: {needed} bytes needed, {available} available")]
    Overflow { needed: usize, available: usize },
}

#[derive(Clone)]
enum Storage {
    Exclusive(BytesMut),
    Shared(Bytes),
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Exclusive(b) => b,
            Storage::Shared(b) => b,
        }
    }
}

/// A byte window over exclusive or shared storage.
pub struct GatewayBuffer {
    storage: Storage,
    position: usize,
    limit: usize,
    auto_expand: bool,
}

impl GatewayBuffer {
    /// Allocate an empty exclusive buffer with `capacity` bytes of room.
    pub fn allocate(capacity: usize, flags: BufferFlags) -> Self {
        Self::allocate_framed(capacity, 0, 0, flags)
    }

    /// Allocate with `prefix` bytes of headroom and `suffix` bytes of
    /// tailroom around `capacity` bytes of payload room.
    pub(crate) fn allocate_framed(
        capacity: usize,
        prefix: usize,
        suffix: usize,
        flags: BufferFlags,
    ) -> Self {
        let total = prefix + capacity + suffix;
        let mut store = BytesMut::with_capacity(total);
        store.resize(total, 0);
        Self {
            storage: Storage::Exclusive(store),
            position: prefix,
            limit: prefix,
            auto_expand: flags.contains(BufferFlags::AUTO_EXPAND),
        }
    }

    /// Wrap received bytes. With `SHARED` the bytes are referenced without
    /// copying; otherwise an exclusive copy is made.
    pub fn wrap(raw: Bytes, flags: BufferFlags) -> Self {
        let len = raw.len();
        let storage = if flags.contains(BufferFlags::SHARED) {
            Storage::Shared(raw)
        } else {
            Storage::Exclusive(BytesMut::from(&raw[..]))
        };
        Self {
            storage,
            position: 0,
            limit: len,
            auto_expand: flags.contains(BufferFlags::AUTO_EXPAND),
        }
    }

    /// Take ownership of exclusive storage without copying.
    pub fn from_exclusive(raw: BytesMut) -> Self {
        let len = raw.len();
        Self {
            storage: Storage::Exclusive(raw),
            position: 0,
            limit: len,
            auto_expand: false,
        }
    }

    /// Wrap a static byte string as shared storage.
    pub fn from_static(raw: &'static [u8]) -> Self {
        Self::wrap(Bytes::from_static(raw), BufferFlags::SHARED)
    }

    /// Copy `raw` into a new exclusive, auto-expanding buffer.
    pub fn copy_from_slice(raw: &[u8]) -> Self {
        let mut buf = Self::allocate(raw.len(), BufferFlags::AUTO_EXPAND);
        buf.limit += raw.len();
        buf.exclusive_mut()[..raw.len()].copy_from_slice(raw);
        buf
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.bytes().len()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.limit > self.position
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        matches!(self.storage, Storage::Shared(_))
    }

    #[inline]
    pub fn is_auto_expand(&self) -> bool {
        self.auto_expand
    }

    pub fn set_auto_expand(&mut self, auto_expand: bool) {
        self.auto_expand = auto_expand;
    }

    /// Bytes before the readable window that may be written in place.
    pub fn headroom(&self) -> usize {
        if self.is_shared() {
            0
        } else {
            self.position
        }
    }

    /// Bytes after the readable window that may be written in place.
    pub fn tailroom(&self) -> usize {
        if self.is_shared() {
            0
        } else {
            self.capacity() - self.limit
        }
    }

    /// Readable bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.storage.bytes()[self.position..self.limit]
    }

    /// Address of the backing storage, stable while the storage is not
    /// reallocated. Two buffers reporting the same address share storage.
    pub fn storage_addr(&self) -> usize {
        self.storage.bytes().as_ptr() as usize
    }

    /// Consume `n` readable bytes.
    pub fn advance(&mut self, n: usize) {
        assert!(
            n <= self.remaining(),
            "advance past limit: {} > {}",
            n,
            self.remaining()
        );
        self.position += n;
    }

    /// Zero-copy view of `len` readable bytes starting at `offset`.
    ///
    /// Shared storage is referenced; exclusive storage is copied because it
    /// cannot have a second owner.
    pub fn slice(&self, offset: usize, len: usize) -> GatewayBuffer {
        assert!(
            offset + len <= self.remaining(),
            "slice out of range: {}..{} of {}",
            offset,
            offset + len,
            self.remaining()
        );
        let start = self.position + offset;
        match &self.storage {
            Storage::Shared(b) => GatewayBuffer {
                storage: Storage::Shared(b.slice(start..start + len)),
                position: 0,
                limit: len,
                auto_expand: false,
            },
            Storage::Exclusive(b) => GatewayBuffer {
                storage: Storage::Exclusive(BytesMut::from(&b[start..start + len])),
                position: 0,
                limit: len,
                auto_expand: false,
            },
        }
    }

    /// Split off the first `len` readable bytes, advancing this buffer.
    pub fn split_to(&mut self, len: usize) -> GatewayBuffer {
        let head = self.slice(0, len);
        self.advance(len);
        head
    }

    /// Shared duplicates reference the same storage; exclusive duplicates copy.
    pub fn duplicate(&self) -> GatewayBuffer {
        match &self.storage {
            Storage::Shared(b) => GatewayBuffer {
                storage: Storage::Shared(b.clone()),
                position: self.position,
                limit: self.limit,
                auto_expand: self.auto_expand,
            },
            Storage::Exclusive(_) => self.as_unshared(),
        }
    }

    /// Freeze into shared storage without copying.
    pub fn into_shared(self) -> GatewayBuffer {
        match self.storage {
            Storage::Shared(_) => self,
            Storage::Exclusive(b) => GatewayBuffer {
                storage: Storage::Shared(b.freeze()),
                position: self.position,
                limit: self.limit,
                auto_expand: false,
            },
        }
    }

    /// Exclusive copy of the readable window.
    pub fn as_unshared(&self) -> GatewayBuffer {
        let mut copy = GatewayBuffer::copy_from_slice(self.as_slice());
        copy.auto_expand = self.auto_expand;
        copy
    }

    /// Readable window as `Bytes` for a socket write.
    pub fn freeze(self) -> Bytes {
        let (position, limit) = (self.position, self.limit);
        match self.storage {
            Storage::Shared(b) => b.slice(position..limit),
            Storage::Exclusive(b) => b.freeze().slice(position..limit),
        }
    }

    /// Append bytes after the readable window.
    pub fn put_slice(&mut self, src: &[u8]) -> Result<(), BufferError> {
        let available = self.tailroom();
        if src.len() > available {
            if !self.auto_expand {
                return Err(BufferError::Overflow {
                    needed: src.len(),
                    available,
                });
            }
            let grow_to = (self.limit + src.len()).max(self.capacity() * 2);
            self.exclusive_mut().resize(grow_to, 0);
        }
        let start = self.limit;
        self.exclusive_mut()[start..start + src.len()].copy_from_slice(src);
        self.limit += src.len();
        Ok(())
    }

    pub fn put_u8(&mut self, byte: u8) -> Result<(), BufferError> {
        self.put_slice(&[byte])
    }

    /// Write `prefix` into the headroom and `suffix` into the tailroom,
    /// widening the window over them. Returns `false` without touching the
    /// buffer when the storage is shared or room is insufficient.
    pub fn frame_in_place(&mut self, prefix: &[u8], suffix: &[u8]) -> bool {
        if self.headroom() < prefix.len() || self.tailroom() < suffix.len() {
            return false;
        }
        let start = self.position - prefix.len();
        let end = self.limit;
        let store = self.exclusive_mut();
        store[start..start + prefix.len()].copy_from_slice(prefix);
        store[end..end + suffix.len()].copy_from_slice(suffix);
        self.position = start;
        self.limit = end + suffix.len();
        true
    }

    /// Exclusive storage, converting from shared by copying the window.
    fn exclusive_mut(&mut self) -> &mut BytesMut {
        if let Storage::Shared(shared) = &self.storage {
            let window = &shared[self.position..self.limit];
            let mut copy = BytesMut::with_capacity(window.len());
            copy.extend_from_slice(window);
            self.limit -= self.position;
            self.position = 0;
            self.storage = Storage::Exclusive(copy);
        }
        match &mut self.storage {
            Storage::Exclusive(b) => b,
            Storage::Shared(_) => unreachable!("storage converted above"),
        }
    }
}

impl Clone for GatewayBuffer {
    fn clone(&self) -> Self {
        self.duplicate()
    }
}

impl PartialEq for GatewayBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for GatewayBuffer {}

impl fmt::Debug for GatewayBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayBuffer")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .field("shared", &self.is_shared())
            .field("data", &String::from_utf8_lossy(self.as_slice()))
            .finish()
    }
}

impl From<&'static str> for GatewayBuffer {
    fn from(raw: &'static str) -> Self {
        GatewayBuffer::from_static(raw.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_slices_reference_the_same_storage() {
        let raw = Bytes::from_static(b"hello world");
        let buf = GatewayBuffer::wrap(raw, BufferFlags::SHARED);
        let word = buf.slice(6, 5);
        assert_eq!(word.as_slice(), b"world");
        assert!(word.is_shared());
        assert_eq!(word.storage_addr(), buf.storage_addr() + 6);
    }

    #[test]
    fn writes_to_shared_buffers_copy_first() {
        let buf = GatewayBuffer::wrap(Bytes::from_static(b"abc"), BufferFlags::SHARED);
        let original_addr = buf.storage_addr();
        let mut writable = buf.duplicate();
        writable.set_auto_expand(true);
        writable.put_slice(b"def").unwrap();
        assert_eq!(writable.as_slice(), b"abcdef");
        assert!(!writable.is_shared());
        assert_ne!(writable.storage_addr(), original_addr);
        assert_eq!(buf.as_slice(), b"abc");
    }

    #[test]
    fn fixed_buffers_reject_overflow() {
        let mut buf = GatewayBuffer::allocate(4, BufferFlags::NONE);
        buf.put_slice(b"abcd").unwrap();
        assert_eq!(
            buf.put_u8(b'e'),
            Err(BufferError::Overflow {
                needed: 1,
                available: 0
            })
        );
    }

    #[test]
    fn auto_expanding_buffers_grow() {
        let mut buf = GatewayBuffer::allocate(2, BufferFlags::AUTO_EXPAND);
        buf.put_slice(b"grow beyond").unwrap();
        assert_eq!(buf.as_slice(), b"grow beyond");
    }

    #[test]
    fn framing_in_place_keeps_storage() {
        let mut buf = GatewayBuffer::allocate_framed(3, 2, 1, BufferFlags::NONE);
        buf.put_slice(b"abc").unwrap();
        let addr = buf.storage_addr();
        assert!(buf.frame_in_place(b"<<", b">"));
        assert_eq!(buf.as_slice(), b"<<abc>");
        assert_eq!(buf.storage_addr(), addr);
        assert!(!buf.frame_in_place(b"<", b""));
    }

    #[test]
    #[should_panic(expected = "slice out of range")]
    fn slicing_past_the_window_panics() {
        let buf = GatewayBuffer::from_static(b"abc");
        let _ = buf.slice(2, 2);
    }

    #[test]
    fn freeze_is_zero_copy_for_shared_storage() {
        let raw = Bytes::from_static(b"xyz");
        let buf = GatewayBuffer::wrap(raw.clone(), BufferFlags::SHARED);
        let frozen = buf.freeze();
        assert_eq!(frozen.as_ptr(), raw.as_ptr());
    }
}
