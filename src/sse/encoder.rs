//! SSE encoder with an in-place fast path for data-only records.

use std::sync::OnceLock;

use bytes::Bytes;
use memchr::memchr2;

use super::message::{SseMessage, SseParts};
use crate::buffer::{BufferFlags, FramingAllocator, GatewayBuffer};
use crate::codec::CodecError;

const DATA_PREFIX: &[u8] = b"data:";
const RECORD_SUFFIX: &[u8] = b"\n\n";

/// Allocator for buffers that will later be framed as SSE data in place.
pub const SSE_ALLOCATOR: FramingAllocator =
    FramingAllocator::new(DATA_PREFIX.len(), RECORD_SUFFIX.len());

/// Serializes [`SseMessage`] records.
#[derive(Debug, Default, Clone, Copy)]
pub struct SseEncoder;

impl SseEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode `message`. A data-only record whose exclusive buffer has room
    /// for the framing is framed in place and returned without copying.
    pub fn encode(&self, message: SseMessage) -> Result<GatewayBuffer, CodecError> {
        if message.is_padding() {
            return Ok(padding_buffer());
        }

        let data_only = message.is_data_only();
        let mut parts = message.into_parts();

        if data_only {
            if let Some(mut data) = parts.data.take() {
                if can_frame_in_place(&data) && data.frame_in_place(DATA_PREFIX, RECORD_SUFFIX) {
                    return Ok(data);
                }
                parts.data = Some(data);
            }
        }

        let mut len = 0;
        write_record(&parts, &mut |chunk: &[u8]| len += chunk.len());

        let mut out = GatewayBuffer::allocate(len, BufferFlags::NONE);
        let mut result = Ok(());
        write_record(&parts, &mut |chunk: &[u8]| {
            if result.is_ok() {
                result = out.put_slice(chunk);
            }
        });
        result?;
        Ok(out)
    }
}

fn can_frame_in_place(data: &GatewayBuffer) -> bool {
    let raw = data.as_slice();
    memchr2(b'\r', b'\n', raw).is_none() && raw.first() != Some(&b' ')
}

fn write_record(parts: &SseParts, sink: &mut dyn FnMut(&[u8])) {
    if let Some(event_type) = &parts.event_type {
        write_field(b"event", event_type.as_bytes(), sink);
    }
    if let Some(data) = &parts.data {
        write_field(b"data", data.as_slice(), sink);
    }
    if let Some(id) = &parts.id {
        write_field(b"id", id.as_bytes(), sink);
    }
    if let Some(retry) = parts.retry {
        write_field(b"retry", retry.to_string().as_bytes(), sink);
    }
    if let Some(comment) = &parts.comment {
        write_field(b"", comment.as_bytes(), sink);
    }
    if let Some(location) = &parts.location {
        write_field(b"location", location.as_bytes(), sink);
    }
    if parts.reconnect {
        sink(b"reconnect\n");
    }
    sink(b"\n");
}

/// One `name:value` line per line of `value`. A value starting with a space
/// gets an extra separator space, which the decoder strips.
fn write_field(name: &[u8], value: &[u8], sink: &mut dyn FnMut(&[u8])) {
    for line in split_lines(value) {
        sink(name);
        sink(b":");
        if line.first() == Some(&b' ') {
            sink(b" ");
        }
        sink(line);
        sink(b"\n");
    }
}

fn split_lines(value: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut rest = value;
    loop {
        match memchr2(b'\r', b'\n', rest) {
            Some(index) => {
                lines.push(&rest[..index]);
                let skip = if rest[index] == b'\r' && rest.get(index + 1) == Some(&b'\n') {
                    2
                } else {
                    1
                };
                rest = &rest[index + skip..];
            }
            None => {
                lines.push(rest);
                return lines;
            }
        }
    }
}

/// Pre-encoded padding record, built once and shared by every session.
fn padding_buffer() -> GatewayBuffer {
    static ENCODED: OnceLock<Bytes> = OnceLock::new();
    let encoded = ENCODED.get_or_init(|| {
        let parts = SseMessage::padding().clone().into_parts();
        let mut raw = Vec::new();
        write_record(&parts, &mut |chunk: &[u8]| raw.extend_from_slice(chunk));
        Bytes::from(raw)
    });
    GatewayBuffer::wrap(encoded.clone(), BufferFlags::SHARED)
}
