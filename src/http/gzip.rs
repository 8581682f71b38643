//! Streaming gzip content encoding.
//!
//! Each piece is sync-flushed so a streamed body (an event stream in
//! particular) reaches the client without waiting for the encoder window
//! to fill.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use super::headers::HeaderTable;
use super::message::{ContentEncodings, HttpContentMessage};
use crate::buffer::GatewayBuffer;
use crate::codec::CodecError;

pub struct GzipContentEncoder {
    inner: Option<GzEncoder<Vec<u8>>>,
}

impl std::fmt::Debug for GzipContentEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipContentEncoder")
            .field("finished", &self.inner.is_none())
            .finish()
    }
}

impl Default for GzipContentEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl GzipContentEncoder {
    pub fn new() -> Self {
        Self {
            inner: Some(GzEncoder::new(Vec::new(), Compression::default())),
        }
    }

    /// Compress one piece; the last piece finishes the gzip stream.
    pub fn encode(&mut self, content: HttpContentMessage) -> Result<HttpContentMessage, CodecError> {
        let complete = content.is_complete();
        let encodings = ContentEncodings {
            chunked: content.is_chunked(),
            gzipped: true,
        };
        let Some(encoder) = self.inner.as_mut() else {
            return Err(CodecError::malformed("gzip stream", "content after final piece"));
        };
        encoder.write_all(content.buffer().as_slice())?;
        let compressed = if complete {
            match self.inner.take() {
                Some(encoder) => encoder.finish()?,
                None => Vec::new(),
            }
        } else {
            encoder.flush()?;
            std::mem::take(encoder.get_mut())
        };
        Ok(HttpContentMessage::with_encodings(
            GatewayBuffer::from_exclusive(compressed.as_slice().into()),
            complete,
            encodings,
        ))
    }
}

/// True when `Accept-Encoding` lists gzip with a non-zero quality.
pub fn accepts_gzip(headers: &HeaderTable) -> bool {
    headers.tokens("Accept-Encoding").iter().any(|token| {
        let mut parts = token.split(';');
        let coding = parts.next().unwrap_or_default().trim();
        let zero_q = parts.any(|p| {
            p.trim()
                .strip_prefix("q=")
                .and_then(|q| q.parse::<f32>().ok())
                .is_some_and(|q| q == 0.0)
        });
        (coding.eq_ignore_ascii_case("gzip") || coding == "*") && !zero_q
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn pieces_decompress_to_the_original() {
        let mut encoder = GzipContentEncoder::new();
        let mut wire = Vec::new();
        for (piece, complete) in [(&b"data: one\n\n"[..], false), (b"data: two\n\n", true)] {
            let out = encoder
                .encode(HttpContentMessage::new(GatewayBuffer::from_static(piece), complete))
                .unwrap();
            assert!(out.is_gzipped());
            assert!(!out.is_empty());
            wire.extend_from_slice(out.buffer().as_slice());
        }
        let mut plain = String::new();
        GzDecoder::new(wire.as_slice()).read_to_string(&mut plain).unwrap();
        assert_eq!(plain, "data: one\n\ndata: two\n\n");
    }

    #[test]
    fn content_after_finish_is_rejected() {
        let mut encoder = GzipContentEncoder::new();
        encoder.encode(HttpContentMessage::empty(true)).unwrap();
        assert!(encoder.encode(HttpContentMessage::empty(true)).is_err());
    }

    #[test]
    fn accept_encoding_quality_is_honoured() {
        let mut headers = HeaderTable::default();
        headers.set("Accept-Encoding", "br, gzip;q=0.5");
        assert!(accepts_gzip(&headers));
        headers.set("Accept-Encoding", "gzip;q=0, identity");
        assert!(!accepts_gzip(&headers));
    }
}
