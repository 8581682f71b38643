//! Event stream re-framing.
//!
//! A `text/event-stream` response body is decoded into records and encoded
//! again on its way to the client. Data-only records are copied once into a
//! buffer from [`SSE_ALLOCATOR`], which leaves room for the encoder to frame
//! them in place. A service can open each stream with the shared padding
//! record.

use crate::buffer::{BufferAllocator, BufferFlags, GatewayBuffer};
use crate::codec::{CodecError, DecodingState};
use crate::http::{HeaderTable, HttpContentMessage};
use crate::sse::{self, SseDecoder, SseEncoder, SseMessage, SSE_ALLOCATOR};

/// The response body is an event stream.
pub fn is_event_stream(headers: &HeaderTable) -> bool {
    headers
        .get("Content-Type")
        .and_then(|value| value.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(sse::CONTENT_TYPE))
}

#[derive(Debug)]
pub struct EventStreamRelay {
    decoder: SseDecoder,
    encoder: SseEncoder,
    padding: bool,
    records: u64,
}

impl EventStreamRelay {
    /// A relay for one response. With `padding` the stream opens with the
    /// padding record.
    pub fn new(padding: bool) -> Self {
        Self {
            decoder: SseDecoder::new(),
            encoder: SseEncoder::new(),
            padding,
            records: 0,
        }
    }

    /// Records re-encoded so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// The padding record, once, when the stream asked for it.
    pub fn opening(&mut self) -> Result<Option<HttpContentMessage>, CodecError> {
        if !std::mem::take(&mut self.padding) {
            return Ok(None);
        }
        let padding = self.encoder.encode(SseMessage::padding().clone())?;
        Ok(Some(HttpContentMessage::new(padding, false)))
    }

    /// Re-frame one body piece into zero or more pieces, one per complete
    /// record. When `content` ends the body, so does the last piece
    /// returned.
    pub fn relay(&mut self, content: HttpContentMessage) -> Result<Vec<HttpContentMessage>, CodecError> {
        let complete = content.is_complete();
        let mut input = content.into_buffer();
        let mut encoded = Vec::new();
        while let Some(message) = self.decoder.decode(&mut input)? {
            encoded.push(self.encode(message)?);
        }
        if complete {
            if let Some(message) = self.decoder.finish_decode()? {
                tracing::debug!("Event stream ended inside a record");
                encoded.push(self.encode(message)?);
            }
        }

        let last = encoded.len();
        let mut pieces: Vec<HttpContentMessage> = encoded
            .into_iter()
            .enumerate()
            .map(|(index, wire)| HttpContentMessage::new(wire, complete && index + 1 == last))
            .collect();
        if complete && pieces.is_empty() {
            pieces.push(HttpContentMessage::empty(true));
        }
        Ok(pieces)
    }

    fn encode(&mut self, message: SseMessage) -> Result<GatewayBuffer, CodecError> {
        self.records += 1;
        if !message.is_data_only() {
            return self.encoder.encode(message);
        }
        let Some(data) = message.data_buffer() else {
            return self.encoder.encode(message);
        };
        let mut framed = SSE_ALLOCATOR.allocate(data.remaining(), BufferFlags::ZERO_COPY);
        framed.put_slice(data.as_slice())?;
        self.encoder.encode(SseMessage::data(framed))
    }
}
