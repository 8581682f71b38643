//! Incremental SSE decoder.
//!
//! ```text
//! LineStart ──CR/LF──▶ EmptyLine ──(fields read)──▶ emit, LineStart
//!     │
//!     └──other──▶ FieldName ──':'──▶ AfterName ──▶ FieldValue ──▶ LineStart
//!                     └──CR/LF──────────────────────▶ FieldValue
//! ```

use super::message::SseMessage;
use crate::buffer::GatewayBuffer;
use crate::codec::{
    CodecError, ConsumeToEol, ConsumeToTerminator, DecodingState, LinearWhitespaceSkipping,
    Stop,
};

/// Default bound on a single SSE line.
pub const DEFAULT_MAX_LINE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Event,
    Data,
    Id,
    Retry,
    Comment,
    Location,
    Reconnect,
}

impl Field {
    fn classify(name: &[u8]) -> Field {
        match name {
            b"event" => Field::Event,
            b"data" => Field::Data,
            b"id" => Field::Id,
            b"retry" => Field::Retry,
            b"location" => Field::Location,
            b"reconnect" => Field::Reconnect,
            _ => Field::Comment,
        }
    }
}

#[derive(Debug)]
enum State {
    LineStart,
    EmptyLine(ConsumeToEol),
    FieldName(ConsumeToTerminator),
    AfterName(Field, LinearWhitespaceSkipping),
    FieldValue(Field, ConsumeToEol),
    /// Skipping the rest of a record that failed to decode.
    Discard(ConsumeToEol),
}

/// Turns a byte stream into [`SseMessage`] records.
#[derive(Debug)]
pub struct SseDecoder {
    state: State,
    pending: SseMessage,
    has_fields: bool,
    max_line: usize,
    truncated: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            state: State::LineStart,
            pending: SseMessage::new(),
            has_fields: false,
            max_line,
            truncated: false,
        }
    }

    /// True when `finish_decode` flushed a record that had no closing blank line.
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// Decode every complete record in `input`.
    pub fn decode_all(&mut self, input: &mut GatewayBuffer) -> Result<Vec<SseMessage>, CodecError> {
        let mut out = Vec::new();
        while let Some(message) = self.decode(input)? {
            out.push(message);
        }
        Ok(out)
    }

    fn apply(&mut self, field: Field, value: GatewayBuffer) -> Result<(), CodecError> {
        self.has_fields = true;
        match field {
            Field::Data => {
                let data = self.pending.data_mut();
                match data.as_mut() {
                    None => *data = Some(value),
                    Some(existing) => {
                        if existing.is_shared() || !existing.is_auto_expand() {
                            let mut grown = existing.as_unshared();
                            grown.set_auto_expand(true);
                            *existing = grown;
                        }
                        existing.put_u8(b'\n')?;
                        existing.put_slice(value.as_slice())?;
                    }
                }
            }
            Field::Event => self.pending.set_event_type(text(&value)),
            Field::Id => self.pending.set_id(text(&value)),
            Field::Location => self.pending.set_location(text(&value)),
            Field::Reconnect => self.pending.set_reconnect(),
            Field::Comment => self.pending.append_comment(&text(&value)),
            Field::Retry => {
                let raw = value.as_slice();
                let parsed = if !raw.is_empty() && raw.iter().all(u8::is_ascii_digit) {
                    text(&value).parse::<u64>().ok()
                } else {
                    None
                };
                match parsed {
                    Some(retry) => self.pending.set_retry(retry),
                    None => return Err(CodecError::InvalidRetry(text(&value))),
                }
            }
        }
        Ok(())
    }

    fn emit(&mut self) -> Option<SseMessage> {
        if !self.has_fields {
            return None;
        }
        self.has_fields = false;
        Some(std::mem::take(&mut self.pending))
    }

    fn reject_record(&mut self, err: CodecError) -> CodecError {
        tracing::debug!(error = %err, "discarding malformed SSE record");
        self.pending = SseMessage::new();
        self.has_fields = false;
        self.state = State::Discard(ConsumeToEol::with_limit(self.max_line));
        err
    }
}

impl DecodingState for SseDecoder {
    type Output = SseMessage;

    fn decode(&mut self, input: &mut GatewayBuffer) -> Result<Option<SseMessage>, CodecError> {
        loop {
            match &mut self.state {
                State::LineStart => match input.as_slice().first() {
                    None => return Ok(None),
                    Some(b'\r') | Some(b'\n') => {
                        self.state = State::EmptyLine(ConsumeToEol::new());
                    }
                    Some(_) => {
                        self.state = State::FieldName(
                            ConsumeToTerminator::with_line_guard(b':').with_limit(self.max_line),
                        );
                    }
                },
                State::EmptyLine(eol) => {
                    if eol.decode(input)?.is_none() {
                        return Ok(None);
                    }
                    self.state = State::LineStart;
                    if let Some(message) = self.emit() {
                        return Ok(Some(message));
                    }
                }
                State::FieldName(name) => {
                    let Some((name, stop)) = name.decode(input)? else {
                        return Ok(None);
                    };
                    let field = Field::classify(name.as_slice());
                    self.state = match stop {
                        Stop::Terminator => {
                            State::AfterName(field, LinearWhitespaceSkipping::with_max(1))
                        }
                        _ => State::FieldValue(field, ConsumeToEol::with_limit(self.max_line)),
                    };
                }
                State::AfterName(field, skip) => {
                    let field = *field;
                    if skip.decode(input)?.is_none() {
                        return Ok(None);
                    }
                    self.state = State::FieldValue(field, ConsumeToEol::with_limit(self.max_line));
                }
                State::FieldValue(field, eol) => {
                    let field = *field;
                    let Some((value, _ending)) = eol.decode(input)? else {
                        return Ok(None);
                    };
                    self.state = State::LineStart;
                    if let Err(err) = self.apply(field, value) {
                        return Err(self.reject_record(err));
                    }
                }
                State::Discard(eol) => {
                    let Some((line, _)) = eol.decode(input)? else {
                        return Ok(None);
                    };
                    if line.has_remaining() {
                        *eol = ConsumeToEol::with_limit(self.max_line);
                    } else {
                        self.state = State::LineStart;
                    }
                }
            }
        }
    }

    fn finish_decode(&mut self) -> Result<Option<SseMessage>, CodecError> {
        let state = std::mem::replace(&mut self.state, State::LineStart);
        match state {
            State::LineStart => {
                self.truncated = self.has_fields;
            }
            State::EmptyLine(_) => {}
            State::FieldName(mut name) => {
                if let Some((name, _)) = name.finish_decode()? {
                    self.apply(Field::classify(name.as_slice()), GatewayBuffer::from_static(b""))?;
                }
                self.truncated = true;
            }
            State::AfterName(field, _) => {
                self.apply(field, GatewayBuffer::from_static(b""))?;
                self.truncated = true;
            }
            State::FieldValue(field, mut eol) => {
                let value = eol
                    .finish_decode()?
                    .map(|(value, _)| value)
                    .unwrap_or_else(|| GatewayBuffer::from_static(b""));
                self.apply(field, value)?;
                self.truncated = true;
            }
            State::Discard(_) => {
                self.pending = SseMessage::new();
                self.has_fields = false;
            }
        }
        Ok(self.emit())
    }
}

fn text(value: &GatewayBuffer) -> String {
    String::from_utf8_lossy(value.as_slice()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn decode_chunks(chunks: &[&[u8]]) -> Vec<SseMessage> {
        let mut decoder = SseDecoder::new();
        let mut out = Vec::new();
        for chunk in chunks {
            let mut input = GatewayBuffer::wrap(
                Bytes::copy_from_slice(chunk),
                crate::buffer::BufferFlags::SHARED,
            );
            out.extend(decoder.decode_all(&mut input).unwrap());
        }
        out.extend(decoder.finish_decode().unwrap());
        out
    }

    #[test]
    fn decodes_all_fields() {
        let out = decode_chunks(&[
            b"event: update\nid: 7\nretry: 1500\n: note\nlocation: /next\nreconnect\ndata: a\ndata: b\n\n",
        ]);
        assert_eq!(out.len(), 1);
        let m = &out[0];
        assert_eq!(m.event_type(), Some("update"));
        assert_eq!(m.id(), Some("7"));
        assert_eq!(m.retry(), Some(1500));
        assert_eq!(m.comment(), Some("note"));
        assert_eq!(m.location(), Some("/next"));
        assert!(m.reconnect());
        assert_eq!(m.data_buffer().unwrap().as_slice(), b"a\nb");
    }

    #[test]
    fn blank_lines_without_fields_emit_nothing() {
        assert!(decode_chunks(&[b"\n\r\n\r\n"]).is_empty());
    }

    #[test]
    fn single_data_line_is_a_zero_copy_slice() {
        let raw = Bytes::from_static(b"data:hello\n\n");
        let mut input = GatewayBuffer::wrap(raw.clone(), crate::buffer::BufferFlags::SHARED);
        let mut decoder = SseDecoder::new();
        let message = decoder.decode(&mut input).unwrap().unwrap();
        let data = message.data_buffer().unwrap();
        assert!(data.is_shared());
        assert_eq!(data.storage_addr(), raw.as_ptr() as usize + 5);
    }

    #[test]
    fn unknown_fields_become_comments() {
        let out = decode_chunks(&[b"custom: value\n\n"]);
        assert_eq!(out[0].comment(), Some("value"));
    }

    #[test]
    fn only_one_leading_space_is_skipped() {
        let out = decode_chunks(&[b"data:  two\n\n"]);
        assert_eq!(out[0].data_buffer().unwrap().as_slice(), b" two");
    }

    #[test]
    fn malformed_retry_fails_the_record_only() {
        let mut decoder = SseDecoder::new();
        let mut input = GatewayBuffer::from_static(b"data: lost\nretry: soon\ndata: skipped\n\ndata: kept\n\n");
        assert!(matches!(
            decoder.decode(&mut input),
            Err(CodecError::InvalidRetry(v)) if v == "soon"
        ));
        let next = decoder.decode(&mut input).unwrap().unwrap();
        assert_eq!(next.data_buffer().unwrap().as_slice(), b"kept");
        assert_eq!(next.retry(), None);
    }

    #[test]
    fn line_ending_styles_decode_identically() {
        let lf = decode_chunks(&[b"event: e\ndata: x\ndata: y\n\n"]);
        let crlf = decode_chunks(&[b"event: e\r\ndata: x\r\ndata: y\r\n\r\n"]);
        let cr = decode_chunks(&[b"event: e\rdata: x\rdata: y\r\r"]);
        assert_eq!(lf, crlf);
        assert_eq!(lf, cr);
        assert_eq!(lf.len(), 1);
    }

    #[test]
    fn byte_at_a_time_matches_whole() {
        let wire: &[u8] = b"id: 1\r\nevent: tick\r\ndata: first\r\ndata: second\r\n\r\n: c\n\n";
        let whole = decode_chunks(&[wire]);
        let split: Vec<&[u8]> = wire.chunks(1).collect();
        assert_eq!(decode_chunks(&split), whole);
        assert_eq!(whole.len(), 2);
    }

    #[test]
    fn finish_flushes_unterminated_record() {
        let mut decoder = SseDecoder::new();
        let mut input = GatewayBuffer::from_static(b"data: partial");
        assert!(decoder.decode(&mut input).unwrap().is_none());
        let message = decoder.finish_decode().unwrap().unwrap();
        assert_eq!(message.data_buffer().unwrap().as_slice(), b"partial");
        assert!(decoder.was_truncated());
    }
}
