//! Incremental HTTP/1.x decoder.
//!
//! # Data Flow
//! ```text
//! StartLine ──▶ Headers ──blank line──▶ head emitted
//!                                  ├─ no body ─────────────▶ StartLine
//!                                  ├─ Content-Length ─▶ Fixed ──▶ StartLine
//!                                  ├─ chunked ─▶ ChunkSize ⇄ ChunkData ─▶ Trailers ─▶ StartLine
//!                                  ├─ response, no length ─▶ UntilClose
//!                                  └─ 101 response ────────▶ Upgraded
//! ```
//!
//! Body pieces are slices of the input buffer; nothing is copied unless a
//! line spans reads. Once upgraded the decoder consumes nothing, leaving the
//! remaining bytes in the caller's buffer for raw forwarding.

use http::{Method, StatusCode, Version};

use super::cookie::HttpCookie;
use super::headers::HeaderTable;
use super::message::{ContentEncodings, HttpContentMessage, HttpMessage, HttpStartMessage};
use super::request::HttpRequestMessage;
use super::response::HttpResponseMessage;
use crate::buffer::GatewayBuffer;
use crate::codec::{CodecError, ConsumeToEol, DecodingState};

/// Default bound on the request or status line plus all header lines.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Request,
    Response,
}

#[derive(Debug)]
enum Head {
    Request(HttpRequestMessage),
    Response(HttpResponseMessage),
}

#[derive(Debug)]
enum Body {
    Fixed { remaining: u64 },
    ChunkSize(ConsumeToEol),
    ChunkData { remaining: u64 },
    ChunkEnd(ConsumeToEol),
    Trailers(ConsumeToEol),
    UntilClose,
}

#[derive(Debug)]
enum State {
    StartLine(ConsumeToEol),
    Headers(ConsumeToEol),
    Body(Body),
    Upgraded,
}

/// Decodes a stream of requests or responses into [`HttpMessage`] units.
#[derive(Debug)]
pub struct HttpDecoder {
    role: Role,
    state: State,
    head: Option<Head>,
    lines: Vec<(String, String)>,
    header_bytes: usize,
    max_header_bytes: usize,
    request_method: Option<Method>,
    encodings: ContentEncodings,
}

impl HttpDecoder {
    /// Decoder for the client side of a connection.
    pub fn requests() -> Self {
        Self::new(Role::Request)
    }

    /// Decoder for the server side of a connection.
    pub fn responses() -> Self {
        Self::new(Role::Response)
    }

    fn new(role: Role) -> Self {
        Self {
            role,
            state: State::StartLine(ConsumeToEol::with_limit(DEFAULT_MAX_HEADER_BYTES)),
            head: None,
            lines: Vec::new(),
            header_bytes: 0,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            request_method: None,
            encodings: ContentEncodings::IDENTITY,
        }
    }

    pub fn with_max_header_bytes(mut self, max: usize) -> Self {
        self.max_header_bytes = max;
        self.state = State::StartLine(ConsumeToEol::with_limit(max));
        self
    }

    /// Record the method of the request the next response answers, so a
    /// response to `HEAD` is read without a body.
    pub fn expect_response_to(&mut self, method: &Method) {
        self.request_method = Some(method.clone());
    }

    /// Stop decoding; the rest of the stream is opaque.
    pub fn set_upgraded(&mut self) {
        self.state = State::Upgraded;
    }

    pub fn is_upgraded(&self) -> bool {
        matches!(self.state, State::Upgraded)
    }

    /// Between messages, with nothing buffered.
    pub fn is_idle(&self) -> bool {
        matches!(&self.state, State::StartLine(eol) if !eol.is_pending_cr()) && self.head.is_none()
    }

    fn line_reader(&self) -> ConsumeToEol {
        ConsumeToEol::with_limit(self.max_header_bytes)
    }

    fn next_message(&mut self) {
        self.encodings = ContentEncodings::IDENTITY;
        self.state = State::StartLine(self.line_reader());
    }

    fn parse_start_line(&self, line: &[u8]) -> Result<Head, CodecError> {
        let line = std::str::from_utf8(line)
            .map_err(|_| CodecError::malformed("start line", "not UTF-8"))?;
        match self.role {
            Role::Request => {
                let mut parts = line.split(' ').filter(|p| !p.is_empty());
                let (Some(method), Some(uri), Some(version), None) =
                    (parts.next(), parts.next(), parts.next(), parts.next())
                else {
                    return Err(CodecError::malformed("request line", line));
                };
                let method = Method::from_bytes(method.as_bytes())
                    .map_err(|_| CodecError::malformed("method", method))?;
                let mut request = HttpRequestMessage::new(method, uri);
                request.set_version(parse_version(version)?);
                Ok(Head::Request(request))
            }
            Role::Response => {
                let mut parts = line.splitn(3, ' ');
                let version = parse_version(parts.next().unwrap_or_default())?;
                let code = parts.next().unwrap_or_default();
                let status = StatusCode::from_bytes(code.as_bytes())
                    .map_err(|_| CodecError::malformed("status code", code))?;
                let mut response = HttpResponseMessage::new(status);
                response.set_version(version);
                if let Some(reason) = parts.next() {
                    response.set_reason(reason.trim());
                }
                Ok(Head::Response(response))
            }
        }
    }

    fn push_header_line(&mut self, line: &[u8]) -> Result<(), CodecError> {
        let line = String::from_utf8_lossy(line);
        if line.starts_with([' ', '\t']) {
            let Some((_, value)) = self.lines.last_mut() else {
                return Err(CodecError::malformed("header", "continuation before first header"));
            };
            value.push(' ');
            value.push_str(line.trim());
            return Ok(());
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(CodecError::malformed("header", line.to_string()));
        };
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(CodecError::malformed("header name", name));
        }
        self.lines.push((name.to_string(), value.trim().to_string()));
        Ok(())
    }

    fn complete_head(&mut self) -> Result<HttpMessage, CodecError> {
        let Some(mut head) = self.head.take() else {
            return Err(CodecError::malformed("header block", "no start line"));
        };
        let lines = std::mem::take(&mut self.lines);
        let start = match &mut head {
            Head::Request(request) => request as &mut dyn HttpStartMessage,
            Head::Response(response) => response as &mut dyn HttpStartMessage,
        };
        for (name, value) in lines {
            if self.role == Role::Response && name.eq_ignore_ascii_case("set-cookie") {
                match HttpCookie::parse_set_cookie(&value) {
                    Some(cookie) => start.add_cookie(cookie),
                    None => start.headers_mut().add(name, value),
                }
            } else {
                start.headers_mut().add(name, value);
            }
        }

        // The last transfer coding decides the framing. A message that is
        // both chunked and length-delimited is read as chunked and loses the
        // length.
        let codings: Vec<String> = start
            .headers()
            .tokens("Transfer-Encoding")
            .into_iter()
            .map(str::to_ascii_lowercase)
            .collect();
        let chunked = codings.last().is_some_and(|coding| coding == "chunked");
        if !codings.is_empty() && !chunked && self.role == Role::Request {
            return Err(CodecError::malformed("Transfer-Encoding", codings.join(", ")));
        }
        let content_length = if codings.is_empty() {
            let length = content_length(start.headers())?;
            if let Some(length) = length {
                start.headers_mut().set("Content-Length", length.to_string());
            }
            length
        } else {
            if start.headers_mut().remove("Content-Length").is_some() {
                tracing::debug!(codings = ?codings, "Content-Length ignored next to Transfer-Encoding");
            }
            None
        };
        self.encodings = ContentEncodings {
            chunked,
            gzipped: start.headers().has_token("Content-Encoding", "gzip"),
        };

        let body = match &head {
            Head::Request(_) => {
                if chunked {
                    Some(Body::ChunkSize(ConsumeToEol::with_limit(MAX_CHUNK_LINE)))
                } else {
                    content_length
                        .filter(|&n| n > 0)
                        .map(|remaining| Body::Fixed { remaining })
                }
            }
            Head::Response(response) => {
                let head_request = self.request_method.as_ref() == Some(&Method::HEAD);
                if response.status() == StatusCode::SWITCHING_PROTOCOLS {
                    self.request_method = None;
                    self.state = State::Upgraded;
                    return Ok(head.into());
                }
                if !response.status().is_informational() {
                    self.request_method = None;
                }
                if head_request || response.is_bodiless() {
                    None
                } else if chunked {
                    Some(Body::ChunkSize(ConsumeToEol::with_limit(MAX_CHUNK_LINE)))
                } else {
                    match content_length {
                        Some(0) => None,
                        Some(remaining) => Some(Body::Fixed { remaining }),
                        None => Some(Body::UntilClose),
                    }
                }
            }
        };

        let start: &mut dyn HttpStartMessage = match &mut head {
            Head::Request(request) => request,
            Head::Response(response) => response,
        };
        match body {
            Some(body) => {
                start.set_content_length_implicit(!matches!(body, Body::Fixed { .. }));
                start.set_content(Some(HttpContentMessage::with_encodings(
                    GatewayBuffer::from_static(b""),
                    false,
                    self.encodings,
                )));
                self.state = State::Body(body);
            }
            None => self.next_message(),
        }
        Ok(head.into())
    }

    fn content(&self, buffer: GatewayBuffer, complete: bool) -> HttpMessage {
        HttpMessage::Content(HttpContentMessage::with_encodings(buffer, complete, self.encodings))
    }
}

impl From<Head> for HttpMessage {
    fn from(head: Head) -> Self {
        match head {
            Head::Request(request) => HttpMessage::Request(request),
            Head::Response(response) => HttpMessage::Response(response),
        }
    }
}

impl DecodingState for HttpDecoder {
    type Output = HttpMessage;

    fn decode(&mut self, input: &mut GatewayBuffer) -> Result<Option<HttpMessage>, CodecError> {
        loop {
            match &mut self.state {
                State::StartLine(eol) => {
                    let Some((line, _)) = eol.decode(input)? else {
                        return Ok(None);
                    };
                    if !line.has_remaining() {
                        continue;
                    }
                    self.head = Some(self.parse_start_line(line.as_slice())?);
                    self.header_bytes = line.remaining();
                    self.state = State::Headers(self.line_reader());
                }
                State::Headers(eol) => {
                    let Some((line, _)) = eol.decode(input)? else {
                        return Ok(None);
                    };
                    if !line.has_remaining() {
                        return self.complete_head().map(Some);
                    }
                    self.header_bytes += line.remaining();
                    if self.header_bytes > self.max_header_bytes {
                        return Err(CodecError::TooLarge {
                            what: "header block",
                            limit: self.max_header_bytes,
                        });
                    }
                    self.push_header_line(line.as_slice())?;
                }
                State::Body(Body::Fixed { remaining }) => {
                    if !input.has_remaining() {
                        return Ok(None);
                    }
                    let n = (*remaining).min(input.remaining() as u64) as usize;
                    *remaining -= n as u64;
                    let done = *remaining == 0;
                    let piece = input.split_to(n);
                    if done {
                        let message = self.content(piece, true);
                        self.next_message();
                        return Ok(Some(message));
                    }
                    return Ok(Some(self.content(piece, false)));
                }
                State::Body(Body::ChunkSize(eol)) => {
                    let Some((line, _)) = eol.decode(input)? else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(line.as_slice())?;
                    self.state = State::Body(if size == 0 {
                        Body::Trailers(self.line_reader())
                    } else {
                        Body::ChunkData { remaining: size }
                    });
                }
                State::Body(Body::ChunkData { remaining }) => {
                    if !input.has_remaining() {
                        return Ok(None);
                    }
                    let n = (*remaining).min(input.remaining() as u64) as usize;
                    *remaining -= n as u64;
                    if *remaining == 0 {
                        self.state = State::Body(Body::ChunkEnd(ConsumeToEol::with_limit(2)));
                    }
                    let piece = input.split_to(n);
                    return Ok(Some(self.content(piece, false)));
                }
                State::Body(Body::ChunkEnd(eol)) => {
                    let Some((line, _)) = eol.decode(input)? else {
                        return Ok(None);
                    };
                    if line.has_remaining() {
                        return Err(CodecError::malformed("chunk", "data exceeds declared size"));
                    }
                    self.state =
                        State::Body(Body::ChunkSize(ConsumeToEol::with_limit(MAX_CHUNK_LINE)));
                }
                State::Body(Body::Trailers(eol)) => {
                    let Some((line, _)) = eol.decode(input)? else {
                        return Ok(None);
                    };
                    if line.has_remaining() {
                        tracing::trace!(trailer = %String::from_utf8_lossy(line.as_slice()), "ignoring trailer");
                        continue;
                    }
                    let message = self.content(GatewayBuffer::from_static(b""), true);
                    self.next_message();
                    return Ok(Some(message));
                }
                State::Body(Body::UntilClose) => {
                    if !input.has_remaining() {
                        return Ok(None);
                    }
                    let piece = input.split_to(input.remaining());
                    return Ok(Some(self.content(piece, false)));
                }
                State::Upgraded => return Ok(None),
            }
        }
    }

    fn finish_decode(&mut self) -> Result<Option<HttpMessage>, CodecError> {
        match &mut self.state {
            State::StartLine(eol) => match eol.finish_decode()? {
                Some((line, _)) if line.has_remaining() => Err(CodecError::Truncated("start line")),
                _ => Ok(None),
            },
            State::Headers(_) => Err(CodecError::Truncated("header block")),
            State::Body(Body::UntilClose) => {
                let message = self.content(GatewayBuffer::from_static(b""), true);
                self.next_message();
                Ok(Some(message))
            }
            State::Body(_) => Err(CodecError::Truncated("message body")),
            State::Upgraded => Ok(None),
        }
    }
}

/// Every `Content-Length` value, repeated or comma-joined, must agree.
fn content_length(headers: &HeaderTable) -> Result<Option<u64>, CodecError> {
    let mut length = None;
    for raw in headers.get_all("Content-Length").iter().flat_map(|v| v.split(',')) {
        let raw = raw.trim();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CodecError::malformed("Content-Length", raw));
        }
        let parsed = raw
            .parse::<u64>()
            .map_err(|_| CodecError::malformed("Content-Length", raw))?;
        match length {
            Some(seen) if seen != parsed => {
                return Err(CodecError::malformed("Content-Length", "conflicting values"));
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

fn parse_version(raw: &str) -> Result<Version, CodecError> {
    match raw.trim() {
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        other => Err(CodecError::malformed("version", other)),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, CodecError> {
    let digits = line.split(|&b| b == b';').next().unwrap_or_default();
    let digits = std::str::from_utf8(digits)
        .map_err(|_| CodecError::malformed("chunk size", "not UTF-8"))?
        .trim();
    u64::from_str_radix(digits, 16).map_err(|_| CodecError::malformed("chunk size", digits))
}
