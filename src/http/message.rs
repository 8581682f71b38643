//! HTTP message model shared by the decoder, encoder and proxy bridge.
//!
//! # Data Flow
//! ```text
//! wire bytes → HttpDecoder → HttpMessage::Request | Response (head)
//!                          → HttpMessage::Content (zero or more body pieces)
//! ```
//!
//! # Design Decisions
//! - A start message whose body follows carries an incomplete content
//!   placeholder, so `is_complete()` tells the caller whether to expect
//!   content messages.
//! - Content pieces are immutable once built.

use std::collections::BTreeSet;

use http::Version;

use super::cookie::HttpCookie;
use super::headers::{HeaderOrdering, HeaderTable};
use super::request::HttpRequestMessage;
use super::response::HttpResponseMessage;
use crate::buffer::GatewayBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Content,
}

/// Any unit produced by the HTTP decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpMessage {
    Request(HttpRequestMessage),
    Response(HttpResponseMessage),
    Content(HttpContentMessage),
}

impl HttpMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            HttpMessage::Request(_) => MessageKind::Request,
            HttpMessage::Response(_) => MessageKind::Response,
            HttpMessage::Content(_) => MessageKind::Content,
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            HttpMessage::Request(request) => request.is_complete(),
            HttpMessage::Response(response) => response.is_complete(),
            HttpMessage::Content(content) => content.is_complete(),
        }
    }
}

impl From<HttpRequestMessage> for HttpMessage {
    fn from(value: HttpRequestMessage) -> Self {
        HttpMessage::Request(value)
    }
}

impl From<HttpResponseMessage> for HttpMessage {
    fn from(value: HttpResponseMessage) -> Self {
        HttpMessage::Response(value)
    }
}

impl From<HttpContentMessage> for HttpMessage {
    fn from(value: HttpContentMessage) -> Self {
        HttpMessage::Content(value)
    }
}

/// Transfer encodings applied to a content piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentEncodings {
    pub chunked: bool,
    pub gzipped: bool,
}

impl ContentEncodings {
    pub const IDENTITY: ContentEncodings = ContentEncodings {
        chunked: false,
        gzipped: false,
    };

    pub const CHUNKED: ContentEncodings = ContentEncodings {
        chunked: true,
        gzipped: false,
    };
}

/// A piece of message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpContentMessage {
    buffer: GatewayBuffer,
    complete: bool,
    encodings: ContentEncodings,
    injected: bool,
}

impl HttpContentMessage {
    pub fn new(buffer: GatewayBuffer, complete: bool) -> Self {
        Self::with_encodings(buffer, complete, ContentEncodings::IDENTITY)
    }

    pub fn with_encodings(buffer: GatewayBuffer, complete: bool, encodings: ContentEncodings) -> Self {
        Self {
            buffer,
            complete,
            encodings,
            injected: false,
        }
    }

    /// Content produced by the gateway rather than received from a peer.
    pub fn injected(buffer: GatewayBuffer, complete: bool) -> Self {
        Self {
            injected: true,
            ..Self::new(buffer, complete)
        }
    }

    /// Empty content; `complete` marks end of body.
    pub fn empty(complete: bool) -> Self {
        Self::new(GatewayBuffer::from_static(b""), complete)
    }

    pub fn buffer(&self) -> &GatewayBuffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> GatewayBuffer {
        self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.remaining()
    }

    pub fn is_empty(&self) -> bool {
        !self.buffer.has_remaining()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn encodings(&self) -> ContentEncodings {
        self.encodings
    }

    pub fn is_chunked(&self) -> bool {
        self.encodings.chunked
    }

    pub fn is_gzipped(&self) -> bool {
        self.encodings.gzipped
    }

    pub fn is_injected(&self) -> bool {
        self.injected
    }
}

/// Fields shared by requests and responses.
#[derive(Debug, Clone, PartialEq)]
pub struct StartParts {
    pub(crate) version: Version,
    pub(crate) headers: HeaderTable,
    pub(crate) cookies: BTreeSet<HttpCookie>,
    pub(crate) content: Option<HttpContentMessage>,
    pub(crate) content_length_implicit: bool,
}

impl StartParts {
    pub(crate) fn new(ordering: HeaderOrdering) -> Self {
        Self {
            version: Version::HTTP_11,
            headers: HeaderTable::new(ordering),
            cookies: BTreeSet::new(),
            content: None,
            content_length_implicit: false,
        }
    }
}

/// Accessors shared by request and response heads.
pub trait HttpStartMessage {
    fn start(&self) -> &StartParts;
    fn start_mut(&mut self) -> &mut StartParts;

    fn version(&self) -> Version {
        self.start().version
    }

    fn set_version(&mut self, version: Version) {
        self.start_mut().version = version;
    }

    fn headers(&self) -> &HeaderTable {
        &self.start().headers
    }

    fn headers_mut(&mut self) -> &mut HeaderTable {
        &mut self.start_mut().headers
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.start().headers.get(name)
    }

    fn cookies(&self) -> &BTreeSet<HttpCookie> {
        &self.start().cookies
    }

    fn cookies_mut(&mut self) -> &mut BTreeSet<HttpCookie> {
        &mut self.start_mut().cookies
    }

    /// Insert `cookie`, replacing any cookie with the same identity.
    fn add_cookie(&mut self, cookie: HttpCookie) {
        self.start_mut().cookies.replace(cookie);
    }

    fn content(&self) -> Option<&HttpContentMessage> {
        self.start().content.as_ref()
    }

    fn set_content(&mut self, content: Option<HttpContentMessage>) {
        self.start_mut().content = content;
    }

    fn take_content(&mut self) -> Option<HttpContentMessage> {
        self.start_mut().content.take()
    }

    /// The body length is not given by `Content-Length`.
    fn is_content_length_implicit(&self) -> bool {
        self.start().content_length_implicit
    }

    fn set_content_length_implicit(&mut self, implicit: bool) {
        self.start_mut().content_length_implicit = implicit;
    }

    /// No body follows, or the attached body is already complete.
    fn is_complete(&self) -> bool {
        self.start()
            .content
            .as_ref()
            .map_or(true, HttpContentMessage::is_complete)
    }
}

pub(crate) fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};

    #[test]
    fn completeness_follows_content() {
        let mut request = HttpRequestMessage::new(Method::GET, "/");
        assert!(request.is_complete());
        request.set_content(Some(HttpContentMessage::empty(false)));
        assert!(!HttpMessage::from(request.clone()).is_complete());
        request.set_content(Some(HttpContentMessage::new(GatewayBuffer::from_static(b"x"), true)));
        assert!(HttpMessage::from(request).is_complete());
    }

    #[test]
    fn kinds_are_reported() {
        let response = HttpResponseMessage::new(StatusCode::OK);
        assert_eq!(HttpMessage::from(response).kind(), MessageKind::Response);
        let content = HttpContentMessage::injected(GatewayBuffer::from_static(b"x"), true);
        assert!(content.is_injected());
        assert_eq!(HttpMessage::from(content).kind(), MessageKind::Content);
    }
}
