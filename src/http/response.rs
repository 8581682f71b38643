//! HTTP response head.

use http::StatusCode;

use super::headers::HeaderOrdering;
use super::message::{HttpStartMessage, StartParts};

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponseMessage {
    status: StatusCode,
    reason: Option<String>,
    start: StartParts,
}

impl HttpResponseMessage {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            start: StartParts::new(HeaderOrdering::CaseInsensitive),
        }
    }

    /// A complete response with a short plain-text body, used for gateway
    /// generated errors.
    pub fn error(status: StatusCode, body: &str) -> Self {
        let mut response = Self::new(status);
        response.headers_mut().set("Content-Type", "text/plain");
        response.headers_mut().set("Content-Length", body.len().to_string());
        response.set_content(Some(super::HttpContentMessage::injected(
            crate::buffer::GatewayBuffer::copy_from_slice(body.as_bytes()),
            true,
        )));
        response
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Reason phrase as received, or the canonical one.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
    }

    /// 1xx, 204 and 304 never carry a body.
    pub fn is_bodiless(&self) -> bool {
        self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
    }
}

impl HttpStartMessage for HttpResponseMessage {
    fn start(&self) -> &StartParts {
        &self.start
    }

    fn start_mut(&mut self) -> &mut StartParts {
        &mut self.start
    }
}
