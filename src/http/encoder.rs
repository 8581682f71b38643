//! HTTP/1.x serializer.
//!
//! Identity-framed content is returned as-is, so a body slice received from
//! one peer is written to the other without copying.
//!
//! Framing is settled when the head is written: a body decoded as chunked
//! is re-chunked and loses any `Content-Length`, whatever the headers were
//! edited to in between. A head carrying `Content-Encoding: gzip` over
//! content that is not yet compressed gets its body gzipped here.

use bytes::{BufMut, BytesMut};
use http::Version;

use super::gzip::GzipContentEncoder;
use super::message::{version_str, HttpContentMessage, HttpMessage, HttpStartMessage};
use super::request::HttpRequestMessage;
use super::response::HttpResponseMessage;
use crate::buffer::GatewayBuffer;
use crate::codec::CodecError;

#[derive(Debug, Default)]
pub struct HttpEncoder {
    chunked: bool,
    gzip: Option<GzipContentEncoder>,
}

impl HttpEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, message: HttpMessage) -> Result<GatewayBuffer, CodecError> {
        match message {
            HttpMessage::Request(mut request) => {
                let mut out = BytesMut::new();
                let uri = request.request_uri().to_string();
                out.put_slice(
                    format!("{} {} {}\r\n", request.method(), uri, version_str(request.version()))
                        .as_bytes(),
                );
                let content = self.write_head(&mut request, &mut out, false);
                self.finish_head(out, content)
            }
            HttpMessage::Response(mut response) => {
                let mut out = BytesMut::new();
                out.put_slice(
                    format!(
                        "{} {} {}\r\n",
                        version_str(response.version()),
                        response.status().as_u16(),
                        response.reason()
                    )
                    .as_bytes(),
                );
                let content = self.write_head(&mut response, &mut out, true);
                self.finish_head(out, content)
            }
            HttpMessage::Content(content) => self.encode_content(content),
        }
    }

    pub fn encode_request(&mut self, request: HttpRequestMessage) -> Result<GatewayBuffer, CodecError> {
        self.encode(HttpMessage::Request(request))
    }

    pub fn encode_response(&mut self, response: HttpResponseMessage) -> Result<GatewayBuffer, CodecError> {
        self.encode(HttpMessage::Response(response))
    }

    /// True while body pieces are being chunk-framed.
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    fn write_head(
        &mut self,
        head: &mut dyn HttpStartMessage,
        out: &mut BytesMut,
        set_cookie: bool,
    ) -> Option<HttpContentMessage> {
        let content = head.take_content();
        self.settle_framing(head, content.as_ref());
        if !set_cookie {
            merge_request_cookies(head);
        }
        for (name, value) in head.headers().iter() {
            write_header(out, name, value);
        }
        if set_cookie {
            for cookie in head.cookies() {
                write_header(out, "Set-Cookie", &cookie.to_set_cookie());
            }
        }
        out.put_slice(b"\r\n");
        content
    }

    /// Make the framing headers describe the bytes this encoder will write.
    fn settle_framing(&mut self, head: &mut dyn HttpStartMessage, content: Option<&HttpContentMessage>) {
        let headers = head.headers();
        let compress = content.is_some_and(|c| !c.is_gzipped())
            && headers.has_token("Content-Encoding", "gzip");
        let declared_chunked = headers.has_token("Transfer-Encoding", "chunked");
        self.chunked = declared_chunked
            || content.is_some_and(HttpContentMessage::is_chunked)
            || (compress && head.version() == Version::HTTP_11);
        self.gzip = compress.then(GzipContentEncoder::new);

        if self.chunked && !declared_chunked {
            head.headers_mut().set("Transfer-Encoding", "chunked");
        }
        if self.chunked || compress {
            head.headers_mut().remove("Content-Length");
        }
    }

    fn finish_head(
        &mut self,
        mut out: BytesMut,
        content: Option<HttpContentMessage>,
    ) -> Result<GatewayBuffer, CodecError> {
        if let Some(content) = content {
            if !content.is_empty() || content.is_complete() {
                let body = self.encode_content(content)?;
                out.put_slice(body.as_slice());
            }
        }
        Ok(GatewayBuffer::from_exclusive(out))
    }

    /// Frame one body piece for the wire, compressing it first when the head
    /// asked for gzip.
    pub fn encode_content(&mut self, content: HttpContentMessage) -> Result<GatewayBuffer, CodecError> {
        let content = match self.gzip.as_mut() {
            Some(gzip) => {
                let complete = content.is_complete();
                let compressed = gzip.encode(content)?;
                if complete {
                    self.gzip = None;
                }
                compressed
            }
            None => content,
        };
        if !self.chunked {
            return Ok(content.into_buffer());
        }
        let complete = content.is_complete();
        let data = content.into_buffer();
        let mut out = BytesMut::with_capacity(data.remaining() + 16);
        if data.has_remaining() {
            out.put_slice(format!("{:x}\r\n", data.remaining()).as_bytes());
            out.put_slice(data.as_slice());
            out.put_slice(b"\r\n");
        }
        if complete {
            out.put_slice(b"0\r\n\r\n");
            self.chunked = false;
        }
        Ok(GatewayBuffer::from_exclusive(out))
    }
}

/// Cookies added to a request's cookie set join the `Cookie` header the
/// client sent, which is otherwise forwarded untouched.
fn merge_request_cookies(head: &mut dyn HttpStartMessage) {
    if head.cookies().is_empty() {
        return;
    }
    let added = head
        .cookies()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    let merged = match head.headers_mut().remove("Cookie") {
        Some(existing) if !existing.is_empty() => format!("{}; {added}", existing.join("; ")),
        _ => added,
    };
    head.headers_mut().set("Cookie", merged);
}

fn write_header(out: &mut BytesMut, name: &str, value: &str) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value.as_bytes());
    out.put_slice(b"\r\n");
}
