//! Accept/connect bridging for HTTP/1.x exchanges.
//!
//! # Data Flow
//! ```text
//! accept read → HttpDecoder(requests) → request head
//!     → 404 / 508 answered locally
//!     → connect session (reused while the service matches)
//!     → rewritten head + body pieces → HttpEncoder → connect write
//! connect read → HttpDecoder(responses) → response head
//!     → 101: flush buffered bytes, then copy both ways until either closes
//!     → else rewritten head + body pieces → [EventStreamRelay] → HttpEncoder
//!       (gzip, chunking) → accept write
//! ```
//!
//! # Design Decisions
//! - Body pieces are forwarded as they arrive, so event streams are never
//!   buffered whole.
//! - A connect failure answers 504, a stalled request body 408; any other
//!   failure before the response head is written answers 502. Later
//!   failures close the pair.
//! - `Expect: 100-continue` is answered here and not forwarded.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use http::{StatusCode, Version};
use tokio::io::{AsyncRead, AsyncWrite};

use super::connector::Connector;
use super::event_stream::{self, EventStreamRelay};
use super::headers::{self, ForwardedHop};
use super::registry::BridgeState;
use super::rewrite;
use super::service::{ConnectTarget, Service};
use super::session::Session;
use super::{GatewayContext, ProxyError};
use crate::buffer::{BufferFlags, GatewayBuffer};
use crate::codec::DecodingState;
use crate::http::{
    accepts_gzip, upgrade_protocol, HttpDecoder, HttpEncoder, HttpMessage, HttpRequestMessage,
    HttpResponseMessage, HttpStartMessage, X_REQUEST_ID,
};
use crate::observability::metrics;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Serve one accepted connection until either side closes.
///
/// `initial` holds bytes already read from the stream (for example while
/// sniffing for TLS).
pub async fn serve_accept<C, S>(
    ctx: &GatewayContext,
    connector: &C,
    accept: Session<S>,
    peer: SocketAddr,
    initial: GatewayBuffer,
) -> Result<(), ProxyError>
where
    C: Connector,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let guard = ctx
        .registry
        .register(accept.id(), peer, accept.close_handle().clone());
    let mut bridge = Bridge {
        ctx,
        connector,
        peer,
        decoder: HttpDecoder::requests().with_max_header_bytes(ctx.max_header_bytes),
        encoder: HttpEncoder::new(),
        pending: initial,
        accept,
        upstream: None,
    };

    let result = bridge.run().await;

    if let Err(e) = ctx.registry.transition(guard.accept(), BridgeState::Closing) {
        tracing::debug!(session_id = %guard.accept(), error = %e, "Pair already closing");
    }
    let immediate = result.is_err();
    bridge.accept.close(immediate).await;
    if let Some(mut upstream) = bridge.upstream.take() {
        upstream.session.close(immediate).await;
    }
    drop(guard);
    result
}

struct Upstream<T> {
    session: Session<T>,
    decoder: HttpDecoder,
    encoder: HttpEncoder,
    pending: GatewayBuffer,
    service: Arc<Service>,
    target: ConnectTarget,
}

enum Next {
    KeepAlive,
    Close,
}

struct Bridge<'a, C: Connector, S> {
    ctx: &'a GatewayContext,
    connector: &'a C,
    peer: SocketAddr,
    accept: Session<S>,
    decoder: HttpDecoder,
    encoder: HttpEncoder,
    pending: GatewayBuffer,
    upstream: Option<Upstream<C::Stream>>,
}

impl<C, S> Bridge<'_, C, S>
where
    C: Connector,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn run(&mut self) -> Result<(), ProxyError> {
        loop {
            let read = read_message(&mut self.accept, &mut self.decoder, &mut self.pending);
            let message = match tokio::time::timeout(self.ctx.idle_timeout, read).await {
                Err(_) => {
                    tracing::debug!(session = %self.accept.id(), "Idle accept connection closed");
                    return Ok(());
                }
                Ok(Ok(Some(message))) => message,
                Ok(Ok(None)) => return Ok(()),
                Ok(Err(ProxyError::Codec(e))) => {
                    tracing::warn!(peer = %self.peer, error = %e, "Malformed request");
                    self.respond_local(StatusCode::BAD_REQUEST, "malformed request", true)
                        .await;
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e),
            };
            let HttpMessage::Request(request) = message else {
                return Err(ProxyError::UnexpectedMessage(message.kind()));
            };
            match self.exchange(request).await? {
                Next::KeepAlive => continue,
                Next::Close => return Ok(()),
            }
        }
    }

    async fn exchange(&mut self, mut request: HttpRequestMessage) -> Result<Next, ProxyError> {
        let started = Instant::now();
        let request_id = headers::ensure_request_id(request.headers_mut());
        let path = request.path().to_string();
        let client_close = headers::wants_close(request.headers(), request.version());
        tracing::debug!(
            request_id = %request_id,
            method = %request.method(),
            path = %path,
            principal = ?self.accept.principal(),
            "Request received"
        );

        let Some(service) = self.ctx.services.select(&path) else {
            tracing::warn!(request_id = %request_id, path = %path, "No service matched");
            metrics::record_request("none", 404, started);
            let close = client_close || !request.is_complete();
            self.respond_local(StatusCode::NOT_FOUND, "no service", close).await;
            return Ok(if close { Next::Close } else { Next::KeepAlive });
        };

        if self.ctx.loops.is_loop(request.headers()) {
            tracing::warn!(
                request_id = %request_id,
                service = service.name(),
                via = ?request.headers().get_all("Via"),
                "Forwarding loop detected"
            );
            metrics::loop_detected(service.name());
            metrics::record_request(service.name(), 508, started);
            let close = client_close || !request.is_complete();
            self.respond_local(StatusCode::LOOP_DETECTED, "loop detected", close)
                .await;
            return Ok(if close { Next::Close } else { Next::KeepAlive });
        }

        if let Err(e) = self.ensure_upstream(&service).await {
            tracing::warn!(request_id = %request_id, service = service.name(), error = %e, "Connect failed");
            metrics::record_request(service.name(), 504, started);
            self.respond_local(StatusCode::GATEWAY_TIMEOUT, "connect failed", true)
                .await;
            return Ok(Next::Close);
        }

        let upgrade = upgrade_protocol(&request).map(str::to_string);
        let original_host = request.header("Host").map(str::to_string);
        let method = request.method().clone();
        let client_version = request.version();
        let client_gzip = accepts_gzip(request.headers());

        if let Err(e) = self.forward_request(request, &service, upgrade.as_deref(), original_host.as_deref()).await {
            tracing::warn!(request_id = %request_id, service = service.name(), error = %e, "Forwarding request failed");
            let (status, body) = match e {
                ProxyError::Timeout(_) => (StatusCode::REQUEST_TIMEOUT, "request timeout"),
                _ => (StatusCode::BAD_GATEWAY, "bad gateway"),
            };
            metrics::record_request(service.name(), status.as_u16(), started);
            self.respond_local(status, body, true).await;
            return Ok(Next::Close);
        }

        let mut response = match self.read_response().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(request_id = %request_id, service = service.name(), error = %e, "Reading response failed");
                metrics::record_request(service.name(), 502, started);
                self.respond_local(StatusCode::BAD_GATEWAY, "bad gateway", true).await;
                return Ok(Next::Close);
            }
        };

        let status = response.status();
        let upstream_close = headers::wants_close(response.headers(), response.version());
        let until_close = response.is_content_length_implicit()
            && !response.headers().has_token("Transfer-Encoding", "chunked");
        let switching = status == StatusCode::SWITCHING_PROTOCOLS;
        let response_protocol = response.header("Upgrade").map(str::to_string);

        headers::strip_hop_by_hop(response.headers_mut(), service.hop_by_hop());
        if let Some(location) = response.header("Location").map(str::to_string) {
            if let Some(rewritten) =
                rewrite::rewrite_location(&location, &service, original_host.as_deref())
            {
                tracing::trace!(request_id = %request_id, from = %location, to = %rewritten, "Location rewritten");
                response.headers_mut().set("Location", rewritten);
            }
        }
        rewrite::rewrite_cookies(response.cookies_mut(), &service);
        let directive = service.cache_control().resolve(&path);
        headers::apply_cache_control(response.headers_mut(), directive.as_deref());
        if !response.headers().contains(X_REQUEST_ID) {
            response.headers_mut().set(X_REQUEST_ID, request_id.as_str());
        }

        let complete = response.is_complete();
        let mut relay = (!switching && !complete && event_stream::is_event_stream(response.headers()))
            .then(|| EventStreamRelay::new(service.sse_padding()));
        let both_http11 = client_version == Version::HTTP_11 && response.version() == Version::HTTP_11;
        // Re-framed records no longer add up to the backend's length.
        let mut length_dropped = false;
        if relay.is_some() && response.headers_mut().remove("Content-Length").is_some() {
            if both_http11 {
                response.headers_mut().set("Transfer-Encoding", "chunked");
            } else {
                length_dropped = true;
            }
        }
        if service.gzip()
            && client_gzip
            && both_http11
            && !complete
            && !switching
            && !response.headers().contains("Content-Encoding")
        {
            response.headers_mut().set("Content-Encoding", "gzip");
            response.headers_mut().add("Vary", "Accept-Encoding");
        }

        let keep_alive =
            service.keep_alive() && !client_close && !until_close && !switching && !length_dropped;
        if switching {
            if let Some(protocol) = response_protocol.or(upgrade) {
                headers::restore_upgrade(response.headers_mut(), &protocol);
            }
        } else if !keep_alive {
            response.headers_mut().set("Connection", "close");
        }

        let head = self.encoder.encode(HttpMessage::Response(response))?;
        self.accept.write(head).await?;
        if let Some(opening) = relay.as_mut().map(EventStreamRelay::opening).transpose()?.flatten() {
            let padding = self.encoder.encode_content(opening)?;
            self.accept.write(padding).await?;
        }
        self.accept.flush().await?;
        metrics::record_request(service.name(), status.as_u16(), started);
        tracing::info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            service = service.name(),
            status = status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Request forwarded"
        );

        if switching {
            self.forward_upgraded(&request_id).await?;
            return Ok(Next::Close);
        }
        if !complete {
            self.forward_response_body(relay.as_mut()).await?;
        }
        if let Some(relay) = &relay {
            tracing::debug!(request_id = %request_id, records = relay.records(), "Event stream finished");
        }

        if upstream_close || until_close || !service.keep_alive() {
            self.release_upstream().await?;
        }
        Ok(if keep_alive { Next::KeepAlive } else { Next::Close })
    }

    /// Make sure the connect side is open to `service`, replacing a
    /// connection left over from a different service.
    async fn ensure_upstream(&mut self, service: &Arc<Service>) -> Result<(), ProxyError> {
        if let Some(upstream) = &self.upstream {
            if Arc::ptr_eq(&upstream.service, service) && !upstream.session.is_closed() {
                return Ok(());
            }
            self.release_upstream().await?;
        }

        let target = service.next_target().clone();
        let connect = self.connector.connect(&target);
        let stream = match tokio::time::timeout(self.ctx.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ProxyError::Connect {
                    target: target.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(ProxyError::ConnectTimeout {
                    target: target.to_string(),
                })
            }
        };
        let session = Session::connect(stream);
        self.ctx.registry.attach(
            self.accept.id(),
            session.id(),
            session.close_handle().clone(),
            service.name(),
        )?;
        tracing::debug!(
            accept = %self.accept.id(),
            connect = %session.id(),
            target = %target,
            "Connect session established"
        );
        self.upstream = Some(Upstream {
            session,
            decoder: HttpDecoder::responses().with_max_header_bytes(self.ctx.max_header_bytes),
            encoder: HttpEncoder::new(),
            pending: GatewayBuffer::from_static(b""),
            service: Arc::clone(service),
            target,
        });
        Ok(())
    }

    /// Unlink and close the connect side without touching the client.
    async fn release_upstream(&mut self) -> Result<(), ProxyError> {
        if let Some(mut upstream) = self.upstream.take() {
            self.ctx.registry.detach(self.accept.id())?;
            upstream.session.close(false).await;
        }
        Ok(())
    }

    async fn forward_request(
        &mut self,
        mut request: HttpRequestMessage,
        service: &Service,
        upgrade: Option<&str>,
        original_host: Option<&str>,
    ) -> Result<(), ProxyError> {
        let upstream = self.upstream.as_mut().ok_or(ProxyError::PeerClosed)?;

        let expects_continue = request.headers().has_token("Expect", "100-continue");
        if expects_continue {
            request.headers_mut().remove("Expect");
        }
        let client_version = request.version();
        headers::strip_hop_by_hop(request.headers_mut(), service.hop_by_hop());
        if let Some(protocol) = upgrade {
            headers::restore_upgrade(request.headers_mut(), protocol);
        } else if !service.keep_alive() {
            request.headers_mut().set("Connection", "close");
        }
        headers::apply_forwarded(
            request.headers_mut(),
            service.forwarded(),
            ForwardedHop {
                client: self.peer,
                host: original_host,
                proto: "http",
            },
        );
        self.ctx.loops.stamp(request.headers_mut());
        request
            .headers_mut()
            .set("Host", upstream.target.authority());
        let uri = service.connect_uri(request.request_uri(), &upstream.target);
        request.set_request_uri(uri);

        upstream.decoder.expect_response_to(request.method());
        let complete = request.is_complete();
        let head = upstream.encoder.encode(HttpMessage::Request(request))?;
        upstream.session.write(head).await?;

        if !complete {
            upstream.session.flush().await?;
            if expects_continue && client_version == Version::HTTP_11 {
                self.accept.write(GatewayBuffer::from_static(CONTINUE)).await?;
                self.accept.flush().await?;
            }
            loop {
                let read = read_message(&mut self.accept, &mut self.decoder, &mut self.pending);
                let message = match tokio::time::timeout(self.ctx.idle_timeout, read).await {
                    Ok(message) => message?,
                    Err(_) => return Err(ProxyError::Timeout("request body")),
                };
                match message {
                    Some(HttpMessage::Content(content)) => {
                        let done = content.is_complete();
                        let piece = upstream.encoder.encode_content(content)?;
                        upstream.session.write(piece).await?;
                        if done {
                            break;
                        }
                    }
                    Some(other) => return Err(ProxyError::UnexpectedMessage(other.kind())),
                    None => return Err(ProxyError::PeerClosed),
                }
            }
        }
        upstream.session.flush().await?;
        Ok(())
    }

    /// Next final response head. Interim 1xx responses other than 100 and
    /// 101 are passed to the client as they arrive; 100 was already answered
    /// by the gateway.
    async fn read_response(&mut self) -> Result<HttpResponseMessage, ProxyError> {
        let upstream = self.upstream.as_mut().ok_or(ProxyError::PeerClosed)?;
        loop {
            let message = read_message(
                &mut upstream.session,
                &mut upstream.decoder,
                &mut upstream.pending,
            )
            .await?;
            match message {
                Some(HttpMessage::Response(response)) if response.status() == StatusCode::CONTINUE => {
                    tracing::trace!(target = %upstream.target, "Backend 100 Continue dropped");
                }
                Some(HttpMessage::Response(response))
                    if response.status().is_informational()
                        && response.status() != StatusCode::SWITCHING_PROTOCOLS =>
                {
                    let mut interim = response;
                    headers::strip_hop_by_hop(interim.headers_mut(), upstream.service.hop_by_hop());
                    let head = self.encoder.encode(HttpMessage::Response(interim))?;
                    self.accept.write(head).await?;
                }
                Some(HttpMessage::Response(response)) => return Ok(response),
                Some(other) => return Err(ProxyError::UnexpectedMessage(other.kind())),
                None => return Err(ProxyError::PeerClosed),
            }
        }
    }

    /// Copy body pieces to the client as they arrive, through `relay` for
    /// event streams.
    async fn forward_response_body(
        &mut self,
        mut relay: Option<&mut EventStreamRelay>,
    ) -> Result<(), ProxyError> {
        let upstream = self.upstream.as_mut().ok_or(ProxyError::PeerClosed)?;
        loop {
            let message = read_message(
                &mut upstream.session,
                &mut upstream.decoder,
                &mut upstream.pending,
            )
            .await?;
            match message {
                Some(HttpMessage::Content(content)) => {
                    let done = content.is_complete();
                    let pieces = match relay.as_deref_mut() {
                        Some(relay) => relay.relay(content)?,
                        None => vec![content],
                    };
                    for piece in pieces {
                        let wire = self.encoder.encode_content(piece)?;
                        if wire.has_remaining() {
                            self.accept.write(wire).await?;
                        }
                    }
                    // Event streams depend on each piece reaching the client now.
                    self.accept.flush().await?;
                    if done {
                        return Ok(());
                    }
                }
                Some(other) => return Err(ProxyError::UnexpectedMessage(other.kind())),
                None => return Err(ProxyError::PeerClosed),
            }
        }
    }

    /// Hand both streams over to raw forwarding after a 101.
    async fn forward_upgraded(&mut self, request_id: &str) -> Result<(), ProxyError> {
        let accept_id = self.accept.id();
        let upstream = self.upstream.as_mut().ok_or(ProxyError::PeerClosed)?;
        self.ctx.registry.transition(accept_id, BridgeState::Upgrading)?;
        metrics::upgrade(upstream.service.name());

        let from_backend = std::mem::replace(&mut upstream.pending, GatewayBuffer::from_static(b""));
        let from_client = std::mem::replace(&mut self.pending, GatewayBuffer::from_static(b""));
        tracing::debug!(
            request_id,
            buffered_from_backend = from_backend.remaining(),
            buffered_from_client = from_client.remaining(),
            "Switching to raw forwarding"
        );
        self.accept.write(from_backend).await?;
        self.accept.flush().await?;
        upstream.session.write(from_client).await?;
        upstream.session.flush().await?;

        let closed = self.accept.close_handle().closed();
        tokio::select! {
            copied = tokio::io::copy_bidirectional(self.accept.stream_mut(), upstream.session.stream_mut()) => {
                match copied {
                    Ok((to_backend, to_client)) => {
                        tracing::debug!(request_id, to_backend, to_client, "Raw forwarding finished");
                    }
                    Err(e) => {
                        tracing::debug!(request_id, error = %e, "Raw forwarding ended with error");
                        return Err(e.into());
                    }
                }
            }
            mode = closed => {
                tracing::debug!(request_id, ?mode, "Raw forwarding closed");
            }
        }
        Ok(())
    }

    /// Write a gateway-generated response. Write errors are ignored: the
    /// client may already be gone and the pair is closing either way.
    async fn respond_local(&mut self, status: StatusCode, body: &str, close: bool) {
        let mut response = HttpResponseMessage::error(status, body);
        self.ctx.loops.stamp(response.headers_mut());
        if close {
            response.headers_mut().set("Connection", "close");
        }
        let head = match self.encoder.encode(HttpMessage::Response(response)) {
            Ok(head) => head,
            Err(e) => {
                tracing::debug!(error = %e, "Local response not encoded");
                return;
            }
        };
        if self.accept.write(head).await.is_ok() {
            let _ = self.accept.flush().await;
        }
    }
}

/// Decode the next message, reading from `session` as needed. `None` once
/// the stream has ended between messages.
async fn read_message<S>(
    session: &mut Session<S>,
    decoder: &mut HttpDecoder,
    pending: &mut GatewayBuffer,
) -> Result<Option<HttpMessage>, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        if let Some(message) = decoder.decode(pending)? {
            return Ok(Some(message));
        }
        match session.read().await? {
            Some(chunk) => append(pending, chunk),
            None => return Ok(decoder.finish_decode()?),
        }
    }
}

fn append(pending: &mut GatewayBuffer, chunk: GatewayBuffer) {
    if !pending.has_remaining() {
        *pending = chunk;
        return;
    }
    let mut merged = BytesMut::with_capacity(pending.remaining() + chunk.remaining());
    merged.extend_from_slice(pending.as_slice());
    merged.extend_from_slice(chunk.as_slice());
    *pending = GatewayBuffer::wrap(merged.freeze(), BufferFlags::SHARED);
}
