//! End-to-end tests: client → gateway → mock backend.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use stream_gateway::buffer::{BufferFlags, GatewayBuffer};
use stream_gateway::sse::SseDecoder;

mod common;

use common::{raw_exchange, service_config, TestGateway};

#[tokio::test]
async fn proxies_request_to_connect_path() {
    let backend = common::start_echo_backend().await;
    let gateway = TestGateway::start(&service_config(
        "api",
        "/api",
        backend,
        "/backend",
        "forwarded = \"inject\"",
    ))
    .await;

    let response = reqwest::get(gateway.url("/api/items?x=1")).await.unwrap();
    assert_eq!(response.status(), 200);
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap();
    // Existing header names keep the client's casing.
    let seen = response.text().await.unwrap().to_ascii_lowercase();

    assert!(seen.starts_with("get /backend/items?x=1 http/1.1\r\n"), "{seen}");
    assert!(seen.contains(&format!("host: {backend}\r\n")), "{seen}");
    assert!(seen.contains(&format!("via: {}\r\n", gateway.ctx.loops.token())), "{seen}");
    assert!(seen.contains(&format!("x-request-id: {request_id}\r\n")), "{seen}");
    assert!(seen.contains("forwarded: for=127.0.0.1;proto=http"), "{seen}");
    assert!(seen.contains("x-forwarded-for: 127.0.0.1\r\n"), "{seen}");

    gateway.stop().await;
}

#[tokio::test]
async fn client_request_id_is_kept() {
    let backend = common::start_echo_backend().await;
    let gateway = TestGateway::start(&service_config("api", "/api", backend, "/", "")).await;

    let response = reqwest::Client::new()
        .get(gateway.url("/api"))
        .header("X-Request-Id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");
    assert!(response.text().await.unwrap().to_ascii_lowercase().contains("x-request-id: req-42\r\n"));

    gateway.stop().await;
}

#[tokio::test]
async fn hop_by_hop_headers_do_not_cross() {
    let backend = common::start_echo_backend().await;
    let gateway = TestGateway::start(&service_config(
        "api",
        "/api",
        backend,
        "/",
        "hop_by_hop = [\"X-Internal\"]",
    ))
    .await;

    let response = raw_exchange(
        gateway.addr,
        "GET /api/x HTTP/1.1\r\nHost: gw\r\nConnection: close, X-Secret, Keep-Alive\r\n\
         Keep-Alive: timeout=5\r\nX-Secret: 1\r\nX-Internal: 2\r\nAccept: */*\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    let body = response.split_once("\r\n\r\n").unwrap().1;
    assert!(body.starts_with("GET /x HTTP/1.1\r\n"), "{body}");
    assert!(body.contains("Accept: */*\r\n"));
    for name in ["X-Secret", "Keep-Alive", "X-Internal", "Connection"] {
        assert!(!body.contains(name), "{name} forwarded: {body}");
    }

    gateway.stop().await;
}

#[tokio::test]
async fn loop_is_answered_with_508() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let backend = common::start_backend(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_string()
    })
    .await;
    let gateway = TestGateway::start(&service_config("api", "/api", backend, "/", "")).await;

    let request = format!(
        "GET /api HTTP/1.1\r\nHost: gw\r\nVia: 1.0 edge, {}\r\nConnection: close\r\n\r\n",
        gateway.ctx.loops.token()
    );
    let response = raw_exchange(gateway.addr, &request).await;

    assert!(response.starts_with("HTTP/1.1 508 Loop Detected\r\n"), "{response}");
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    gateway.stop().await;
}

#[tokio::test]
async fn unknown_prefix_is_404() {
    let backend = common::start_echo_backend().await;
    let gateway = TestGateway::start(&service_config("api", "/api", backend, "/", "")).await;

    let response = reqwest::get(gateway.url("/apix")).await.unwrap();
    assert_eq!(response.status(), 404);

    gateway.stop().await;
}

#[tokio::test]
async fn unreachable_backend_is_504() {
    // Bind then drop to get a port nothing listens on.
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let gateway = TestGateway::start(&service_config("api", "/api", closed, "/", "")).await;

    let response = reqwest::get(gateway.url("/api")).await.unwrap();
    assert_eq!(response.status(), 504);

    gateway.stop().await;
}

#[tokio::test]
async fn redirects_and_cookies_are_rewritten() {
    let backend = common::start_backend(move |_| {
        "HTTP/1.1 302 Found\r\nLocation: /app/login\r\n\
         Set-Cookie: sid=1; Domain=backend.internal; Path=/app\r\nContent-Length: 0\r\n\r\n"
            .to_string()
    })
    .await;
    let gateway = TestGateway::start(&service_config(
        "web",
        "/web",
        backend,
        "/app",
        "[services.cookie_domain_rewrites]\n\"backend.internal\" = \"gw.example\"\n\
         [services.cookie_path_rewrites]\n\"/app\" = \"/web\"\n",
    ))
    .await;

    let response = raw_exchange(
        gateway.addr,
        "GET /web/home HTTP/1.1\r\nHost: gw\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 302 Found\r\n"), "{response}");
    assert!(response.contains("Location: /web/login\r\n"), "{response}");
    let cookie = response
        .lines()
        .find(|l| l.starts_with("Set-Cookie:"))
        .unwrap();
    assert!(cookie.contains("sid=1"), "{cookie}");
    assert!(cookie.contains("Domain=gw.example"), "{cookie}");
    assert!(cookie.contains("Path=/web"), "{cookie}");

    gateway.stop().await;
}

#[tokio::test]
async fn keep_alive_serves_successive_requests() {
    let backend = common::start_echo_backend().await;
    let gateway = TestGateway::start(&service_config("api", "/api", backend, "/", "")).await;

    let client = reqwest::Client::new();
    for path in ["/api/one", "/api/two", "/api/three"] {
        let body = client
            .get(gateway.url(path))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        let expected = format!("GET {} HTTP/1.1\r\n", path.trim_start_matches("/api"));
        assert!(body.starts_with(&expected), "{body}");
    }

    gateway.stop().await;
}

#[tokio::test]
async fn event_stream_is_forwarded_as_it_arrives() {
    let backend = common::start_sse_backend(
        vec![
            "event: tick\ndata: one\n\n",
            "id: 2\ndata: two\ndata: lines\n\n",
            ": keepalive\n\n",
        ],
        Duration::from_millis(20),
    )
    .await;
    let gateway = TestGateway::start(&service_config(
        "events",
        "/events",
        backend,
        "/sse",
        "[[services.cache_control]]\npattern = \"/events/**\"\ndirective = \"no-cache\"\n",
    ))
    .await;

    let mut response = reqwest::get(gateway.url("/events/feed")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");

    let mut text = Vec::new();
    let mut chunks = 0;
    while let Some(chunk) = response.chunk().await.unwrap() {
        chunks += 1;
        text.extend_from_slice(&chunk);
    }
    assert!(chunks >= 1);

    let mut input = GatewayBuffer::wrap(Bytes::from(text), BufferFlags::SHARED);
    let messages = SseDecoder::new().decode_all(&mut input).unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].event_type(), Some("tick"));
    assert_eq!(messages[0].data_buffer().unwrap().as_slice(), b"one");
    assert_eq!(messages[1].id(), Some("2"));
    assert_eq!(messages[1].data_buffer().unwrap().as_slice(), b"two\nlines");
    assert_eq!(messages[2].comment(), Some("keepalive"));

    gateway.stop().await;
}

const FEED: &str = "GET /events/feed HTTP/1.1\r\nHost: gw\r\nConnection: close\r\n\r\n";

async fn crlf_event_backend() -> std::net::SocketAddr {
    common::start_sse_backend(
        vec![
            "event: tick\r\ndata: one\r\n\r\n",
            "data: two\r\ndata: lines\r\n\r\n",
            ": keepalive\r\n\r\n",
        ],
        Duration::from_millis(10),
    )
    .await
}

fn split_response(raw: &[u8]) -> (String, &[u8]) {
    let end = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    (String::from_utf8_lossy(&raw[..end]).into_owned(), &raw[end..])
}

fn dechunk(mut body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let line_end = body.windows(2).position(|w| w == b"\r\n").unwrap();
        let size = usize::from_str_radix(std::str::from_utf8(&body[..line_end]).unwrap(), 16).unwrap();
        body = &body[line_end + 2..];
        if size == 0 {
            return out;
        }
        out.extend_from_slice(&body[..size]);
        body = &body[size + 2..];
    }
}

async fn raw_bytes(addr: std::net::SocketAddr, request: &str) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

#[tokio::test]
async fn event_stream_is_reframed_on_the_wire() {
    let backend = crlf_event_backend().await;
    let gateway = TestGateway::start(&service_config("events", "/events", backend, "/sse", "")).await;

    let raw = raw_exchange(gateway.addr, FEED).await;
    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(!head.to_ascii_lowercase().contains("content-encoding"));
    assert_eq!(body, "event:tick\ndata:one\n\ndata:two\ndata:lines\n\n:keepalive\n\n");

    gateway.stop().await;
}

#[tokio::test]
async fn event_stream_opens_with_padding_when_configured() {
    let backend = crlf_event_backend().await;
    let gateway = TestGateway::start(&service_config(
        "events",
        "/events",
        backend,
        "/sse",
        "sse_padding = true",
    ))
    .await;

    let raw = raw_exchange(gateway.addr, FEED).await;
    let (_, body) = raw.split_once("\r\n\r\n").unwrap();
    let (padding, records) = body.split_once("\n\n").unwrap();
    assert!(padding.starts_with(':'));
    assert!(padding.len() >= stream_gateway::sse::message::PADDING_LENGTH);
    assert!(padding[1..].bytes().all(|b| b == b' '));
    assert_eq!(records, "event:tick\ndata:one\n\ndata:two\ndata:lines\n\n:keepalive\n\n");

    gateway.stop().await;
}

#[tokio::test]
async fn event_stream_is_gzipped_for_accepting_clients() {
    let backend = crlf_event_backend().await;
    let gateway = TestGateway::start(&service_config(
        "events",
        "/events",
        backend,
        "/sse",
        "gzip = true",
    ))
    .await;

    let request = "GET /events/feed HTTP/1.1\r\nHost: gw\r\nAccept-Encoding: gzip, br\r\n\
                   Connection: close\r\n\r\n";
    let raw = raw_bytes(gateway.addr, request).await;
    let (head, body) = split_response(&raw);
    assert!(head.contains("Content-Encoding: gzip\r\n"), "{head}");
    assert!(head.contains("Transfer-Encoding: chunked\r\n"), "{head}");
    assert!(head.contains("Vary: Accept-Encoding\r\n"), "{head}");

    let mut plain = String::new();
    flate2::read::GzDecoder::new(dechunk(body).as_slice())
        .read_to_string(&mut plain)
        .unwrap();
    assert_eq!(plain, "event:tick\ndata:one\n\ndata:two\ndata:lines\n\n:keepalive\n\n");

    // Without Accept-Encoding the same service answers in identity.
    let raw = raw_exchange(gateway.addr, FEED).await;
    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    assert!(!head.contains("Content-Encoding"), "{head}");
    assert_eq!(body, "event:tick\ndata:one\n\ndata:two\ndata:lines\n\n:keepalive\n\n");

    gateway.stop().await;
}

#[tokio::test]
async fn websocket_upgrade_is_bridged() {
    let backend = common::start_ws_echo_backend().await;
    let gateway = TestGateway::start(&service_config("live", "/live", backend, "/ws", "")).await;

    let url = format!("ws://{}/live/chat", gateway.addr);
    let (mut ws, response) = tokio_tungstenite::connect_async(url).await.unwrap();
    assert_eq!(response.status(), 101);

    ws.send(Message::Text("hello".into())).await.unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    assert_eq!(echoed.to_text().unwrap(), "hello");

    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    assert_eq!(&echoed.into_data()[..], &[1u8, 2, 3]);

    ws.close(None).await.unwrap();
    gateway.stop().await;
}

#[tokio::test]
async fn shutdown_waits_for_open_connections() {
    let backend = common::start_echo_backend().await;
    let gateway = TestGateway::start(&service_config("api", "/api", backend, "/", "")).await;

    let idle = TcpStream::connect(gateway.addr).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while gateway.tracker.active_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let tracker = gateway.tracker.clone();
    drop(idle);
    gateway.stop().await;
    assert_eq!(tracker.active_count(), 0);
}

/// A TLS 1.0 ClientHello offering both RSA RC4 suites.
fn legacy_client_hello() -> Vec<u8> {
    let mut body = vec![3, 1];
    body.extend_from_slice(&[7u8; 32]);
    body.push(0);
    body.extend_from_slice(&[0, 4, 0x00, 0x04, 0x00, 0x05]);
    body.extend_from_slice(&[1, 0]);
    body.extend_from_slice(&[0, 0]);

    let mut handshake = vec![1];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = vec![22, 3, 1];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

#[tokio::test]
async fn tls_is_passed_through_untouched() {
    let tls_backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tls_addr = tls_backend.local_addr().unwrap();
    let hello = legacy_client_hello();
    let expected = hello.clone();
    let received = tokio::spawn(async move {
        let (mut socket, _) = tls_backend.accept().await.unwrap();
        let mut seen = vec![0u8; expected.len()];
        socket.read_exact(&mut seen).await.unwrap();
        socket.write_all(b"server-hello").await.unwrap();
        seen
    });

    let http_backend = common::start_echo_backend().await;
    let config = format!(
        "[listener.tls_passthrough]\ntarget = \"{tls_addr}\"\n\n{}",
        service_config("api", "/api", http_backend, "/", "")
    );
    let gateway = TestGateway::start(&config).await;

    // Split the hello so the sniffer has to wait for the rest.
    let mut client = TcpStream::connect(gateway.addr).await.unwrap();
    client.write_all(&hello[..7]).await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write_all(&hello[7..]).await.unwrap();

    assert_eq!(received.await.unwrap(), hello);
    let mut reply = [0u8; 12];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"server-hello");

    // Plain HTTP on the same listener still reaches the HTTP bridge.
    let response = raw_exchange(
        gateway.addr,
        "GET /api/plain HTTP/1.1\r\nHost: gw\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");

    drop(client);
    gateway.stop().await;
}
