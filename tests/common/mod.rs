//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use stream_gateway::config::parse_config;
use stream_gateway::net::{ConnectionTracker, Listener};
use stream_gateway::proxy::{GatewayContext, GatewayServer};
use stream_gateway::Shutdown;

/// Read one request head (requests in these tests carry no body).
async fn read_head(socket: &mut TcpStream) -> Option<String> {
    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        seen.extend_from_slice(&buf[..n]);
    }
    Some(String::from_utf8_lossy(&seen).into_owned())
}

/// Backend that answers every request with the request head it received
/// as the body.
pub async fn start_echo_backend() -> SocketAddr {
    start_backend(|head| {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\
             Connection: close\r\n\r\n{}",
            head.len(),
            head
        )
    })
    .await
}

/// Backend that answers every request with `respond(head)` and closes.
pub async fn start_backend<F>(respond: F) -> SocketAddr
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = Arc::clone(&respond);
            tokio::spawn(async move {
                if let Some(head) = read_head(&mut socket).await {
                    let _ = socket.write_all(respond(&head).as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });
    addr
}

/// Backend that streams `events` as `text/event-stream`, one write per
/// event, then closes. The body is delimited by the close.
pub async fn start_sse_backend(events: Vec<&'static str>, gap: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let events = events.clone();
            tokio::spawn(async move {
                if read_head(&mut socket).await.is_none() {
                    return;
                }
                let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\
                            Connection: close\r\n\r\n";
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for event in events {
                    tokio::time::sleep(gap).await;
                    if socket.write_all(event.as_bytes()).await.is_err() {
                        return;
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// WebSocket backend that echoes every text and binary frame.
pub async fn start_ws_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_text() || message.is_binary() {
                        if ws.send(message).await.is_err() {
                            return;
                        }
                    } else if message.is_close() {
                        return;
                    }
                }
            });
        }
    });
    addr
}

/// A gateway running on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub ctx: Arc<GatewayContext>,
    pub tracker: ConnectionTracker,
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl TestGateway {
    /// Start a gateway from TOML text. The listener binds an ephemeral port
    /// whatever `bind_address` says.
    pub async fn start(config: &str) -> Self {
        let config = parse_config(config).unwrap();
        let ctx = Arc::new(GatewayContext::from_config(&config).unwrap());
        let server = Arc::new(GatewayServer::new(Arc::clone(&ctx)));
        let tracker = server.tracker().clone();

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let listener = Listener::from_tcp(tcp, config.listener.max_connections);

        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();
        let task = tokio::spawn(async move {
            server.run(listener, rx).await.unwrap();
            server.drain(Duration::from_secs(1)).await;
        });

        Self {
            addr,
            ctx,
            tracker,
            shutdown,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

/// Send raw bytes to the gateway and read until the connection closes.
pub async fn raw_exchange(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

pub fn service_config(name: &str, prefix: &str, backend: SocketAddr, path: &str, extra: &str) -> String {
    format!(
        "[[services]]\nname = \"{name}\"\naccept_prefix = \"{prefix}\"\n\
         connect = [\"http://{backend}{path}\"]\n{extra}\n"
    )
}
