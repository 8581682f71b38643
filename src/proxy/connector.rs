//! Establishing connect-side streams.

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::service::ConnectTarget;

/// Opens the backend stream of a pair.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect<'a>(&'a self, target: &'a ConnectTarget) -> BoxFuture<'a, std::io::Result<Self::Stream>>;
}

/// Plain TCP to the target's authority.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect<'a>(&'a self, target: &'a ConnectTarget) -> BoxFuture<'a, std::io::Result<TcpStream>> {
        Box::pin(async move {
            let stream = TcpStream::connect(target.authority()).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        })
    }
}
