//! Point-to-point network transport used by the uploader

use std::io;

use tokio::io::{AsyncBufRead, AsyncWrite, BufStream};
use tokio::net::TcpStream;
use tracing::debug;

/// Opens byte-stream connections to the detection service
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Conn: AsyncBufRead + AsyncWrite + Unpin + Send;

    async fn connect(&self, host: &str, port: u16) -> io::Result<Self::Conn>;
}

/// Plain TCP; no TLS, no proxy
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait::async_trait]
impl Transport for TcpTransport {
    type Conn = BufStream<TcpStream>;

    async fn connect(&self, host: &str, port: u16) -> io::Result<Self::Conn> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!(host, port, "TCP connection established");
        Ok(BufStream::new(stream))
    }
}
