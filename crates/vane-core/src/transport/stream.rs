use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use super::{Connector, Inbound, TransportHalves, TransportReader, TransportWriter};
use crate::error::TransportError;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Read half of a byte stream; yields raw chunks for line framing.
pub struct StreamReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0; READ_CHUNK_SIZE],
        }
    }
}

#[async_trait]
impl<R> TransportReader for StreamReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        let n = self.inner.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(Inbound::Chunk(self.buf[..n].to_vec())))
    }
}

/// Write half of a byte stream; terminates every message with `\n`.
pub struct StreamWriter<W> {
    inner: W,
}

impl<W> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W> TransportWriter for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');
        self.inner.write_all(&line).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Split any bidirectional byte stream into transport halves.
pub fn split_stream<S>(stream: S) -> TransportHalves
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
    TransportHalves {
        reader: Box::new(StreamReader::new(read)),
        writer: Box::new(StreamWriter::new(write)),
    }
}

// ==============================================================================
// Plain TCP
// ==============================================================================

pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_owned(),
            port,
        }
    }
}

pub(super) async fn open_tcp(host: &str, port: u16) -> Result<TcpStream, TransportError> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    debug!(transport.host = host, transport.port = port, "tcp connected");
    Ok(stream)
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<TransportHalves, TransportError> {
        let stream = open_tcp(&self.host, self.port).await?;
        Ok(split_stream(stream))
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}
