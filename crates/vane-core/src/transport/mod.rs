//! Byte transports carrying the JSON-RPC stream.
//!
//! A [`Connector`] opens a connection and hands back independent read and
//! write halves. Stream transports (TCP, TLS) deliver raw chunks that still
//! need newline framing; message transports (WebSocket) deliver one JSON
//! document per message.

mod stream;
mod tls;
mod ws;

pub use stream::{split_stream, StreamReader, StreamWriter, TcpConnector};
pub use tls::TlsConnector;
pub use ws::WsConnector;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ClientConfig, TransportKind};
use crate::error::{ClientError, TransportError};

/// One unit read from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Arbitrary slice of a byte stream; must go through line framing.
    Chunk(Vec<u8>),
    /// A complete message from a message-oriented transport.
    Message(String),
}

#[async_trait]
pub trait TransportReader: Send {
    /// Next inbound unit, or `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;
}

#[async_trait]
pub trait TransportWriter: Send {
    /// Send one JSON text. Stream transports append the newline delimiter.
    async fn send(&mut self, text: &str) -> Result<(), TransportError>;

    /// Flush and shut down the write side.
    async fn close(&mut self) -> Result<(), TransportError>;
}

pub struct TransportHalves {
    pub reader: Box<dyn TransportReader>,
    pub writer: Box<dyn TransportWriter>,
}

/// Opens connections to an Electrum server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<TransportHalves, TransportError>;

    /// Endpoint description for log fields.
    fn endpoint(&self) -> String;
}

/// Build the connector selected by `config.transport`.
pub fn connector_for(config: &ClientConfig) -> Result<Arc<dyn Connector>, ClientError> {
    let connector: Arc<dyn Connector> = match config.transport {
        TransportKind::Tcp => Arc::new(TcpConnector::new(&config.host, config.port)),
        TransportKind::Tls => Arc::new(TlsConnector::new(&config.host, config.port, &config.tls)?),
        TransportKind::Ws => Arc::new(WsConnector::new(&config.host, config.port)),
    };
    Ok(connector)
}
