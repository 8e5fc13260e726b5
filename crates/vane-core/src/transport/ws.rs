use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::{Connector, Inbound, TransportHalves, TransportReader, TransportWriter};
use crate::error::TransportError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport. Each text or binary message is one JSON document,
/// so inbound units bypass line framing.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{host}:{port}"),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<TransportHalves, TransportError> {
        let (socket, response) = connect_async(self.url.as_str()).await?;
        debug!(transport.url = %self.url, status = %response.status(), "websocket connected");

        let (sink, stream) = socket.split();
        Ok(TransportHalves {
            reader: Box::new(WsReader { stream }),
            writer: Box::new(WsWriter { sink }),
        })
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

struct WsReader {
    stream: SplitStream<Socket>,
}

#[async_trait]
impl TransportReader for WsReader {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(None);
            };
            match message? {
                Message::Text(text) => return Ok(Some(Inbound::Message(text.as_str().to_owned()))),
                Message::Binary(data) => {
                    return Ok(Some(Inbound::Message(
                        String::from_utf8_lossy(&data).into_owned(),
                    )))
                }
                Message::Close(frame) => {
                    debug!(?frame, "websocket close frame received");
                    return Ok(None);
                }
                other => trace!(?other, "ignoring websocket control message"),
            }
        }
    }
}

struct WsWriter {
    sink: SplitSink<Socket, Message>,
}

#[async_trait]
impl TransportWriter for WsWriter {
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        self.sink.send(Message::text(text.to_owned())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await?;
        Ok(())
    }
}
