use std::time::Duration;

/// Errors surfaced by the client, its transports, and the enrichment pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed message: {0}")]
    Protocol(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("`{method}` timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("unexpected result for `{method}`: {source}")]
    UnexpectedResult {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A well-formed JSON-RPC error object returned by the server.
///
/// `code`, `message` and `data` are carried verbatim from the wire.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("server error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid TLS server name `{0}`")]
    InvalidServerName(String),

    #[error("websocket failure: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
