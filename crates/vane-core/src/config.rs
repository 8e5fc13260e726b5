//! Client configuration: server endpoint, transport selection, and limits.

use std::fmt;
use std::str::FromStr;

use crate::error::ClientError;

/// Default upper bound on the number of requests packed into one batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 80;

/// Client name announced in `server.version`.
pub const DEFAULT_CLIENT_NAME: &str = "vane";

/// Protocol version requested in `server.version`.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.4.2";

// ==============================================================================
// Transport Kind
// ==============================================================================

/// Which byte transport carries the JSON-RPC stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Plain TCP, newline-delimited.
    Tcp,
    /// TLS over TCP, newline-delimited.
    Tls,
    /// WebSocket; each text message is one JSON document.
    Ws,
}

impl FromStr for TransportKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "ssl" | "tls" => Ok(Self::Tls),
            "ws" => Ok(Self::Ws),
            other => Err(ClientError::Config(format!(
                "unknown transport `{other}`; expected tcp, tls, ssl or ws"
            ))),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Tls => write!(f, "tls"),
            Self::Ws => write!(f, "ws"),
        }
    }
}

// ==============================================================================
// TLS Options
// ==============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Skip certificate verification. Many public Electrum servers present
    /// self-signed certificates.
    pub accept_invalid_certs: bool,
    /// SNI / verification name; defaults to the configured host.
    pub server_name: Option<String>,
}

// ==============================================================================
// Client Config
// ==============================================================================

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    pub tls: TlsOptions,
    pub max_batch_size: usize,
    pub client_name: String,
    pub protocol_version: String,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, transport: TransportKind) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
            ..Self::default()
        }
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Reject settings the client cannot operate with.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.max_batch_size == 0 {
            return Err(ClientError::Config(
                "max batch size must be at least 1".to_owned(),
            ));
        }
        if self.host.is_empty() {
            return Err(ClientError::Config("host must not be empty".to_owned()));
        }
        Ok(())
    }

    /// `host:port`, used for socket connects and log fields.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 50001,
            transport: TransportKind::Tcp,
            tls: TlsOptions::default(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kind_accepts_ssl_alias() {
        assert_eq!("ssl".parse::<TransportKind>().expect("ssl parses"), TransportKind::Tls);
        assert_eq!("TLS".parse::<TransportKind>().expect("TLS parses"), TransportKind::Tls);
        assert_eq!("ws".parse::<TransportKind>().expect("ws parses"), TransportKind::Ws);
    }

    #[test]
    fn transport_kind_rejects_unknown_name() {
        let err = "quic".parse::<TransportKind>().expect_err("must reject quic");
        assert!(err.to_string().contains("unknown transport"));
    }

    #[test]
    fn default_batch_size_is_eighty() {
        let config = ClientConfig::new("example.org", 50002, TransportKind::Tls);
        assert_eq!(config.max_batch_size, 80);
        assert_eq!(config.authority(), "example.org:50002");
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let config = ClientConfig::default().with_max_batch_size(0);
        let err = config.validate().expect_err("must reject zero batch size");
        assert!(err.to_string().contains("at least 1"));
    }
}
