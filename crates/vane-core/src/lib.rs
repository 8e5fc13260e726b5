//! Electrum protocol client engine.
//!
//! Speaks newline-delimited JSON-RPC to Electrum servers over TCP, TLS or
//! WebSocket, correlates responses to concurrent requests, fans out server
//! notifications, and enriches transactions with the outputs their inputs
//! spend.

pub mod config;
pub mod enrich;
pub mod error;
pub mod rpc;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::{ClientConfig, TlsOptions, TransportKind};
pub use error::{ClientError, RpcError, TransportError};
pub use rpc::{ConnectionState, ElectrumApi, ElectrumClient};
pub use types::{EnrichedTransaction, HistoryFilter};
