//! Shared test helpers for `vane-core` unit tests.
//!
//! Builders for verbose transactions (`make_tx`, `spending_input`, `output`)
//! and an in-memory Electrum peer: a [`MockConnector`] hands the client one
//! end of a `tokio::io::duplex` pipe while tests drive the other end, either
//! through [`spawn_fake_server`] or step by step with [`ScriptedPeer`].

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{Amount, Txid};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::{RpcError, TransportError};
use crate::rpc::ElectrumClient;
use crate::transport::{split_stream, Connector, TransportHalves};
use crate::types::{ScriptPubKey, ScriptSig, Transaction, TxIn, TxOut};

// ==============================================================================
// Txid Helpers
// ==============================================================================

/// Create a deterministic `Txid` from a single distinguishing byte.
pub fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

// ==============================================================================
// Transaction Builders
// ==============================================================================

/// Build a verbose transaction with sane defaults.
pub fn make_tx(txid: Txid, vin: Vec<TxIn>, vout: Vec<TxOut>) -> Transaction {
    Transaction {
        txid,
        hash: None,
        version: 2,
        size: 250,
        vsize: 140,
        weight: 560,
        locktime: 0,
        vin,
        vout,
        hex: String::new(),
        blockhash: None,
        confirmations: None,
        time: None,
        blocktime: None,
    }
}

/// A coinbase input (no previous output).
pub fn coinbase_input() -> TxIn {
    TxIn {
        txid: None,
        vout: None,
        coinbase: Some("03a0bb0d".to_owned()),
        script_sig: None,
        txinwitness: None,
        sequence: 0xFFFFFFFF,
        prevout: None,
    }
}

/// A spending input referencing `funding_txid:vout`.
pub fn spending_input(funding_txid: Txid, vout: u32) -> TxIn {
    TxIn {
        txid: Some(funding_txid),
        vout: Some(vout),
        coinbase: None,
        script_sig: Some(ScriptSig {
            asm: String::new(),
            hex: String::new(),
        }),
        txinwitness: None,
        sequence: 0xFFFFFFFD,
        prevout: None,
    }
}

/// A P2WPKH-shaped output worth `sats`.
pub fn output(sats: u64, n: u32) -> TxOut {
    TxOut {
        value: Amount::from_sat(sats),
        n,
        script_pub_key: ScriptPubKey {
            asm: String::new(),
            hex: format!("0014{}", "ab".repeat(20)),
            kind: Some("witness_v0_keyhash".to_owned()),
            address: None,
            addresses: None,
            desc: None,
        },
    }
}

// ==============================================================================
// In-memory Transport
// ==============================================================================

/// Hands the client one end of an in-memory pipe, optionally after a gate
/// is released.
pub struct MockConnector {
    stream: Mutex<Option<DuplexStream>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MockConnector {
    /// Connector plus the server end of its pipe.
    pub fn pair() -> (Self, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let connector = Self {
            stream: Mutex::new(Some(client)),
            gate: Mutex::new(None),
        };
        (connector, server)
    }

    /// Like [`pair`](Self::pair), but `connect` waits until the returned
    /// sender fires.
    pub fn gated() -> (Self, DuplexStream, oneshot::Sender<()>) {
        let (connector, server) = Self::pair();
        let (release, gate) = oneshot::channel();
        *connector.gate.lock() = Some(gate);
        (connector, server, release)
    }

    /// A connector whose `connect` always fails.
    pub fn unavailable() -> Self {
        Self {
            stream: Mutex::new(None),
            gate: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<TransportHalves, TransportError> {
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let stream = self.stream.lock().take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock server unavailable",
            ))
        })?;
        Ok(split_stream(stream))
    }

    fn endpoint(&self) -> String {
        "mock://duplex".to_owned()
    }
}

/// A client already connected to an in-memory pipe, plus the server end.
pub async fn connected_client() -> (ElectrumClient, DuplexStream) {
    let (connector, server) = MockConnector::pair();
    let client = ElectrumClient::with_connector(Arc::new(connector), ClientConfig::default())
        .expect("default config is valid");
    client
        .wait_for_connection()
        .await
        .expect("mock connector connects");
    (client, server)
}

// ==============================================================================
// Fake Servers
// ==============================================================================

/// Answer every request arriving on `stream` with `handler` until the client
/// goes away. With `reverse_batches` the elements of each batch reply are
/// sent in reverse order.
pub fn spawn_fake_server<F>(stream: DuplexStream, handler: F, reverse_batches: bool) -> JoinHandle<()>
where
    F: Fn(&str, &[Value]) -> Result<Value, RpcError> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(request) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let reply = match request {
                Value::Array(items) => {
                    let mut replies: Vec<Value> = items.iter().map(|item| answer(&handler, item)).collect();
                    if reverse_batches {
                        replies.reverse();
                    }
                    Value::Array(replies)
                }
                single => answer(&handler, &single),
            };
            let mut text = reply.to_string();
            text.push('\n');
            if write.write_all(text.as_bytes()).await.is_err() {
                break;
            }
        }
    })
}

fn answer<F>(handler: &F, request: &Value) -> Value
where
    F: Fn(&str, &[Value]) -> Result<Value, RpcError>,
{
    let id = request["id"].clone();
    let method = request["method"].as_str().unwrap_or_default();
    let params = request["params"].as_array().cloned().unwrap_or_default();
    match handler(method, &params) {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err(err) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": err.code, "message": err.message, "data": err.data}
        }),
    }
}

/// The server end of a pipe, driven line by line from a test.
pub struct ScriptedPeer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    write: WriteHalf<DuplexStream>,
}

impl ScriptedPeer {
    pub fn new(stream: DuplexStream) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    /// Next request line from the client, parsed.
    pub async fn next_request(&mut self) -> Value {
        let line = self
            .lines
            .next_line()
            .await
            .expect("pipe readable")
            .expect("client sent a request");
        serde_json::from_str(&line).expect("client sends valid JSON")
    }

    /// Write `text` followed by a newline.
    pub async fn send_raw(&mut self, text: &str) {
        self.write
            .write_all(format!("{text}\n").as_bytes())
            .await
            .expect("pipe writable");
    }
}
