//! Electrum JSON-RPC protocol engine.
//!
//! Layers, leaf to root: line framing ([`framing`]), wire codec ([`codec`]),
//! request correlation ([`correlation`]), notification fan-out
//! ([`subscriptions`]), and the [`ElectrumClient`] facade that owns the
//! connection task. [`ElectrumApi`] is the narrow seam the enrichment
//! pipeline depends on; `mock::MockElectrum` implements it for tests.

mod capabilities;
mod client;
pub mod codec;
mod connection;
pub mod correlation;
pub mod framing;
mod methods;
#[cfg(test)]
pub mod mock;
pub mod subscriptions;

pub use capabilities::{Capabilities, ProtocolVersion};
pub use client::ElectrumClient;
pub use codec::{Notification, Request};
pub use connection::ConnectionState;
pub use subscriptions::ListenerError;

use async_trait::async_trait;
use bitcoin::Txid;

use crate::error::ClientError;
use crate::types::{BlockHeight, HistoryEntry, MerkleProof, Transaction};

/// The Electrum methods the enrichment pipeline needs.
#[async_trait]
pub trait ElectrumApi: Send + Sync {
    /// Fetch verbose transactions in one batched round-trip. Results come
    /// back in the order of `txids`.
    async fn get_transactions_batch(&self, txids: &[Txid]) -> Result<Vec<Transaction>, ClientError>;

    /// Fetch the merkle branch proving `txid` is in the block at `height`.
    async fn get_merkle(&self, txid: &Txid, height: BlockHeight) -> Result<MerkleProof, ClientError>;

    /// Fetch the confirmed and mempool history of a scripthash.
    async fn get_history(&self, scripthash: &str) -> Result<Vec<HistoryEntry>, ClientError>;
}
