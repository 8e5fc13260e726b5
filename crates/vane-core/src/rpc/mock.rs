use std::collections::HashMap;

use async_trait::async_trait;
use bitcoin::Txid;
use parking_lot::Mutex;

use crate::error::{ClientError, RpcError};
use crate::types::{BlockHeight, HistoryEntry, MerkleProof, Transaction};

use super::ElectrumApi;

/// A mock Electrum backend for testing. Returns canned transactions and
/// history populated via the builder pattern, and records every call so
/// tests can assert on batching and on calls that must not happen.
pub struct MockElectrum {
    transactions: HashMap<Txid, Transaction>,
    history: Vec<HistoryEntry>,
    calls: Mutex<CallLog>,
}

#[derive(Default)]
struct CallLog {
    batch_sizes: Vec<usize>,
    merkle_requests: Vec<(Txid, BlockHeight)>,
    history_requests: usize,
}

impl MockElectrum {
    pub fn builder() -> MockElectrumBuilder {
        MockElectrumBuilder {
            transactions: HashMap::new(),
            history: Vec::new(),
        }
    }

    /// Size of every `get_transactions_batch` call, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls.lock().batch_sizes.clone()
    }

    pub fn merkle_requests(&self) -> Vec<(Txid, BlockHeight)> {
        self.calls.lock().merkle_requests.clone()
    }

    pub fn history_requests(&self) -> usize {
        self.calls.lock().history_requests
    }
}

pub struct MockElectrumBuilder {
    transactions: HashMap<Txid, Transaction>,
    history: Vec<HistoryEntry>,
}

impl MockElectrumBuilder {
    pub fn with_tx(mut self, tx: Transaction) -> Self {
        self.transactions.insert(tx.txid, tx);
        self
    }

    pub fn with_history_entry(mut self, entry: HistoryEntry) -> Self {
        self.history.push(entry);
        self
    }

    pub fn build(self) -> MockElectrum {
        MockElectrum {
            transactions: self.transactions,
            history: self.history,
            calls: Mutex::new(CallLog::default()),
        }
    }
}

#[async_trait]
impl ElectrumApi for MockElectrum {
    async fn get_transactions_batch(&self, txids: &[Txid]) -> Result<Vec<Transaction>, ClientError> {
        self.calls.lock().batch_sizes.push(txids.len());
        txids
            .iter()
            .map(|txid| {
                self.transactions.get(txid).cloned().ok_or_else(|| {
                    ClientError::Rpc(RpcError {
                        code: 2,
                        message: format!("daemon error: no such transaction {txid}"),
                        data: None,
                    })
                })
            })
            .collect()
    }

    async fn get_merkle(&self, txid: &Txid, height: BlockHeight) -> Result<MerkleProof, ClientError> {
        self.calls.lock().merkle_requests.push((*txid, height));
        Ok(MerkleProof {
            block_height: height.0,
            merkle: vec!["00".repeat(32)],
            pos: 0,
        })
    }

    async fn get_history(&self, _scripthash: &str) -> Result<Vec<HistoryEntry>, ClientError> {
        self.calls.lock().history_requests += 1;
        Ok(self.history.clone())
    }
}
