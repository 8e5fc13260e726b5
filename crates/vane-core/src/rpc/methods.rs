//! Typed wrappers over Electrum protocol methods.
//!
//! Each wrapper maps 1:1 onto a server method: params are passed through
//! positionally and the result is deserialized into the matching payload type.

use async_trait::async_trait;
use bitcoin::Txid;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::capabilities::Capabilities;
use super::client::ElectrumClient;
use super::ElectrumApi;
use crate::enrich::Enricher;
use crate::error::ClientError;
use crate::types::{
    Balance, BlockHeader, BlockHeaders, BlockHeight, BlockTip, EnrichedTransaction, FeeHistogram,
    HistoryEntry, HistoryFilter, MerkleProof, Peer, ServerVersion, Transaction, Unspent,
};

fn unexpected(method: &str, source: serde_json::Error) -> ClientError {
    ClientError::UnexpectedResult {
        method: method.to_owned(),
        source,
    }
}

impl ElectrumClient {
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, ClientError> {
        let raw = self.request(method, params).await?;
        serde_json::from_value(raw).map_err(|e| unexpected(method, e))
    }

    // ==========================================================================
    // Negotiation
    // ==========================================================================

    /// Send `server.version` with the configured client name and protocol,
    /// once per connection. Later calls return the stored result.
    pub async fn negotiate(&self) -> Result<&Capabilities, ClientError> {
        self.capabilities
            .get_or_try_init(|| async {
                let config = self.config();
                let version = self
                    .server_version(&config.client_name, &config.protocol_version)
                    .await?;
                let capabilities = Capabilities::from_server_version(&version)?;
                tracing::info!(
                    server.software = %capabilities.server_software,
                    server.protocol = %capabilities.protocol,
                    "protocol negotiated"
                );
                Ok::<_, ClientError>(capabilities)
            })
            .await
    }

    /// Capabilities agreed by [`negotiate`](Self::negotiate), if it has run.
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.get()
    }

    // ==========================================================================
    // server.*
    // ==========================================================================

    pub async fn server_version(
        &self,
        client_name: &str,
        protocol_version: &str,
    ) -> Result<ServerVersion, ClientError> {
        self.call("server.version", vec![json!(client_name), json!(protocol_version)])
            .await
    }

    pub async fn server_banner(&self) -> Result<String, ClientError> {
        self.call("server.banner", vec![]).await
    }

    pub async fn server_ping(&self) -> Result<(), ClientError> {
        self.request("server.ping", vec![]).await.map(|_| ())
    }

    pub async fn server_add_peer(&self, features: Value) -> Result<bool, ClientError> {
        self.call("server.add_peer", vec![features]).await
    }

    pub async fn server_donation_address(&self) -> Result<String, ClientError> {
        self.call("server.donation_address", vec![]).await
    }

    /// Raw `server.features` object; its keys vary between implementations.
    pub async fn server_features(&self) -> Result<Value, ClientError> {
        self.request("server.features", vec![]).await
    }

    pub async fn server_peers_subscribe(&self) -> Result<Vec<Peer>, ClientError> {
        self.call("server.peers.subscribe", vec![]).await
    }

    // ==========================================================================
    // blockchain.scripthash.*
    // ==========================================================================

    pub async fn blockchain_scripthash_get_balance(&self, scripthash: &str) -> Result<Balance, ClientError> {
        self.call("blockchain.scripthash.get_balance", vec![json!(scripthash)])
            .await
    }

    /// Confirmed and mempool history. After negotiating protocol 1.5 or
    /// later the ranged form `[scripthash, 0, -1]` is sent.
    pub async fn blockchain_scripthash_get_history(
        &self,
        scripthash: &str,
    ) -> Result<Vec<HistoryEntry>, ClientError> {
        let params = match self.capabilities() {
            Some(caps) if caps.ranged_history() => vec![json!(scripthash), json!(0), json!(-1)],
            _ => vec![json!(scripthash)],
        };
        self.call("blockchain.scripthash.get_history", params).await
    }

    pub async fn blockchain_scripthash_get_mempool(
        &self,
        scripthash: &str,
    ) -> Result<Vec<HistoryEntry>, ClientError> {
        self.call("blockchain.scripthash.get_mempool", vec![json!(scripthash)])
            .await
    }

    pub async fn blockchain_scripthash_listunspent(&self, scripthash: &str) -> Result<Vec<Unspent>, ClientError> {
        self.call("blockchain.scripthash.listunspent", vec![json!(scripthash)])
            .await
    }

    /// Subscribe to status changes; returns the current status hash, `None`
    /// when the scripthash has no history. Changes arrive as notifications
    /// named `blockchain.scripthash.subscribe`.
    pub async fn blockchain_scripthash_subscribe(&self, scripthash: &str) -> Result<Option<String>, ClientError> {
        self.call("blockchain.scripthash.subscribe", vec![json!(scripthash)])
            .await
    }

    pub async fn blockchain_scripthash_unsubscribe(&self, scripthash: &str) -> Result<bool, ClientError> {
        self.call("blockchain.scripthash.unsubscribe", vec![json!(scripthash)])
            .await
    }

    // ==========================================================================
    // blockchain.block.* / headers / fees
    // ==========================================================================

    /// Header at `height`; with a checkpoint height the server also returns a
    /// merkle branch to that checkpoint.
    pub async fn blockchain_block_header(
        &self,
        height: u32,
        cp_height: Option<u32>,
    ) -> Result<BlockHeader, ClientError> {
        let mut params = vec![json!(height)];
        if let Some(cp) = cp_height {
            params.push(json!(cp));
        }
        self.call("blockchain.block.header", params).await
    }

    pub async fn blockchain_block_headers(
        &self,
        start_height: u32,
        count: u32,
        cp_height: Option<u32>,
    ) -> Result<BlockHeaders, ClientError> {
        let mut params = vec![json!(start_height), json!(count)];
        if let Some(cp) = cp_height {
            params.push(json!(cp));
        }
        self.call("blockchain.block.headers", params).await
    }

    /// Fee rate in BTC/kB to confirm within `blocks`; `-1` when the server
    /// has no estimate.
    pub async fn blockchain_estimatefee(&self, blocks: u32) -> Result<f64, ClientError> {
        self.call("blockchain.estimatefee", vec![json!(blocks)]).await
    }

    /// Current tip; later tips arrive as `blockchain.headers.subscribe`
    /// notifications.
    pub async fn blockchain_headers_subscribe(&self) -> Result<BlockTip, ClientError> {
        self.call("blockchain.headers.subscribe", vec![]).await
    }

    pub async fn blockchain_relayfee(&self) -> Result<f64, ClientError> {
        self.call("blockchain.relayfee", vec![]).await
    }

    pub async fn mempool_get_fee_histogram(&self) -> Result<FeeHistogram, ClientError> {
        self.call("mempool.get_fee_histogram", vec![]).await
    }

    // ==========================================================================
    // blockchain.transaction.*
    // ==========================================================================

    pub async fn blockchain_transaction_broadcast(&self, raw_tx_hex: &str) -> Result<Txid, ClientError> {
        self.call("blockchain.transaction.broadcast", vec![json!(raw_tx_hex)])
            .await
    }

    /// Raw transaction hex.
    pub async fn blockchain_transaction_get(&self, txid: &Txid) -> Result<String, ClientError> {
        self.call("blockchain.transaction.get", vec![json!(txid.to_string())])
            .await
    }

    pub async fn blockchain_transaction_get_verbose(&self, txid: &Txid) -> Result<Transaction, ClientError> {
        self.call(
            "blockchain.transaction.get",
            vec![json!(txid.to_string()), json!(true)],
        )
        .await
    }

    pub async fn blockchain_transaction_get_merkle(
        &self,
        txid: &Txid,
        height: BlockHeight,
    ) -> Result<MerkleProof, ClientError> {
        self.call(
            "blockchain.transaction.get_merkle",
            vec![json!(txid.to_string()), json!(height.0)],
        )
        .await
    }

    // ==========================================================================
    // Enrichment
    // ==========================================================================

    /// Fetch a verbose transaction and resolve the outputs its inputs spend.
    /// A positive `height` also attaches the merkle proof for that block.
    pub async fn get_rich_transaction(
        &self,
        txid: &Txid,
        height: Option<i64>,
    ) -> Result<EnrichedTransaction, ClientError> {
        let tx = self.blockchain_transaction_get_verbose(txid).await?;
        Enricher::new(self, self.max_batch_size())
            .enrich_transaction(tx, height.unwrap_or(0))
            .await
    }

    /// Enriched history of a scripthash, restricted by `filter`.
    pub async fn get_scripthash_rich_history(
        &self,
        scripthash: &str,
        filter: &HistoryFilter,
    ) -> Result<Vec<EnrichedTransaction>, ClientError> {
        Enricher::new(self, self.max_batch_size())
            .enrich_history(scripthash, filter)
            .await
    }
}

#[async_trait]
impl ElectrumApi for ElectrumClient {
    async fn get_transactions_batch(&self, txids: &[Txid]) -> Result<Vec<Transaction>, ClientError> {
        const METHOD: &str = "blockchain.transaction.get";

        let calls: Vec<(String, Vec<Value>)> = txids
            .iter()
            .map(|txid| (METHOD.to_owned(), vec![json!(txid.to_string()), json!(true)]))
            .collect();
        self.request_batch(&calls)
            .await?
            .into_iter()
            .map(|raw| serde_json::from_value(raw).map_err(|e| unexpected(METHOD, e)))
            .collect()
    }

    async fn get_merkle(&self, txid: &Txid, height: BlockHeight) -> Result<MerkleProof, ClientError> {
        self.blockchain_transaction_get_merkle(txid, height).await
    }

    async fn get_history(&self, scripthash: &str) -> Result<Vec<HistoryEntry>, ClientError> {
        self.blockchain_scripthash_get_history(scripthash).await
    }
}
