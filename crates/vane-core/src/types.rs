//! Typed payloads for Electrum protocol results and notifications.
//!
//! Verbose transactions follow the server's JSON shape (`vin`/`vout`,
//! `scriptPubKey`, BTC-denominated values). Values are held as
//! [`bitcoin::Amount`] so totals and fees stay exact at satoshi precision.

use bitcoin::{Amount, BlockHash, OutPoint, Txid};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

// ==============================================================================
// Block Height
// ==============================================================================

/// A confirmed block height, wrapped for type safety.
///
/// Electrum reports mempool entries with heights `0` or `-1`; those never
/// become a `BlockHeight`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHeight(pub u32);

impl BlockHeight {
    /// Convert a raw Electrum height, returning `None` for mempool markers.
    pub fn from_electrum(height: i64) -> Option<Self> {
        if height <= 0 {
            return None;
        }
        u32::try_from(height).ok().map(Self)
    }
}

impl From<u32> for BlockHeight {
    fn from(h: u32) -> Self {
        Self(h)
    }
}

impl std::ops::Deref for BlockHeight {
    type Target = u32;
    fn deref(&self) -> &u32 {
        &self.0
    }
}

impl std::fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ==============================================================================
// Transactions
// ==============================================================================

/// A verbose transaction as returned by `blockchain.transaction.get(txid, true)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: Txid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub version: i32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub vsize: u64,
    #[serde(default)]
    pub weight: u64,
    pub locktime: u32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<BlockHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocktime: Option<u64>,
}

/// A transaction input. Coinbase inputs carry `coinbase` and no `txid`/`vout`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxIn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<Txid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    #[serde(rename = "scriptSig", default, skip_serializing_if = "Option::is_none")]
    pub script_sig: Option<ScriptSig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txinwitness: Option<Vec<String>>,
    pub sequence: u32,
    /// The spent output, filled in by enrichment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevout: Option<TxOut>,
}

impl TxIn {
    /// The outpoint this input spends; `None` for coinbase inputs.
    pub fn previous_output(&self) -> Option<OutPoint> {
        if self.coinbase.is_some() {
            return None;
        }
        match (self.txid, self.vout) {
            (Some(txid), Some(vout)) => Some(OutPoint::new(txid, vout)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOut {
    #[serde(with = "btc_amount")]
    pub value: Amount,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSig {
    #[serde(default)]
    pub asm: String,
    #[serde(default)]
    pub hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub asm: String,
    pub hex: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

/// A transaction whose inputs all carry their resolved previous outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedTransaction {
    #[serde(flatten)]
    pub tx: Transaction,
    /// Electrum height the transaction was listed at; `0` when unknown or
    /// unconfirmed.
    pub height: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merkle: Option<MerkleProof>,
    #[serde(with = "btc_amount")]
    pub input_total: Amount,
    #[serde(with = "btc_amount")]
    pub output_total: Amount,
    #[serde(with = "btc_amount")]
    pub fee: Amount,
    pub fee_in_satoshis: u64,
}

/// Height window applied to a scripthash history before enrichment.
///
/// Bounds are exclusive unless `inclusive` is set. Mempool entries (height
/// `0` or `-1`) pass regardless of bounds unless `only_confirmed` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub after_height: Option<u32>,
    pub before_height: Option<u32>,
    pub inclusive: bool,
    pub only_confirmed: bool,
}

impl HistoryFilter {
    pub fn validate(&self) -> Result<(), ClientError> {
        if let (Some(after), Some(before)) = (self.after_height, self.before_height) {
            if after > before {
                return Err(ClientError::Consistency(format!(
                    "after height {after} is above before height {before}"
                )));
            }
        }
        Ok(())
    }

    pub fn accepts(&self, height: i64) -> bool {
        if height <= 0 {
            return !self.only_confirmed;
        }
        let above_floor = self.after_height.map_or(true, |after| {
            let after = i64::from(after);
            if self.inclusive {
                height >= after
            } else {
                height > after
            }
        });
        let below_ceiling = self.before_height.map_or(true, |before| {
            let before = i64::from(before);
            if self.inclusive {
                height <= before
            } else {
                height < before
            }
        });
        above_floor && below_ceiling
    }
}

// ==============================================================================
// Scripthash Queries
// ==============================================================================

/// One entry of `blockchain.scripthash.get_history` / `get_mempool`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Confirmation height; `0` or `-1` for mempool transactions.
    pub height: i64,
    pub tx_hash: Txid,
    /// Present for mempool entries only (satoshis).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
}

impl HistoryEntry {
    pub fn confirmed_height(&self) -> Option<BlockHeight> {
        BlockHeight::from_electrum(self.height)
    }
}

/// One entry of `blockchain.scripthash.listunspent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unspent {
    pub height: i64,
    pub tx_hash: Txid,
    pub tx_pos: u32,
    /// Satoshis.
    pub value: u64,
}

/// Result of `blockchain.scripthash.get_balance`, in satoshis. The
/// unconfirmed part is negative when mempool transactions spend confirmed
/// coins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

/// Result of `blockchain.transaction.get_merkle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub block_height: u32,
    pub merkle: Vec<String>,
    pub pos: u32,
}

// ==============================================================================
// Headers
// ==============================================================================

/// Chain tip as returned by `blockchain.headers.subscribe` and carried by
/// its notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTip {
    pub height: u32,
    pub hex: String,
}

/// Result of `blockchain.block.header`: the raw header hex, or a header with
/// a checkpoint proof when `cp_height` is non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockHeader {
    Raw(String),
    WithProof {
        branch: Vec<String>,
        header: String,
        root: String,
    },
}

/// Result of `blockchain.block.headers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaders {
    pub count: u32,
    pub hex: String,
    pub max: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Vec<String>>,
}

// ==============================================================================
// Server Queries
// ==============================================================================

/// Result of `server.version`: `[server_software, protocol_version]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersion(pub String, pub String);

impl ServerVersion {
    pub fn software(&self) -> &str {
        &self.0
    }

    pub fn protocol(&self) -> &str {
        &self.1
    }
}

/// `[ip, hostname, features]` as listed by `server.peers.subscribe`.
pub type Peer = (String, String, Vec<String>);

/// `[fee_rate, vsize]` pairs from `mempool.get_fee_histogram`.
pub type FeeHistogram = Vec<(f64, u64)>;

// ==============================================================================
// Notification Payloads
// ==============================================================================

/// Params of a `blockchain.headers.subscribe` notification: `[tip]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeaderNotification {
    pub tip: BlockTip,
}

/// Params of a `blockchain.scripthash.subscribe` notification:
/// `[scripthash, status]`. `status` is `null` for a scripthash with no
/// history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptHashNotification {
    pub scripthash: String,
    pub status: Option<String>,
}

// ==============================================================================
// Amount Serialization
// ==============================================================================

/// Parse a BTC amount from a JSON value.
///
/// Number values are parsed via `Amount::from_float_in` to support scientific
/// notation, while string values are parsed via `Amount::from_str_in`.
pub fn parse_btc_amount(value: &serde_json::Value) -> Result<Amount, ClientError> {
    match value {
        serde_json::Value::Number(n) => {
            let parsed = n
                .as_f64()
                .ok_or_else(|| ClientError::Protocol(format!("invalid BTC amount `{value}`")))?;
            Amount::from_float_in(parsed, bitcoin::Denomination::Bitcoin)
                .map_err(|e| ClientError::Protocol(format!("invalid BTC amount `{value}`: {e}")))
        }
        serde_json::Value::String(s) => Amount::from_str_in(s, bitcoin::Denomination::Bitcoin)
            .map_err(|e| ClientError::Protocol(format!("invalid BTC amount `{s}`: {e}"))),
        _ => Err(ClientError::Protocol(format!(
            "expected numeric BTC amount, got: {value}"
        ))),
    }
}

/// Serde adapter for BTC-denominated JSON numbers.
pub(crate) mod btc_amount {
    use bitcoin::Amount;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(amount.to_btc())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        super::parse_btc_amount(&value).map_err(serde::de::Error::custom)
    }
}
