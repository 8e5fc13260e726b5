use clap::{Args, Parser, Subcommand};

use vane_core::config::{DEFAULT_MAX_BATCH_SIZE, DEFAULT_PROTOCOL_VERSION};
use vane_core::{ClientConfig, HistoryFilter, TlsOptions, TransportKind};

/// Vane: query Electrum servers, enrich transactions, follow subscriptions.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Electrum server hostname or IP.
    #[arg(long, default_value = "127.0.0.1", env = "VANE_HOST")]
    pub host: String,

    /// Electrum server port.
    #[arg(long, default_value = "50001", env = "VANE_PORT")]
    pub port: u16,

    /// Transport: tcp, tls (alias ssl) or ws.
    #[arg(long, default_value = "tcp", env = "VANE_TRANSPORT")]
    pub transport: TransportKind,

    /// Accept self-signed or otherwise invalid TLS certificates.
    #[arg(long, env = "VANE_ACCEPT_INVALID_CERTS")]
    pub accept_invalid_certs: bool,

    /// Maximum number of requests per batch.
    #[arg(long, default_value_t = DEFAULT_MAX_BATCH_SIZE, env = "VANE_MAX_BATCH_SIZE")]
    pub max_batch_size: usize,

    /// Protocol version requested during negotiation.
    #[arg(long, default_value = DEFAULT_PROTOCOL_VERSION, env = "VANE_PROTOCOL_VERSION")]
    pub protocol_version: String,

    /// Per-request timeout in seconds.
    #[arg(long, default_value = "30", env = "VANE_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.host, self.port, self.transport)
            .with_tls(TlsOptions {
                accept_invalid_certs: self.accept_invalid_certs,
                server_name: None,
            })
            .with_max_batch_size(self.max_batch_size)
            .with_protocol_version(&self.protocol_version)
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Print server software, negotiated protocol and banner.
    Version,

    /// Print a verbose transaction.
    Tx {
        txid: bitcoin::Txid,
    },

    /// Print a transaction with resolved inputs, totals and fee.
    RichTx {
        txid: bitcoin::Txid,

        /// Block height the transaction confirmed at; attaches a merkle proof.
        #[arg(long)]
        height: Option<i64>,
    },

    /// Print the enriched history of a scripthash.
    History {
        scripthash: String,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Print the confirmed and unconfirmed balance of a scripthash.
    Balance {
        scripthash: String,
    },

    /// Print the mempool fee histogram.
    FeeHistogram,

    /// Print notifications until interrupted.
    Subscribe {
        /// Follow new block headers.
        #[arg(long)]
        headers: bool,

        /// Follow status changes of a scripthash (repeatable).
        #[arg(long)]
        scripthash: Vec<String>,
    },
}

#[derive(Args)]
pub struct FilterArgs {
    /// Skip transactions at or below this height.
    #[arg(long)]
    pub after_height: Option<u32>,

    /// Skip transactions at or above this height.
    #[arg(long)]
    pub before_height: Option<u32>,

    /// Keep transactions exactly at the bounds.
    #[arg(long)]
    pub inclusive: bool,

    /// Skip mempool transactions.
    #[arg(long)]
    pub only_confirmed: bool,
}

impl From<&FilterArgs> for HistoryFilter {
    fn from(args: &FilterArgs) -> Self {
        Self {
            after_height: args.after_height,
            before_height: args.before_height,
            inclusive: args.inclusive,
            only_confirmed: args.only_confirmed,
        }
    }
}
