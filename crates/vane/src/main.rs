mod cli;

use std::future::Future;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, WrapErr};
use serde::Serialize;

use vane_core::types::{HeaderNotification, ScriptHashNotification};
use vane_core::{ClientError, ElectrumClient, HistoryFilter};

use cli::{Cli, Command};

/// Interval between keep-alive pings while following subscriptions.
const PING_INTERVAL: Duration = Duration::from_secs(20);

const HEADERS_EVENT: &str = "blockchain.headers.subscribe";
const SCRIPTHASH_EVENT: &str = "blockchain.scripthash.subscribe";

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let config = args.client_config();
    let endpoint = format!("{}://{}", config.transport, config.authority());
    let timeout = Duration::from_secs(args.timeout_secs);

    let client = with_timeout(timeout, "connect", ElectrumClient::connect(config))
        .await
        .map_err(|err| eyre!(format_connect_error(&endpoint, &err)))
        .wrap_err("while connecting to the Electrum server")?;

    if let Some(caps) = client.capabilities() {
        tracing::info!(
            server = %caps.server_software,
            protocol = %caps.protocol,
            "connected to {endpoint}"
        );
    }

    let outcome = run(&client, args.command, timeout).await;
    client.close();
    outcome
}

async fn run(client: &ElectrumClient, command: Command, timeout: Duration) -> eyre::Result<()> {
    match command {
        Command::Version => {
            let caps = client.negotiate().await.context("negotiate protocol")?;
            let banner = with_timeout(timeout, "server.banner", client.server_banner())
                .await
                .context("server.banner")?;
            print_json(&serde_json::json!({
                "server_software": caps.server_software,
                "protocol": caps.protocol.to_string(),
                "banner": banner,
            }))
        }
        Command::Tx { txid } => {
            let tx = with_timeout(
                timeout,
                "blockchain.transaction.get",
                client.blockchain_transaction_get_verbose(&txid),
            )
                .await
                .with_context(|| format!("fetch transaction {txid}"))?;
            print_json(&tx)
        }
        Command::RichTx { txid, height } => {
            let rich = with_timeout(timeout, "rich transaction", client.get_rich_transaction(&txid, height))
                .await
                .with_context(|| format!("enrich transaction {txid}"))?;
            print_json(&rich)
        }
        Command::History { scripthash, filter } => {
            let filter = HistoryFilter::from(&filter);
            let history = with_timeout(
                timeout,
                "rich history",
                client.get_scripthash_rich_history(&scripthash, &filter),
            )
                .await
                .with_context(|| format!("enrich history of {scripthash}"))?;
            print_json(&history)
        }
        Command::Balance { scripthash } => {
            let balance = with_timeout(
                timeout,
                "blockchain.scripthash.get_balance",
                client.blockchain_scripthash_get_balance(&scripthash),
            )
                .await
                .with_context(|| format!("fetch balance of {scripthash}"))?;
            print_json(&balance)
        }
        Command::FeeHistogram => {
            let histogram = with_timeout(timeout, "mempool.get_fee_histogram", client.mempool_get_fee_histogram())
                .await
                .context("fetch fee histogram")?;
            print_json(&histogram)
        }
        Command::Subscribe {
            headers,
            scripthash,
        } => follow(client, headers, &scripthash, timeout).await,
    }
}

/// Print notifications until Ctrl-C or until the server goes away.
async fn follow(
    client: &ElectrumClient,
    headers: bool,
    scripthashes: &[String],
    timeout: Duration,
) -> eyre::Result<()> {
    if !headers && scripthashes.is_empty() {
        return Err(eyre!("nothing to follow; pass --headers and/or --scripthash"));
    }

    let mut header_rx = client.notifications(HEADERS_EVENT);
    let mut scripthash_rx = client.notifications(SCRIPTHASH_EVENT);

    if headers {
        let tip = with_timeout(timeout, HEADERS_EVENT, client.blockchain_headers_subscribe())
            .await
            .context("subscribe to headers")?;
        print_json(&serde_json::json!({"event": "tip", "height": tip.height, "hex": tip.hex}))?;
    }
    for scripthash in scripthashes {
        let status = with_timeout(timeout, SCRIPTHASH_EVENT, client.blockchain_scripthash_subscribe(scripthash))
            .await
            .with_context(|| format!("subscribe to {scripthash}"))?;
        print_json(&serde_json::json!({"event": "status", "scripthash": scripthash, "status": status}))?;
    }

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                return Ok(());
            }
            _ = ping.tick() => {
                with_timeout(timeout, "server.ping", client.server_ping()).await.context("server.ping")?;
                tracing::debug!("keep-alive ping answered");
            }
            Some(notification) = header_rx.recv() => {
                match notification.decode_params::<HeaderNotification>() {
                    Ok(header) => print_json(&serde_json::json!({
                        "event": "tip",
                        "height": header.tip.height,
                        "hex": header.tip.hex,
                    }))?,
                    Err(err) => tracing::warn!(error = %err, "undecodable header notification"),
                }
            }
            Some(notification) = scripthash_rx.recv() => {
                match notification.decode_params::<ScriptHashNotification>() {
                    Ok(change) => print_json(&serde_json::json!({
                        "event": "status",
                        "scripthash": change.scripthash,
                        "status": change.status,
                    }))?,
                    Err(err) => tracing::warn!(error = %err, "undecodable scripthash notification"),
                }
            }
        }
    }
}

/// Bound `operation` by `after`, mapping expiry onto [`ClientError::Timeout`]
/// named by `label`. Calls abandoned on expiry are evicted by the client.
async fn with_timeout<T, F>(after: Duration, label: &str, operation: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    tokio::time::timeout(after, operation)
        .await
        .unwrap_or_else(|_| {
            Err(ClientError::Timeout {
                method: label.to_owned(),
                after,
            })
        })
}

fn print_json<T: Serialize>(value: &T) -> eyre::Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{text}");
    Ok(())
}

fn format_connect_error(endpoint: &str, err: &ClientError) -> String {
    let mut lines = vec![
        format!("could not connect to Electrum server `{endpoint}`"),
        format!("error: {err}"),
    ];

    let message = err.to_string();
    let transport = matches!(err, ClientError::Transport(_));
    if transport && (message.contains("certificate") || message.contains("TLS")) {
        lines.push(
            "hint: TLS handshake failed; self-signed servers need --accept-invalid-certs".into(),
        );
    } else if transport || matches!(err, ClientError::ConnectionClosed) {
        lines.push(
            "hint: the connection was refused or dropped; verify host, port and --transport"
                .into(),
        );
    } else if matches!(err, ClientError::Timeout { .. }) {
        lines.push("hint: the server did not answer in time; try --timeout-secs".into());
    }

    lines.join("\n")
}
