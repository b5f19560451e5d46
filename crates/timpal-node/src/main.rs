//! timpal-node — the TIMPAL full-node binary.
//!
//! Startup sequence:
//!   1. Check the wallet PIN from the environment (fail fast)
//!   2. Open the chain store and run crash recovery
//!   3. Restore the ledger, or apply genesis on a fresh store
//!   4. Create or unlock the validator wallet
//!   5. Spawn the node task (ledger + mempool + wallet, single writer)
//!   6. Serve the HTTP API

mod node;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use node::NodeTask;
use timpal_core::constants::MIN_PIN_LEN;
use timpal_core::types::unix_now;
use timpal_genesis::{apply_genesis, GenesisParams};
use timpal_ledger::Ledger;
use timpal_mempool::Mempool;
use timpal_rpc::NodeClient;
use timpal_storage::{ChainStore, CrashRecovery};
use timpal_wallet::SeedVault;

#[derive(Parser, Debug)]
#[command(name = "timpal-node", version, about = "TIMPAL validator node")]
struct Args {
    /// Directory for blocks, state, snapshots and the validator wallet.
    #[arg(long, default_value = "timpal_data")]
    data_dir: PathBuf,

    /// HTTP API listen address.
    #[arg(long, default_value = "127.0.0.1:8770")]
    rpc_addr: SocketAddr,

    /// Path to genesis params JSON (used only on a fresh data dir).
    #[arg(long)]
    genesis_params: Option<PathBuf>,

    /// Seed peer addresses handed to the transport (comma-separated).
    #[arg(long, value_delimiter = ',')]
    bootstrap: Vec<String>,

    /// Wallet PIN; encrypts the wallet at rest and authorizes transfers.
    #[arg(long, env = "TIMPAL_WALLET_PIN", hide_env_values = true)]
    wallet_pin: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,timpal=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("TIMPAL node starting");

    if args.wallet_pin.len() < MIN_PIN_LEN {
        anyhow::bail!("TIMPAL_WALLET_PIN must be at least {MIN_PIN_LEN} characters");
    }

    // ── Storage + crash recovery ──────────────────────────────────────────────
    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating data dir {}", args.data_dir.display()))?;
    let store = ChainStore::open(&args.data_dir).context("opening chain store")?;
    CrashRecovery::new(&store)
        .check_and_recover()
        .context("storage integrity check")?;

    // ── Ledger: restore or genesis ────────────────────────────────────────────
    let has_chain = store.chain_height().context("reading chain height")?.is_some();
    let ledger = if has_chain {
        Ledger::restore(store)
            .context("replaying persisted chain")?
            .context("chain height recorded but no blocks on disk")?
    } else {
        let params = load_or_default_genesis_params(args.genesis_params.as_deref())?;
        let mut ledger = Ledger::new(params.genesis_timestamp, Some(store));
        apply_genesis(&mut ledger, &params).context("applying genesis")?;
        ledger
    };
    info!(height = ledger.height().unwrap_or(0), "ledger ready");

    // ── Validator wallet ──────────────────────────────────────────────────────
    let wallet_path = args.data_dir.join("validator_wallet.json");
    let mut vault = if wallet_path.exists() {
        SeedVault::load(&wallet_path, &args.wallet_pin, "")
            .context("unlocking wallet: wrong PIN or corrupted file")?
    } else {
        let mut vault = SeedVault::new();
        vault
            .create_new(12, &args.wallet_pin, "")
            .context("creating validator wallet")?;
        vault.save(&wallet_path, &args.wallet_pin).context("saving validator wallet")?;
        warn!(path = %wallet_path.display(), "new wallet created; back up this file and its recovery phrase");
        vault
    };
    let account = vault.get_account(0).context("deriving validator key")?;
    let keypair = account.keypair().context("loading validator key")?;
    info!(address = %keypair.address, "validator identity");

    if !args.bootstrap.is_empty() {
        info!(peers = args.bootstrap.len(), "seed peers configured for transport");
    }

    // ── Channels ──────────────────────────────────────────────────────────────
    let (command_tx, command_rx) = tokio::sync::mpsc::channel(256);
    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(256);
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel::<serde_json::Value>(256);

    // The socket transport is an external collaborator: it feeds
    // authenticated-candidate messages into `inbound_tx` and drains
    // `outbound_rx`. Without one attached, outbound envelopes are dropped
    // after logging.
    tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let msg_type = envelope
                .get("type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("?")
                .to_string();
            tracing::debug!(msg_type = %msg_type, "outbound envelope ready for transport");
        }
    });

    // ── Node task (single writer) ─────────────────────────────────────────────
    let task = NodeTask::new(
        ledger,
        Mempool::default(),
        vault,
        keypair,
        command_rx,
        inbound_rx,
        outbound_tx,
    );
    tokio::spawn(async move {
        if let Err(e) = task.run().await {
            error!(error = %e, "fatal protocol error, halting");
            std::process::exit(1);
        }
    });

    // ── Status loop ───────────────────────────────────────────────────────────
    let status_client = NodeClient::new(command_tx.clone());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Ok(health) = status_client.health().await {
                info!(
                    height = health.height,
                    peers = health.peers,
                    validators = health.validator_count,
                    "node status"
                );
            }
        }
    });

    // ── HTTP surface ──────────────────────────────────────────────────────────
    let _transport_inbound = inbound_tx;
    timpal_rpc::serve(args.rpc_addr, NodeClient::new(command_tx))
        .await
        .context("HTTP server")?;
    Ok(())
}

/// Load genesis params from JSON, or build a single-node dev genesis
/// anchored at the current time. The dev genesis is not shareable: two
/// nodes started this way produce different chains.
fn load_or_default_genesis_params(path: Option<&std::path::Path>) -> anyhow::Result<GenesisParams> {
    if let Some(p) = path {
        let json = std::fs::read_to_string(p)
            .with_context(|| format!("reading genesis params from {}", p.display()))?;
        return GenesisParams::from_json(&json).context("parsing genesis params");
    }
    warn!("no --genesis-params given; generating a development genesis (DO NOT USE IN PRODUCTION)");
    Ok(GenesisParams { genesis_timestamp: unix_now(), allocations: vec![] })
}
