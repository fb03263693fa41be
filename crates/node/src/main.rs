//! Notary bridge node.
//!
//! One federation member. Wires the chain sync coordinator, deposit
//! detection, withdrawal orchestration and the ledger listener together
//! and exposes health and status over HTTP. The production ledger and
//! Bitcoin transports are deployment glue plugged in behind the
//! `LedgerClient` and `PeerGroup` traits; this binary runs against the
//! in-process implementations, which is enough for a local federation
//! rehearsal.

mod handlers;
mod keys;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use clap::Parser;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use chains::bitcoin::{BlockStore, ChainSyncCoordinator, StubPeerGroup, WalletStore};
use common::NotaryPeer;
use custody::NotaryCosigner as _;
use ledger::LedgerClient as _;

use crate::state::AppState;

/// Bridge node CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "bridge-node")]
#[command(author, version, about = "Notary bridge node")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, env = "BRIDGE_PORT", default_value = "3000")]
    port: u16,

    /// Data directory for key material and stores.
    #[arg(long, env = "BRIDGE_DATA_DIR", default_value = "./data")]
    data_dir: std::path::PathBuf,

    /// This notary's node id, as listed in the governance account.
    #[arg(long, env = "BRIDGE_NODE_ID", default_value = "notary-1")]
    node_id: String,

    /// Bitcoin network (bitcoin, testnet, signet, regtest).
    #[arg(long, env = "BRIDGE_NETWORK", default_value = "bitcoin")]
    network: bitcoin::Network,

    /// Ledger account holding the address allocation records.
    #[arg(long, env = "BRIDGE_ALLOCATION_ACCOUNT", default_value = "btc-addresses")]
    allocation_account: String,

    /// Ledger account holding the notary registry.
    #[arg(long, env = "BRIDGE_GOVERNANCE_ACCOUNT", default_value = "notary-registry")]
    governance_account: String,

    /// Seconds to wait for each co-signer during withdrawal signing.
    #[arg(long, env = "BRIDGE_SIGNING_TIMEOUT_SECS", default_value = "30")]
    signing_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    info!("========================================");
    info!("  Notary Bridge Node Starting");
    info!("========================================");

    std::fs::create_dir_all(&args.data_dir)?;

    // Key material: one ledger-side ed25519 identity, one Bitcoin-side
    // secp256k1 multisig share.
    let ledger_key = ledger::NotaryLedgerKey::load_or_generate(args.data_dir.join("ledger-key.json"));
    let btc_key = keys::load_or_generate_btc_key(&args.data_dir.join("btc-key.json"))?;
    let cosigner = Arc::new(custody::LocalCosigner::new(btc_key));

    info!("Node configuration:");
    info!("  - Node ID: {}", args.node_id);
    info!("  - Network: {}", args.network);
    info!("  - Ledger identity: {}", ledger_key.verifying_key_hex());
    info!("  - Multisig key: {}", cosigner.public_key_hex());
    info!("  - Data dir: {}", args.data_dir.display());

    // Ledger backend. The production transport is wired in behind
    // `LedgerClient` at deployment time.
    let ledger_client = Arc::new(ledger::MemoryLedger::with_accounts(&[
        args.allocation_account.as_str(),
        args.governance_account.as_str(),
    ]));

    // Announce this notary in the governance account.
    let peer = NotaryPeer {
        node_id: args.node_id.clone(),
        btc_public_key: cosigner.public_key_hex(),
    };
    ledger_client
        .put_detail(
            &args.governance_account,
            &args.node_id,
            &serde_json::to_string(&peer)?,
        )
        .await?;

    // Bitcoin side: stores, peer group, sync coordinator.
    let wallet_store = Arc::new(WalletStore::open(args.data_dir.join("wallet.db"))?);
    let block_store = Arc::new(BlockStore::open(args.data_dir.join("blocks.db"))?);
    let peer_group = Arc::new(StubPeerGroup::new());
    let sync = Arc::new(ChainSyncCoordinator::new(
        peer_group.clone(),
        block_store,
        wallet_store.clone(),
    ));

    let allocation = custody::AddressAllocationLedger::new(
        ledger_client.clone(),
        args.allocation_account.clone(),
    );

    // Deposit detection over the coordinator's block feed.
    let detector = Arc::new(custody::DepositDetector::new(
        allocation.clone(),
        sync.wallet(),
        wallet_store.clone(),
        args.network,
    ));
    if let Err(e) = detector.refresh_index().await {
        warn!("Initial deposit index refresh failed: {}", e);
    }
    {
        // Registrations made by other notaries must show up here too.
        let detector = detector.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                if let Err(e) = detector.refresh_index().await {
                    warn!("Deposit index refresh failed: {}", e);
                }
            }
        });
    }
    let (deposit_tx, mut deposit_rx) = mpsc::channel(256);
    let _deposit_pipeline =
        custody::spawn_deposit_pipeline(detector.clone(), sync.subscribe_blocks(), deposit_tx);
    tokio::spawn(async move {
        // Deposit events are forwarded to the ledger gateway outside this
        // process; locally we account for them in the log.
        while let Some(event) = deposit_rx.recv().await {
            info!(
                "Deposit: {} BTC for client {} (tx {})",
                event.amount, event.client_id, event.tx_id
            );
        }
    });

    // Fee-rate tracking fed by the block feed, published on a cadence.
    let fee_tracker = Arc::new(custody::FeeRateTracker::new());
    let _fee_publisher = custody::spawn_fee_publisher(fee_tracker.clone());
    {
        let fee_tracker = fee_tracker.clone();
        let wallet = sync.wallet();
        let mut blocks = sync.subscribe_blocks();
        tokio::spawn(async move {
            while let Some(block) = blocks.recv().await {
                let wallet = wallet.lock().await;
                fee_tracker.observe_block(&block, |outpoint| {
                    let txid = outpoint.txid.to_string();
                    wallet
                        .utxos()
                        .iter()
                        .find(|u| u.txid == txid && u.vout == outpoint.vout)
                        .map(|u| u.value)
                });
            }
        });
    }

    // Withdrawal intents from the ledger block stream.
    let height_store = Arc::new(ledger::HeightStore::new(args.data_dir.join("ledger-height")));
    let ledger_blocks = ledger_client.subscribe_blocks().await?;
    let (intent_tx, mut intent_rx) = mpsc::channel(64);
    let _intent_listener =
        custody::spawn_intent_listener(ledger_blocks, height_store.clone(), intent_tx);

    let orchestrator = Arc::new(custody::WithdrawalOrchestrator::new(
        allocation.clone(),
        sync.wallet(),
        wallet_store,
        fee_tracker.clone(),
        peer_group,
        vec![cosigner],
        args.network,
        Duration::from_secs(args.signing_timeout_secs),
    ));
    tokio::spawn(async move {
        // Withdrawals run one at a time, in ledger commit order.
        while let Some(request) = intent_rx.recv().await {
            match orchestrator.withdraw(&request).await {
                Ok(txid) => info!("Withdrawal {} broadcast as {}", request.request_id, txid),
                Err(e) => warn!("Withdrawal {} failed: {}", request.request_id, e),
            }
        }
    });

    // Health: the peer watch channel drives the chain-sync flag.
    let health = Arc::new(custody::HealthRegistry::new());
    health.set("chain-sync", false);
    health.set("ledger-listener", true);
    {
        let health = health.clone();
        let mut peer_health = sync.health_receiver();
        tokio::spawn(async move {
            while peer_health.changed().await.is_ok() {
                let degraded = peer_health.borrow().is_degraded();
                health.set("chain-sync", !degraded);
            }
        });
    }

    sync.start().await?;
    sync.download().await?;
    health.set("chain-sync", true);

    let state = AppState {
        health,
        sync: sync.clone(),
        fee_tracker,
        height_store,
    };

    // The health surface is read by an external dashboard.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::full_status))
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Endpoints:");
    info!("  GET  /health   - Health check");
    info!("  GET  /status   - Full node status");
    info!("");
    info!("Bridge node ready on {}", addr);
    info!("========================================");

    axum::serve(listener, app).await?;

    Ok(())
}
