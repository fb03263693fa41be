//! Chain sync coordination.
//!
//! `ChainSyncCoordinator` owns the wallet, the block store and a peer
//! group, and guards them behind an idempotent `Created -> Started ->
//! Stopped` lifecycle. It is a composition wrapper: the peer group stays a
//! plain client, the coordinator adds the state machine on top.
//!
//! Lifecycle rules:
//! - `start` initializes the wallet watch-list exactly once; a second call
//!   logs a warning and no-ops.
//! - `stop` closes the block store before releasing the peer group, so
//!   in-flight download deliveries can no longer touch the store. Stopping
//!   before starting is a safe no-op.
//! - `download` is meaningful only after `start`; earlier calls are
//!   silently ignored.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bitcoin::Block;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use common::BridgeError;

use crate::bitcoin::block_store::BlockStore;
use crate::bitcoin::peer_group::{PeerEvent, PeerGroup};
use crate::bitcoin::wallet::{Wallet, WalletStore};

/// Lifecycle state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Created,
    Started,
    Stopped,
}

/// Peer connectivity health, published through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerHealth {
    /// No connectivity information yet.
    Unknown,
    /// Zero peers connected; block delivery is stalled.
    NoPeers,
    /// At least one peer connected.
    Connected(usize),
}

impl PeerHealth {
    pub fn is_degraded(&self) -> bool {
        matches!(self, PeerHealth::NoPeers)
    }
}

/// Coordinates wallet, block store and peer group under one lifecycle.
pub struct ChainSyncCoordinator {
    peer_group: Arc<dyn PeerGroup>,
    block_store: Arc<BlockStore>,
    wallet: Arc<Mutex<Wallet>>,
    wallet_store: Arc<WalletStore>,
    state: Mutex<SyncState>,
    health_tx: watch::Sender<PeerHealth>,
    block_subscribers: Arc<StdMutex<Vec<mpsc::Sender<Block>>>>,
    wallet_inits: AtomicUsize,
}

impl ChainSyncCoordinator {
    pub fn new(
        peer_group: Arc<dyn PeerGroup>,
        block_store: Arc<BlockStore>,
        wallet_store: Arc<WalletStore>,
    ) -> Self {
        let (health_tx, _) = watch::channel(PeerHealth::Unknown);
        Self {
            peer_group,
            block_store,
            wallet: Arc::new(Mutex::new(Wallet::new())),
            wallet_store,
            state: Mutex::new(SyncState::Created),
            health_tx,
            block_subscribers: Arc::new(StdMutex::new(Vec::new())),
            wallet_inits: AtomicUsize::new(0),
        }
    }

    /// Start syncing: initialize the wallet once, connect the peer group
    /// and begin delivering blocks and peer events. Idempotent.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        match *state {
            SyncState::Started => {
                warn!("Chain sync already started, ignoring start()");
                return Ok(());
            }
            SyncState::Stopped => {
                warn!("Chain sync already stopped, ignoring start()");
                return Ok(());
            }
            SyncState::Created => {}
        }

        // Wallet watch-list initialization happens exactly once, under the
        // same lock that serializes the state transition.
        let persisted = self.wallet_store.load()?;
        {
            let mut wallet = self.wallet.lock().await;
            *wallet = persisted;
            info!(
                "Wallet initialized ({} watched addresses, {} utxos)",
                wallet.watched_count(),
                wallet.utxos().len()
            );
        }
        self.wallet_inits.fetch_add(1, Ordering::SeqCst);

        self.peer_group.connect().await?;

        let block_rx = self.peer_group.subscribe_blocks().await?;
        let peer_rx = self.peer_group.subscribe_peer_events().await?;

        self.spawn_block_forwarder(block_rx);
        self.spawn_peer_watcher(peer_rx);

        *state = SyncState::Started;
        info!("Chain sync started");
        Ok(())
    }

    /// Stop syncing: close the block store first, then release the peer
    /// group. Idempotent; stop before start is a no-op.
    pub async fn stop(&self) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        match *state {
            SyncState::Created => {
                warn!("Chain sync never started, ignoring stop()");
                return Ok(());
            }
            SyncState::Stopped => {
                warn!("Chain sync already stopped, ignoring stop()");
                return Ok(());
            }
            SyncState::Started => {}
        }

        // Close the store before the network goes away: a late block
        // delivery now fails the insert instead of racing the teardown.
        self.block_store.close();
        self.peer_group.shutdown().await?;

        *state = SyncState::Stopped;
        info!("Chain sync stopped");
        Ok(())
    }

    /// Request (or resume) block download. Ignored before start.
    pub async fn download(&self) -> Result<(), BridgeError> {
        let state = self.state.lock().await;
        if *state != SyncState::Started {
            debug!("download() before start, ignoring");
            return Ok(());
        }
        self.peer_group.start_download().await
    }

    /// Subscribe to blocks as the coordinator receives them.
    pub fn subscribe_blocks(&self) -> mpsc::Receiver<Block> {
        let (tx, rx) = mpsc::channel(64);
        self.block_subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(tx);
        rx
    }

    /// Watch channel carrying peer connectivity health.
    pub fn health_receiver(&self) -> watch::Receiver<PeerHealth> {
        self.health_tx.subscribe()
    }

    /// The shared wallet mutex. The download path and the withdrawal
    /// orchestrator both serialize through this handle.
    pub fn wallet(&self) -> Arc<Mutex<Wallet>> {
        self.wallet.clone()
    }

    pub fn wallet_store(&self) -> Arc<WalletStore> {
        self.wallet_store.clone()
    }

    pub async fn state(&self) -> SyncState {
        *self.state.lock().await
    }

    /// How many times the wallet watch-list has been initialized.
    /// Diagnostic; stays at one for a healthy lifecycle.
    pub fn wallet_initializations(&self) -> usize {
        self.wallet_inits.load(Ordering::SeqCst)
    }

    fn spawn_block_forwarder(&self, mut block_rx: mpsc::Receiver<Block>) {
        let block_store = self.block_store.clone();
        let subscribers = self.block_subscribers.clone();
        tokio::spawn(async move {
            while let Some(block) = block_rx.recv().await {
                let hash = block.block_hash().to_string();
                match block_store.insert(&hash, block.header.time) {
                    Ok(()) => debug!("Stored block {}", hash),
                    Err(e) => {
                        // A close that raced this delivery; drop the block.
                        debug!("Skipping block {} after store close: {}", hash, e);
                        continue;
                    }
                }
                let senders: Vec<mpsc::Sender<Block>> = {
                    let subs = subscribers.lock().expect("subscriber lock poisoned");
                    subs.clone()
                };
                for tx in senders {
                    let _ = tx.send(block.clone()).await;
                }
            }
            debug!("Block forwarder finished");
        });
    }

    fn spawn_peer_watcher(&self, mut peer_rx: mpsc::Receiver<PeerEvent>) {
        let health_tx = self.health_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = peer_rx.recv().await {
                let health = match event.peer_count() {
                    0 => {
                        warn!("No Bitcoin peers connected");
                        PeerHealth::NoPeers
                    }
                    n => {
                        debug!("{} Bitcoin peers connected", n);
                        PeerHealth::Connected(n)
                    }
                };
                let _ = health_tx.send(health);
            }
            debug!("Peer watcher finished");
        });
    }
}
