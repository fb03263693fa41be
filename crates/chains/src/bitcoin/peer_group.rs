//! Peer-group abstraction over the Bitcoin network.
//!
//! The bridge only consumes confirmed blocks and broadcasts raw signed
//! transactions; the actual peer-to-peer transport lives outside this
//! repository behind the `PeerGroup` trait. `StubPeerGroup` is the
//! in-process implementation used by tests.

use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::{Block, Transaction, Txid};
use tokio::sync::mpsc;
use tracing::debug;

use common::BridgeError;

/// Peer connectivity change, as observed by the peer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    PeerConnected { peer_count: usize },
    PeerDisconnected { peer_count: usize },
}

impl PeerEvent {
    pub fn peer_count(&self) -> usize {
        match self {
            PeerEvent::PeerConnected { peer_count } => *peer_count,
            PeerEvent::PeerDisconnected { peer_count } => *peer_count,
        }
    }
}

/// Client surface of the Bitcoin peer-to-peer network.
#[async_trait]
pub trait PeerGroup: Send + Sync {
    /// Begin connecting to peers.
    async fn connect(&self) -> Result<(), BridgeError>;

    /// Release all network resources.
    async fn shutdown(&self) -> Result<(), BridgeError>;

    /// Begin (or resume) downloading the block chain.
    async fn start_download(&self) -> Result<(), BridgeError>;

    /// Broadcast a fully signed transaction.
    async fn broadcast_transaction(&self, tx: &Transaction) -> Result<Txid, BridgeError>;

    /// Subscribe to downloaded blocks, delivered in arrival order.
    async fn subscribe_blocks(&self) -> Result<mpsc::Receiver<Block>, BridgeError>;

    /// Subscribe to peer connectivity changes.
    async fn subscribe_peer_events(&self) -> Result<mpsc::Receiver<PeerEvent>, BridgeError>;
}

#[derive(Default)]
struct StubInner {
    connected: bool,
    download_started: bool,
    block_subscribers: Vec<mpsc::Sender<Block>>,
    peer_subscribers: Vec<mpsc::Sender<PeerEvent>>,
    broadcasts: Vec<Transaction>,
}

/// In-process peer group for tests and local runs.
#[derive(Default)]
pub struct StubPeerGroup {
    inner: Mutex<StubInner>,
}

impl StubPeerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a block to all block subscribers.
    pub async fn push_block(&self, block: Block) {
        let senders: Vec<mpsc::Sender<Block>> = {
            let inner = self.inner.lock().expect("peer group lock poisoned");
            inner.block_subscribers.clone()
        };
        for tx in senders {
            let _ = tx.send(block.clone()).await;
        }
    }

    /// Deliver a peer connectivity event to all subscribers.
    pub async fn emit_peer_event(&self, event: PeerEvent) {
        let senders: Vec<mpsc::Sender<PeerEvent>> = {
            let inner = self.inner.lock().expect("peer group lock poisoned");
            inner.peer_subscribers.clone()
        };
        for tx in senders {
            let _ = tx.send(event).await;
        }
    }

    /// Transactions handed to `broadcast_transaction` so far.
    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.inner
            .lock()
            .expect("peer group lock poisoned")
            .broadcasts
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().expect("peer group lock poisoned").connected
    }

    pub fn download_started(&self) -> bool {
        self.inner
            .lock()
            .expect("peer group lock poisoned")
            .download_started
    }
}

#[async_trait]
impl PeerGroup for StubPeerGroup {
    async fn connect(&self) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock().expect("peer group lock poisoned");
        inner.connected = true;
        debug!("Stub peer group connected");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock().expect("peer group lock poisoned");
        inner.connected = false;
        inner.download_started = false;
        debug!("Stub peer group shut down");
        Ok(())
    }

    async fn start_download(&self) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock().expect("peer group lock poisoned");
        if !inner.connected {
            return Err(BridgeError::Network("peer group not connected".into()));
        }
        inner.download_started = true;
        Ok(())
    }

    async fn broadcast_transaction(&self, tx: &Transaction) -> Result<Txid, BridgeError> {
        let mut inner = self.inner.lock().expect("peer group lock poisoned");
        if !inner.connected {
            return Err(BridgeError::Network("peer group not connected".into()));
        }
        inner.broadcasts.push(tx.clone());
        Ok(tx.compute_txid())
    }

    async fn subscribe_blocks(&self) -> Result<mpsc::Receiver<Block>, BridgeError> {
        let (tx, rx) = mpsc::channel(64);
        let mut inner = self.inner.lock().expect("peer group lock poisoned");
        inner.block_subscribers.push(tx);
        Ok(rx)
    }

    async fn subscribe_peer_events(&self) -> Result<mpsc::Receiver<PeerEvent>, BridgeError> {
        let (tx, rx) = mpsc::channel(64);
        let mut inner = self.inner.lock().expect("peer group lock poisoned");
        inner.peer_subscribers.push(tx);
        Ok(rx)
    }
}
