//! Bitcoin chain support.
//!
//! Includes:
//! - Canonical multisig derivation (redeem script + P2SH address)
//! - Wallet state and persistence
//! - Block storage
//! - Peer-group client abstraction and events
//! - The chain sync coordinator

pub mod block_store;
pub mod multisig;
pub mod peer_group;
pub mod sync;
pub mod wallet;

pub use block_store::BlockStore;
pub use multisig::{
    canonical_key_order, derive_multisig_address, multisig_redeem_script, MultisigSpec,
};
pub use peer_group::{PeerEvent, PeerGroup, StubPeerGroup};
pub use sync::{ChainSyncCoordinator, PeerHealth, SyncState};
pub use wallet::{Utxo, Wallet, WalletStore};
