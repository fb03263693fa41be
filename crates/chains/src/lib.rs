//! Blockchain plumbing for the notary bridge.
//!
//! This crate provides the Bitcoin-side functionality:
//! - Multisig redeem script and P2SH address derivation
//! - Wallet state (watch-list + UTXO set) with SQLite persistence
//! - Block store with explicit close ordering
//! - Peer-group abstraction over the Bitcoin network
//! - Chain sync coordination with idempotent start/stop

pub mod bitcoin;
