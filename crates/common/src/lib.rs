//! Shared types for the notary bridge.
//!
//! This crate holds the domain model used across the bridge crates:
//! - The error taxonomy (`BridgeError`)
//! - Address bookkeeping types (`BtcAddress`, `AddressInfo`, `OwnerType`)
//! - Withdrawal and deposit types
//! - Exact satoshi/BTC conversion

pub mod amount;
pub mod types;

pub use amount::{format_btc, parse_btc};
pub use types::{
    signing_threshold, AddressInfo, BtcAddress, DepositEvent, FeeRate, NotaryPeer, OwnerType,
    WithdrawalRequest, ADDRESS_INFO_SCHEMA, BLOCK_TIME_SAFETY_MARGIN_MS,
};

/// Errors surfaced by the bridge core.
///
/// The variants follow the operational taxonomy: exhaustion states
/// (`NoFreeAddress`, `InsufficientFunds`, `InsufficientSignatures`) are
/// retryable by the caller; `Conflict` means retry with fresh reads;
/// `Configuration` halts the affected subsystem; `CorruptRecord` is never
/// skipped because it signals divergent custody state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// No address with owner type `Free` exists right now.
    #[error("no free address available")]
    NoFreeAddress,

    /// The wallet cannot cover the requested amount plus fee.
    #[error("insufficient funds: have {have} sats, need {need} sats (including fee)")]
    InsufficientFunds { have: u64, need: u64 },

    /// Not enough valid notary signatures arrived within the waiting window.
    #[error("insufficient signatures: got {got}, threshold {threshold}")]
    InsufficientSignatures { got: usize, threshold: usize },

    /// A concurrent writer won; re-read and retry.
    #[error("ledger transaction conflict: {0}")]
    Conflict(String),

    /// Fatal misconfiguration, e.g. a missing change address.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The ledger backend failed or is unreachable.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// The Bitcoin network side failed or is unreachable.
    #[error("network error: {0}")]
    Network(String),

    /// A stored record did not deserialize into its expected shape.
    #[error("corrupt record in account {account}, key {key}: {reason}")]
    CorruptRecord {
        account: String,
        key: String,
        reason: String,
    },

    /// Local persistent storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A public key did not parse or had the wrong length.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Redeem script construction or address hashing failed.
    #[error("script error: {0}")]
    Script(String),

    /// No fee observation has been published yet; withdrawals fail closed.
    #[error("fee rate unavailable")]
    FeeRateUnavailable,

    /// Catch-all for protocol-level violations.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BridgeError {
    /// Whether the caller may retry the operation after a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::NoFreeAddress
                | BridgeError::InsufficientFunds { .. }
                | BridgeError::InsufficientSignatures { .. }
                | BridgeError::Conflict(_)
        )
    }
}
