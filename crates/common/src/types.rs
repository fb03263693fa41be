//! Domain types for address allocation, deposits and withdrawals.
//!
//! `AddressInfo` is the record stored on the ledger for every generated
//! multisig address. It is a tagged union over the owner lifecycle
//! (free -> change / registered) with an explicit schema version so older
//! notaries can reject records they do not understand instead of
//! misreading them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BridgeError;

/// Current schema version for serialized `AddressInfo` records.
pub const ADDRESS_INFO_SCHEMA: u32 = 1;

/// Owner lifecycle of a generated multisig address.
///
/// An address is created `Free`, and is only ever reclassified -- never
/// deleted. `Change` addresses receive withdrawal change; `Registered`
/// addresses are bound to exactly one ledger client and watched for
/// deposits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "owner_type", rename_all = "snake_case")]
pub enum OwnerType {
    Free,
    Change,
    Registered { client_id: String },
}

impl OwnerType {
    pub fn client_id(&self) -> Option<&str> {
        match self {
            OwnerType::Registered { client_id } => Some(client_id),
            _ => None,
        }
    }
}

impl std::fmt::Display for OwnerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerType::Free => write!(f, "free"),
            OwnerType::Change => write!(f, "change"),
            OwnerType::Registered { client_id } => write!(f, "registered({})", client_id),
        }
    }
}

/// Ledger-stored metadata for one multisig address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    /// Record schema version.
    pub schema: u32,
    /// Owner lifecycle state.
    #[serde(flatten)]
    pub owner: OwnerType,
    /// Hex-encoded notary public keys in canonical (lexicographic) order.
    /// This set fixes the redeem script for the address forever.
    pub notary_keys: Vec<String>,
    /// Id of the notary node that published the record.
    pub node_id: String,
}

impl AddressInfo {
    pub fn new(owner: OwnerType, notary_keys: Vec<String>, node_id: String) -> Self {
        Self {
            schema: ADDRESS_INFO_SCHEMA,
            owner,
            notary_keys,
            node_id,
        }
    }

    /// Parse a stored record, rejecting unknown schema versions.
    pub fn from_json(account: &str, key: &str, raw: &str) -> Result<Self, BridgeError> {
        let info: AddressInfo =
            serde_json::from_str(raw).map_err(|e| BridgeError::CorruptRecord {
                account: account.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        if info.schema != ADDRESS_INFO_SCHEMA {
            return Err(BridgeError::CorruptRecord {
                account: account.to_string(),
                key: key.to_string(),
                reason: format!("unsupported schema version {}", info.schema),
            });
        }
        Ok(info)
    }

    pub fn to_json(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|e| BridgeError::Serialization(e.to_string()))
    }
}

/// A generated multisig address together with its ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcAddress {
    /// Base58 P2SH address string.
    pub address: String,
    pub info: AddressInfo,
}

/// One active notary, as listed in the governance account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotaryPeer {
    pub node_id: String,
    /// Hex-encoded compressed secp256k1 public key (Bitcoin side).
    pub btc_public_key: String,
}

/// Number of notary signatures required to spend from an n-key multisig.
///
/// Integer floor division: `threshold(n) = n * 2 / 3 + 1`.
pub fn signing_threshold(n: usize) -> usize {
    n * 2 / 3 + 1
}

/// The most recently published fee observation.
///
/// Absence of a `FeeRate` is a distinct valid state: nothing has been
/// observed yet and withdrawals must fail closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate {
    pub sat_per_byte: u64,
    pub observed_at: DateTime<Utc>,
}

/// An externally created intent to move funds out of custody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub request_id: Uuid,
    /// Destination Bitcoin address.
    pub destination_address: String,
    /// Amount to send in satoshis.
    pub amount_sat: u64,
    /// The registered multisig address to spend from.
    pub source_address: String,
}

/// A detected deposit into a registered address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub tx_id: String,
    /// Block time minus the two-hour safety margin, in Unix milliseconds.
    /// Bitcoin block timestamps may run up to ~2h ahead of real time while
    /// the ledger enforces `created_time in [now-1d, now+5min]`.
    pub adjusted_time_ms: i64,
    pub client_id: String,
    /// Asset symbol, always "BTC".
    pub asset: String,
    /// Exact decimal BTC amount with 8 fractional digits.
    pub amount: String,
}

/// Milliseconds subtracted from block timestamps before they are handed to
/// the ledger. Hard external constraint, not a tunable.
pub const BLOCK_TIME_SAFETY_MARGIN_MS: i64 = 2 * 60 * 60 * 1000;
