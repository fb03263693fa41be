//! Ledger client trait and command model.
//!
//! Writes go through `execute` as an atomic batch: either every command in
//! the batch applies, or none do. Each detail write carries an
//! `Expectation` over the key's previous value; a failed expectation
//! rejects the whole batch with a `Conflict`. That rejection is the
//! tie-breaker for concurrent claimants racing over the same address.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use common::BridgeError;

/// Precondition on the previous value of an account detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expectation {
    /// Unconditional write.
    Any,
    /// The key must not exist yet.
    Absent,
    /// The key must currently hold exactly this value.
    Equals(String),
}

/// One command inside an atomic ledger batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    /// Create a new account. Fails the batch if the account already exists.
    CreateAccount {
        account: String,
        /// Ledger-side co-signature quorum for the account, if any.
        quorum: Option<u32>,
    },
    /// Write one account detail, subject to the expectation.
    PutDetail {
        account: String,
        key: String,
        value: String,
        expect: Expectation,
    },
}

/// An atomic batch of ledger commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBatch {
    pub commands: Vec<LedgerCommand>,
}

impl CommandBatch {
    pub fn new(commands: Vec<LedgerCommand>) -> Self {
        Self { commands }
    }

    /// Canonical byte representation signed by co-signers.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, BridgeError> {
        serde_json::to_vec(self).map_err(|e| BridgeError::Serialization(e.to_string()))
    }
}

/// One notary's signature over a `CommandBatch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosignerSignature {
    /// Hex-encoded ed25519 verifying key.
    pub public_key: String,
    /// Hex-encoded ed25519 signature over `CommandBatch::canonical_bytes`.
    pub signature: String,
}

/// A record carried inside a confirmed ledger block.
///
/// The bridge only interprets records it recognizes by `kind`; everything
/// else passes through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub kind: String,
    /// JSON payload, interpreted per `kind`.
    pub payload: String,
}

/// A confirmed ledger block, streamed in commit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBlock {
    pub height: u64,
    pub records: Vec<LedgerRecord>,
    /// Block commit time in Unix milliseconds.
    pub time_ms: i64,
}

/// Client surface of the external ledger.
///
/// The production transport lives outside this repository; every
/// implementation must provide ACID semantics per `execute` call and
/// deliver blocks strictly in commit order.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Read all details of an account.
    async fn get_details(&self, account: &str) -> Result<BTreeMap<String, String>, BridgeError>;

    /// Apply a command batch atomically.
    async fn execute(&self, batch: CommandBatch) -> Result<(), BridgeError>;

    /// Submit a batch that the ledger itself gates on an M-of-N co-signature
    /// quorum for the target account.
    async fn submit_cosigned(
        &self,
        account: &str,
        batch: CommandBatch,
        signatures: Vec<CosignerSignature>,
    ) -> Result<(), BridgeError>;

    /// Subscribe to confirmed blocks in commit order.
    async fn subscribe_blocks(&self) -> Result<mpsc::Receiver<LedgerBlock>, BridgeError>;

    /// Create an account outside any larger batch.
    async fn create_account(&self, account: &str, quorum: Option<u32>) -> Result<(), BridgeError> {
        self.execute(CommandBatch::new(vec![LedgerCommand::CreateAccount {
            account: account.to_string(),
            quorum,
        }]))
        .await
    }

    /// Write one detail unconditionally.
    async fn put_detail(
        &self,
        account: &str,
        key: &str,
        value: &str,
    ) -> Result<(), BridgeError> {
        self.execute(CommandBatch::new(vec![LedgerCommand::PutDetail {
            account: account.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            expect: Expectation::Any,
        }]))
        .await
    }
}
