//! In-memory ledger implementation.
//!
//! Backs tests and local single-process runs. Models the guarantees the
//! bridge relies on: per-batch atomicity, expectation (compare-and-swap)
//! validation, co-signature quorum checks and in-order block delivery.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tokio::sync::mpsc;
use tracing::debug;

use common::BridgeError;

use crate::client::{
    CommandBatch, CosignerSignature, Expectation, LedgerBlock, LedgerClient, LedgerCommand,
};

#[derive(Debug, Default)]
struct Account {
    quorum: Option<u32>,
    details: BTreeMap<String, String>,
    /// Hex-encoded ed25519 verifying keys allowed to co-sign for this account.
    cosigners: Vec<String>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    subscribers: Vec<mpsc::Sender<LedgerBlock>>,
}

/// In-memory `LedgerClient`.
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Convenience constructor creating the given accounts up front.
    pub fn with_accounts(accounts: &[&str]) -> Self {
        let ledger = Self::new();
        {
            let mut inner = ledger.inner.lock().expect("ledger lock poisoned");
            for account in accounts {
                inner.accounts.insert(account.to_string(), Account::default());
            }
        }
        ledger
    }

    /// Register the co-signer set for an account (test/bootstrap helper).
    pub fn set_cosigners(&self, account: &str, quorum: u32, keys: Vec<String>) {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        let entry = inner.accounts.entry(account.to_string()).or_default();
        entry.quorum = Some(quorum);
        entry.cosigners = keys;
    }

    /// Push a confirmed block to all subscribers, in order.
    pub async fn push_block(&self, block: LedgerBlock) {
        let senders: Vec<mpsc::Sender<LedgerBlock>> = {
            let inner = self.inner.lock().expect("ledger lock poisoned");
            inner.subscribers.clone()
        };
        for tx in senders {
            // A closed receiver just means the subscriber went away.
            let _ = tx.send(block.clone()).await;
        }
    }

    fn validate(inner: &Inner, batch: &CommandBatch) -> Result<(), BridgeError> {
        for command in &batch.commands {
            match command {
                LedgerCommand::CreateAccount { account, .. } => {
                    if inner.accounts.contains_key(account) {
                        return Err(BridgeError::Conflict(format!(
                            "account {} already exists",
                            account
                        )));
                    }
                }
                LedgerCommand::PutDetail {
                    account,
                    key,
                    expect,
                    ..
                } => {
                    // Accounts created earlier in the same batch are visible
                    // to later writes only through Expectation::Any/Absent.
                    let current = inner
                        .accounts
                        .get(account)
                        .and_then(|a| a.details.get(key));
                    let created_in_batch = batch.commands.iter().any(|c| {
                        matches!(c, LedgerCommand::CreateAccount { account: a, .. } if a == account)
                    });
                    if current.is_none()
                        && !created_in_batch
                        && !inner.accounts.contains_key(account)
                    {
                        return Err(BridgeError::Ledger(format!("unknown account {}", account)));
                    }
                    match expect {
                        Expectation::Any => {}
                        Expectation::Absent => {
                            if current.is_some() {
                                return Err(BridgeError::Conflict(format!(
                                    "detail {}/{} already set",
                                    account, key
                                )));
                            }
                        }
                        Expectation::Equals(expected) => {
                            if current != Some(expected) {
                                return Err(BridgeError::Conflict(format!(
                                    "detail {}/{} changed since read",
                                    account, key
                                )));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(inner: &mut Inner, batch: CommandBatch) {
        for command in batch.commands {
            match command {
                LedgerCommand::CreateAccount { account, quorum } => {
                    inner.accounts.insert(
                        account,
                        Account {
                            quorum,
                            ..Account::default()
                        },
                    );
                }
                LedgerCommand::PutDetail {
                    account,
                    key,
                    value,
                    ..
                } => {
                    inner
                        .accounts
                        .entry(account)
                        .or_default()
                        .details
                        .insert(key, value);
                }
            }
        }
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn get_details(&self, account: &str) -> Result<BTreeMap<String, String>, BridgeError> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        inner
            .accounts
            .get(account)
            .map(|a| a.details.clone())
            .ok_or_else(|| BridgeError::Ledger(format!("unknown account {}", account)))
    }

    async fn execute(&self, batch: CommandBatch) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        Self::validate(&inner, &batch)?;
        Self::apply(&mut inner, batch);
        Ok(())
    }

    async fn submit_cosigned(
        &self,
        account: &str,
        batch: CommandBatch,
        signatures: Vec<CosignerSignature>,
    ) -> Result<(), BridgeError> {
        let payload = batch.canonical_bytes()?;

        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        let (quorum, cosigners) = {
            let acct = inner
                .accounts
                .get(account)
                .ok_or_else(|| BridgeError::Ledger(format!("unknown account {}", account)))?;
            (acct.quorum.unwrap_or(1), acct.cosigners.clone())
        };

        let mut valid = 0usize;
        for sig in &signatures {
            if !cosigners.contains(&sig.public_key) {
                debug!("Ignoring signature from unknown co-signer {}", sig.public_key);
                continue;
            }
            if verify_signature(&sig.public_key, &sig.signature, &payload) {
                valid += 1;
            }
        }

        if valid < quorum as usize {
            return Err(BridgeError::InsufficientSignatures {
                got: valid,
                threshold: quorum as usize,
            });
        }

        Self::validate(&inner, &batch)?;
        Self::apply(&mut inner, batch);
        Ok(())
    }

    async fn subscribe_blocks(&self) -> Result<mpsc::Receiver<LedgerBlock>, BridgeError> {
        let (tx, rx) = mpsc::channel(64);
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        inner.subscribers.push(tx);
        Ok(rx)
    }
}

fn verify_signature(public_key_hex: &str, signature_hex: &str, payload: &[u8]) -> bool {
    let Ok(key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let key_bytes: [u8; 32] = match key_bytes.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    key.verify(payload, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::NotaryLedgerKey;

    fn put(account: &str, key: &str, value: &str, expect: Expectation) -> LedgerCommand {
        LedgerCommand::PutDetail {
            account: account.into(),
            key: key.into(),
            value: value.into(),
            expect,
        }
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let ledger = MemoryLedger::with_accounts(&["a"]);
        ledger.put_detail("a", "k1", "v1").await.unwrap();

        // Second command fails its expectation, so the first must not apply.
        let batch = CommandBatch::new(vec![
            put("a", "k2", "v2", Expectation::Any),
            put("a", "k1", "v9", Expectation::Equals("other".into())),
        ]);
        let err = ledger.execute(batch).await.unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));

        let details = ledger.get_details("a").await.unwrap();
        assert_eq!(details.get("k1").map(String::as_str), Some("v1"));
        assert!(!details.contains_key("k2"));
    }

    #[tokio::test]
    async fn test_cas_expectation_rejects_stale_write() {
        let ledger = MemoryLedger::with_accounts(&["a"]);
        ledger.put_detail("a", "k", "old").await.unwrap();

        let winner = CommandBatch::new(vec![put("a", "k", "new", Expectation::Equals("old".into()))]);
        ledger.execute(winner).await.unwrap();

        let loser = CommandBatch::new(vec![put("a", "k", "else", Expectation::Equals("old".into()))]);
        let err = ledger.execute(loser).await.unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_account_conflicts_on_duplicate() {
        let ledger = MemoryLedger::new();
        ledger.create_account("client-1", None).await.unwrap();
        let err = ledger.create_account("client-1", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_blocks_delivered_in_order() {
        let ledger = MemoryLedger::new();
        let mut rx = ledger.subscribe_blocks().await.unwrap();
        for height in 1..=3u64 {
            ledger
                .push_block(LedgerBlock {
                    height,
                    records: vec![],
                    time_ms: height as i64 * 1000,
                })
                .await;
        }
        for height in 1..=3u64 {
            assert_eq!(rx.recv().await.unwrap().height, height);
        }
    }

    #[tokio::test]
    async fn test_cosigned_submission_requires_quorum() {
        let ledger = MemoryLedger::with_accounts(&["shared"]);
        let k1 = NotaryLedgerKey::generate();
        let k2 = NotaryLedgerKey::generate();
        let k3 = NotaryLedgerKey::generate();
        ledger.set_cosigners(
            "shared",
            2,
            vec![
                k1.verifying_key_hex(),
                k2.verifying_key_hex(),
                k3.verifying_key_hex(),
            ],
        );

        let batch = CommandBatch::new(vec![put("shared", "k", "v", Expectation::Absent)]);
        let payload = batch.canonical_bytes().unwrap();

        // One signature is below the quorum of two.
        let err = ledger
            .submit_cosigned("shared", batch.clone(), vec![k1.cosign(&payload)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InsufficientSignatures { got: 1, threshold: 2 }
        ));

        ledger
            .submit_cosigned(
                "shared",
                batch,
                vec![k1.cosign(&payload), k2.cosign(&payload)],
            )
            .await
            .unwrap();
        let details = ledger.get_details("shared").await.unwrap();
        assert_eq!(details.get("k").map(String::as_str), Some("v"));
    }
}
