//! Withdrawal orchestration.
//!
//! Builds the spending transaction for a withdrawal request and collects
//! notary signatures until the multisig threshold is reached:
//! 1. Resolve the federation's change address (exactly one must exist).
//! 2. Read the published fee rate; unset means refuse -- fail closed.
//! 3. Select unspent outputs of the source address under the shared
//!    wallet mutex, against the deterministic fee model.
//! 4. Build the transaction: amount to destination, remainder to change.
//! 5. Circulate the unsigned transaction to the co-signers, verifying and
//!    counting signatures until the threshold.
//! 6. Assemble the multisig script_sigs and broadcast.
//!
//! A failed withdrawal never partially broadcasts and never consumes
//! wallet outputs.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::blockdata::script::Builder;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::script::PushBytesBuf;
use bitcoin::secp256k1::{ecdsa::Signature, All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use chains::bitcoin::{MultisigSpec, PeerGroup, Utxo, Wallet, WalletStore};
use common::{BridgeError, WithdrawalRequest};

use crate::allocation::{AddressAllocationLedger, OwnerFilter};
use crate::feerate::FeeRateTracker;

/// Fee-model size of one multisig input, in bytes. Deliberately a fixed
/// constant rather than a real serialized size: every notary must compute
/// the same fee for the same transaction shape.
pub const BYTES_PER_INPUT: u64 = 180;

/// Fee-model size of one output, in bytes.
pub const BYTES_PER_OUTPUT: u64 = 34;

/// Outputs at or below this are burned into the fee instead of creating
/// dust change.
const DUST_LIMIT_SAT: u64 = 546;

/// Deterministic fee for a transaction shape at a given rate.
pub fn estimate_fee(n_inputs: usize, n_outputs: usize, sat_per_byte: u64) -> u64 {
    (BYTES_PER_INPUT * n_inputs as u64 + BYTES_PER_OUTPUT * n_outputs as u64) * sat_per_byte
}

/// What a co-signer needs to produce its signatures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosignRequest {
    pub request_id: String,
    /// Serialized unsigned transaction (hex).
    pub unsigned_tx_hex: String,
    /// Redeem script the signatures commit to (hex).
    pub redeem_script_hex: String,
    /// One legacy sighash per input (hex, 32 bytes each).
    pub sighashes: Vec<String>,
}

/// A co-signer's response: one DER signature per input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosignResponse {
    /// Hex-encoded compressed public key the signatures verify against.
    pub public_key: String,
    /// DER-encoded signatures (hex), one per input, no sighash byte.
    pub signatures: Vec<String>,
}

/// One notary's signing surface.
///
/// The local process signs through `LocalCosigner`; remote notaries are
/// reached through whatever transport the deployment wires in behind this
/// trait.
#[async_trait]
pub trait NotaryCosigner: Send + Sync {
    /// The key this co-signer signs with.
    fn public_key_hex(&self) -> String;

    async fn cosign(&self, request: &CosignRequest) -> Result<CosignResponse, BridgeError>;
}

/// Signs with this process's own notary key.
pub struct LocalCosigner {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
}

impl LocalCosigner {
    pub fn new(secret_key: SecretKey) -> Self {
        Self {
            secp: Secp256k1::new(),
            secret_key,
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, BridgeError> {
        let bytes = hex::decode(secret_hex)
            .map_err(|e| BridgeError::InvalidPublicKey(format!("bad secret hex: {}", e)))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| BridgeError::InvalidPublicKey(e.to_string()))?;
        Ok(Self::new(secret_key))
    }
}

#[async_trait]
impl NotaryCosigner for LocalCosigner {
    fn public_key_hex(&self) -> String {
        hex::encode(self.secret_key.public_key(&self.secp).serialize())
    }

    async fn cosign(&self, request: &CosignRequest) -> Result<CosignResponse, BridgeError> {
        let mut signatures = Vec::with_capacity(request.sighashes.len());
        for sighash_hex in &request.sighashes {
            let digest: [u8; 32] = hex::decode(sighash_hex)
                .map_err(|e| BridgeError::Protocol(format!("bad sighash hex: {}", e)))?
                .try_into()
                .map_err(|_| BridgeError::Protocol("sighash must be 32 bytes".into()))?;
            let message = Message::from_digest(digest);
            let signature = self.secp.sign_ecdsa(&message, &self.secret_key);
            signatures.push(hex::encode(signature.serialize_der()));
        }
        Ok(CosignResponse {
            public_key: self.public_key_hex(),
            signatures,
        })
    }
}

struct PreparedTransaction {
    tx: Transaction,
    selected: Vec<Utxo>,
    sighashes: Vec<[u8; 32]>,
    fee_sat: u64,
}

/// Orchestrates threshold-signed withdrawals.
pub struct WithdrawalOrchestrator {
    allocation: AddressAllocationLedger,
    wallet: Arc<tokio::sync::Mutex<Wallet>>,
    wallet_store: Arc<WalletStore>,
    fee_tracker: Arc<FeeRateTracker>,
    peer_group: Arc<dyn PeerGroup>,
    cosigners: Vec<Arc<dyn NotaryCosigner>>,
    network: Network,
    signing_timeout: Duration,
    secp: Secp256k1<All>,
}

impl WithdrawalOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        allocation: AddressAllocationLedger,
        wallet: Arc<tokio::sync::Mutex<Wallet>>,
        wallet_store: Arc<WalletStore>,
        fee_tracker: Arc<FeeRateTracker>,
        peer_group: Arc<dyn PeerGroup>,
        cosigners: Vec<Arc<dyn NotaryCosigner>>,
        network: Network,
        signing_timeout: Duration,
    ) -> Self {
        Self {
            allocation,
            wallet,
            wallet_store,
            fee_tracker,
            peer_group,
            cosigners,
            network,
            signing_timeout,
            secp: Secp256k1::new(),
        }
    }

    /// Execute one withdrawal end to end.
    pub async fn withdraw(&self, request: &WithdrawalRequest) -> Result<Txid, BridgeError> {
        info!(
            "Withdrawal {}: {} sats from {} to {}",
            request.request_id,
            request.amount_sat,
            request.source_address,
            request.destination_address
        );

        let change = self.allocation.change_address().await?;

        // Fee gating comes before any wallet access: with no published
        // rate there must be no selection side effects at all.
        let fee_rate = self
            .fee_tracker
            .current()
            .ok_or(BridgeError::FeeRateUnavailable)?;

        let spec = self.source_spec(request).await?;
        let redeem_script = spec.redeem_script()?;

        let prepared = self
            .prepare_transaction(request, &change.address, &redeem_script, fee_rate.sat_per_byte)
            .await?;

        let signatures = self
            .collect_signatures(request, &prepared, &spec, &redeem_script)
            .await?;

        let tx = assemble_multisig(prepared.tx, &signatures, &spec, &redeem_script)?;
        let txid = self.peer_group.broadcast_transaction(&tx).await?;

        // Only a broadcast transaction consumes wallet outputs.
        {
            let mut wallet = self.wallet.lock().await;
            for utxo in &prepared.selected {
                wallet.remove_utxo(&utxo.txid, utxo.vout);
            }
            self.wallet_store.save(&wallet)?;
        }

        info!(
            "Withdrawal {} broadcast as {} (fee {} sats)",
            request.request_id, txid, prepared.fee_sat
        );
        Ok(txid)
    }

    /// Rebuild the multisig spec for the source address and check it
    /// really derives that address.
    async fn source_spec(&self, request: &WithdrawalRequest) -> Result<MultisigSpec, BridgeError> {
        let addresses = self.allocation.list_addresses(OwnerFilter::Any).await?;
        let source = addresses
            .into_iter()
            .find(|a| a.address == request.source_address)
            .ok_or_else(|| {
                BridgeError::Protocol(format!(
                    "unknown source address {}",
                    request.source_address
                ))
            })?;

        let spec = MultisigSpec::from_keys(&source.info.notary_keys)?;
        let derived = spec.address(self.network)?;
        if derived != request.source_address {
            return Err(BridgeError::Protocol(format!(
                "stored keys for {} derive {}",
                request.source_address, derived
            )));
        }
        Ok(spec)
    }

    async fn prepare_transaction(
        &self,
        request: &WithdrawalRequest,
        change_address: &str,
        redeem_script: &ScriptBuf,
        sat_per_byte: u64,
    ) -> Result<PreparedTransaction, BridgeError> {
        let wallet = self.wallet.lock().await;
        let mut available = wallet.utxos_for(&request.source_address);
        drop(wallet);

        // Largest first keeps the input count (and so the fee) down.
        available.sort_by(|a, b| b.value.cmp(&a.value));
        let have: u64 = available.iter().map(|u| u.value).sum();

        let mut selected: Vec<Utxo> = Vec::new();
        let mut total: u64 = 0;
        for utxo in available {
            if total >= request.amount_sat + estimate_fee(selected.len(), 2, sat_per_byte) {
                break;
            }
            total += utxo.value;
            selected.push(utxo);
        }

        let fee_two_outputs = estimate_fee(selected.len(), 2, sat_per_byte);
        if total < request.amount_sat + fee_two_outputs {
            return Err(BridgeError::InsufficientFunds {
                have,
                need: request.amount_sat + fee_two_outputs,
            });
        }

        let destination = Address::from_str(&request.destination_address)
            .map_err(|e| BridgeError::Protocol(format!("invalid destination address: {}", e)))?
            .assume_checked();

        let mut outputs = vec![TxOut {
            value: Amount::from_sat(request.amount_sat),
            script_pubkey: destination.script_pubkey(),
        }];

        let change_sat = total - request.amount_sat - fee_two_outputs;
        let fee_sat = if change_sat > DUST_LIMIT_SAT {
            let change = Address::from_str(change_address)
                .map_err(|e| BridgeError::Protocol(format!("invalid change address: {}", e)))?
                .assume_checked();
            outputs.push(TxOut {
                value: Amount::from_sat(change_sat),
                script_pubkey: change.script_pubkey(),
            });
            fee_two_outputs
        } else {
            // Dust change folds into the fee.
            total - request.amount_sat
        };

        let inputs: Vec<TxIn> = selected
            .iter()
            .map(|utxo| {
                let txid = Txid::from_str(&utxo.txid)
                    .map_err(|e| BridgeError::Protocol(format!("invalid txid: {}", e)))?;
                Ok(TxIn {
                    previous_output: OutPoint {
                        txid,
                        vout: utxo.vout,
                    },
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::default(),
                })
            })
            .collect::<Result<_, BridgeError>>()?;

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs,
            output: outputs,
        };

        let mut sighash_cache = SighashCache::new(&tx);
        let mut sighashes = Vec::with_capacity(selected.len());
        for i in 0..selected.len() {
            let sighash = sighash_cache
                .legacy_signature_hash(i, redeem_script, EcdsaSighashType::All.to_u32())
                .map_err(|e| BridgeError::Script(format!("sighash error: {}", e)))?;
            sighashes.push(sighash.to_byte_array());
        }

        debug!(
            "Prepared withdrawal tx: {} inputs, {} outputs, fee {} sats",
            tx.input.len(),
            tx.output.len(),
            fee_sat
        );
        Ok(PreparedTransaction {
            tx,
            selected,
            sighashes,
            fee_sat,
        })
    }

    /// Collect and verify co-signatures until the threshold is reached.
    ///
    /// Returns signatures keyed by the signer's index in the canonical key
    /// order; `OP_CHECKMULTISIG` requires the final script pushes in that
    /// order.
    async fn collect_signatures(
        &self,
        request: &WithdrawalRequest,
        prepared: &PreparedTransaction,
        spec: &MultisigSpec,
        redeem_script: &ScriptBuf,
    ) -> Result<BTreeMap<usize, Vec<Vec<u8>>>, BridgeError> {
        let cosign_request = CosignRequest {
            request_id: request.request_id.to_string(),
            unsigned_tx_hex: serialize_hex(&prepared.tx),
            redeem_script_hex: hex::encode(redeem_script.as_bytes()),
            sighashes: prepared.sighashes.iter().map(hex::encode).collect(),
        };

        let mut collected: BTreeMap<usize, Vec<Vec<u8>>> = BTreeMap::new();

        for cosigner in &self.cosigners {
            if collected.len() >= spec.threshold {
                break;
            }

            let key_hex = cosigner.public_key_hex().to_lowercase();
            let Some(key_index) = spec.keys.iter().position(|k| *k == key_hex) else {
                warn!("Co-signer key {} is not part of the multisig, skipping", key_hex);
                continue;
            };
            if collected.contains_key(&key_index) {
                continue;
            }

            let response = match tokio::time::timeout(
                self.signing_timeout,
                cosigner.cosign(&cosign_request),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!("Co-signer {} failed: {}", key_hex, e);
                    continue;
                }
                Err(_) => {
                    warn!("Co-signer {} timed out", key_hex);
                    continue;
                }
            };

            match self.verify_response(&response, &key_hex, &prepared.sighashes) {
                Ok(signatures) => {
                    debug!("Accepted signatures from {}", key_hex);
                    collected.insert(key_index, signatures);
                }
                Err(e) => warn!("Rejected signatures from {}: {}", key_hex, e),
            }
        }

        if collected.len() < spec.threshold {
            return Err(BridgeError::InsufficientSignatures {
                got: collected.len(),
                threshold: spec.threshold,
            });
        }
        Ok(collected)
    }

    fn verify_response(
        &self,
        response: &CosignResponse,
        expected_key_hex: &str,
        sighashes: &[[u8; 32]],
    ) -> Result<Vec<Vec<u8>>, BridgeError> {
        if response.public_key.to_lowercase() != expected_key_hex {
            return Err(BridgeError::Protocol("response key mismatch".into()));
        }
        if response.signatures.len() != sighashes.len() {
            return Err(BridgeError::Protocol(format!(
                "expected {} signatures, got {}",
                sighashes.len(),
                response.signatures.len()
            )));
        }

        let key_bytes = hex::decode(expected_key_hex)
            .map_err(|e| BridgeError::InvalidPublicKey(e.to_string()))?;
        let public_key = bitcoin::secp256k1::PublicKey::from_slice(&key_bytes)
            .map_err(|e| BridgeError::InvalidPublicKey(e.to_string()))?;

        let mut verified = Vec::with_capacity(sighashes.len());
        for (sighash, signature_hex) in sighashes.iter().zip(&response.signatures) {
            let der = hex::decode(signature_hex)
                .map_err(|e| BridgeError::Protocol(format!("bad signature hex: {}", e)))?;
            let signature = Signature::from_der(&der)
                .map_err(|e| BridgeError::Protocol(format!("bad DER signature: {}", e)))?;
            let message = Message::from_digest(*sighash);
            self.secp
                .verify_ecdsa(&message, &signature, &public_key)
                .map_err(|_| BridgeError::Protocol("signature does not verify".into()))?;
            verified.push(der);
        }
        Ok(verified)
    }
}

/// Fill in the multisig script_sigs: `OP_0 <sig...> <redeem script>` with
/// signatures in canonical key order.
fn assemble_multisig(
    mut tx: Transaction,
    signatures: &BTreeMap<usize, Vec<Vec<u8>>>,
    spec: &MultisigSpec,
    redeem_script: &ScriptBuf,
) -> Result<Transaction, BridgeError> {
    let redeem_push = PushBytesBuf::try_from(redeem_script.to_bytes())
        .map_err(|e| BridgeError::Script(format!("redeem script push error: {}", e)))?;

    for (input_index, input) in tx.input.iter_mut().enumerate() {
        // The leading OP_0 absorbs the historical CHECKMULTISIG pop.
        let mut builder = Builder::new().push_int(0);
        for key_index in 0..spec.keys.len() {
            let Some(per_input) = signatures.get(&key_index) else {
                continue;
            };
            let mut with_hashtype = per_input[input_index].clone();
            with_hashtype.push(EcdsaSighashType::All.to_u32() as u8);
            let push = PushBytesBuf::try_from(with_hashtype)
                .map_err(|e| BridgeError::Script(format!("signature push error: {}", e)))?;
            builder = builder.push_slice(push);
        }
        builder = builder.push_slice(redeem_push.clone());
        input.script_sig = builder.into_script();
    }
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chains::bitcoin::StubPeerGroup;
    use common::{AddressInfo, BtcAddress, OwnerType};
    use ledger::MemoryLedger;
    use uuid::Uuid;

    const ACCOUNT: &str = "btc-addresses";
    const DESTINATION: &str = "1BitcoinEaterAddressDontSendf59kuE";

    struct Fixture {
        orchestrator: WithdrawalOrchestrator,
        peer_group: Arc<StubPeerGroup>,
        wallet: Arc<tokio::sync::Mutex<Wallet>>,
        fee_tracker: Arc<FeeRateTracker>,
        source_address: String,
        change_address: String,
    }

    async fn fixture(n_keys: usize, n_cosigners: usize) -> Fixture {
        let secp = Secp256k1::new();
        let secrets: Vec<SecretKey> = (0..n_keys)
            .map(|_| SecretKey::new(&mut rand::thread_rng()))
            .collect();
        let keys: Vec<String> = secrets
            .iter()
            .map(|s| hex::encode(s.public_key(&secp).serialize()))
            .collect();

        let spec = MultisigSpec::from_keys(&keys).unwrap();
        let source_address = spec.address(Network::Bitcoin).unwrap();

        // Distinct single-key "multisig" for change, so the two custody
        // addresses differ.
        let change_secret = SecretKey::new(&mut rand::thread_rng());
        let change_key = hex::encode(change_secret.public_key(&secp).serialize());
        let change_spec = MultisigSpec::from_keys(&[change_key.clone()]).unwrap();
        let change_address = change_spec.address(Network::Bitcoin).unwrap();

        let ledger = Arc::new(MemoryLedger::with_accounts(&[ACCOUNT]));
        let allocation = AddressAllocationLedger::new(ledger, ACCOUNT);
        allocation
            .publish(&BtcAddress {
                address: source_address.clone(),
                info: AddressInfo::new(
                    OwnerType::Registered {
                        client_id: "client-1".into(),
                    },
                    spec.keys.clone(),
                    "node-1".into(),
                ),
            })
            .await
            .unwrap();
        allocation
            .publish(&BtcAddress {
                address: change_address.clone(),
                info: AddressInfo::new(OwnerType::Change, vec![change_key], "node-1".into()),
            })
            .await
            .unwrap();

        let wallet = Arc::new(tokio::sync::Mutex::new(Wallet::new()));
        {
            let mut w = wallet.lock().await;
            w.watch_address(&source_address);
            w.add_utxo(Utxo {
                txid: "11".repeat(32),
                vout: 0,
                value: 60_000,
                address: source_address.clone(),
            });
            w.add_utxo(Utxo {
                txid: "22".repeat(32),
                vout: 1,
                value: 40_000,
                address: source_address.clone(),
            });
        }

        let cosigners: Vec<Arc<dyn NotaryCosigner>> = secrets
            .iter()
            .take(n_cosigners)
            .map(|s| Arc::new(LocalCosigner::new(*s)) as Arc<dyn NotaryCosigner>)
            .collect();

        let peer_group = Arc::new(StubPeerGroup::new());
        peer_group.connect().await.unwrap();

        let fee_tracker = Arc::new(FeeRateTracker::new());
        let orchestrator = WithdrawalOrchestrator::new(
            allocation,
            wallet.clone(),
            Arc::new(WalletStore::open_in_memory().unwrap()),
            fee_tracker.clone(),
            peer_group.clone(),
            cosigners,
            Network::Bitcoin,
            Duration::from_secs(5),
        );

        Fixture {
            orchestrator,
            peer_group,
            wallet,
            fee_tracker,
            source_address,
            change_address,
        }
    }

    fn request(fixture: &Fixture, amount_sat: u64) -> WithdrawalRequest {
        WithdrawalRequest {
            request_id: Uuid::new_v4(),
            destination_address: DESTINATION.to_string(),
            amount_sat,
            source_address: fixture.source_address.clone(),
        }
    }

    #[test]
    fn test_fee_model_constants() {
        // 2 inputs, 1 output at 10 sat/byte.
        assert_eq!(estimate_fee(2, 1, 10), 4_040);
        assert_eq!(estimate_fee(1, 2, 1), 248);
        assert_eq!(estimate_fee(0, 0, 50), 0);
    }

    #[tokio::test]
    async fn test_unset_fee_rate_fails_closed() {
        let f = fixture(2, 2).await;
        let err = f.orchestrator.withdraw(&request(&f, 10_000)).await.unwrap_err();
        assert!(matches!(err, BridgeError::FeeRateUnavailable));

        // No selection side effects: the wallet still holds both outputs.
        assert_eq!(f.wallet.lock().await.utxos().len(), 2);
        assert!(f.peer_group.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_successful_withdrawal_spends_and_broadcasts() {
        let f = fixture(2, 2).await;
        f.fee_tracker.record_observation(10, chrono::Utc::now());
        f.fee_tracker.publish_from_recent(chrono::Utc::now());

        let txid = f.orchestrator.withdraw(&request(&f, 10_000)).await.unwrap();

        let broadcasts = f.peer_group.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        let tx = &broadcasts[0];
        assert_eq!(tx.compute_txid(), txid);

        // One input (60k covers 10k + fee), destination plus change.
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.output[0].value.to_sat(), 10_000);
        let fee = estimate_fee(1, 2, 10);
        assert_eq!(tx.output[1].value.to_sat(), 60_000 - 10_000 - fee);
        assert_eq!(
            tx.output[1].script_pubkey,
            Address::from_str(&f.change_address)
                .unwrap()
                .assume_checked()
                .script_pubkey()
        );

        // Script sig ends with the redeem script push and starts with OP_0.
        let script_sig = tx.input[0].script_sig.as_bytes();
        assert_eq!(script_sig[0], 0x00);

        // The spent output left the wallet, the other stayed.
        let wallet = f.wallet.lock().await;
        assert_eq!(wallet.utxos().len(), 1);
        assert_eq!(wallet.utxos()[0].value, 40_000);
    }

    #[tokio::test]
    async fn test_insufficient_funds_fails_without_spending() {
        let f = fixture(2, 2).await;
        f.fee_tracker.record_observation(10, chrono::Utc::now());
        f.fee_tracker.publish_from_recent(chrono::Utc::now());

        let err = f
            .orchestrator
            .withdraw(&request(&f, 1_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InsufficientFunds { .. }));
        assert_eq!(f.wallet.lock().await.utxos().len(), 2);
        assert!(f.peer_group.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_below_threshold_signatures_never_broadcast() {
        // 3 keys -> threshold 3, but only 2 co-signers available.
        let f = fixture(3, 2).await;
        f.fee_tracker.record_observation(10, chrono::Utc::now());
        f.fee_tracker.publish_from_recent(chrono::Utc::now());

        let err = f.orchestrator.withdraw(&request(&f, 10_000)).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InsufficientSignatures { got: 2, threshold: 3 }
        ));
        assert!(f.peer_group.broadcasts().is_empty());
        assert_eq!(f.wallet.lock().await.utxos().len(), 2);
    }

    #[tokio::test]
    async fn test_multiple_inputs_selected_when_needed() {
        let f = fixture(2, 2).await;
        f.fee_tracker.record_observation(10, chrono::Utc::now());
        f.fee_tracker.publish_from_recent(chrono::Utc::now());

        // 80k needs both the 60k and the 40k output.
        let txid = f.orchestrator.withdraw(&request(&f, 80_000)).await.unwrap();
        let broadcasts = f.peer_group.broadcasts();
        let tx = &broadcasts[0];
        assert_eq!(tx.compute_txid(), txid);
        assert_eq!(tx.input.len(), 2);
        assert!(f.wallet.lock().await.utxos().is_empty());
    }
}
