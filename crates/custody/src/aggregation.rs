//! Peer-key aggregation.
//!
//! New multisig addresses are created without any notary-to-notary
//! traffic: a session account on the ledger collects one public key per
//! notary, and once every active notary has contributed, any notary can
//! finalize. Finalization is a pure function of the collected key set
//! (canonical ordering + threshold formula), so independent finalizers
//! derive byte-identical redeem scripts and the same P2SH address.

use std::sync::Arc;

use bitcoin::Network;
use tracing::{debug, info};

use chains::bitcoin::MultisigSpec;
use common::{AddressInfo, BridgeError, BtcAddress, NotaryPeer, OwnerType};
use ledger::LedgerClient;

use crate::allocation::AddressAllocationLedger;

/// Handle to an open key-collection session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// The ephemeral ledger account collecting the keys.
    pub account: String,
}

/// Reads the active notary set from the governance account.
///
/// Membership changes only through ledger-mediated governance; this type
/// never caches, so every finalize sees the current member list.
#[derive(Clone)]
pub struct NotaryDirectory {
    ledger: Arc<dyn LedgerClient>,
    account: String,
}

impl NotaryDirectory {
    pub fn new(ledger: Arc<dyn LedgerClient>, account: impl Into<String>) -> Self {
        Self {
            ledger,
            account: account.into(),
        }
    }

    /// The currently active notaries, in node-id order.
    ///
    /// An empty list is a configuration error: the bridge cannot derive
    /// addresses or count quorums without members.
    pub async fn active_peers(&self) -> Result<Vec<NotaryPeer>, BridgeError> {
        let details = self.ledger.get_details(&self.account).await?;
        let mut peers = Vec::with_capacity(details.len());
        for (node_id, raw) in details {
            let peer: NotaryPeer = serde_json::from_str(&raw).map_err(|e| {
                BridgeError::CorruptRecord {
                    account: self.account.clone(),
                    key: node_id,
                    reason: e.to_string(),
                }
            })?;
            peers.push(peer);
        }
        if peers.is_empty() {
            return Err(BridgeError::Configuration(
                "no active notary keys in governance account".into(),
            ));
        }
        Ok(peers)
    }
}

/// Drives creation of one new multisig address.
pub struct PeerKeyAggregationProtocol {
    ledger: Arc<dyn LedgerClient>,
    directory: NotaryDirectory,
    allocation: AddressAllocationLedger,
    node_id: String,
    network: Network,
}

impl PeerKeyAggregationProtocol {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        directory: NotaryDirectory,
        allocation: AddressAllocationLedger,
        node_id: impl Into<String>,
        network: Network,
    ) -> Self {
        Self {
            ledger,
            directory,
            allocation,
            node_id: node_id.into(),
            network,
        }
    }

    fn session_account(session_name: &str) -> String {
        format!("keygen:{}", session_name)
    }

    /// Open a key-collection session. Every notary reacting to the same
    /// trigger calls this with the same name; whoever runs first creates
    /// the account and the rest join it.
    pub async fn begin_generation(
        &self,
        session_name: &str,
    ) -> Result<SessionHandle, BridgeError> {
        let account = Self::session_account(session_name);
        match self.ledger.create_account(&account, None).await {
            Ok(()) => info!("Opened key generation session {}", account),
            Err(BridgeError::Conflict(_)) => {
                debug!("Session {} already open, joining", account)
            }
            Err(e) => return Err(e),
        }
        Ok(SessionHandle { account })
    }

    /// Contribute this notary's public key to the session. Keyed by node
    /// id, so a repeated contribution overwrites harmlessly.
    pub async fn contribute_key(
        &self,
        session: &SessionHandle,
        notary_pubkey_hex: &str,
    ) -> Result<(), BridgeError> {
        self.ledger
            .put_detail(&session.account, &self.node_id, notary_pubkey_hex)
            .await?;
        debug!(
            "Contributed key to session {} as {}",
            session.account, self.node_id
        );
        Ok(())
    }

    /// Number of keys collected so far.
    pub async fn collected_count(&self, session: &SessionHandle) -> Result<usize, BridgeError> {
        Ok(self.ledger.get_details(&session.account).await?.len())
    }

    /// Finalize the session into a free address.
    ///
    /// Requires a key from every currently active notary. The caller is
    /// responsible for timing out a session that never fills up; an
    /// incomplete session is an error here, not a wait.
    pub async fn finalize(&self, session: &SessionHandle) -> Result<BtcAddress, BridgeError> {
        let contributions = self.ledger.get_details(&session.account).await?;
        let active = self.directory.active_peers().await?;

        let missing: Vec<&str> = active
            .iter()
            .filter(|peer| !contributions.contains_key(&peer.node_id))
            .map(|peer| peer.node_id.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(BridgeError::Protocol(format!(
                "session {} has {} of {} keys, missing: {}",
                session.account,
                contributions.len(),
                active.len(),
                missing.join(", ")
            )));
        }

        let keys: Vec<String> = contributions.values().cloned().collect();
        let spec = MultisigSpec::from_keys(&keys)?;
        let address = spec.address(self.network)?;

        let record = BtcAddress {
            address: address.clone(),
            info: AddressInfo::new(OwnerType::Free, spec.keys.clone(), self.node_id.clone()),
        };

        // Publishing is unconditional: the record is a pure function of
        // the key set, so a concurrent finalizer writes identical bytes
        // and retries after a ledger hiccup are safe.
        self.allocation.publish(&record).await?;

        info!(
            "Finalized session {} into {}-of-{} address {}",
            session.account,
            spec.threshold,
            spec.keys.len(),
            address
        );
        Ok(record)
    }
}
