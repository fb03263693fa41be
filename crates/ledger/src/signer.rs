//! Notary ledger signing identity.
//!
//! Each notary process owns one ordinary ed25519 keypair used to co-sign
//! ledger-side actions. The key is loaded from a JSON file on disk and
//! generated on first start.

use std::path::Path;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use common::BridgeError;

use crate::client::CosignerSignature;

/// Stored format for the notary's ledger signing key.
#[derive(Serialize, Deserialize)]
struct StoredLedgerKey {
    /// Secret key bytes (32 bytes, hex encoded).
    secret_key: String,
}

/// The notary's ed25519 ledger identity.
pub struct NotaryLedgerKey {
    signing_key: SigningKey,
}

impl NotaryLedgerKey {
    /// Generate a fresh key (tests, first boot without persistence).
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load the key from `path`, generating and saving a new one if the
    /// file is missing or unreadable.
    pub fn load_or_generate<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if let Ok(contents) = std::fs::read_to_string(path) {
            if let Ok(stored) = serde_json::from_str::<StoredLedgerKey>(&contents) {
                if let Ok(secret_bytes) = hex::decode(&stored.secret_key) {
                    if let Ok(bytes) = <[u8; 32]>::try_from(secret_bytes.as_slice()) {
                        info!("Loaded ledger signing key from {}", path.display());
                        return Self {
                            signing_key: SigningKey::from_bytes(&bytes),
                        };
                    }
                }
            }
            warn!(
                "Failed to parse ledger signing key from {}, generating new one",
                path.display()
            );
        }

        let key = Self::generate();
        info!("Generated new ledger signing key");

        let stored = StoredLedgerKey {
            secret_key: hex::encode(key.signing_key.to_bytes()),
        };
        if let Ok(json) = serde_json::to_string_pretty(&stored) {
            if let Err(e) = std::fs::write(path, json) {
                warn!(
                    "Failed to save ledger signing key to {}: {}",
                    path.display(),
                    e
                );
            } else {
                info!("Saved ledger signing key to {}", path.display());
            }
        }

        key
    }

    /// Hex-encoded verifying key, the notary's ledger-side identity.
    pub fn verifying_key_hex(&self) -> String {
        hex::encode(self.verifying_key().to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign a payload, returning the hex-encoded signature.
    pub fn sign_hex(&self, payload: &[u8]) -> String {
        hex::encode(self.signing_key.sign(payload).to_bytes())
    }

    /// Produce a co-signature envelope for a batch payload.
    pub fn cosign(&self, payload: &[u8]) -> CosignerSignature {
        CosignerSignature {
            public_key: self.verifying_key_hex(),
            signature: self.sign_hex(payload),
        }
    }
}

impl std::fmt::Debug for NotaryLedgerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotaryLedgerKey")
            .field("verifying_key", &self.verifying_key_hex())
            .finish()
    }
}

/// Parse a hex verifying key into its dalek form.
pub fn parse_verifying_key(hex_key: &str) -> Result<VerifyingKey, BridgeError> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| BridgeError::InvalidPublicKey(format!("bad hex: {}", e)))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| BridgeError::InvalidPublicKey("expected 32 bytes".into()))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| BridgeError::InvalidPublicKey(e.to_string()))
}
