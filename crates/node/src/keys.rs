//! Bitcoin-side key material.
//!
//! Each notary holds one ordinary secp256k1 key, its share of every
//! multisig quorum it participates in. Loaded from a JSON file, generated
//! on first start.

use std::path::Path;

use bitcoin::secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Stored format for the multisig key share.
#[derive(Serialize, Deserialize)]
struct StoredBtcKey {
    /// Secret key bytes (32 bytes, hex encoded).
    secret_key: String,
}

/// Load the Bitcoin signing key from `path`, generating and saving a new
/// one if the file is missing or unreadable.
pub fn load_or_generate_btc_key(path: &Path) -> anyhow::Result<SecretKey> {
    if let Ok(contents) = std::fs::read_to_string(path) {
        if let Ok(stored) = serde_json::from_str::<StoredBtcKey>(&contents) {
            if let Ok(bytes) = hex::decode(&stored.secret_key) {
                if let Ok(key) = SecretKey::from_slice(&bytes) {
                    info!("Loaded Bitcoin key from {}", path.display());
                    return Ok(key);
                }
            }
        }
        warn!(
            "Failed to parse Bitcoin key from {}, generating new one",
            path.display()
        );
    }

    let key = SecretKey::new(&mut rand::thread_rng());
    info!("Generated new Bitcoin key");

    let stored = StoredBtcKey {
        secret_key: hex::encode(key.secret_bytes()),
    };
    let json = serde_json::to_string_pretty(&stored)?;
    if let Err(e) = std::fs::write(path, json) {
        warn!("Failed to save Bitcoin key to {}: {}", path.display(), e);
    } else {
        info!("Saved Bitcoin key to {}", path.display());
    }

    Ok(key)
}
