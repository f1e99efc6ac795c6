//! Key derivation from the DH shared secret.
//!
//! Each key is `SHA-256(label || decimal(secret))`. The labels differ, so
//! the encryption and MAC keys are independent even though they share one
//! secret, and both peers derive identical keys from identical secrets.

use std::fmt;

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::dh::SharedSecret;

/// Length of each derived key (SHA-256 output).
pub const KEY_SIZE: usize = 32;

pub const ENC_LABEL: &[u8] = b"enc|";
pub const MAC_LABEL: &[u8] = b"mac|";

/// Encryption and authentication keys for one session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeys {
    enc_key: [u8; KEY_SIZE],
    mac_key: [u8; KEY_SIZE],
}

impl DerivedKeys {
    /// Rebuild keys from their raw bytes, e.g. from a key log.
    pub fn from_parts(enc_key: [u8; KEY_SIZE], mac_key: [u8; KEY_SIZE]) -> Self {
        Self { enc_key, mac_key }
    }

    pub fn enc_key(&self) -> &[u8; KEY_SIZE] {
        &self.enc_key
    }

    pub fn mac_key(&self) -> &[u8; KEY_SIZE] {
        &self.mac_key
    }
}

impl fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeys").finish_non_exhaustive()
    }
}

/// Derive `(enc_key, mac_key)` from a shared secret.
pub fn derive_keys(secret: &SharedSecret) -> DerivedKeys {
    derive_from_value(secret.expose())
}

fn derive_from_value(secret: u64) -> DerivedKeys {
    let decimal = secret.to_string();
    DerivedKeys {
        enc_key: labeled_hash(ENC_LABEL, decimal.as_bytes()),
        mac_key: labeled_hash(MAC_LABEL, decimal.as_bytes()),
    }
}

fn labeled_hash(label: &[u8], data: &[u8]) -> [u8; KEY_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(data);
    hasher.finalize().into()
}
