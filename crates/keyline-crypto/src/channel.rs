//! Sealed message channel.
//!
//! Sealing serializes the inner message to compact JSON, XORs it with the
//! repeating encryption key and, when authentication is enabled, appends an
//! HMAC-SHA256 tag over the ciphertext. Opening checks the tag before
//! decrypting, so tampered frames are rejected before any field of the
//! payload is parsed.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use keyline_core::{SecureFrame, SecurePayload};

use crate::kdf::{DerivedKeys, KEY_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// Sealed channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication failure: {0}")]
    AuthenticationFailure(&'static str),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl From<ChannelError> for keyline_common::Error {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Configuration(msg) => Self::Configuration(msg),
            ChannelError::AuthenticationFailure(msg) => Self::auth(msg),
            ChannelError::MalformedPayload(msg) => Self::MalformedPayload(msg),
        }
    }
}

/// Symmetric channel state for one established session.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecureChannel {
    enc_key: [u8; KEY_SIZE],
    mac_key: Option<[u8; KEY_SIZE]>,
    #[zeroize(skip)]
    auth_enabled: bool,
}

impl SecureChannel {
    /// Build a channel from raw keys.
    ///
    /// Fails if authentication is enabled without a MAC key.
    pub fn new(
        enc_key: [u8; KEY_SIZE],
        mac_key: Option<[u8; KEY_SIZE]>,
        auth_enabled: bool,
    ) -> Result<Self, ChannelError> {
        if auth_enabled && mac_key.is_none() {
            return Err(ChannelError::Configuration(
                "MAC enabled but mac_key is missing".into(),
            ));
        }
        Ok(Self {
            enc_key,
            mac_key,
            auth_enabled,
        })
    }

    /// Build a channel from a derived key pair.
    pub fn from_keys(keys: &DerivedKeys, auth_enabled: bool) -> Self {
        Self {
            enc_key: *keys.enc_key(),
            mac_key: Some(*keys.mac_key()),
            auth_enabled,
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.auth_enabled
    }

    /// Encrypt `message` and, if enabled, tag the ciphertext.
    pub fn seal(&self, message: &SecurePayload) -> Result<SecureFrame, ChannelError> {
        let plaintext = serde_json::to_vec(message)
            .map_err(|e| ChannelError::MalformedPayload(e.to_string()))?;
        let ciphertext = xor_stream(&plaintext, &self.enc_key)?;

        let mac = match self.active_mac_key() {
            Some(key) => Some(STANDARD.encode(compute_tag(key, &ciphertext)?)),
            None => None,
        };

        Ok(SecureFrame {
            ciphertext: STANDARD.encode(&ciphertext),
            mac,
        })
    }

    /// Verify and decrypt a received frame.
    pub fn open(&self, frame: &SecureFrame) -> Result<SecurePayload, ChannelError> {
        let decoded = STANDARD.decode(frame.ciphertext.as_bytes());

        let ciphertext = if let Some(key) = self.active_mac_key() {
            // Text that does not decode was not produced by the sealer.
            let ciphertext = decoded
                .map_err(|_| ChannelError::AuthenticationFailure("ciphertext is not base64"))?;
            let tag_b64 = frame
                .mac
                .as_deref()
                .ok_or(ChannelError::AuthenticationFailure("missing mac"))?;
            let tag = STANDARD
                .decode(tag_b64.as_bytes())
                .map_err(|_| ChannelError::AuthenticationFailure("mac is not base64"))?;
            verify_tag(key, &ciphertext, &tag)?;
            ciphertext
        } else {
            decoded.map_err(|e| ChannelError::MalformedPayload(format!("ciphertext: {e}")))?
        };

        let plaintext = xor_stream(&ciphertext, &self.enc_key)?;
        serde_json::from_slice(&plaintext).map_err(|e| ChannelError::MalformedPayload(e.to_string()))
    }

    fn active_mac_key(&self) -> Option<&[u8; KEY_SIZE]> {
        if self.auth_enabled {
            self.mac_key.as_ref()
        } else {
            None
        }
    }
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("auth_enabled", &self.auth_enabled)
            .finish_non_exhaustive()
    }
}

/// XOR `data` with `key` repeated to its length.
///
/// Self-inverse: applying it twice with the same key returns `data`.
pub fn xor_stream(data: &[u8], key: &[u8]) -> Result<Vec<u8>, ChannelError> {
    if key.is_empty() {
        return Err(ChannelError::Configuration("empty key".into()));
    }
    Ok(data
        .iter()
        .zip(key.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect())
}

fn compute_tag(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ChannelError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ChannelError::Configuration(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn verify_tag(key: &[u8], data: &[u8], tag: &[u8]) -> Result<(), ChannelError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ChannelError::Configuration(e.to_string()))?;
    mac.update(data);
    // constant-time
    mac.verify_slice(tag)
        .map_err(|_| ChannelError::AuthenticationFailure("bad mac"))
}
