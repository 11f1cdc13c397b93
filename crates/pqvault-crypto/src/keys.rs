//! Data keys and AES-GCM key wrapping
//!
//! Wrapped key envelope (hex string on the wire):
//! ```text
//! hex( [12-byte IV][ciphertext of raw key bytes][16-byte GCM tag] )
//! ```
//!
//! Wrapping is non-deterministic: a fresh IV is drawn on every call, so the
//! same key wrapped twice under the same wrapping key yields different
//! envelopes. The GCM tag is the sole integrity check on transported key
//! material; a tag mismatch is a hard failure, never best-effort.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use pqvault_core::{VaultError, VaultResult};

use crate::{GCM_IV_SIZE, KEY_SIZE, TAG_SIZE};

/// Which cipher the unwrapped bytes are destined for.
///
/// Data keys headed for bulk file streams are CTR; keys that wrap other keys
/// (folder keys) stay GCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgo {
    Gcm,
    Ctr,
}

/// A per-file 256-bit data encryption key, generated fresh for every
/// artifact. Zeroized on drop.
#[derive(Clone)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Generate a random data key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Key material recovered from an envelope, tagged with its target cipher.
/// Zeroized on drop.
#[derive(Clone)]
pub struct UnwrappedKey {
    bytes: [u8; KEY_SIZE],
    algo: KeyAlgo,
}

impl UnwrappedKey {
    pub fn new(bytes: [u8; KEY_SIZE], algo: KeyAlgo) -> Self {
        Self { bytes, algo }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn algo(&self) -> KeyAlgo {
        self.algo
    }

    /// Reinterpret as a data key for the chunk cipher.
    pub fn to_data_key(&self) -> DataKey {
        DataKey::from_bytes(self.bytes)
    }
}

impl Drop for UnwrappedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for UnwrappedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnwrappedKey")
            .field("bytes", &"[REDACTED]")
            .field("algo", &self.algo)
            .finish()
    }
}

/// Wrap (encrypt) raw key bytes under a wrapping key.
///
/// Returns `hex(iv || ciphertext + tag)`. Fresh IV per call.
pub fn wrap_key(key: &[u8; KEY_SIZE], wrapping: &[u8; KEY_SIZE]) -> VaultResult<String> {
    let cipher = Aes256Gcm::new(wrapping.into());

    let mut iv = [0u8; GCM_IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), key.as_slice())
        .map_err(|e| VaultError::Other(anyhow::anyhow!("key wrapping failed: {e}")))?;

    let mut envelope = Vec::with_capacity(GCM_IV_SIZE + ciphertext.len());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&ciphertext);
    Ok(hex::encode(envelope))
}

/// Unwrap (decrypt) a key envelope produced by [`wrap_key`].
///
/// The recovered bytes are imported for `algo`: CTR for data keys, GCM for
/// keys that will wrap further keys. A GCM tag mismatch (wrong wrapping key
/// or corrupted envelope) is `AuthenticationFailure`.
pub fn unwrap_key(
    envelope_hex: &str,
    wrapping: &[u8; KEY_SIZE],
    algo: KeyAlgo,
) -> VaultResult<UnwrappedKey> {
    let envelope = hex::decode(envelope_hex)
        .map_err(|e| VaultError::InvalidInput(format!("wrapped key hex: {e}")))?;

    if envelope.len() < GCM_IV_SIZE + KEY_SIZE + TAG_SIZE {
        return Err(VaultError::InvalidInput(format!(
            "wrapped key too short: {} bytes (expected at least {})",
            envelope.len(),
            GCM_IV_SIZE + KEY_SIZE + TAG_SIZE
        )));
    }

    let (iv, ciphertext) = envelope.split_at(GCM_IV_SIZE);
    let cipher = Aes256Gcm::new(wrapping.into());

    let mut plaintext = cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| VaultError::AuthenticationFailure)?;

    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(VaultError::MalformedEnvelope(format!(
            "unwrapped key has wrong size: {} bytes (expected {KEY_SIZE})",
            plaintext.len()
        )));
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(UnwrappedKey::new(key, algo))
}
