//! ML-KEM-768 key exchange: deterministic identity keypairs, hybrid envelopes
//!
//! KEM envelope (hex string on the wire):
//! ```text
//! hex( [1088-byte KEM ciphertext][12-byte IV][AES-GCM ciphertext + 16-byte tag] )
//! ```
//!
//! The encapsulated shared secret is used directly as an AES-256-GCM key to
//! wrap the payload key. Decapsulating with the wrong secret key yields a
//! garbage shared secret (ML-KEM implicit rejection), which then fails the
//! GCM tag check — a wrong key is always a deterministic failure, never
//! silent wrong plaintext.
//!
//! The same envelope shape serves both sharing (addressed to a peer's public
//! key) and single-owner records (addressed to the owner's own public key).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use ml_kem::kem::{Decapsulate, DecapsulationKey, Encapsulate, EncapsulationKey};
use ml_kem::{Ciphertext, Encoded, EncodedSizeUser, KemCore, MlKem768, MlKem768Params, B32};
use rand::RngCore;
use zeroize::Zeroize;

use pqvault_core::{VaultError, VaultResult};

use crate::keys::{KeyAlgo, UnwrappedKey};
use crate::seed::Seed;
use crate::{GCM_IV_SIZE, KEM_CIPHERTEXT_SIZE, KEM_PUBLIC_KEY_SIZE, KEY_SIZE, TAG_SIZE};

/// An ML-KEM-768 keypair, regenerated deterministically from the seed.
///
/// The secret key never leaves the client and is never persisted: any device
/// holding the seed can rebuild it. The public key is registered server-side
/// as the account's discovery identity.
pub struct Keypair {
    public: EncapsulationKey<MlKem768Params>,
    secret: DecapsulationKey<MlKem768Params>,
}

impl Keypair {
    /// Deterministic keygen: the seed's two 32-byte halves feed the ML-KEM
    /// (d, z) coins. Same seed, same keypair, on every device.
    pub fn from_seed(seed: &Seed) -> Self {
        let (d_half, z_half) = seed.as_bytes().split_at(KEY_SIZE);
        let d = B32::try_from(d_half).expect("seed half is 32 bytes");
        let z = B32::try_from(z_half).expect("seed half is 32 bytes");

        let (secret, public) = MlKem768::generate_deterministic(&d, &z);
        Self { public, secret }
    }

    /// Encoded public key (1184 bytes).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        let encoded = self.public.as_bytes();
        let bytes: &[u8] = encoded.as_ref();
        bytes.to_vec()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    fn decapsulate_shared(&self, kem_ct: &[u8]) -> VaultResult<[u8; KEY_SIZE]> {
        let ct = Ciphertext::<MlKem768>::try_from(kem_ct).map_err(|_| {
            VaultError::MalformedEnvelope(format!(
                "KEM ciphertext must be {KEM_CIPHERTEXT_SIZE} bytes, got {}",
                kem_ct.len()
            ))
        })?;
        let shared = self
            .secret
            .decapsulate(&ct)
            .map_err(|_| VaultError::AuthenticationFailure)?;

        let mut bytes = [0u8; KEY_SIZE];
        let shared_slice: &[u8] = shared.as_ref();
        bytes.copy_from_slice(shared_slice);
        Ok(bytes)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public_key_hex())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Encapsulate a payload key for a recipient's public key.
///
/// Returns `hex(kem_ciphertext || iv || ciphertext + tag)`. Non-deterministic:
/// both the KEM encapsulation and the GCM IV are fresh per call.
pub fn encapsulate_key(
    payload_key: &[u8; KEY_SIZE],
    recipient_public_key_hex: &str,
) -> VaultResult<String> {
    let pk_bytes = hex::decode(recipient_public_key_hex)
        .map_err(|e| VaultError::InvalidInput(format!("recipient public key hex: {e}")))?;
    if pk_bytes.len() != KEM_PUBLIC_KEY_SIZE {
        return Err(VaultError::InvalidInput(format!(
            "recipient public key must be {KEM_PUBLIC_KEY_SIZE} bytes, got {}",
            pk_bytes.len()
        )));
    }

    let encoded = Encoded::<EncapsulationKey<MlKem768Params>>::try_from(pk_bytes.as_slice())
        .map_err(|_| VaultError::InvalidInput("recipient public key encoding".into()))?;
    let public = EncapsulationKey::<MlKem768Params>::from_bytes(&encoded);

    let (kem_ct, shared) = public
        .encapsulate(&mut rand::thread_rng())
        .map_err(|_| VaultError::Other(anyhow::anyhow!("ML-KEM encapsulation failed")))?;
    let kem_ct_bytes: &[u8] = kem_ct.as_ref();
    let shared_bytes: &[u8] = shared.as_ref();

    let cipher = Aes256Gcm::new_from_slice(shared_bytes)
        .map_err(|e| VaultError::Other(anyhow::anyhow!("shared secret import: {e}")))?;

    let mut iv = [0u8; GCM_IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let wrapped = cipher
        .encrypt(Nonce::from_slice(&iv), payload_key.as_slice())
        .map_err(|e| VaultError::Other(anyhow::anyhow!("payload key wrapping failed: {e}")))?;

    let mut envelope = Vec::with_capacity(KEM_CIPHERTEXT_SIZE + GCM_IV_SIZE + wrapped.len());
    envelope.extend_from_slice(kem_ct_bytes);
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&wrapped);
    Ok(hex::encode(envelope))
}

/// Recover a payload key from a KEM envelope using the recipient's keypair.
///
/// The recovered bytes are imported for `algo` (CTR for data keys, GCM for
/// folder/room keys). Truncated or misframed input is `MalformedEnvelope`;
/// a wrong secret key surfaces as `AuthenticationFailure` via the GCM tag.
pub fn decapsulate_key(
    envelope_hex: &str,
    keypair: &Keypair,
    algo: KeyAlgo,
) -> VaultResult<UnwrappedKey> {
    let envelope = hex::decode(envelope_hex)
        .map_err(|e| VaultError::MalformedEnvelope(format!("envelope hex: {e}")))?;

    let min_len = KEM_CIPHERTEXT_SIZE + GCM_IV_SIZE + TAG_SIZE;
    if envelope.len() < min_len {
        return Err(VaultError::MalformedEnvelope(format!(
            "envelope too short: {} bytes (minimum {min_len})",
            envelope.len()
        )));
    }

    let (kem_ct, rest) = envelope.split_at(KEM_CIPHERTEXT_SIZE);
    let (iv, wrapped) = rest.split_at(GCM_IV_SIZE);

    let mut shared = keypair.decapsulate_shared(kem_ct)?;
    let cipher = Aes256Gcm::new((&shared).into());
    shared.zeroize();

    let mut payload = cipher
        .decrypt(Nonce::from_slice(iv), wrapped)
        .map_err(|_| VaultError::AuthenticationFailure)?;

    if payload.len() != KEY_SIZE {
        payload.zeroize();
        return Err(VaultError::MalformedEnvelope(format!(
            "recovered payload key has wrong size: {} bytes (expected {KEY_SIZE})",
            payload.len()
        )));
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&payload);
    payload.zeroize();

    Ok(UnwrappedKey::new(key, algo))
}
