//! Small-payload encryption for record fields (titles, filenames, notes)
//!
//! Canonical text form, one per field, applied consistently:
//! ```text
//! GCM (authenticated, per-record):  hex(iv[12]) ":" hex(ciphertext + tag)
//! CTR (bulk eco-mode reads):        hex(iv[16]) ":" hex(ciphertext)
//! ```
//!
//! The colon-separated hex form is the single canonical encoding for these
//! fields; no call site emits the concatenated-base64 variant.

use aes::Aes256;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

use pqvault_core::{VaultError, VaultResult};

use crate::{CTR_IV_SIZE, GCM_IV_SIZE, KEY_SIZE};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Encrypt a small payload under AES-256-GCM. Fresh IV per call.
pub fn encrypt_text(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> VaultResult<String> {
    let cipher = Aes256Gcm::new(key.into());

    let mut iv = [0u8; GCM_IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| VaultError::Other(anyhow::anyhow!("payload encryption failed: {e}")))?;

    Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
}

/// Decrypt a payload produced by [`encrypt_text`].
pub fn decrypt_text(encoded: &str, key: &[u8; KEY_SIZE]) -> VaultResult<Vec<u8>> {
    let (iv, ciphertext) = parse_parts(encoded, GCM_IV_SIZE)?;

    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
        .map_err(|_| VaultError::AuthenticationFailure)
}

/// Encrypt a payload under AES-256-CTR (unauthenticated bulk path).
pub fn encrypt_text_bulk(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> VaultResult<String> {
    let mut iv = [0u8; CTR_IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut ciphertext = plaintext.to_vec();
    let mut cipher = Aes256Ctr::new(key.into(), (&iv).into());
    cipher.apply_keystream(&mut ciphertext);

    Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
}

/// Decrypt a payload produced by [`encrypt_text_bulk`].
///
/// CTR carries no authentication: a wrong key yields garbage bytes, not an
/// error. Reserved for the vault-wide bulk read path where the key is the
/// session's own.
pub fn decrypt_text_bulk(encoded: &str, key: &[u8; KEY_SIZE]) -> VaultResult<Vec<u8>> {
    let (iv, ciphertext) = parse_parts(encoded, CTR_IV_SIZE)?;

    let mut iv_block = [0u8; CTR_IV_SIZE];
    iv_block.copy_from_slice(&iv);

    let mut plaintext = ciphertext;
    let mut cipher = Aes256Ctr::new(key.into(), (&iv_block).into());
    cipher.apply_keystream(&mut plaintext);
    Ok(plaintext)
}

/// Strict parse of the `hex(iv):hex(ciphertext)` form.
fn parse_parts(encoded: &str, iv_len: usize) -> VaultResult<(Vec<u8>, Vec<u8>)> {
    let (iv_hex, ct_hex) = encoded.split_once(':').ok_or_else(|| {
        VaultError::InvalidInput("payload is not in iv:ciphertext form".into())
    })?;

    let iv = hex::decode(iv_hex)
        .map_err(|e| VaultError::InvalidInput(format!("payload IV hex: {e}")))?;
    if iv.len() != iv_len {
        return Err(VaultError::InvalidInput(format!(
            "payload IV must be {iv_len} bytes, got {}",
            iv.len()
        )));
    }

    let ciphertext = hex::decode(ct_hex)
        .map_err(|e| VaultError::InvalidInput(format!("payload ciphertext hex: {e}")))?;

    Ok((iv, ciphertext))
}
