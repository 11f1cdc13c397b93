//! Deterministic seed derivation: password → 64-byte seed → AES keys
//!
//! The seed is a pure function of the password (and, for newer accounts, the
//! account email): logging in on a fresh device reproduces the exact same key
//! material with no server-side secrets. Two salt generations coexist:
//!
//!   v1 (legacy):      SHA-512(password || fixed-salt)
//!   v2 (email-bound): SHA-512(password || email || fixed-salt)
//!
//! Login tries v2 first and falls back to v1 when the regenerated public key
//! does not match the registered one. The derived public key is the only
//! fingerprint consulted; a derivation that matches neither is rejected.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use pqvault_core::{KdfConfig, VaultError, VaultResult};

use crate::kem::Keypair;
use crate::{KEY_SIZE, SEED_SIZE};

/// Fixed salt suffix for seed derivation. Public by design: the password is
/// the secret, the salt only separates this domain from other SHA-512 uses.
const SEED_SALT: &[u8] = b"pqvault/seed/v1";

/// The 64-byte deterministic seed. Zeroized on drop.
#[derive(Clone)]
pub struct Seed {
    bytes: [u8; SEED_SIZE],
}

impl Seed {
    pub fn from_bytes(bytes: [u8; SEED_SIZE]) -> Self {
        Self { bytes }
    }

    /// Accepts exactly `SEED_SIZE` bytes from an untyped source.
    pub fn try_from_slice(bytes: &[u8]) -> VaultResult<Self> {
        let arr: [u8; SEED_SIZE] = bytes.try_into().map_err(|_| {
            VaultError::InvalidInput(format!(
                "seed must be {SEED_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SEED_SIZE] {
        &self.bytes
    }

    /// The AES-256-GCM master key: first 32 bytes of the seed.
    pub fn vault_key(&self) -> VaultKey {
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&self.bytes[..KEY_SIZE]);
        VaultKey { bytes: key }
    }

    /// The AES-256-CTR bulk key: the same first 32 bytes, imported for the
    /// unauthenticated high-throughput path.
    pub fn bulk_key(&self) -> BulkKey {
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&self.bytes[..KEY_SIZE]);
        BulkKey { bytes: key }
    }
}

impl Drop for Seed {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Seed").field("bytes", &"[REDACTED]").finish()
    }
}

/// The AES-256-GCM master key: authenticated envelopes and key wrapping.
/// Zeroized on drop.
#[derive(Clone)]
pub struct VaultKey {
    bytes: [u8; KEY_SIZE],
}

impl VaultKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Derive from raw seed bytes; requires at least 32 bytes.
    pub fn from_seed_slice(seed: &[u8]) -> VaultResult<Self> {
        Ok(Self {
            bytes: key_prefix(seed)?,
        })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for VaultKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The vault-wide AES-256-CTR key for unauthenticated bulk reads.
/// Zeroized on drop.
#[derive(Clone)]
pub struct BulkKey {
    bytes: [u8; KEY_SIZE],
}

impl BulkKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Derive from raw seed bytes; requires at least 32 bytes.
    pub fn from_seed_slice(seed: &[u8]) -> VaultResult<Self> {
        Ok(Self {
            bytes: key_prefix(seed)?,
        })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for BulkKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for BulkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// First 32 bytes of a seed slice, rejecting anything shorter.
fn key_prefix(seed: &[u8]) -> VaultResult<[u8; KEY_SIZE]> {
    if seed.len() < KEY_SIZE {
        return Err(VaultError::InvalidInput(format!(
            "seed too short for key derivation: {} bytes (need {KEY_SIZE})",
            seed.len()
        )));
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&seed[..KEY_SIZE]);
    Ok(key)
}

/// Seed derivation generations, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltVersion {
    /// v2: the account email is mixed into the digest.
    EmailBound,
    /// v1: static salt only.
    Legacy,
}

impl SaltVersion {
    /// Derivation strategies to try, in priority order. Future generations
    /// are appended here, newest first.
    pub fn candidates(email_available: bool) -> &'static [SaltVersion] {
        if email_available {
            &[SaltVersion::EmailBound, SaltVersion::Legacy]
        } else {
            &[SaltVersion::Legacy]
        }
    }

    /// Derive the seed under this generation.
    pub fn derive(self, password: &SecretString, email: Option<&str>) -> VaultResult<Seed> {
        match self {
            SaltVersion::EmailBound => {
                let email = email.ok_or_else(|| {
                    VaultError::InvalidInput("email-bound derivation requires an email".into())
                })?;
                Ok(derive_seed(password, Some(email)))
            }
            SaltVersion::Legacy => Ok(derive_seed(password, None)),
        }
    }
}

/// Compute the 64-byte seed: `SHA-512(password || context? || fixed-salt)`.
///
/// Deterministic: identical inputs yield identical bytes, bit for bit.
pub fn derive_seed(password: &SecretString, context: Option<&str>) -> Seed {
    let mut hasher = Sha512::new();
    hasher.update(password.expose_secret().as_bytes());
    if let Some(context) = context {
        hasher.update(context.as_bytes());
    }
    hasher.update(SEED_SALT);

    let digest = hasher.finalize();
    let mut bytes = [0u8; SEED_SIZE];
    bytes.copy_from_slice(&digest);
    Seed::from_bytes(bytes)
}

/// Derive the seed whose regenerated public key matches the registered one.
///
/// Candidates are tried newest-first; the first whose ML-KEM public key equals
/// `expected_public_key` wins. With no expectation (registration), the newest
/// candidate is used directly. A password matching no candidate is a
/// resolution failure — a third, unexpected key is never silently accepted.
///
/// Returns the seed, the generation that matched, and its public key hex.
pub fn derive_seed_matching(
    password: &SecretString,
    email: Option<&str>,
    expected_public_key: Option<&str>,
) -> VaultResult<(Seed, SaltVersion, String)> {
    let candidates = SaltVersion::candidates(email.is_some());

    for &version in candidates {
        let seed = version.derive(password, email)?;
        let public_key = Keypair::from_seed(&seed).public_key_hex();

        match expected_public_key {
            None => return Ok((seed, version, public_key)),
            Some(expected) if expected == public_key => {
                tracing::debug!(?version, "seed derivation matched registered identity");
                return Ok((seed, version, public_key));
            }
            Some(_) => continue,
        }
    }

    Err(VaultError::KeyResolution(
        "no seed derivation matches the registered identity".into(),
    ))
}

/// Argon2id login credential hash (PHC string, random salt).
///
/// This is the hash sent to the server for authentication; it is never used
/// as key material and is not deterministic across calls.
pub fn hash_password(password: &SecretString, config: &KdfConfig) -> VaultResult<String> {
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
    use argon2::{Algorithm, Argon2, Params, Version};

    let params = Params::new(config.mem_cost_kib, config.time_cost, config.parallelism, None)
        .map_err(|e| VaultError::InvalidInput(format!("invalid Argon2id params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map_err(|e| VaultError::Other(anyhow::anyhow!("Argon2id hashing failed: {e}")))?;

    Ok(hash.to_string())
}

/// Derive only the public discovery key for registration.
///
/// No secret material is returned: the seed and secret key are dropped after
/// keygen, and the caller transmits just the public key hex.
pub fn discovery_public_key(password: &SecretString, email: Option<&str>) -> VaultResult<String> {
    let (_seed, _version, public_key) = derive_seed_matching(password, email, None)?;
    Ok(public_key)
}
