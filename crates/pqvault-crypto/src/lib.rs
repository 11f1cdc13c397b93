//! pqvault-crypto: Client-side E2E encryption for the vault
//!
//! Architecture: password-derived deterministic identity + random per-file keys
//!
//! Pipeline: password → SHA-512 seed → {AES vault keys, ML-KEM-768 keypair}
//!           file → fixed-size chunks → AES-256-CTR/GCM encrypt → upload
//!
//! Key hierarchy:
//! ```text
//! Seed (64 bytes, SHA-512 of password + salt context, deterministic)
//!   ├── Vault Key    (AES-256-GCM, seed[0..32]): wraps data keys, encrypts titles
//!   ├── Bulk Key     (AES-256-CTR, seed[0..32]): vault-wide high-throughput reads
//!   └── ML-KEM-768 keypair (deterministic from seed): sharing + self-addressed
//!       envelopes; public key doubles as the account's discovery identity
//! Data Key (per-file, 256-bit random)
//!   └── transported wrapped: under the vault key, a folder key, or inside a
//!       KEM envelope addressed to a recipient
//! ```

pub mod chunk;
pub mod hash;
pub mod kem;
pub mod keys;
pub mod payload;
pub mod seed;

pub use chunk::{ChunkDecryptor, ChunkEncryptor, ChunkMode, ChunkProfile, EncryptedChunk};
pub use hash::{hash_bytes, hash_from_hex, hash_to_hex, merkle_root, Hash};
pub use kem::{decapsulate_key, encapsulate_key, Keypair};
pub use keys::{unwrap_key, wrap_key, DataKey, KeyAlgo, UnwrappedKey};
pub use payload::{decrypt_text, decrypt_text_bulk, encrypt_text, encrypt_text_bulk};
pub use seed::{
    derive_seed, derive_seed_matching, discovery_public_key, hash_password, BulkKey, SaltVersion,
    Seed, VaultKey,
};

/// Size of the deterministic seed in bytes
pub const SEED_SIZE: usize = 64;

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce
pub const GCM_IV_SIZE: usize = 12;

/// Size of an AES-CTR initial counter block
pub const CTR_IV_SIZE: usize = 16;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// ML-KEM-768 encapsulation (public) key size
pub const KEM_PUBLIC_KEY_SIZE: usize = 1184;

/// ML-KEM-768 decapsulation (secret) key size
pub const KEM_SECRET_KEY_SIZE: usize = 2400;

/// ML-KEM-768 ciphertext size
pub const KEM_CIPHERTEXT_SIZE: usize = 1088;
