//! BLAKE3 content hashing and Merkle-root aggregation
//!
//! Uploaded files are labeled with a Merkle root over their encrypted chunk
//! hashes: the transport can verify individual chunks while the server stores
//! a single content identifier per file.

use pqvault_core::{VaultError, VaultResult};

/// A BLAKE3 hash digest (32 bytes), displayed as 64 hex chars
pub type Hash = blake3::Hash;

/// Hash a byte slice in memory.
pub fn hash_bytes(data: &[u8]) -> Hash {
    blake3::hash(data)
}

/// Format a hash as lowercase hex string (64 chars)
pub fn hash_to_hex(hash: &Hash) -> String {
    hash.to_hex().to_string()
}

/// Parse a 64-char hex string into a Hash
pub fn hash_from_hex(hex: &str) -> VaultResult<Hash> {
    blake3::Hash::from_hex(hex)
        .map_err(|e| VaultError::InvalidInput(format!("invalid BLAKE3 hex '{hex}': {e}")))
}

/// Aggregate ordered leaf hashes into a single Merkle root.
///
/// Pairs are hashed left-to-right; an odd leaf at the end of a level is
/// promoted unchanged. Zero leaves hash the empty input, one leaf is its own
/// root.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => hash_bytes(b""),
        1 => leaves[0],
        _ => {
            let mut level: Vec<Hash> = leaves.to_vec();
            while level.len() > 1 {
                level = level
                    .chunks(2)
                    .map(|pair| match pair {
                        [left, right] => {
                            let mut hasher = blake3::Hasher::new();
                            hasher.update(left.as_bytes());
                            hasher.update(right.as_bytes());
                            hasher.finalize()
                        }
                        [odd] => *odd,
                        _ => unreachable!("chunks(2) yields one or two elements"),
                    })
                    .collect();
            }
            level[0]
        }
    }
}
