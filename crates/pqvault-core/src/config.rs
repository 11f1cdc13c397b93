use serde::{Deserialize, Serialize};

/// Top-level vault configuration (loaded from pqvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub kdf: KdfConfig,
    pub chunking: ChunkingConfig,
}

/// Argon2id parameters for the login credential hash.
///
/// These govern the password hash sent to the server, not seed derivation
/// (which is a fixed SHA-512 construction for deterministic key material).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Chunked-transfer parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Encrypted chunk size on the wire, in bytes (default: 256 KiB).
    /// The plaintext chunk size is derived from this minus per-chunk
    /// cipher overhead, so encrypted chunks align with transport blocks.
    pub transport_block: usize,
    /// Bulk file cipher mode: "ctr" (default, high-throughput) or "gcm"
    /// (authenticated per chunk).
    pub cipher_mode: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            transport_block: 256 * 1024,
            cipher_mode: "ctr".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[kdf]
mem_cost_kib = 131072
time_cost = 4
parallelism = 8

[chunking]
transport_block = 65536
cipher_mode = "gcm"
"#;
        let config: VaultConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.kdf.mem_cost_kib, 131072);
        assert_eq!(config.kdf.time_cost, 4);
        assert_eq!(config.kdf.parallelism, 8);
        assert_eq!(config.chunking.transport_block, 65536);
        assert_eq!(config.chunking.cipher_mode, "gcm");
    }

    #[test]
    fn test_parse_defaults() {
        let config: VaultConfig = toml::from_str("").unwrap();

        assert_eq!(config.kdf.mem_cost_kib, 65536);
        assert_eq!(config.kdf.time_cost, 3);
        assert_eq!(config.kdf.parallelism, 4);
        assert_eq!(config.chunking.transport_block, 256 * 1024);
        assert_eq!(config.chunking.cipher_mode, "ctr");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[chunking]
transport_block = 131072
"#;
        let config: VaultConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.chunking.transport_block, 131072);
        // Defaults
        assert_eq!(config.chunking.cipher_mode, "ctr");
        assert_eq!(config.kdf.mem_cost_kib, 65536);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = VaultConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: VaultConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.kdf.mem_cost_kib, parsed.kdf.mem_cost_kib);
        assert_eq!(config.chunking.transport_block, parsed.chunking.transport_block);
    }
}
