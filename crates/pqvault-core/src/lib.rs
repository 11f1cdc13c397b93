pub mod config;
pub mod error;
pub mod types;

pub use config::{ChunkingConfig, KdfConfig, VaultConfig};
pub use error::{VaultError, VaultResult};
pub use types::{ByteRange, EncryptedRecord, FileMetadata, FolderId, KeyReference, RecordId};
