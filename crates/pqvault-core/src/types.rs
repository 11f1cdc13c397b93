//! Server-visible record shapes and key-reference discrimination.
//!
//! The server stores only ciphertext and opaque key envelopes. Which unwrap
//! path applies to a record is encoded in its `encapsulatedKey` field: one of
//! three sentinel markers, or a literal KEM envelope. `KeyReference::parse`
//! is the single place that discrimination happens.

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Sentinel: the record is encrypted directly under the session-wide bulk key.
pub const SENTINEL_GLOBAL: &str = "GLOBAL";
/// Sentinel: the data key is wrapped under a shared folder key.
pub const SENTINEL_FOLDER: &str = "FOLDER";
/// Sentinel: the data key is wrapped under the user's own master key.
pub const SENTINEL_OWN_WRAP: &str = "AES-KW";

/// Identifies a shared folder on the key registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(pub String);

impl From<&str> for FolderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for FolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one encrypted record (task, note, file).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Which unwrap path recovers the key for a record.
///
/// Parsed once from the stored sentinel/envelope fields; all call sites
/// dispatch on this enum instead of comparing strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyReference {
    /// Use the session-wide bulk (CTR) key directly; nothing to unwrap.
    Global,
    /// Resolve the folder's shared key, then unwrap the record's data key
    /// under it.
    Folder(FolderId),
    /// The data key is an AES-GCM envelope wrapped under the user's own
    /// master key (hex `iv || ciphertext+tag`).
    OwnKeyWrap(String),
    /// A literal KEM envelope addressed to a recipient's public key
    /// (hex `kem_ct || iv || ciphertext+tag`). Self-addressed records use
    /// this path with the owner's own keypair.
    PeerEnvelope(String),
}

impl KeyReference {
    /// Discriminate a stored record's key fields.
    ///
    /// - `encapsulated_key`: the sentinel or literal KEM envelope.
    /// - `wrapped_key`: the separately stored wrapped data key, required for
    ///   the `AES-KW` path (the `FOLDER` path carries its wrapped key on the
    ///   file metadata, resolved later).
    /// - `folder`: the record's folder, required for the `FOLDER` path.
    pub fn parse(
        encapsulated_key: &str,
        wrapped_key: Option<&str>,
        folder: Option<&FolderId>,
    ) -> VaultResult<Self> {
        match encapsulated_key {
            "" => Err(VaultError::InvalidInput(
                "record has an empty key reference".into(),
            )),
            SENTINEL_GLOBAL => Ok(Self::Global),
            SENTINEL_FOLDER => folder.cloned().map(Self::Folder).ok_or_else(|| {
                VaultError::InvalidInput("folder-keyed record without a folder id".into())
            }),
            SENTINEL_OWN_WRAP => wrapped_key
                .map(|w| Self::OwnKeyWrap(w.to_string()))
                .ok_or_else(|| {
                    VaultError::InvalidInput("master-wrapped record without a wrapped key".into())
                }),
            envelope => Ok(Self::PeerEnvelope(envelope.to_string())),
        }
    }
}

/// One encrypted row as the server returns it (tasks, notes, titles).
///
/// `encrypted_payload` is the canonical `hex(iv):hex(ciphertext+tag)` text
/// form; `encapsulated_key` is a sentinel or KEM envelope per `KeyReference`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedRecord {
    pub id: RecordId,
    pub encapsulated_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_symmetric_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<FolderId>,
    pub encrypted_payload: String,
}

impl EncryptedRecord {
    /// Parse this record's key reference from its stored fields.
    pub fn key_reference(&self) -> VaultResult<KeyReference> {
        KeyReference::parse(
            &self.encapsulated_key,
            self.encrypted_symmetric_key.as_deref(),
            self.folder.as_ref(),
        )
    }
}

/// Server-visible metadata for one encrypted file.
///
/// The server never sees plaintext, raw keys, or the unwrapped data key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub encapsulated_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_symmetric_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<FolderId>,
    /// Plaintext size in bytes.
    pub size: u64,
    pub mime_type: String,
    pub chunk_count: u64,
}

impl FileMetadata {
    /// Parse this file's key reference from its stored fields.
    pub fn key_reference(&self) -> VaultResult<KeyReference> {
        KeyReference::parse(
            &self.encapsulated_key,
            self.encrypted_symmetric_key.as_deref(),
            self.folder.as_ref(),
        )
    }
}

/// A half-open byte range `[start, end)` in encrypted-byte space.
///
/// Transport addressing (resumable range headers) is expressed in encrypted
/// bytes, which diverge from plaintext offsets by the per-chunk overhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}
