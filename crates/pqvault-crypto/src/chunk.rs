//! Chunked file encryption: fixed-size, independently decryptable chunks
//!
//! Encrypted chunk format (raw bytes, no separator):
//! ```text
//! GCM: [12-byte IV][ciphertext][16-byte tag]     overhead = 28
//! CTR: [16-byte IV][ciphertext]                  overhead = 16
//! ```
//!
//! The plaintext chunk size is `transport_block - overhead`, so every
//! encrypted chunk except the last is exactly one transport block: range
//! addressing on the wire stays aligned. Chunk ranges are tracked in
//! encrypted-byte space, which diverges from plaintext offsets by the
//! accumulated per-chunk overhead.
//!
//! Every chunk gets a fresh random IV. In CTR mode the IV is the initial
//! counter block and must never repeat under the same key; nothing here
//! derives counter blocks from chunk indices.

use aes::Aes256;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

use pqvault_core::{ByteRange, ChunkingConfig, VaultError, VaultResult};

use crate::keys::DataKey;
use crate::{CTR_IV_SIZE, GCM_IV_SIZE, TAG_SIZE};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Bulk cipher mode for file chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// Authenticated per chunk; tampering fails the chunk's tag check.
    Gcm,
    /// Unauthenticated, high-throughput: the vault-wide bulk read path.
    Ctr,
}

impl ChunkMode {
    pub fn iv_len(self) -> usize {
        match self {
            ChunkMode::Gcm => GCM_IV_SIZE,
            ChunkMode::Ctr => CTR_IV_SIZE,
        }
    }

    /// Per-chunk encrypted overhead: IV plus tag where authenticated.
    pub fn overhead(self) -> usize {
        match self {
            ChunkMode::Gcm => GCM_IV_SIZE + TAG_SIZE,
            ChunkMode::Ctr => CTR_IV_SIZE,
        }
    }
}

impl std::str::FromStr for ChunkMode {
    type Err = VaultError;

    fn from_str(s: &str) -> VaultResult<Self> {
        match s {
            "gcm" => Ok(ChunkMode::Gcm),
            "ctr" => Ok(ChunkMode::Ctr),
            other => Err(VaultError::InvalidInput(format!(
                "unknown chunk cipher mode: {other:?} (expected \"gcm\" or \"ctr\")"
            ))),
        }
    }
}

/// Chunk geometry: cipher mode plus the on-the-wire block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProfile {
    mode: ChunkMode,
    transport_block: usize,
}

impl ChunkProfile {
    pub fn new(mode: ChunkMode, transport_block: usize) -> VaultResult<Self> {
        if transport_block <= mode.overhead() {
            return Err(VaultError::InvalidInput(format!(
                "transport block of {transport_block} bytes cannot hold {} bytes of chunk overhead",
                mode.overhead()
            )));
        }
        Ok(Self {
            mode,
            transport_block,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> VaultResult<Self> {
        Self::new(config.cipher_mode.parse()?, config.transport_block)
    }

    pub fn mode(&self) -> ChunkMode {
        self.mode
    }

    /// Encrypted chunk size on the wire (all chunks but the last).
    pub fn transport_block(&self) -> usize {
        self.transport_block
    }

    /// Plaintext bytes per chunk.
    pub fn raw_chunk_size(&self) -> usize {
        self.transport_block - self.mode.overhead()
    }

    /// Number of chunks for a plaintext of `plain_size` bytes.
    /// Zero bytes means zero chunks.
    pub fn chunk_count(&self, plain_size: u64) -> u64 {
        plain_size.div_ceil(self.raw_chunk_size() as u64)
    }

    /// Total encrypted size, declared to the transport before upload:
    /// `plain_size + chunk_count * overhead`.
    pub fn encrypted_size(&self, plain_size: u64) -> u64 {
        plain_size + self.chunk_count(plain_size) * self.mode.overhead() as u64
    }
}

/// One encrypted chunk plus its transport addressing.
#[derive(Debug, Clone)]
pub struct EncryptedChunk {
    pub bytes: Vec<u8>,
    /// Position in encrypted-byte space (what range headers address).
    pub range: ByteRange,
}

/// Streaming encryptor: feed plaintext chunks in order, emit wire chunks.
pub struct ChunkEncryptor {
    profile: ChunkProfile,
    key: DataKey,
    encrypted_offset: u64,
}

impl ChunkEncryptor {
    pub fn new(profile: ChunkProfile, key: &DataKey) -> Self {
        Self {
            profile,
            key: key.clone(),
            encrypted_offset: 0,
        }
    }

    pub fn profile(&self) -> ChunkProfile {
        self.profile
    }

    /// Encrypt the next plaintext chunk.
    ///
    /// Every chunk but the last must be exactly `raw_chunk_size()` bytes;
    /// the last may be shorter but never empty (a plaintext whose size is an
    /// exact multiple of the chunk size produces no trailing empty chunk).
    pub fn encrypt_next(&mut self, plaintext: &[u8]) -> VaultResult<EncryptedChunk> {
        if plaintext.is_empty() {
            return Err(VaultError::InvalidInput(
                "refusing to encrypt an empty chunk".into(),
            ));
        }
        if plaintext.len() > self.profile.raw_chunk_size() {
            return Err(VaultError::InvalidInput(format!(
                "chunk of {} bytes exceeds the {}-byte plaintext chunk size",
                plaintext.len(),
                self.profile.raw_chunk_size()
            )));
        }

        let bytes = encrypt_one(self.profile.mode, &self.key, plaintext)?;

        let start = self.encrypted_offset;
        let end = start + bytes.len() as u64;
        self.encrypted_offset = end;

        Ok(EncryptedChunk {
            bytes,
            range: ByteRange { start, end },
        })
    }
}

/// Streaming decryptor: feed encrypted bytes as they arrive, in order.
///
/// Buffers input until a full transport block is available, then decrypts
/// exactly one chunk at a time. The final (possibly short) chunk is decrypted
/// by `finish` at end of input. Plaintext comes out in arrival order.
pub struct ChunkDecryptor {
    profile: ChunkProfile,
    key: DataKey,
    buf: Vec<u8>,
}

impl ChunkDecryptor {
    pub fn new(profile: ChunkProfile, key: &DataKey) -> Self {
        Self {
            profile,
            key: key.clone(),
            buf: Vec::with_capacity(profile.transport_block()),
        }
    }

    /// Feed arriving bytes; returns any plaintext that became decryptable.
    pub fn push(&mut self, bytes: &[u8]) -> VaultResult<Vec<u8>> {
        self.buf.extend_from_slice(bytes);

        let block = self.profile.transport_block();
        let mut plaintext = Vec::new();
        while self.buf.len() >= block {
            let chunk: Vec<u8> = self.buf.drain(..block).collect();
            plaintext.extend_from_slice(&decrypt_one(self.profile.mode, &self.key, &chunk)?);
        }
        Ok(plaintext)
    }

    /// End of input: decrypt the final short chunk, if any.
    pub fn finish(mut self) -> VaultResult<Vec<u8>> {
        if self.buf.is_empty() {
            return Ok(Vec::new());
        }
        if self.buf.len() <= self.profile.mode.overhead() {
            return Err(VaultError::MalformedEnvelope(format!(
                "trailing chunk fragment of {} bytes is shorter than the {}-byte chunk overhead",
                self.buf.len(),
                self.profile.mode.overhead()
            )));
        }
        let chunk = std::mem::take(&mut self.buf);
        decrypt_one(self.profile.mode, &self.key, &chunk)
    }
}

fn encrypt_one(mode: ChunkMode, key: &DataKey, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
    match mode {
        ChunkMode::Gcm => {
            let cipher = Aes256Gcm::new(key.as_bytes().into());
            let mut iv = [0u8; GCM_IV_SIZE];
            rand::thread_rng().fill_bytes(&mut iv);

            let ciphertext = cipher
                .encrypt(Nonce::from_slice(&iv), plaintext)
                .map_err(|e| VaultError::Other(anyhow::anyhow!("chunk encryption failed: {e}")))?;

            let mut out = Vec::with_capacity(GCM_IV_SIZE + ciphertext.len());
            out.extend_from_slice(&iv);
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
        ChunkMode::Ctr => {
            let mut iv = [0u8; CTR_IV_SIZE];
            rand::thread_rng().fill_bytes(&mut iv);

            let mut out = Vec::with_capacity(CTR_IV_SIZE + plaintext.len());
            out.extend_from_slice(&iv);
            out.extend_from_slice(plaintext);

            let mut cipher = Aes256Ctr::new(key.as_bytes().into(), (&iv).into());
            cipher.apply_keystream(&mut out[CTR_IV_SIZE..]);
            Ok(out)
        }
    }
}

fn decrypt_one(mode: ChunkMode, key: &DataKey, encrypted: &[u8]) -> VaultResult<Vec<u8>> {
    let iv_len = mode.iv_len();
    if encrypted.len() < iv_len {
        return Err(VaultError::MalformedEnvelope(format!(
            "chunk of {} bytes is shorter than its {iv_len}-byte IV",
            encrypted.len()
        )));
    }
    let (iv, ciphertext) = encrypted.split_at(iv_len);

    match mode {
        ChunkMode::Gcm => {
            let cipher = Aes256Gcm::new(key.as_bytes().into());
            cipher
                .decrypt(Nonce::from_slice(iv), ciphertext)
                .map_err(|_| VaultError::AuthenticationFailure)
        }
        ChunkMode::Ctr => {
            let mut iv_block = [0u8; CTR_IV_SIZE];
            iv_block.copy_from_slice(iv);

            let mut plaintext = ciphertext.to_vec();
            let mut cipher = Aes256Ctr::new(key.as_bytes().into(), (&iv_block).into());
            cipher.apply_keystream(&mut plaintext);
            Ok(plaintext)
        }
    }
}
