//! Chunked upload/download pipelines over an opaque byte transport
//!
//! The transport is only a boundary here: uploads hand encrypted chunks plus
//! their encrypted-byte ranges to a [`ChunkSink`], downloads consume an
//! ordered byte stream. Total encrypted size is declared before the first
//! chunk is sent so resumable-range transports can address bytes up front.
//!
//! Both pipelines honor caller-initiated abandonment (navigating away from a
//! preview, closing a gallery): a cancelled operation returns `Ok(None)`, its
//! buffers are dropped, and nothing partial is surfaced.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use anyhow::{Context, Result};

use pqvault_crypto::{
    hash_bytes, hash_to_hex, merkle_root, ChunkDecryptor, ChunkEncryptor, ChunkProfile, DataKey,
    EncryptedChunk, Hash,
};

/// Receiving end of the upload transport.
///
/// `put` is called once per encrypted chunk, in order, with the total
/// encrypted size (constant across the upload, known before the first call).
pub trait ChunkSink {
    fn put(
        &mut self,
        chunk: EncryptedChunk,
        total_encrypted: u64,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Result of a completed upload.
#[derive(Debug)]
pub struct UploadSummary {
    pub plain_bytes: u64,
    pub encrypted_bytes: u64,
    pub chunks: u64,
    /// Merkle root over the encrypted chunk hashes (hex), the file's content
    /// label.
    pub content_root: String,
}

/// Encrypt a finite byte source into fixed-size chunks and feed them to the
/// sink.
///
/// `plain_size` must match the source exactly; the declared encrypted size is
/// computed from it before any bytes move. Source buffers of arbitrary sizes
/// are re-sliced into exact plaintext chunks. Returns `Ok(None)` if `cancel`
/// fires mid-upload.
pub async fn upload_stream<S, K>(
    mut source: S,
    plain_size: u64,
    profile: ChunkProfile,
    key: &DataKey,
    sink: &mut K,
    cancel: &CancellationToken,
) -> Result<Option<UploadSummary>>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    K: ChunkSink,
{
    let total_encrypted = profile.encrypted_size(plain_size);
    let raw = profile.raw_chunk_size();

    let mut encryptor = ChunkEncryptor::new(profile, key);
    let mut pending: Vec<u8> = Vec::with_capacity(raw);
    let mut leaves: Vec<Hash> = Vec::new();
    let mut plain_seen = 0u64;
    let mut encrypted_sent = 0u64;

    while let Some(piece) = source.next().await {
        if cancel.is_cancelled() {
            debug!("upload abandoned by caller");
            return Ok(None);
        }

        let piece = piece.context("reading upload source")?;
        plain_seen += piece.len() as u64;
        pending.extend_from_slice(&piece);

        while pending.len() >= raw {
            let chunk_plain: Vec<u8> = pending.drain(..raw).collect();
            encrypted_sent =
                emit_chunk(&mut encryptor, &chunk_plain, &mut leaves, sink, total_encrypted)
                    .await?;
        }
    }

    if cancel.is_cancelled() {
        debug!("upload abandoned by caller");
        return Ok(None);
    }

    if !pending.is_empty() {
        let chunk_plain = std::mem::take(&mut pending);
        encrypted_sent =
            emit_chunk(&mut encryptor, &chunk_plain, &mut leaves, sink, total_encrypted).await?;
    }

    if plain_seen != plain_size {
        anyhow::bail!("upload source produced {plain_seen} bytes, declared {plain_size}");
    }

    let summary = UploadSummary {
        plain_bytes: plain_seen,
        encrypted_bytes: encrypted_sent,
        chunks: leaves.len() as u64,
        content_root: hash_to_hex(&merkle_root(&leaves)),
    };

    info!(
        plain_bytes = summary.plain_bytes,
        encrypted_bytes = summary.encrypted_bytes,
        chunks = summary.chunks,
        root = %summary.content_root,
        "upload complete"
    );
    Ok(Some(summary))
}

async fn emit_chunk<K: ChunkSink>(
    encryptor: &mut ChunkEncryptor,
    plaintext: &[u8],
    leaves: &mut Vec<Hash>,
    sink: &mut K,
    total_encrypted: u64,
) -> Result<u64> {
    let chunk = encryptor.encrypt_next(plaintext)?;
    leaves.push(hash_bytes(&chunk.bytes));
    let end = chunk.range.end;
    sink.put(chunk, total_encrypted)
        .await
        .context("uploading chunk")?;
    Ok(end)
}

/// Decrypt an ordered stream of encrypted bytes back into plaintext.
///
/// Chunks are decrypted as soon as a full transport block has arrived;
/// plaintext is assembled strictly in arrival order. Returns `Ok(None)` if
/// `cancel` fires mid-download, dropping the accumulation buffer.
pub async fn download_stream<S>(
    mut source: S,
    profile: ChunkProfile,
    key: &DataKey,
    cancel: &CancellationToken,
) -> Result<Option<Vec<u8>>>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let mut decryptor = ChunkDecryptor::new(profile, key);
    let mut plaintext = Vec::new();

    while let Some(piece) = source.next().await {
        if cancel.is_cancelled() {
            debug!("download abandoned by caller");
            return Ok(None);
        }

        let piece = piece.context("reading download stream")?;
        plaintext.extend_from_slice(&decryptor.push(&piece)?);
    }

    if cancel.is_cancelled() {
        debug!("download abandoned by caller");
        return Ok(None);
    }

    plaintext.extend_from_slice(&decryptor.finish()?);
    Ok(Some(plaintext))
}

/// Stale-result guard for view-bound downloads.
///
/// Every new request takes a ticket; a completion is applied only when its
/// ticket is still the latest. A result arriving after the caller moved on
/// (gallery index changed, preview closed) is discarded explicitly rather
/// than painted over newer state.
#[derive(Debug, Default)]
pub struct DownloadGate {
    latest: AtomicU64,
}

impl DownloadGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request, superseding all earlier ones.
    pub fn begin(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether a completed request's result should still be applied.
    pub fn is_current(&self, ticket: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket
    }
}
