//! Folder sharing across identities: the owner encapsulates the folder key
//! to a peer's public key; the peer resolves it through the registry and
//! decrypts folder files without ever seeing the owner's secrets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use futures::stream;
use secrecy::SecretString;

use pqvault_core::{FileMetadata, FolderId, VaultConfig, VaultError};
use pqvault_crypto::{wrap_key, DataKey, EncryptedChunk};
use pqvault_session::{download_stream, upload_stream, ChunkSink, KeyRegistry, Session};

fn test_config() -> VaultConfig {
    let mut config = VaultConfig::default();
    config.kdf.mem_cost_kib = 1024;
    config.kdf.time_cost = 1;
    config.kdf.parallelism = 1;
    config.chunking.transport_block = 512;
    config
}

async fn login(password: &str, email: &str) -> Session {
    Session::login(
        SecretString::from(password),
        Some(email.into()),
        None,
        &test_config(),
    )
    .await
    .unwrap()
}

/// Shared-state registry: folder id → KEM envelope, as the server stores it.
#[derive(Default)]
struct SharedRegistry {
    shares: Mutex<HashMap<FolderId, String>>,
    fetches: AtomicUsize,
}

impl SharedRegistry {
    fn grant(&self, folder: FolderId, envelope: String) {
        self.shares
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(folder, envelope);
    }

    fn revoke(&self, folder: &FolderId) {
        self.shares
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(folder);
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl KeyRegistry for SharedRegistry {
    async fn fetch_folder_key(&self, folder: &FolderId) -> anyhow::Result<Option<String>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .shares
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(folder)
            .cloned())
    }
}

#[derive(Default)]
struct MemoryTransport {
    chunks: Vec<EncryptedChunk>,
}

impl ChunkSink for MemoryTransport {
    async fn put(&mut self, chunk: EncryptedChunk, _total: u64) -> anyhow::Result<()> {
        self.chunks.push(chunk);
        Ok(())
    }
}

#[tokio::test]
async fn peer_decrypts_a_folder_file_shared_by_owner() {
    let owner = login("owner-password", "owner@example.com").await;
    let peer = login("peer-password", "peer@example.com").await;
    let registry = SharedRegistry::default();

    let folder = FolderId::from("course-notes");
    let folder_key = DataKey::generate();

    // Owner encrypts a file into the folder.
    let dek = DataKey::generate();
    let plain = b"week 4: chunked stream ciphers".to_vec();
    let profile = owner.chunk_profile();
    let mut transport = MemoryTransport::default();
    upload_stream(
        stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(plain.clone()))]),
        plain.len() as u64,
        profile,
        &dek,
        &mut transport,
        &owner.cancellation(),
    )
    .await
    .unwrap()
    .unwrap();

    let meta = FileMetadata {
        encapsulated_key: "FOLDER".into(),
        encrypted_symmetric_key: Some(wrap_key(dek.as_bytes(), folder_key.as_bytes()).unwrap()),
        folder: Some(folder.clone()),
        size: plain.len() as u64,
        mime_type: "text/markdown".into(),
        chunk_count: 1,
    };

    // Owner shares the folder key with the peer's discovery key.
    let envelope = owner
        .share_key(folder_key.as_bytes(), &peer.public_key_hex())
        .await
        .unwrap();
    registry.grant(folder.clone(), envelope);

    // Peer resolves the file key through the folder share and decrypts.
    let resolved = peer.file_key(&meta, &registry).await.unwrap();
    assert_eq!(resolved.as_bytes(), dek.as_bytes());

    let wire: Vec<u8> = transport.chunks.iter().flat_map(|c| c.bytes.clone()).collect();
    let out = download_stream(
        stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(wire))]),
        profile,
        &resolved,
        &peer.cancellation(),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(out, plain);

    owner.close().await;
    peer.close().await;
}

#[tokio::test]
async fn concurrent_resolution_decapsulates_once() {
    let owner = login("owner-password", "owner@example.com").await;
    let peer = login("peer-password", "peer@example.com").await;
    let registry = SharedRegistry::default();

    let folder = FolderId::from("shared-once");
    let folder_key = DataKey::generate();
    let envelope = owner
        .share_key(folder_key.as_bytes(), &peer.public_key_hex())
        .await
        .unwrap();
    registry.grant(folder.clone(), envelope);

    let (a, b, c) = tokio::join!(
        peer.folder_key(&folder, &registry),
        peer.folder_key(&folder, &registry),
        peer.folder_key(&folder, &registry),
    );

    assert_eq!(a.unwrap().as_bytes(), folder_key.as_bytes());
    assert_eq!(b.unwrap().as_bytes(), folder_key.as_bytes());
    assert_eq!(c.unwrap().as_bytes(), folder_key.as_bytes());
    assert_eq!(registry.fetch_count(), 1);

    owner.close().await;
    peer.close().await;
}

#[tokio::test]
async fn revoked_access_is_a_resolution_failure_not_auth() {
    let peer = login("peer-password", "peer@example.com").await;
    let registry = SharedRegistry::default();

    let folder = FolderId::from("revoked");
    registry.revoke(&folder);

    let err = peer.folder_key(&folder, &registry).await.unwrap_err();
    assert!(matches!(err, VaultError::KeyResolution(_)));

    peer.close().await;
}

#[tokio::test]
async fn stranger_cannot_decapsulate_anothers_share() {
    let owner = login("owner-password", "owner@example.com").await;
    let peer = login("peer-password", "peer@example.com").await;
    let stranger = login("stranger-password", "stranger@example.com").await;
    let registry = SharedRegistry::default();

    let folder = FolderId::from("private");
    let folder_key = DataKey::generate();
    let envelope = owner
        .share_key(folder_key.as_bytes(), &peer.public_key_hex())
        .await
        .unwrap();
    registry.grant(folder.clone(), envelope);

    // The envelope is addressed to the peer; the stranger's decapsulation
    // fails the tag check deterministically.
    let err = stranger.folder_key(&folder, &registry).await.unwrap_err();
    assert!(matches!(err, VaultError::AuthenticationFailure));

    owner.close().await;
    peer.close().await;
    stranger.close().await;
}
