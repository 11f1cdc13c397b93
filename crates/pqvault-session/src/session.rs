//! Session context: login, key resolution, folder-key cache, teardown
//!
//! One `Session` per login, explicitly constructed and explicitly closed. It
//! owns every piece of session key material (seed-derived keys, the
//! regenerated keypair), the crypto worker, and the folder-key cache; closing
//! the session cancels in-flight transfers, stops the worker, and drops the
//! keys (which zeroize themselves).

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pqvault_core::{
    EncryptedRecord, FileMetadata, FolderId, KeyReference, VaultConfig, VaultError, VaultResult,
};
use pqvault_crypto::{
    unwrap_key, BulkKey, ChunkProfile, DataKey, KeyAlgo, Keypair, SaltVersion, UnwrappedKey,
    VaultKey, KEY_SIZE,
};

use crate::batch::BatchOutcome;
use crate::worker::CryptoWorker;

/// The server-side key registry, seen purely as a key-resolution data source.
///
/// For folders the caller does not own, the registry returns the KEM envelope
/// the owner addressed to this user's public key; `None` means no share
/// exists (or access was revoked).
pub trait KeyRegistry: Send + Sync {
    fn fetch_folder_key(
        &self,
        folder: &FolderId,
    ) -> impl std::future::Future<Output = anyhow::Result<Option<String>>> + Send;
}

type FolderKeyCache = Mutex<HashMap<FolderId, Arc<OnceCell<Arc<UnwrappedKey>>>>>;

/// An active vault session.
pub struct Session {
    vault_key: VaultKey,
    bulk_key: BulkKey,
    keypair: Arc<Keypair>,
    salt_version: SaltVersion,
    worker: CryptoWorker,
    folder_keys: FolderKeyCache,
    cancel: CancellationToken,
    profile: ChunkProfile,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("salt_version", &self.salt_version)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Log in: derive the seed (dual-salt fallback against the registered
    /// public key), rebuild the session's keys and keypair, and start the
    /// crypto worker.
    ///
    /// A derivation that matches no registered identity fails the login
    /// outright; no vault operation proceeds without the session keys.
    pub async fn login(
        password: SecretString,
        email: Option<String>,
        registered_public_key: Option<String>,
        config: &VaultConfig,
    ) -> VaultResult<Self> {
        let profile = ChunkProfile::from_config(&config.chunking)?;
        let worker = CryptoWorker::spawn(config.kdf.clone())?;

        let info = worker
            .derive_seed(password, email, registered_public_key)
            .await?;

        let session = Self {
            vault_key: info.seed.vault_key(),
            bulk_key: info.seed.bulk_key(),
            keypair: Arc::new(Keypair::from_seed(&info.seed)),
            salt_version: info.version,
            worker,
            folder_keys: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            profile,
        };

        info!(version = ?session.salt_version, "vault session established");
        Ok(session)
    }

    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }

    pub fn salt_version(&self) -> SaltVersion {
        self.salt_version
    }

    pub fn chunk_profile(&self) -> ChunkProfile {
        self.profile
    }

    pub fn worker(&self) -> &CryptoWorker {
        &self.worker
    }

    /// Child token for a cancellable operation (download, preview). Cancelled
    /// wholesale at session close.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Resolve a folder's shared key, decapsulating at most once.
    ///
    /// The first caller fetches the envelope from the registry and
    /// decapsulates it on the worker; concurrent callers for the same folder
    /// await that same resolution instead of racing their own. Failures are
    /// not cached, so a later call may retry after access is restored.
    pub async fn folder_key<R: KeyRegistry>(
        &self,
        folder: &FolderId,
        registry: &R,
    ) -> VaultResult<Arc<UnwrappedKey>> {
        let cell = {
            let mut cache = self.folder_keys.lock().await;
            Arc::clone(cache.entry(folder.clone()).or_default())
        };

        let key = cell
            .get_or_try_init(|| async {
                debug!(%folder, "resolving folder key");
                let envelope = registry
                    .fetch_folder_key(folder)
                    .await
                    .map_err(|e| VaultError::KeyResolution(format!("folder {folder}: {e}")))?
                    .ok_or_else(|| {
                        VaultError::KeyResolution(format!(
                            "no shared key for folder {folder}: access denied or key unavailable"
                        ))
                    })?;
                let key = self
                    .worker
                    .decapsulate(envelope, Arc::clone(&self.keypair), KeyAlgo::Gcm)
                    .await?;
                Ok::<_, VaultError>(Arc::new(key))
            })
            .await?;

        Ok(Arc::clone(key))
    }

    /// Resolve the data key for a file from its stored key reference.
    ///
    /// This is the single dispatch point for the sentinel markers: the chunk
    /// cipher itself only ever sees the resolved key.
    pub async fn file_key<R: KeyRegistry>(
        &self,
        meta: &FileMetadata,
        registry: &R,
    ) -> VaultResult<DataKey> {
        match meta.key_reference()? {
            // Legacy vault-wide files are encrypted directly under the bulk
            // key; there is nothing to unwrap.
            KeyReference::Global => Ok(DataKey::from_bytes(*self.bulk_key.as_bytes())),
            KeyReference::OwnKeyWrap(envelope) => {
                let key = unwrap_key(&envelope, self.vault_key.as_bytes(), KeyAlgo::Ctr)?;
                Ok(key.to_data_key())
            }
            KeyReference::Folder(folder) => {
                let folder_key = self.folder_key(&folder, registry).await?;
                let wrapped = meta.encrypted_symmetric_key.as_deref().ok_or_else(|| {
                    VaultError::InvalidInput(
                        "folder-keyed file without a wrapped data key".into(),
                    )
                })?;
                let key = unwrap_key(wrapped, folder_key.as_bytes(), KeyAlgo::Ctr)?;
                Ok(key.to_data_key())
            }
            KeyReference::PeerEnvelope(envelope) => {
                let key = self
                    .worker
                    .decapsulate(envelope, Arc::clone(&self.keypair), KeyAlgo::Ctr)
                    .await?;
                Ok(key.to_data_key())
            }
        }
    }

    /// Wrap a fresh data key under the session's own master key, returning
    /// the envelope for the record's `encryptedSymmetricKey` field.
    pub fn wrap_data_key(&self, key: &DataKey) -> VaultResult<String> {
        pqvault_crypto::wrap_key(key.as_bytes(), self.vault_key.as_bytes())
    }

    /// Encapsulate a key (folder key, room key) for another identity.
    pub async fn share_key(
        &self,
        key: &[u8; KEY_SIZE],
        recipient_public_key: &str,
    ) -> VaultResult<String> {
        self.worker
            .encapsulate(*key, recipient_public_key.to_string())
            .await
    }

    /// Decrypt a page of records in one worker round trip.
    pub async fn decrypt_records(
        &self,
        records: Vec<EncryptedRecord>,
    ) -> VaultResult<BatchOutcome> {
        self.worker
            .decrypt_batch(
                records,
                Arc::clone(&self.keypair),
                self.vault_key.clone(),
                self.bulk_key.clone(),
            )
            .await
    }

    /// Tear the session down: cancel in-flight transfers, stop the worker,
    /// drop cached folder keys and session key material.
    pub async fn close(mut self) {
        self.cancel.cancel();
        self.worker.shutdown().await;
        self.folder_keys.lock().await.clear();
        info!("vault session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pqvault_crypto::{derive_seed, encapsulate_key, wrap_key};

    fn test_config() -> VaultConfig {
        let mut config = VaultConfig::default();
        config.kdf.mem_cost_kib = 1024;
        config.kdf.time_cost = 1;
        config.kdf.parallelism = 1;
        config
    }

    /// In-memory registry that counts fetches.
    struct MemoryRegistry {
        shares: HashMap<FolderId, String>,
        fetches: AtomicUsize,
    }

    impl MemoryRegistry {
        fn new() -> Self {
            Self {
                shares: HashMap::new(),
                fetches: AtomicUsize::new(0),
            }
        }

        fn insert(&mut self, folder: FolderId, envelope: String) {
            self.shares.insert(folder, envelope);
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl KeyRegistry for MemoryRegistry {
        async fn fetch_folder_key(&self, folder: &FolderId) -> anyhow::Result<Option<String>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.shares.get(folder).cloned())
        }
    }

    async fn login() -> Session {
        Session::login(
            SecretString::from("session-tests"),
            Some("user@example.com".into()),
            None,
            &test_config(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn login_without_registration_uses_newest_derivation() {
        let session = login().await;
        assert_eq!(session.salt_version(), SaltVersion::EmailBound);
        session.close().await;
    }

    #[tokio::test]
    async fn login_fails_for_unknown_identity() {
        let bogus = "cd".repeat(pqvault_crypto::KEM_PUBLIC_KEY_SIZE);
        let err = Session::login(
            SecretString::from("wrong password"),
            Some("user@example.com".into()),
            Some(bogus),
            &test_config(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, VaultError::KeyResolution(_)));
    }

    #[tokio::test]
    async fn folder_key_is_fetched_and_decapsulated_once() {
        let session = login().await;

        let folder = FolderId::from("folder-1");
        let folder_key = DataKey::generate();
        let envelope =
            encapsulate_key(folder_key.as_bytes(), &session.public_key_hex()).unwrap();

        let mut registry = MemoryRegistry::new();
        registry.insert(folder.clone(), envelope);

        // Concurrent resolutions of the same unresolved folder key.
        let (k1, k2, k3) = tokio::join!(
            session.folder_key(&folder, &registry),
            session.folder_key(&folder, &registry),
            session.folder_key(&folder, &registry),
        );

        let k1 = k1.unwrap();
        assert_eq!(k1.as_bytes(), folder_key.as_bytes());
        assert_eq!(k2.unwrap().as_bytes(), folder_key.as_bytes());
        assert_eq!(k3.unwrap().as_bytes(), folder_key.as_bytes());
        assert_eq!(registry.fetch_count(), 1, "one fetch for concurrent callers");

        // A later call hits the cache.
        let again = session.folder_key(&folder, &registry).await.unwrap();
        assert_eq!(again.as_bytes(), folder_key.as_bytes());
        assert_eq!(registry.fetch_count(), 1);

        session.close().await;
    }

    #[tokio::test]
    async fn missing_folder_share_is_a_resolution_failure() {
        let session = login().await;
        let registry = MemoryRegistry::new();

        let err = session
            .folder_key(&FolderId::from("not-shared"), &registry)
            .await
            .unwrap_err();

        assert!(matches!(err, VaultError::KeyResolution(_)));
        session.close().await;
    }

    #[tokio::test]
    async fn failed_resolution_is_not_cached() {
        let session = login().await;

        let folder = FolderId::from("folder-2");
        let folder_key = DataKey::generate();
        let envelope =
            encapsulate_key(folder_key.as_bytes(), &session.public_key_hex()).unwrap();

        let mut registry = MemoryRegistry::new();
        assert!(session.folder_key(&folder, &registry).await.is_err());

        // Access granted after the first failure.
        registry.insert(folder.clone(), envelope);
        let key = session.folder_key(&folder, &registry).await.unwrap();
        assert_eq!(key.as_bytes(), folder_key.as_bytes());

        session.close().await;
    }

    #[tokio::test]
    async fn file_key_resolves_every_reference_kind() {
        let session = login().await;
        let registry = MemoryRegistry::new();

        // Global: the bulk key itself.
        let meta = FileMetadata {
            encapsulated_key: "GLOBAL".into(),
            encrypted_symmetric_key: None,
            folder: None,
            size: 10,
            mime_type: "text/plain".into(),
            chunk_count: 1,
        };
        let key = session.file_key(&meta, &registry).await.unwrap();
        assert_eq!(key.as_bytes(), session.bulk_key.as_bytes());

        // Own-wrapped data key.
        let dek = DataKey::generate();
        let meta = FileMetadata {
            encapsulated_key: "AES-KW".into(),
            encrypted_symmetric_key: Some(session.wrap_data_key(&dek).unwrap()),
            folder: None,
            size: 10,
            mime_type: "text/plain".into(),
            chunk_count: 1,
        };
        let key = session.file_key(&meta, &registry).await.unwrap();
        assert_eq!(key.as_bytes(), dek.as_bytes());

        // Self-addressed envelope.
        let dek = DataKey::generate();
        let meta = FileMetadata {
            encapsulated_key: encapsulate_key(dek.as_bytes(), &session.public_key_hex())
                .unwrap(),
            encrypted_symmetric_key: None,
            folder: None,
            size: 10,
            mime_type: "text/plain".into(),
            chunk_count: 1,
        };
        let key = session.file_key(&meta, &registry).await.unwrap();
        assert_eq!(key.as_bytes(), dek.as_bytes());

        session.close().await;
    }

    #[tokio::test]
    async fn file_key_via_folder_share() {
        let session = login().await;

        // Owner wraps the file's data key under the folder key, and shares
        // the folder key with this session's identity.
        let folder = FolderId::from("shared-folder");
        let folder_key = DataKey::generate();
        let dek = DataKey::generate();

        let mut registry = MemoryRegistry::new();
        registry.insert(
            folder.clone(),
            encapsulate_key(folder_key.as_bytes(), &session.public_key_hex()).unwrap(),
        );

        let meta = FileMetadata {
            encapsulated_key: "FOLDER".into(),
            encrypted_symmetric_key: Some(
                wrap_key(dek.as_bytes(), folder_key.as_bytes()).unwrap(),
            ),
            folder: Some(folder),
            size: 10,
            mime_type: "application/pdf".into(),
            chunk_count: 1,
        };

        let key = session.file_key(&meta, &registry).await.unwrap();
        assert_eq!(key.as_bytes(), dek.as_bytes());

        session.close().await;
    }

    #[tokio::test]
    async fn dual_salt_login_decrypts_legacy_records() {
        let config = test_config();
        let password = SecretString::from("migrating-user");

        // The account registered before email binding existed.
        let legacy_seed = derive_seed(&password, None);
        let registered = Keypair::from_seed(&legacy_seed).public_key_hex();

        let session = Session::login(
            password,
            Some("user@example.com".into()),
            Some(registered),
            &config,
        )
        .await
        .unwrap();

        assert_eq!(session.salt_version(), SaltVersion::Legacy);
        // The fallback seed reproduces the v1 vault key bit for bit.
        assert_eq!(
            session.vault_key.as_bytes(),
            legacy_seed.vault_key().as_bytes()
        );

        session.close().await;
    }

    #[tokio::test]
    async fn cancellation_tokens_fire_at_close() {
        let session = login().await;
        let token = session.cancellation();
        assert!(!token.is_cancelled());

        session.close().await;
        assert!(token.is_cancelled());
    }
}
