//! The crypto worker: one dedicated thread per session for heavy operations
//!
//! Seed derivation, password hashing, KEM operations, and batch decryption
//! all run on a single long-lived OS thread so the calling (interactive)
//! thread never blocks on cryptography. Callers talk to the worker through
//! channels only:
//!
//! ```text
//! caller ──(id, op)──▶ request channel ──▶ worker thread
//! caller ◀── oneshot ◀── correlation map ◀── dispatcher ◀── (id, result)
//! ```
//!
//! Concurrent requests multiplex over the channel and resolve independently;
//! an error (or panic) inside one operation rejects only that request's
//! caller. Shutdown drains every pending request with `SessionClosed` so no
//! caller hangs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use pqvault_core::{EncryptedRecord, KdfConfig, VaultError, VaultResult};
use pqvault_crypto::{
    decapsulate_key, derive_seed_matching, discovery_public_key, encapsulate_key, hash_from_hex,
    hash_password, hash_to_hex, merkle_root, BulkKey, KeyAlgo, Keypair, SaltVersion, Seed,
    UnwrappedKey, VaultKey, KEY_SIZE,
};

use crate::batch::{decrypt_batch, BatchOutcome};
use crate::correlate::{CorrelationMap, RequestId};

/// Result of a seed-derivation request: the seed, which salt generation
/// matched, and the regenerated public key.
#[derive(Debug)]
pub struct SeedInfo {
    pub seed: Seed,
    pub version: SaltVersion,
    pub public_key: String,
}

enum Op {
    DeriveSeed {
        password: SecretString,
        email: Option<String>,
        expected_public_key: Option<String>,
    },
    DiscoveryKey {
        password: SecretString,
        email: Option<String>,
    },
    HashPassword {
        password: SecretString,
    },
    Keygen {
        seed: Seed,
    },
    Encapsulate {
        payload_key: [u8; KEY_SIZE],
        recipient_public_key: String,
    },
    Decapsulate {
        envelope: String,
        keypair: Arc<Keypair>,
        algo: KeyAlgo,
    },
    DecryptBatch {
        records: Vec<EncryptedRecord>,
        keypair: Arc<Keypair>,
        vault_key: VaultKey,
        bulk_key: BulkKey,
    },
    MerkleRoot {
        leaf_hashes: Vec<String>,
    },
}

enum Response {
    SeedDerived(SeedInfo),
    PublicKey(String),
    PasswordHash(String),
    Envelope(String),
    Key(UnwrappedKey),
    Batch(BatchOutcome),
    Digest(String),
}

struct Request {
    id: RequestId,
    op: Op,
}

/// Handle to the session's background crypto thread.
pub struct CryptoWorker {
    tx: Option<mpsc::UnboundedSender<Request>>,
    pending: Arc<CorrelationMap<VaultResult<Response>>>,
    next_id: AtomicU64,
    worker: Option<std::thread::JoinHandle<()>>,
    dispatcher: Option<tokio::task::JoinHandle<()>>,
}

impl CryptoWorker {
    /// Spawn the worker thread and its response dispatcher.
    ///
    /// Must be called from within a tokio runtime (the dispatcher is a task).
    pub fn spawn(kdf: KdfConfig) -> VaultResult<Self> {
        let (req_tx, mut req_rx) = mpsc::unbounded_channel::<Request>();
        let (resp_tx, mut resp_rx) =
            mpsc::unbounded_channel::<(RequestId, VaultResult<Response>)>();

        let worker = std::thread::Builder::new()
            .name("pqvault-crypto".into())
            .spawn(move || {
                while let Some(Request { id, op }) = req_rx.blocking_recv() {
                    // A panic inside one operation must reject only that
                    // request, not take the worker down.
                    let result = catch_unwind(AssertUnwindSafe(|| execute(op, &kdf)))
                        .unwrap_or_else(|panic| {
                            Err(VaultError::Other(anyhow::anyhow!(
                                "crypto operation panicked: {}",
                                panic_message(&panic)
                            )))
                        });
                    if resp_tx.send((id, result)).is_err() {
                        break;
                    }
                }
                debug!("crypto worker thread exiting");
            })
            .map_err(|e| VaultError::Other(anyhow::anyhow!("spawning crypto worker: {e}")))?;

        let pending = Arc::new(CorrelationMap::new());
        let dispatcher = tokio::spawn({
            let pending = Arc::clone(&pending);
            async move {
                while let Some((id, result)) = resp_rx.recv().await {
                    pending.fulfill(id, result);
                }
                // Channel closed: the worker is gone, fail whatever is left.
                pending.fail_all(|| Err(VaultError::SessionClosed));
            }
        });

        Ok(Self {
            tx: Some(req_tx),
            pending,
            next_id: AtomicU64::new(1),
            worker: Some(worker),
            dispatcher: Some(dispatcher),
        })
    }

    /// Derive the seed matching the registered identity (dual-salt fallback).
    pub async fn derive_seed(
        &self,
        password: SecretString,
        email: Option<String>,
        expected_public_key: Option<String>,
    ) -> VaultResult<SeedInfo> {
        match self
            .request(Op::DeriveSeed {
                password,
                email,
                expected_public_key,
            })
            .await?
        {
            Response::SeedDerived(info) => Ok(info),
            _ => Err(mismatched_response()),
        }
    }

    /// Derive only the public discovery key (registration path).
    pub async fn discovery_key(
        &self,
        password: SecretString,
        email: Option<String>,
    ) -> VaultResult<String> {
        match self.request(Op::DiscoveryKey { password, email }).await? {
            Response::PublicKey(pk) => Ok(pk),
            _ => Err(mismatched_response()),
        }
    }

    /// Argon2id login credential hash.
    pub async fn hash_password(&self, password: SecretString) -> VaultResult<String> {
        match self.request(Op::HashPassword { password }).await? {
            Response::PasswordHash(hash) => Ok(hash),
            _ => Err(mismatched_response()),
        }
    }

    /// Regenerate the keypair for a seed, returning the public key hex.
    pub async fn keygen(&self, seed: Seed) -> VaultResult<String> {
        match self.request(Op::Keygen { seed }).await? {
            Response::PublicKey(pk) => Ok(pk),
            _ => Err(mismatched_response()),
        }
    }

    /// Encapsulate a payload key for a recipient.
    pub async fn encapsulate(
        &self,
        payload_key: [u8; KEY_SIZE],
        recipient_public_key: String,
    ) -> VaultResult<String> {
        match self
            .request(Op::Encapsulate {
                payload_key,
                recipient_public_key,
            })
            .await?
        {
            Response::Envelope(envelope) => Ok(envelope),
            _ => Err(mismatched_response()),
        }
    }

    /// Recover a payload key from a KEM envelope.
    pub async fn decapsulate(
        &self,
        envelope: String,
        keypair: Arc<Keypair>,
        algo: KeyAlgo,
    ) -> VaultResult<UnwrappedKey> {
        match self
            .request(Op::Decapsulate {
                envelope,
                keypair,
                algo,
            })
            .await?
        {
            Response::Key(key) => Ok(key),
            _ => Err(mismatched_response()),
        }
    }

    /// Decrypt many records in one round trip; partial failure is reported,
    /// never thrown.
    pub async fn decrypt_batch(
        &self,
        records: Vec<EncryptedRecord>,
        keypair: Arc<Keypair>,
        vault_key: VaultKey,
        bulk_key: BulkKey,
    ) -> VaultResult<BatchOutcome> {
        match self
            .request(Op::DecryptBatch {
                records,
                keypair,
                vault_key,
                bulk_key,
            })
            .await?
        {
            Response::Batch(outcome) => Ok(outcome),
            _ => Err(mismatched_response()),
        }
    }

    /// Aggregate chunk hashes into a content Merkle root.
    pub async fn merkle_root(&self, leaf_hashes: Vec<String>) -> VaultResult<String> {
        match self.request(Op::MerkleRoot { leaf_hashes }).await? {
            Response::Digest(root) => Ok(root),
            _ => Err(mismatched_response()),
        }
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Tear the worker down: close the request channel, join the thread, and
    /// fail any still-pending requests with `SessionClosed`.
    pub async fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.await;
        }
    }

    async fn request(&self, op: Op) -> VaultResult<Response> {
        let tx = self.tx.as_ref().ok_or(VaultError::SessionClosed)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.pending.register(id);

        if tx.send(Request { id, op }).is_err() {
            self.pending.discard(id);
            return Err(VaultError::SessionClosed);
        }

        rx.await.map_err(|_| VaultError::SessionClosed)?
    }
}

impl Drop for CryptoWorker {
    fn drop(&mut self) {
        // Closing the channel lets the thread wind down on its own; a full
        // join needs the async `shutdown`.
        self.tx.take();
    }
}

fn execute(op: Op, kdf: &KdfConfig) -> VaultResult<Response> {
    match op {
        Op::DeriveSeed {
            password,
            email,
            expected_public_key,
        } => {
            let (seed, version, public_key) = derive_seed_matching(
                &password,
                email.as_deref(),
                expected_public_key.as_deref(),
            )?;
            Ok(Response::SeedDerived(SeedInfo {
                seed,
                version,
                public_key,
            }))
        }
        Op::DiscoveryKey { password, email } => Ok(Response::PublicKey(discovery_public_key(
            &password,
            email.as_deref(),
        )?)),
        Op::HashPassword { password } => {
            Ok(Response::PasswordHash(hash_password(&password, kdf)?))
        }
        Op::Keygen { seed } => Ok(Response::PublicKey(
            Keypair::from_seed(&seed).public_key_hex(),
        )),
        Op::Encapsulate {
            payload_key,
            recipient_public_key,
        } => Ok(Response::Envelope(encapsulate_key(
            &payload_key,
            &recipient_public_key,
        )?)),
        Op::Decapsulate {
            envelope,
            keypair,
            algo,
        } => Ok(Response::Key(decapsulate_key(&envelope, &keypair, algo)?)),
        Op::DecryptBatch {
            records,
            keypair,
            vault_key,
            bulk_key,
        } => Ok(Response::Batch(decrypt_batch(
            &records, &keypair, &vault_key, &bulk_key,
        ))),
        Op::MerkleRoot { leaf_hashes } => {
            let leaves = leaf_hashes
                .iter()
                .map(|h| hash_from_hex(h))
                .collect::<VaultResult<Vec<_>>>()?;
            Ok(Response::Digest(hash_to_hex(&merkle_root(&leaves))))
        }
    }
}

fn mismatched_response() -> VaultError {
    warn!("crypto worker returned a response of the wrong kind");
    VaultError::Other(anyhow::anyhow!("crypto worker returned a mismatched response"))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
