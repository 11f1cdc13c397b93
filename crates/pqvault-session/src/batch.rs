//! Batch decryption of encrypted records
//!
//! Decrypts N records in one pass, each independently: a single record with a
//! failed tag check or malformed envelope lands in `failed_ids` and never
//! aborts the batch. The caller decides whether partial failure warrants a
//! warning or a block.

use tracing::warn;

use pqvault_core::{EncryptedRecord, KeyReference, RecordId, VaultError, VaultResult};
use pqvault_crypto::{
    decapsulate_key, decrypt_text, decrypt_text_bulk, unwrap_key, BulkKey, KeyAlgo, Keypair,
    VaultKey,
};

/// Outcome of a batch decrypt: successes in input order, plus the ids that
/// failed. `results.len() + failed_ids.len()` always equals the input count.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: Vec<(RecordId, Vec<u8>)>,
    pub failed_ids: Vec<RecordId>,
}

impl BatchOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failed_ids.is_empty()
    }
}

/// Decrypt every record independently against the session's key material.
///
/// Folder-keyed records are reported as failures here: resolving a folder key
/// is an async registry round-trip, and batch decryption works only with keys
/// already in hand.
pub fn decrypt_batch(
    records: &[EncryptedRecord],
    keypair: &Keypair,
    vault_key: &VaultKey,
    bulk_key: &BulkKey,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    for record in records {
        match decrypt_record(record, keypair, vault_key, bulk_key) {
            Ok(plaintext) => outcome.results.push((record.id.clone(), plaintext)),
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "record decryption failed");
                outcome.failed_ids.push(record.id.clone());
            }
        }
    }

    outcome
}

fn decrypt_record(
    record: &EncryptedRecord,
    keypair: &Keypair,
    vault_key: &VaultKey,
    bulk_key: &BulkKey,
) -> VaultResult<Vec<u8>> {
    match record.key_reference()? {
        KeyReference::Global => decrypt_text_bulk(&record.encrypted_payload, bulk_key.as_bytes()),
        KeyReference::OwnKeyWrap(envelope) => {
            let dek = unwrap_key(&envelope, vault_key.as_bytes(), KeyAlgo::Gcm)?;
            decrypt_text(&record.encrypted_payload, dek.as_bytes())
        }
        KeyReference::PeerEnvelope(envelope) => {
            let dek = decapsulate_key(&envelope, keypair, KeyAlgo::Gcm)?;
            decrypt_text(&record.encrypted_payload, dek.as_bytes())
        }
        KeyReference::Folder(folder) => Err(VaultError::KeyResolution(format!(
            "record is keyed to folder {folder}; resolve the folder key before decrypting"
        ))),
    }
}
