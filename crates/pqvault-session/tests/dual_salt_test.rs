//! Dual-salt migration: accounts registered under the legacy derivation log
//! in via fallback and can still read their old records; newer accounts
//! resolve on the first attempt.

use secrecy::SecretString;

use pqvault_core::{EncryptedRecord, RecordId, VaultConfig};
use pqvault_crypto::{
    derive_seed, encapsulate_key, encrypt_text, DataKey, Keypair, SaltVersion,
};
use pqvault_session::Session;

fn test_config() -> VaultConfig {
    let mut config = VaultConfig::default();
    config.kdf.mem_cost_kib = 1024;
    config.kdf.time_cost = 1;
    config.kdf.parallelism = 1;
    config
}

const PASSWORD: &str = "migrating-student";
const EMAIL: &str = "student@example.com";

#[tokio::test]
async fn legacy_account_falls_back_and_reads_old_records() {
    // The account was registered before email binding: its public key and
    // all its records come from the legacy seed.
    let legacy_seed = derive_seed(&SecretString::from(PASSWORD), None);
    let legacy_keypair = Keypair::from_seed(&legacy_seed);
    let registered_pk = legacy_keypair.public_key_hex();

    let dek = DataKey::generate();
    let old_record = EncryptedRecord {
        id: RecordId::from("pre-migration-task"),
        encapsulated_key: encapsulate_key(dek.as_bytes(), &registered_pk).unwrap(),
        encrypted_symmetric_key: None,
        folder: None,
        encrypted_payload: encrypt_text(b"submit lab 3", dek.as_bytes()).unwrap(),
    };

    // Login presents the email, so the email-bound derivation is tried
    // first; the mismatch forces the legacy fallback.
    let session = Session::login(
        SecretString::from(PASSWORD),
        Some(EMAIL.into()),
        Some(registered_pk.clone()),
        &test_config(),
    )
    .await
    .unwrap();

    assert_eq!(session.salt_version(), SaltVersion::Legacy);
    assert_eq!(session.public_key_hex(), registered_pk);

    let outcome = session.decrypt_records(vec![old_record]).await.unwrap();
    assert!(outcome.failed_ids.is_empty());
    assert_eq!(outcome.results[0].1, b"submit lab 3".to_vec());

    session.close().await;
}

#[tokio::test]
async fn email_bound_account_resolves_on_first_attempt() {
    let bound_seed = derive_seed(&SecretString::from(PASSWORD), Some(EMAIL));
    let registered_pk = Keypair::from_seed(&bound_seed).public_key_hex();

    let session = Session::login(
        SecretString::from(PASSWORD),
        Some(EMAIL.into()),
        Some(registered_pk.clone()),
        &test_config(),
    )
    .await
    .unwrap();

    assert_eq!(session.salt_version(), SaltVersion::EmailBound);
    assert_eq!(session.public_key_hex(), registered_pk);

    session.close().await;
}

#[tokio::test]
async fn neither_derivation_matching_fails_login() {
    // Registered under a different password entirely: both candidates miss,
    // and no third key is silently accepted.
    let registered_pk = Keypair::from_seed(&derive_seed(
        &SecretString::from("someone-else"),
        Some(EMAIL),
    ))
    .public_key_hex();

    let err = Session::login(
        SecretString::from(PASSWORD),
        Some(EMAIL.into()),
        Some(registered_pk),
        &test_config(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, pqvault_core::VaultError::KeyResolution(_)));
}

#[tokio::test]
async fn both_generations_derive_distinct_identities() {
    let legacy = Keypair::from_seed(&derive_seed(&SecretString::from(PASSWORD), None));
    let bound = Keypair::from_seed(&derive_seed(&SecretString::from(PASSWORD), Some(EMAIL)));

    assert_ne!(legacy.public_key_hex(), bound.public_key_hex());
}
