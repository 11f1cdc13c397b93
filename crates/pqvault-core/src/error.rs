use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

/// Failure taxonomy for vault operations.
///
/// `AuthenticationFailure` and `KeyResolution` are deliberately distinct:
/// the former means a key we hold failed a GCM tag check (wrong key or
/// tampered ciphertext), the latter means we could not obtain a key at all
/// (access revoked, registry miss). Neither is ever retried automatically.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Precondition failure: bad lengths, malformed hex, missing fields.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// AES-GCM tag mismatch: wrong key or corrupted/tampered ciphertext.
    #[error("authentication failed: wrong key or corrupted data")]
    AuthenticationFailure,

    /// An envelope's shape is wrong (truncated, bad framing).
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A key could not be obtained: access denied or key unavailable.
    #[error("key resolution failed: {0}")]
    KeyResolution(String),

    /// The session or its crypto worker was torn down mid-request.
    #[error("session closed")]
    SessionClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
