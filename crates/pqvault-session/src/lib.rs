//! pqvault-session: the session-scoped runtime around the crypto core
//!
//! One [`session::Session`] exists per login. It owns the seed-derived keys,
//! the regenerated ML-KEM keypair, a folder-key cache, and a single
//! long-lived [`worker::CryptoWorker`] that keeps CPU-heavy cryptography off
//! the calling thread. All communication with the worker is message passing
//! with per-request correlation ids; nothing shares mutable crypto state.

pub mod batch;
pub mod correlate;
pub mod session;
pub mod transfer;
pub mod worker;

pub use batch::{decrypt_batch, BatchOutcome};
pub use correlate::{CorrelationMap, RequestId};
pub use session::{KeyRegistry, Session};
pub use transfer::{download_stream, upload_stream, ChunkSink, DownloadGate, UploadSummary};
pub use worker::{CryptoWorker, SeedInfo};
