//! Request/response correlation over a single message channel
//!
//! Every request carries a monotonically increasing id; the worker echoes the
//! id on every response. The map pairs each response back to the one caller
//! waiting on that id, so concurrent in-flight requests multiplex over one
//! channel and may complete in any order. A response for an id nobody is
//! waiting on (the caller gave up, or the session moved on) is dropped, not
//! misdelivered.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::warn;

/// Monotonically increasing per-session request identifier.
pub type RequestId = u64;

/// Pending-request table: one oneshot slot per in-flight id.
pub struct CorrelationMap<T> {
    pending: Mutex<HashMap<RequestId, oneshot::Sender<T>>>,
}

impl<T> CorrelationMap<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a request id and return the receiver its response will
    /// arrive on.
    pub fn register(&self, id: RequestId) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    /// Drop a registration (the request was never sent, or the caller is no
    /// longer interested).
    pub fn discard(&self, id: RequestId) {
        self.lock().remove(&id);
    }

    /// Deliver a response to the caller waiting on `id`.
    ///
    /// Returns false when the id is unknown or its caller already went away;
    /// the value is dropped in that case.
    pub fn fulfill(&self, id: RequestId, value: T) -> bool {
        let slot = self.lock().remove(&id);
        match slot {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                warn!(request_id = id, "dropping response with no waiting caller");
                false
            }
        }
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolve every pending request, used at teardown so no caller hangs.
    pub fn fail_all(&self, mut make: impl FnMut() -> T) {
        let pending = std::mem::take(&mut *self.lock());
        for (_, tx) in pending {
            let _ = tx.send(make());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, oneshot::Sender<T>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for CorrelationMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
