//! Server-side nonce replay protection.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Decides whether a presented nonce is fresh.
///
/// Implementations are injected into the verifier, so deployments can swap
/// the in-memory store for a shared one without touching the pipeline.
pub trait NonceStore: Send + Sync {
    /// Records `nonce` if it has not been seen within the replay window.
    /// Returns `false` on replay.
    fn accept(&self, nonce: &str) -> bool;
}

/// In-memory [`NonceStore`]: a map from nonce to first-seen time.
///
/// Expired entries are swept on every call, under the same lock acquisition
/// as the check-and-record, so a nonce can never be accepted twice inside
/// the window.
pub struct MemoryNonceStore {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl MemoryNonceStore {
    /// Creates a store that remembers nonces for `window`.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Number of nonces currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store currently remembers no nonces.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NonceStore for MemoryNonceStore {
    fn accept(&self, nonce: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        seen.retain(|_, first_seen| now.duration_since(*first_seen) < self.window);
        if seen.contains_key(nonce) {
            return false;
        }
        seen.insert(nonce.to_string(), now);
        true
    }
}
