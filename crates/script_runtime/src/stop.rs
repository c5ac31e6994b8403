//! Cooperative stop signaling
//!
//! A `StopToken` is a flag plus a set of wakers. Blocking waits register a
//! waker for as long as they block, so a stop request can unpark them.
//! Async waits use the token's `CancellationToken`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

type Waker = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    cancel: CancellationToken,
    wakers: Mutex<HashMap<u64, Waker>>,
    next_waker: AtomicU64,
}

/// Shared stop flag for one script execution
#[derive(Clone, Default)]
pub struct StopToken {
    inner: Arc<StopInner>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag, cancel async waits and run every registered waker
    pub fn request_stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();

        // Wakers may take other locks; never run them under ours.
        let wakers: Vec<Waker> = self.inner.wakers.lock().values().cloned().collect();
        for wake in wakers {
            wake();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Token cancelled together with this stop flag
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Register `wake` to run on stop until the returned guard is dropped
    pub fn on_stop<F>(&self, wake: F) -> StopGuard
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_waker.fetch_add(1, Ordering::Relaxed);
        self.inner.wakers.lock().insert(id, Arc::new(wake));
        StopGuard {
            token: Arc::downgrade(&self.inner),
            id,
        }
    }
}

impl std::fmt::Debug for StopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopToken")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Unregisters a waker on drop
pub struct StopGuard {
    token: Weak<StopInner>,
    id: u64,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.token.upgrade() {
            inner.wakers.lock().remove(&self.id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_request_stop_runs_wakers_once() {
        let token = StopToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _guard = token.on_stop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!token.is_stopped());
        token.request_stop();
        token.request_stop();

        assert!(token.is_stopped());
        assert!(token.cancellation_token().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_guard_unregisters() {
        let token = StopToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        drop(token.on_stop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        token.request_stop();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let token = StopToken::new();
        let clone = token.clone();
        clone.request_stop();
        assert!(token.is_stopped());
    }
}
