//! Per-session cancellation tokens.
//!
//! A user cancel on an UPLOADING/PENDING session flips status directly; a
//! cancel while PROCESSING sets the session's token here, and the worker
//! observes it at its next suspension point, attempts the upstream cancel,
//! and applies the terminal transition itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

/// A cancellation flag checked by the worker loop.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Active cancellation tokens keyed by session id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a token for a starting run.
    pub fn register(&self, session_id: Uuid) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(session_id, token.clone());
        token
    }

    /// Request cancellation of a running job. Returns `true` when a run
    /// was active and has been signalled.
    pub fn cancel(&self, session_id: Uuid) -> bool {
        match self.tokens.lock().get(&session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token once the run reaches a terminal write.
    pub fn remove(&self, session_id: Uuid) {
        self.tokens.lock().remove(&session_id);
    }

    pub fn is_running(&self, session_id: Uuid) -> bool {
        self.tokens.lock().contains_key(&session_id)
    }
}
