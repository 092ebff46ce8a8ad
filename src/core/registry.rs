//! Cooperative cancellation and the per-turn process registry.
//!
//! A turn runs on its own task; stopping it from outside its call stack is
//! done by cancelling the [`CancellationToken`] registered for it. Tokens
//! are monotonic (once cancelled, always cancelled) and expose both a
//! non-blocking poll and an awaitable wait, so in-flight work can be raced
//! against cancellation with `tokio::select!`.
//!
//! The [`ProcessRegistry`] maps opaque turn ids to their tokens and
//! metadata. Entries are removed exactly once via [`ProcessRegistry::cleanup`]
//! regardless of how the turn ended; `stop` on an id that already finished
//! is a normal `false`, not an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

/// Opaque identifier of a registered turn.
pub type TurnId = Uuid;

/// Descriptive data attached to a turn at registration.
#[derive(Debug, Clone, Default)]
pub struct TurnMetadata {
    pub language: Option<String>,
    pub voice: Option<String>,
    pub session: Option<String>,
}

/// Snapshot of a registered turn, for introspection endpoints.
#[derive(Debug, Clone)]
pub struct TurnInfo {
    pub id: TurnId,
    pub name: String,
    pub started_at: Instant,
    pub metadata: TurnMetadata,
}

struct TokenInner {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

/// Monotonic cooperative cancellation handle.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Cancel with a reason. Idempotent: the first call records the reason
    /// and wakes every waiter; later calls are no-ops.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn cancel(&self, reason: &str) -> bool {
        {
            let mut stored = self.inner.reason.lock();
            if self.inner.cancelled.load(Ordering::Acquire) {
                return false;
            }
            *stored = Some(reason.to_string());
            self.inner.cancelled.store(true, Ordering::Release);
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Non-blocking poll.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// The recorded reason, once cancelled.
    pub fn reason(&self) -> Option<String> {
        if !self.is_cancelled() {
            return None;
        }
        self.inner.reason.lock().clone()
    }

    /// Wait until the token is cancelled and return the reason.
    ///
    /// Safe to race against normal completion in `select!`; dropping the
    /// returned future has no side effects.
    pub async fn cancelled(&self) -> String {
        loop {
            // Register the waiter before checking the flag so a concurrent
            // `cancel` between check and await cannot be missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return self
                    .inner
                    .reason
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "cancelled".to_string());
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct Registered {
    info: TurnInfo,
    token: CancellationToken,
}

/// Registry of in-flight turns across all sessions.
///
/// Mutations are serialized behind one mutex; lookups clone the token out so
/// no lock is held across awaits.
#[derive(Default)]
pub struct ProcessRegistry {
    turns: Mutex<HashMap<TurnId, Registered>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new turn and hand back its id and a fresh token.
    pub fn start(&self, name: &str, metadata: TurnMetadata) -> (TurnId, CancellationToken) {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let registered = Registered {
            info: TurnInfo {
                id,
                name: name.to_string(),
                started_at: Instant::now(),
                metadata,
            },
            token: token.clone(),
        };
        self.turns.lock().insert(id, registered);
        debug!(turn_id = %id, name = name, "turn registered");
        (id, token)
    }

    /// Cancel one turn. `false` means the id is unknown, typically a turn
    /// that already completed and was cleaned up; a normal outcome.
    pub fn stop(&self, id: TurnId, reason: &str) -> bool {
        let token = {
            let turns = self.turns.lock();
            match turns.get(&id) {
                Some(r) => r.token.clone(),
                None => return false,
            }
        };
        token.cancel(reason);
        debug!(turn_id = %id, reason = reason, "turn stop requested");
        true
    }

    /// Cancel every registered turn, best effort.
    ///
    /// Only tokens actually transitioned by this call are counted, so a turn
    /// completing concurrently is not double-counted.
    pub fn stop_all(&self, reason: &str) -> usize {
        let tokens: Vec<CancellationToken> = {
            let turns = self.turns.lock();
            turns.values().map(|r| r.token.clone()).collect()
        };
        let count = tokens.iter().filter(|t| t.cancel(reason)).count();
        debug!(count = count, reason = reason, "stop_all issued");
        count
    }

    /// Remove a finished turn. Must be called exactly once per turn on every
    /// completion path or the registry leaks.
    pub fn cleanup(&self, id: TurnId) -> bool {
        let removed = self.turns.lock().remove(&id).is_some();
        debug!(turn_id = %id, removed = removed, "turn cleanup");
        removed
    }

    pub fn count(&self) -> usize {
        self.turns.lock().len()
    }

    pub fn is_active(&self, id: TurnId) -> bool {
        self.turns.lock().contains_key(&id)
    }

    /// Snapshot of all registered turns.
    pub fn active_turns(&self) -> Vec<TurnInfo> {
        self.turns.lock().values().map(|r| r.info.clone()).collect()
    }
}
