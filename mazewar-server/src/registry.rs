//! Registry of live client sessions.
//!
//! Every session registers a handle on accept and unregisters it on cleanup.
//! The main task uses the registry to push a shutdown signal to the whole
//! fleet and to block until the last session has drained.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Maximum number of simultaneously tracked sessions.
pub const MAX_CLIENTS: usize = 128;

/// Identifies one live session and carries its shutdown token.
///
/// Notifying the token takes the role the read-side socket shutdown played in
/// a thread-per-connection design: the session's receive loop observes it and
/// proceeds to cleanup.
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    shutdown: Arc<Notify>,
}

impl SessionHandle {
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        SessionHandle {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resolves once fleet shutdown has been requested for this session.
    ///
    /// The notification is permit-based, so a request that arrives while the
    /// session is busy elsewhere is observed on its next await.
    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

struct RegistryInner {
    slots: [Option<SessionHandle>; MAX_CLIENTS],
    count: usize,
}

/// Tracks live client connections for fleet shutdown and drain.
pub struct ClientRegistry {
    inner: Mutex<RegistryInner>,
    drained: Notify,
}

impl ClientRegistry {
    pub fn new() -> Self {
        ClientRegistry {
            inner: Mutex::new(RegistryInner {
                slots: std::array::from_fn(|_| None),
                count: 0,
            }),
            drained: Notify::new(),
        }
    }

    /// Stores the handle in the first free slot.
    ///
    /// With all 128 slots taken the registration is dropped; the accept loop
    /// is expected to keep concurrency below the limit.
    pub fn register(&self, handle: SessionHandle) {
        let mut inner = self.inner.lock().unwrap();
        match inner.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(handle);
                inner.count += 1;
                tracing::debug!(count = inner.count, "session registered");
            }
            None => {
                tracing::warn!(id = handle.id, "registry full, session not tracked");
            }
        }
    }

    /// Clears the slot holding the session with this id.
    ///
    /// Posts the drain notification on the transition to empty.
    pub fn unregister(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        let Some(slot) = inner
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|h| h.id == id))
        else {
            return;
        };
        *slot = None;
        inner.count -= 1;
        tracing::debug!(count = inner.count, "session unregistered");
        if inner.count == 0 {
            self.drained.notify_waiters();
        }
    }

    /// Blocks until the registry is empty.
    ///
    /// The waiter is enabled before the count is sampled, so a drain posted
    /// between the sample and the await is not lost; an already empty
    /// registry returns immediately.
    pub async fn wait_for_empty(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.lock().unwrap().count == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Requests shutdown on every registered session.
    pub fn shutdown_all(&self) {
        let inner = self.inner.lock().unwrap();
        let mut signalled = 0;
        for handle in inner.slots.iter().flatten() {
            handle.shutdown.notify_one();
            signalled += 1;
        }
        tracing::info!(sessions = signalled, "fleet shutdown requested");
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
