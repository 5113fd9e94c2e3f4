//! Per-chat serialization of streaming requests.
//!
//! Each chat id maps to an async mutex. The map entry lives only while some
//! request holds or waits for the lock.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Clone, Default)]
pub struct ChatLocks {
    locks: Arc<LockMap>,
}

/// One request's claim on a map entry, held while waiting and while locked.
/// Dropping the last claim removes the entry, including when a waiter is
/// cancelled before it gets the lock.
struct Registration {
    chat_id: String,
    locks: Arc<LockMap>,
    lock: Option<Arc<Mutex<()>>>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        drop(self.lock.take());
        // map + nobody else: forget the entry
        self.locks
            .remove_if(&self.chat_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct ChatLockGuard {
    // field order: the mutex guard is released before the registration
    _guard: OwnedMutexGuard<()>,
    registration: Registration,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other request is streaming into `chat_id`
    pub async fn acquire(&self, chat_id: &str) -> ChatLockGuard {
        self.prune_idle();

        let lock = self
            .locks
            .entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        if lock.try_lock().is_err() {
            debug!("Waiting for in-flight stream on chat {}", chat_id);
        }
        let registration = Registration {
            chat_id: chat_id.to_string(),
            locks: Arc::clone(&self.locks),
            lock: Some(Arc::clone(&lock)),
        };
        let guard = lock.lock_owned().await;

        ChatLockGuard {
            _guard: guard,
            registration,
        }
    }

    /// Drops entries that only the map still references
    fn prune_idle(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn is_locked(&self, chat_id: &str) -> bool {
        self.locks
            .get(chat_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

impl ChatLockGuard {
    pub fn chat_id(&self) -> &str {
        &self.registration.chat_id
    }
}
