//! Per-conversation mutual exclusion.
//!
//! Every unit of work that reads and mutates a conversation's session holds
//! that conversation's token for the whole read-decide-persist sequence.
//! Different conversations never contend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Exclusion token for one conversation. Released on drop.
#[derive(Debug)]
pub struct SessionGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl SessionGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Keyed async locks.
#[derive(Debug, Default)]
pub struct SessionLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    /// Wait for the token of `key`.
    pub async fn acquire(&self, key: &str) -> SessionGuard {
        // the map lock is released before awaiting
        let slot = self.slot(key);
        SessionGuard {
            key: key.to_string(),
            _guard: slot.lock_owned().await,
        }
    }

    /// Take the token of `key` if nobody holds it.
    pub fn try_acquire(&self, key: &str) -> Option<SessionGuard> {
        let slot = self.slot(key);
        let guard = slot.try_lock_owned().ok()?;
        Some(SessionGuard {
            key: key.to_string(),
            _guard: guard,
        })
    }

    /// Forget slots nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = SessionLocks::new();
        let guard = locks.acquire("a@x").await;
        assert_eq!(guard.key(), "a@x");
        assert!(locks.try_acquire("a@x").is_none());
        assert!(locks.try_acquire("b@x").is_some());
        drop(guard);
        assert!(locks.try_acquire("a@x").is_some());
    }

    #[tokio::test]
    async fn test_serializes_concurrent_work() {
        let locks = Arc::new(SessionLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                tokio::spawn(async move {
                    let _guard = locks.acquire("same@key").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prune_drops_idle_slots() {
        let locks = SessionLocks::new();
        let held = locks.acquire("held@x").await;
        drop(locks.acquire("idle@x").await);
        assert_eq!(locks.len(), 2);
        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);
        drop(held);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }
}
