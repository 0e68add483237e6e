//! Keyed blocking mutual exclusion.
//!
//! Each locked key has a FIFO queue of waiters. A waiter parks on its own
//! channel (a mutex-guarded `signaled` flag plus a condition variable) and
//! is woken only when a releasing holder hands the lock to it directly, so
//! ownership never passes through an unlocked state that a newcomer could
//! grab.
//!
//! There is no timeout and no cancellation: a holder that never releases
//! starves its waiters.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use bale_common::error::{BaleError, BaleResult};

/// Private wake-up channel of one waiter.
#[derive(Debug, Default)]
struct WaitChannel {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl WaitChannel {
    fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
    }

    fn signal(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_one();
    }
}

#[derive(Debug)]
struct Waiter {
    thread: ThreadId,
    channel: Arc<WaitChannel>,
}

#[derive(Debug)]
struct LockEntry {
    holder: ThreadId,
    waiters: VecDeque<Waiter>,
}

/// Statistics about the coordinator.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    /// Total acquisitions, immediate or after waiting.
    pub acquisitions: AtomicU64,
    /// Total releases.
    pub releases: AtomicU64,
    /// Total acquisitions that had to wait.
    pub waits: AtomicU64,
    /// Total releases that handed the lock to a waiter.
    pub handoffs: AtomicU64,
}

impl CoordinatorStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }

    fn record_acquisition(&self) {
        self.acquisitions.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_release(&self) {
        self.releases.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_wait(&self) {
        self.waits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_handoff(&self) {
        self.handoffs.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// Blocking mutual exclusion keyed by record identity.
pub struct AccessCoordinator<K> {
    locks: Mutex<HashMap<K, LockEntry>>,
    stats: CoordinatorStats,
}

impl<K> AccessCoordinator<K>
where
    K: Hash + Eq + Clone + fmt::Debug,
{
    /// Creates a coordinator with no locked keys.
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            stats: CoordinatorStats::new(),
        }
    }

    /// Acquires `key`, blocking while another holder has it.
    ///
    /// Waiters on one key are served oldest first.
    pub fn acquire(&self, key: K) {
        let channel = {
            let mut locks = self.locks.lock();
            match locks.entry(key) {
                Entry::Vacant(entry) => {
                    entry.insert(LockEntry {
                        holder: thread::current().id(),
                        waiters: VecDeque::new(),
                    });
                    self.stats.record_acquisition();
                    return;
                }
                Entry::Occupied(mut entry) => {
                    let channel = Arc::new(WaitChannel::default());
                    trace!(key = ?entry.key(), waiters = entry.get().waiters.len(), "waiting for lock");
                    entry.get_mut().waiters.push_back(Waiter {
                        thread: thread::current().id(),
                        channel: Arc::clone(&channel),
                    });
                    self.stats.record_wait();
                    channel
                }
            }
        };

        channel.wait();
        self.stats.record_acquisition();
    }

    /// Acquires `key` if nobody holds it.
    pub fn try_acquire(&self, key: K) -> bool {
        let mut locks = self.locks.lock();
        match locks.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(LockEntry {
                    holder: thread::current().id(),
                    waiters: VecDeque::new(),
                });
                self.stats.record_acquisition();
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Releases `key`, handing it to the oldest waiter if there is one.
    pub fn release(&self, key: &K) -> BaleResult<()> {
        let mut locks = self.locks.lock();
        let entry = locks
            .get_mut(key)
            .ok_or_else(|| BaleError::illegal_state(format!("{key:?} is not locked")))?;

        match entry.waiters.pop_front() {
            Some(next) => {
                entry.holder = next.thread;
                next.channel.signal();
                self.stats.record_handoff();
                debug!(key = ?key, to = ?next.thread, remaining = entry.waiters.len(), "lock handed off");
            }
            None => {
                locks.remove(key);
            }
        }
        self.stats.record_release();
        Ok(())
    }

    /// Acquires `key` and returns a guard releasing it on drop.
    pub fn lock(&self, key: K) -> CoordinatorGuard<'_, K> {
        self.acquire(key.clone());
        CoordinatorGuard {
            coordinator: self,
            key,
        }
    }

    /// Returns true if `key` is held.
    pub fn is_locked(&self, key: &K) -> bool {
        self.locks.lock().contains_key(key)
    }

    /// Returns true if a thread is waiting for `key`.
    pub fn has_waiters(&self, key: &K) -> bool {
        self.waiter_count(key) > 0
    }

    /// Returns the number of threads waiting for `key`.
    pub fn waiter_count(&self, key: &K) -> usize {
        self.locks
            .lock()
            .get(key)
            .map_or(0, |entry| entry.waiters.len())
    }

    /// Returns the thread currently holding `key`.
    pub fn holder(&self, key: &K) -> Option<ThreadId> {
        self.locks.lock().get(key).map(|entry| entry.holder)
    }

    /// Returns the number of held keys.
    pub fn locked_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }
}

impl<K> Default for AccessCoordinator<K>
where
    K: Hash + Eq + Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for AccessCoordinator<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCoordinator")
            .field("locked", &self.locks.lock().len())
            .finish()
    }
}

/// Holds a key of an [`AccessCoordinator`] until dropped.
pub struct CoordinatorGuard<'a, K>
where
    K: Hash + Eq + Clone + fmt::Debug,
{
    coordinator: &'a AccessCoordinator<K>,
    key: K,
}

impl<K> CoordinatorGuard<'_, K>
where
    K: Hash + Eq + Clone + fmt::Debug,
{
    /// Returns the held key.
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for CoordinatorGuard<'_, K>
where
    K: Hash + Eq + Clone + fmt::Debug,
{
    fn drop(&mut self) {
        let _ = self.coordinator.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wait_for_waiters(coordinator: &AccessCoordinator<u32>, key: u32, count: usize) {
        while coordinator.waiter_count(&key) < count {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_acquire_release() {
        let coordinator = AccessCoordinator::new();
        coordinator.acquire(1u32);
        assert!(coordinator.is_locked(&1));
        assert!(!coordinator.try_acquire(1));
        assert!(coordinator.try_acquire(2));
        assert_eq!(coordinator.locked_count(), 2);
        assert_eq!(coordinator.holder(&1), Some(thread::current().id()));

        coordinator.release(&1).unwrap();
        assert!(!coordinator.is_locked(&1));
        assert!(coordinator.release(&1).is_err());
    }

    #[test]
    fn test_guard_releases() {
        let coordinator = AccessCoordinator::new();
        {
            let guard = coordinator.lock(5u32);
            assert_eq!(*guard.key(), 5);
            assert!(coordinator.is_locked(&5));
        }
        assert!(!coordinator.is_locked(&5));
    }

    #[test]
    fn test_fifo_handoff() {
        let coordinator = Arc::new(AccessCoordinator::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        coordinator.acquire(7u32);

        let mut handles = Vec::new();
        for id in 0..3 {
            let c = Arc::clone(&coordinator);
            let o = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                c.acquire(7);
                o.lock().push(id);
                c.release(&7).unwrap();
            }));
            wait_for_waiters(&coordinator, 7, id + 1);
        }

        assert!(coordinator.has_waiters(&7));
        coordinator.release(&7).unwrap();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(!coordinator.is_locked(&7));
        assert!(!coordinator.has_waiters(&7));
        assert_eq!(coordinator.stats().handoffs.load(AtomicOrdering::Relaxed), 3);
        assert_eq!(coordinator.stats().waits.load(AtomicOrdering::Relaxed), 3);
    }

    #[test]
    fn test_strict_serialization() {
        let coordinator = Arc::new(AccessCoordinator::new());
        let inside = Arc::new(AtomicU64::new(0));
        let overlaps = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&coordinator);
                let inside = Arc::clone(&inside);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _guard = c.lock(1u32);
                        if inside.fetch_add(1, AtomicOrdering::SeqCst) != 0 {
                            overlaps.fetch_add(1, AtomicOrdering::SeqCst);
                        }
                        thread::yield_now();
                        inside.fetch_sub(1, AtomicOrdering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(overlaps.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(coordinator.stats().acquisitions.load(AtomicOrdering::Relaxed), 200);
        assert_eq!(coordinator.locked_count(), 0);
    }

    #[test]
    fn test_independent_keys_do_not_block() {
        let coordinator = Arc::new(AccessCoordinator::new());
        let _held = coordinator.lock(1u32);

        let c = Arc::clone(&coordinator);
        let handle = thread::spawn(move || {
            let _other = c.lock(2u32);
            true
        });
        assert!(handle.join().unwrap());
    }
}
