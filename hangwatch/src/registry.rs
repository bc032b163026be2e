//! Thread-safe observer set shared by the watchdog and the trackers.
//!
//! Entries are keyed by a [`ListenerHandle`], so the same listener may be
//! registered more than once and each registration is removed independently.
//!
//! ```text
//!  add(&Arc<T>) ──▶ Weak<T>  ─┐
//!  add_owned(Arc<T>) ─────────┼─▶ Vec<Entry> ──snapshot──▶ callbacks (no lock held)
//!  remove(handle) ─▶ active=false
//! ```
//!
//! Notification works on a snapshot taken under the lock, and callbacks run
//! with the lock released. A callback may therefore add or remove listeners
//! (itself included). Entries removed after the snapshot was taken are
//! skipped through their `active` flag. Weak entries whose owner is gone are
//! pruned whenever the registry is walked.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

enum Slot<T: ?Sized> {
    Weak(Weak<T>),
    Owned(Arc<T>),
}

impl<T: ?Sized> Slot<T> {
    fn upgrade(&self) -> Option<Arc<T>> {
        match self {
            Slot::Weak(weak) => weak.upgrade(),
            Slot::Owned(strong) => Some(Arc::clone(strong)),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Slot::Weak(weak) => weak.strong_count() > 0,
            Slot::Owned(_) => true,
        }
    }
}

struct Entry<T: ?Sized> {
    handle: ListenerHandle,
    slot: Slot<T>,
    active: Arc<AtomicBool>,
}

pub struct ListenerRegistry<T: ?Sized> {
    entries: Mutex<Vec<Entry<T>>>,
    next_handle: AtomicU64,
}

impl<T: ?Sized> ListenerRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()), next_handle: AtomicU64::new(1) }
    }

    /// Register without taking ownership. The registration lapses once the
    /// caller drops its last `Arc`.
    pub fn add(&self, listener: &Arc<T>) -> ListenerHandle {
        self.insert(Slot::Weak(Arc::downgrade(listener)))
    }

    /// Register and keep the listener alive until it is removed.
    pub fn add_owned(&self, listener: Arc<T>) -> ListenerHandle {
        self.insert(Slot::Owned(listener))
    }

    fn insert(&self, slot: Slot<T>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let entry = Entry { handle, slot, active: Arc::new(AtomicBool::new(true)) };
        self.lock().push(entry);
        handle
    }

    /// Returns true if `handle` was registered.
    pub fn remove(&self, handle: ListenerHandle) -> bool {
        let mut entries = self.lock();
        let Some(index) = entries.iter().position(|e| e.handle == handle) else {
            return false;
        };
        let entry = entries.remove(index);
        entry.active.store(false, Ordering::Release);
        true
    }

    pub fn clear(&self) {
        let drained: Vec<Entry<T>> = self.lock().drain(..).collect();
        for entry in &drained {
            entry.active.store(false, Ordering::Release);
        }
        // Owned listeners are released here, outside the lock.
        drop(drained);
    }

    pub fn contains(&self, handle: ListenerHandle) -> bool {
        self.lock().iter().any(|e| e.handle == handle && e.slot.is_live())
    }

    /// True when no live listener remains.
    pub fn is_empty(&self) -> bool {
        let mut entries = self.lock();
        Self::prune_locked(&mut entries);
        entries.is_empty()
    }

    pub fn len(&self) -> usize {
        let mut entries = self.lock();
        Self::prune_locked(&mut entries);
        entries.len()
    }

    /// Handles of all live registrations, in registration order.
    pub fn handles(&self) -> Vec<ListenerHandle> {
        let mut entries = self.lock();
        Self::prune_locked(&mut entries);
        let mut handles: Vec<_> = entries.iter().map(|e| e.handle).collect();
        handles.sort_unstable();
        handles
    }

    /// Drop registrations whose owner is gone. Returns how many were removed.
    pub fn prune(&self) -> usize {
        Self::prune_locked(&mut self.lock())
    }

    /// Invoke `f` for every live listener. Returns the number invoked.
    pub fn notify_all<F>(&self, f: F) -> usize
    where
        F: FnMut(&T),
    {
        let snapshot = self.snapshot(|_| true);
        Self::deliver(snapshot, f)
    }

    /// Invoke `f` for the live listeners among `handles`.
    pub fn notify<F>(&self, handles: &[ListenerHandle], f: F) -> usize
    where
        F: FnMut(&T),
    {
        if handles.is_empty() {
            return 0;
        }
        let snapshot = self.snapshot(|handle| handles.contains(&handle));
        Self::deliver(snapshot, f)
    }

    fn snapshot(
        &self,
        wanted: impl Fn(ListenerHandle) -> bool,
    ) -> Vec<(Arc<AtomicBool>, Arc<T>)> {
        let mut entries = self.lock();
        let mut snapshot = Vec::with_capacity(entries.len());
        let mut stale = false;
        for entry in entries.iter().filter(|e| wanted(e.handle)) {
            match entry.slot.upgrade() {
                Some(listener) => snapshot.push((Arc::clone(&entry.active), listener)),
                None => stale = true,
            }
        }
        if stale {
            Self::prune_locked(&mut entries);
        }
        snapshot
    }

    fn deliver(snapshot: Vec<(Arc<AtomicBool>, Arc<T>)>, mut f: impl FnMut(&T)) -> usize {
        let mut delivered = 0;
        for (active, listener) in snapshot {
            if active.load(Ordering::Acquire) {
                f(&listener);
                delivered += 1;
            }
        }
        delivered
    }

    fn prune_locked(entries: &mut Vec<Entry<T>>) -> usize {
        let before = entries.len();
        entries.retain(|e| {
            let live = e.slot.is_live();
            if !live {
                e.active.store(false, Ordering::Release);
            }
            live
        });
        before - entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry<T>>> {
        // A panicking listener must not take hang detection down with it.
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T: ?Sized> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
