//! Progress tracker for long-running stack operations
//!
//! A `Progress` counts completed units out of a fixed total and notifies
//! observers with the new fraction after every change. Observers are stored
//! as `Arc<dyn Fn>` and snapshotted before delivery, so the listener lock is
//! never held while a callback runs. Observers may remove themselves (or
//! others) from inside a callback; removals take effect on the next change.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Returned by [`Progress::observe`], pass to [`Progress::remove_observer`]
pub type ListenerId = u64;

type ListenerFn = dyn Fn(f64) + Send + Sync;

struct Inner {
    total_units: u64,
    completed_units: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<ListenerFn>)>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct Progress {
    inner: Arc<Inner>,
}

impl Progress {
    pub fn new(total_units: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                total_units,
                completed_units: AtomicU64::new(0),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn total_unit_count(&self) -> u64 {
        self.inner.total_units
    }

    pub fn completed_unit_count(&self) -> u64 {
        self.inner.completed_units.load(Ordering::Acquire)
    }

    /// Completed fraction in `0.0..=1.0`; an empty tracker counts as finished
    pub fn fraction_completed(&self) -> f64 {
        fraction(self.completed_unit_count(), self.inner.total_units)
    }

    pub fn is_finished(&self) -> bool {
        self.completed_unit_count() >= self.inner.total_units
    }

    /// Mark one more unit as completed
    pub fn advance(&self) {
        let total = self.inner.total_units;
        let completed = self
            .inner
            .completed_units
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some((n + 1).min(total))
            })
            .map(|previous| (previous + 1).min(total))
            .unwrap_or(total);

        self.notify(fraction(completed, total));
    }

    pub fn set_completed_unit_count(&self, completed: u64) {
        let completed = completed.min(self.inner.total_units);
        self.inner
            .completed_units
            .store(completed, Ordering::Release);

        self.notify(fraction(completed, self.inner.total_units));
    }

    /// Register `listener`, called with the new fraction after every change
    pub fn observe(&self, listener: impl Fn(f64) + Send + Sync + 'static) -> ListenerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove an observer; unknown ids are ignored
    pub fn remove_observer(&self, id: ListenerId) {
        self.inner.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    pub fn observer_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    fn notify(&self, fraction: f64) {
        let snapshot: Vec<Arc<ListenerFn>> = {
            let guard = self.inner.listeners.lock();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in snapshot {
            cb(fraction);
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("completed_units", &self.completed_unit_count())
            .field("total_units", &self.inner.total_units)
            .finish()
    }
}

fn fraction(completed: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        completed as f64 / total as f64
    }
}
