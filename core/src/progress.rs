//! Shared progress handle attached to a request.
//!
//! A `Progress` is cloned freely: the caller keeps one copy to observe, the
//! request carries another, and the bridge updates it from byte-count
//! events. Its run state mirrors the transport task state (suspend pauses
//! it, resume resumes it, cancel cancels it); it never drives control flow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    Running,
    Paused,
    Cancelled,
}

/// Point-in-time view of a progress handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed: u64,
    /// Zero while the total is unknown.
    pub total: u64,
}

impl ProgressSnapshot {
    pub fn fraction_completed(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64
    }
}

#[derive(Debug)]
struct Inner {
    completed: AtomicU64,
    total: AtomicU64,
    state: Mutex<ProgressState>,
}

#[derive(Debug, Clone)]
pub struct Progress {
    inner: Arc<Inner>,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                completed: AtomicU64::new(0),
                total: AtomicU64::new(0),
                state: Mutex::new(ProgressState::Running),
            }),
        }
    }

    /// Record a byte-count event. Completed units never go backwards and
    /// are clamped to the total once the total is known, including counts
    /// recorded before it was.
    pub fn update(&self, completed: u64, total: u64) -> ProgressSnapshot {
        if total > 0 {
            self.inner.total.store(total, Ordering::Release);
        }
        let total = self.inner.total.load(Ordering::Acquire);
        if total == 0 {
            let previous = self.inner.completed.fetch_max(completed, Ordering::AcqRel);
            return ProgressSnapshot {
                completed: previous.max(completed),
                total,
            };
        }
        let previous = self.inner.completed.fetch_max(completed.min(total), Ordering::AcqRel);
        if previous > total {
            self.inner.completed.fetch_min(total, Ordering::AcqRel);
        }
        ProgressSnapshot {
            completed: previous.max(completed).min(total),
            total,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.inner.completed.load(Ordering::Acquire),
            total: self.inner.total.load(Ordering::Acquire),
        }
    }

    pub fn fraction_completed(&self) -> f64 {
        self.snapshot().fraction_completed()
    }

    pub fn state(&self) -> ProgressState {
        *self.inner.state.lock()
    }

    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        if *state == ProgressState::Running {
            *state = ProgressState::Paused;
        }
    }

    pub fn resume(&self) {
        let mut state = self.inner.state.lock();
        if *state == ProgressState::Paused {
            *state = ProgressState::Running;
        }
    }

    /// Terminal: a cancelled handle never resumes.
    pub fn cancel(&self) {
        *self.inner.state.lock() = ProgressState::Cancelled;
    }

    pub fn is_paused(&self) -> bool {
        self.state() == ProgressState::Paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == ProgressState::Cancelled
    }
}
