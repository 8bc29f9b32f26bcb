//! Release tracking for bus-allocated messages.
//!
//! A [`Lease`] rides inside every message [`Header`](super::Header). Tracked
//! leases bump a shared [`LeaseCounter`] when acquired and again when the
//! owning message is dropped, so a bus implementation (or a test double)
//! can check that every message it handed out was released exactly once.
//!
//! Untracked leases (the default) cost nothing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared counters of acquired and released leases.
#[derive(Debug, Default)]
pub struct LeaseCounter {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl LeaseCounter {
    /// Create a new counter.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of leases handed out.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    /// Number of leases released.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Acquire)
    }

    /// Leases still held.
    pub fn outstanding(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }
}

/// Release token owned by a single message.
///
/// Not `Clone`: copying a message's identity would allow a second release.
#[derive(Debug, Default)]
pub struct Lease(Option<Arc<LeaseCounter>>);

impl Lease {
    /// A lease that tracks nothing.
    pub fn untracked() -> Self {
        Self(None)
    }

    /// Acquire a lease counted by `counter`.
    pub fn tracked(counter: &Arc<LeaseCounter>) -> Self {
        counter.acquired.fetch_add(1, Ordering::AcqRel);
        Self(Some(counter.clone()))
    }

    /// Check if this lease is counted.
    pub fn is_tracked(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(counter) = self.0.take() {
            counter.released.fetch_add(1, Ordering::AcqRel);
        }
    }
}
