//! Contexts waiting for a wake tick, ordered by that tick.
//!
//! Invariant: entries are non-decreasing by `wake_tick`, and entries with
//! equal `wake_tick` keep their insertion order. Insertion scans to the
//! right position (O(n)); releasing due entries pops from the front, so
//! the interrupt path only pays for entries that are actually due.

use ktimer_common::Tick;
use std::collections::VecDeque;
use std::fmt;

/// A context parked until `wake_tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitEntry<C> {
    /// Absolute tick at which the context becomes runnable.
    pub wake_tick: Tick,
    /// The parked context.
    pub context: C,
}

/// Ordered collection of [`WaitEntry`].
pub struct SleepQueue<C> {
    entries: VecDeque<WaitEntry<C>>,
}

impl<C: Copy + Eq + fmt::Debug> SleepQueue<C> {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// An empty queue with room for `capacity` sleepers before it reallocates.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Insert after every entry due at or before `entry.wake_tick`.
    ///
    /// Returns the queue length after the insert.
    pub fn insert(&mut self, entry: WaitEntry<C>) -> usize {
        debug_assert!(
            !self.contains(entry.context),
            "context {:?} is already sleeping",
            entry.context
        );
        let pos = self
            .entries
            .partition_point(|e| e.wake_tick <= entry.wake_tick);
        self.entries.insert(pos, entry);
        self.entries.len()
    }

    /// Remove and return the head if it is due at `now`.
    pub fn pop_due(&mut self, now: Tick) -> Option<WaitEntry<C>> {
        match self.entries.front() {
            Some(head) if head.wake_tick <= now => self.entries.pop_front(),
            _ => None,
        }
    }

    /// Release every entry due at `now`, in queue order.
    ///
    /// Stops at the first entry still in the future. Never allocates.
    pub fn drain_due<F: FnMut(C)>(&mut self, now: Tick, mut wake: F) -> usize {
        let mut released = 0;
        while let Some(entry) = self.pop_due(now) {
            wake(entry.context);
            released += 1;
        }
        released
    }

    /// Wake tick of the head, if any.
    #[must_use]
    pub fn next_wake(&self) -> Option<Tick> {
        self.entries.front().map(|e| e.wake_tick)
    }

    /// Whether `context` is currently parked.
    #[must_use]
    pub fn contains(&self, context: C) -> bool {
        self.entries.iter().any(|e| e.context == context)
    }

    /// Number of parked contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in wake order.
    pub fn iter(&self) -> impl Iterator<Item = &WaitEntry<C>> {
        self.entries.iter()
    }
}

impl<C: Copy + Eq + fmt::Debug> Default for SleepQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: fmt::Debug> fmt::Debug for SleepQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}
