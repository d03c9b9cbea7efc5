//! Fixed-capacity ordered history with explicit push/evict semantics.

use std::collections::VecDeque;

/// Ordered sample history holding at most `capacity` entries.
///
/// Pushing into a full history evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct History<T> {
    capacity: usize,
    entries: VecDeque<T>,
}

impl<T> History<T> {
    /// Create an empty history. A zero capacity is promoted to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, returning the evicted oldest entry when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(value);
        evicted
    }

    /// Remove and return the oldest entry.
    pub fn pop_oldest(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    pub fn oldest(&self) -> Option<&T> {
        self.entries.front()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
