//! Dispatch idempotency guard: one provider effect per reference.
//!
//! Each reference is either unseen, in flight, or completed with a cached
//! result. Completed results live in a bounded cache with FIFO eviction so
//! memory stays predictable in long-running processes.
//!
//! The guard itself is not synchronized; the dispatcher wraps it in a mutex
//! and never holds that mutex across a provider call.

use std::collections::{HashMap, HashSet, VecDeque};

/// What a caller may do with a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim<V> {
    /// Not seen before; the caller now owns it and must `complete` or `release`.
    Acquired,
    /// Already completed; replay this result.
    Completed(V),
    /// Another caller holds it right now.
    InFlight,
}

/// Tracks in-flight and completed references.
#[derive(Debug)]
pub struct ReferenceGuard<V> {
    completed: HashMap<String, V>,
    /// Insertion order for eviction (front = oldest).
    order: VecDeque<String>,
    in_flight: HashSet<String>,
    max_size: usize,
}

impl<V: Clone> ReferenceGuard<V> {
    /// Create a guard remembering at most `max_size` completed references.
    ///
    /// # Panics
    /// Panics if `max_size` is zero.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "ReferenceGuard max_size must be > 0");
        Self {
            completed: HashMap::new(),
            order: VecDeque::new(),
            in_flight: HashSet::new(),
            max_size,
        }
    }

    /// Try to take ownership of `reference`.
    pub fn claim(&mut self, reference: &str) -> Claim<V> {
        if let Some(result) = self.completed.get(reference) {
            return Claim::Completed(result.clone());
        }
        if !self.in_flight.insert(reference.to_string()) {
            return Claim::InFlight;
        }
        Claim::Acquired
    }

    /// Record the final result for an acquired reference.
    pub fn complete(&mut self, reference: &str, result: V) {
        self.in_flight.remove(reference);
        if self.completed.contains_key(reference) {
            return;
        }
        if self.completed.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
        self.completed.insert(reference.to_string(), result);
        self.order.push_back(reference.to_string());
    }

    /// Give up an acquired reference without a result so it can be retried.
    pub fn release(&mut self, reference: &str) {
        self.in_flight.remove(reference);
    }

    #[must_use]
    pub fn get(&self, reference: &str) -> Option<&V> {
        self.completed.get(reference)
    }

    #[must_use]
    pub fn is_completed(&self, reference: &str) -> bool {
        self.completed.contains_key(reference)
    }

    #[must_use]
    pub fn is_in_flight(&self, reference: &str) -> bool {
        self.in_flight.contains(reference)
    }

    /// Number of completed references currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }
}
