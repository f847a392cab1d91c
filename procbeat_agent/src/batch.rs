//! Bounded buffer of samples between two report flushes.

use std::collections::VecDeque;

use tracing::warn;

use crate::sample::Sample;

/// Append at the back; when full, the oldest entry is dropped first.
/// Returns the evicted value, if any.
pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) -> Option<T> {
    let evicted = if dq.len() >= cap { dq.pop_front() } else { None };
    dq.push_back(v);
    evicted
}

#[derive(Debug)]
pub struct BatchAccumulator {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl BatchAccumulator {
    /// `capacity` is the number of fast ticks per flush; zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Adds a sample. A full batch means the flush timer fell behind; the
    /// oldest sample is discarded so the batch never exceeds capacity.
    pub fn append(&mut self, sample: Sample) {
        if push_capped(&mut self.samples, sample, self.capacity).is_some() {
            warn!(
                capacity = self.capacity,
                "batch full before flush, dropped oldest sample"
            );
        }
    }

    /// Hands out the accumulated samples, oldest first, and starts over.
    pub fn flush_and_reset(&mut self) -> Vec<Sample> {
        let out: Vec<Sample> = std::mem::take(&mut self.samples).into();
        self.samples.reserve(self.capacity);
        out
    }
}
