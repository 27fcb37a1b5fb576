//! Generic Ring Buffer Implementation

use std::collections::VecDeque;

/// Fixed-capacity FIFO window that evicts its oldest entry when full
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    /// Pre-allocated storage
    storage: VecDeque<T>,
    /// Maximum number of retained items
    capacity: usize,
    /// Total items ever pushed (for statistics)
    total_written: u64,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer; a zero capacity is bumped to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            storage: VecDeque::with_capacity(capacity),
            capacity,
            total_written: 0,
        }
    }

    /// Push an item, returning the evicted oldest item if the window was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.storage.len() == self.capacity {
            self.storage.pop_front()
        } else {
            None
        };
        self.storage.push_back(item);
        self.total_written += 1;
        evicted
    }

    /// Number of items currently held
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Check if buffer holds `capacity` items
    pub fn is_full(&self) -> bool {
        self.storage.len() == self.capacity
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.storage.len() as f64 / self.capacity as f64
    }

    /// Oldest item
    pub fn front(&self) -> Option<&T> {
        self.storage.front()
    }

    /// Most recent item
    pub fn back(&self) -> Option<&T> {
        self.storage.back()
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.storage.iter()
    }

    /// Count items matching a predicate
    pub fn count_where<F>(&self, mut pred: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        self.storage.iter().filter(|item| pred(*item)).count()
    }

    /// Drop items from the old end while the predicate holds
    pub fn evict_while<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let mut removed = 0;
        while let Some(front) = self.storage.front() {
            if !pred(front) {
                break;
            }
            self.storage.pop_front();
            removed += 1;
        }
        removed
    }

    /// Total items ever pushed
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.storage.clear();
    }
}

impl<T: Copy + Into<f64>> RingBuffer<T> {
    /// Arithmetic mean of the held values
    pub fn mean(&self) -> Option<f64> {
        if self.storage.is_empty() {
            return None;
        }
        let sum: f64 = self.storage.iter().map(|&v| v.into()).sum();
        Some(sum / self.storage.len() as f64)
    }
}
