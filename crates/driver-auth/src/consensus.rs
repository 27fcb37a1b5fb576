//! Multi-frame identity consensus

use ring_buffer::RingBuffer;
use std::collections::BTreeMap;

/// Rolling window of recent `(candidate, distance)` observations
///
/// Length never exceeds `capacity`. A decision is only made on a full window.
#[derive(Debug, Clone)]
pub struct ConsensusBuffer {
    votes: RingBuffer<(u32, f32)>,
    required_ratio: f64,
}

impl ConsensusBuffer {
    pub fn new(capacity: usize, required_ratio: f64) -> Self {
        Self {
            votes: RingBuffer::new(capacity),
            required_ratio,
        }
    }

    pub fn push(&mut self, user_id: u32, distance: f32) {
        self.votes.push((user_id, distance));
    }

    /// Drop all evidence (no-match frame, lost face, identity hand-off)
    pub fn clear(&mut self) {
        self.votes.clear();
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.votes.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.votes.capacity()
    }

    /// Most frequent candidate and its vote count; ties go to the lowest id
    pub fn majority(&self) -> Option<(u32, usize)> {
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for &(user_id, _) in self.votes.iter() {
            *counts.entry(user_id).or_default() += 1;
        }
        counts
            .into_iter()
            .fold(None, |best, (id, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((id, count)),
            })
    }

    /// Mean distance of the votes cast for one candidate
    pub fn mean_distance(&self, user_id: u32) -> Option<f32> {
        let (sum, n) = self
            .votes
            .iter()
            .filter(|(id, _)| *id == user_id)
            .fold((0.0f32, 0usize), |(s, n), (_, d)| (s + d, n + 1));
        (n > 0).then(|| sum / n as f32)
    }

    /// Accepted candidate, if the full window agrees with `current`
    pub fn decide(&self, current: u32) -> Option<u32> {
        if !self.is_full() {
            return None;
        }
        let (winner, count) = self.majority()?;
        let ratio = count as f64 / self.votes.len() as f64;
        (ratio >= self.required_ratio && winner == current).then_some(winner)
    }
}
