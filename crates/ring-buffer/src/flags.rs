//! Boolean vote window with incremental counting

use crate::RingBuffer;

/// Rolling window of boolean votes that keeps its true-count in O(1)
#[derive(Debug, Clone)]
pub struct FlagWindow {
    votes: RingBuffer<bool>,
    true_count: usize,
}

impl FlagWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            votes: RingBuffer::new(capacity),
            true_count: 0,
        }
    }

    /// Record a vote
    pub fn push(&mut self, vote: bool) {
        if let Some(true) = self.votes.push(vote) {
            self.true_count -= 1;
        }
        if vote {
            self.true_count += 1;
        }
    }

    /// Number of true votes currently in the window
    pub fn count_true(&self) -> usize {
        self.true_count
    }

    /// Fraction of held votes that are true (0.0 when empty)
    pub fn ratio(&self) -> f64 {
        if self.votes.is_empty() {
            0.0
        } else {
            self.true_count as f64 / self.votes.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.votes.capacity()
    }

    pub fn fill_ratio(&self) -> f64 {
        self.votes.fill_ratio()
    }

    pub fn clear(&mut self) {
        self.votes.clear();
        self.true_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_of_five() {
        let mut window = FlagWindow::new(5);
        for vote in [true, true, true, false, false] {
            window.push(vote);
        }
        assert_eq!(window.count_true(), 3);

        // Oldest `true` falls off
        window.push(false);
        assert_eq!(window.count_true(), 2);
        assert!((window.ratio() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_clear_resets_count() {
        let mut window = FlagWindow::new(3);
        window.push(true);
        window.push(true);
        window.clear();
        assert_eq!(window.count_true(), 0);
        assert_eq!(window.ratio(), 0.0);
    }
}
