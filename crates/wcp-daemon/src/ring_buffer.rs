use std::collections::VecDeque;

/// Fixed-capacity FIFO that keeps the most recent items.
///
/// Pushing into a full buffer silently drops the oldest item.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// A capacity of zero is clamped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_keeps_most_recent_window() {
        let mut buffer = RingBuffer::new(5);
        for i in 1..=10 {
            buffer.push(i);
        }
        assert_eq!(buffer.to_vec(), vec![6, 7, 8, 9, 10]);
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_under_capacity_keeps_everything() {
        let mut buffer = RingBuffer::new(10);
        buffer.push("a");
        buffer.push("b");
        assert_eq!(buffer.to_vec(), vec!["a", "b"]);
        assert_eq!(buffer.capacity(), 10);
    }

    #[test]
    fn test_capacity_one() {
        let mut buffer = RingBuffer::new(1);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.to_vec(), vec![2]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut buffer = RingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push('x');
        assert_eq!(buffer.to_vec(), vec!['x']);
    }

    #[test]
    fn test_clear_resets() {
        let mut buffer = RingBuffer::new(3);
        buffer.push(1);
        buffer.push(2);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 3);
        buffer.push(9);
        assert_eq!(buffer.to_vec(), vec![9]);
    }

    proptest! {
        #[test]
        fn prop_window_is_last_min_n_c(cap in 1usize..20, n in 0usize..60) {
            let mut buffer = RingBuffer::new(cap);
            for i in 0..n {
                buffer.push(i);
            }
            let expected: Vec<usize> = (n.saturating_sub(cap)..n).collect();
            prop_assert_eq!(buffer.len(), n.min(cap));
            prop_assert_eq!(buffer.to_vec(), expected);
        }

        #[test]
        fn prop_clear_matches_fresh_buffer(cap in 1usize..10, before in 0usize..20, after in 0usize..20) {
            let mut reused = RingBuffer::new(cap);
            for i in 0..before {
                reused.push(i);
            }
            reused.clear();
            let mut fresh = RingBuffer::new(cap);
            for i in 0..after {
                reused.push(i);
                fresh.push(i);
            }
            prop_assert_eq!(reused.to_vec(), fresh.to_vec());
        }
    }
}
