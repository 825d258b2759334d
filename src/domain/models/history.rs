//! Fixed-capacity history with explicit oldest-first eviction.

use std::collections::VecDeque;

/// Ring buffer that never grows past `capacity`.
///
/// Pushing into a full history evicts and returns the oldest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedHistory<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedHistory<T> {
    /// Create an empty history. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Build from existing items, keeping only the newest `capacity`.
    pub fn from_items(capacity: usize, items: impl IntoIterator<Item = T>) -> Self {
        let mut history = Self::new(capacity);
        for item in items {
            history.push(item);
        }
        history
    }

    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn pop_newest(&mut self) -> Option<T> {
        self.items.pop_back()
    }

    pub fn newest(&self) -> Option<&T> {
        self.items.back()
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

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// The newest `n` entries, oldest first.
    pub fn newest_n(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip)
    }
}

impl<T: Clone> BoundedHistory<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut history = BoundedHistory::new(3);
        assert_eq!(history.push(1), None);
        assert_eq!(history.push(2), None);
        assert_eq!(history.push(3), None);
        assert_eq!(history.push(4), Some(1));
        assert_eq!(history.to_vec(), vec![2, 3, 4]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_from_items_keeps_newest() {
        let history = BoundedHistory::from_items(2, vec![1, 2, 3, 4]);
        assert_eq!(history.to_vec(), vec![3, 4]);
        assert_eq!(history.newest(), Some(&4));
    }

    #[test]
    fn test_newest_n() {
        let history = BoundedHistory::from_items(5, 1..=5);
        let tail: Vec<_> = history.newest_n(2).copied().collect();
        assert_eq!(tail, vec![4, 5]);
        let all: Vec<_> = history.newest_n(10).copied().collect();
        assert_eq!(all, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_zero_capacity_is_one() {
        let mut history = BoundedHistory::new(0);
        history.push("a");
        history.push("b");
        assert_eq!(history.to_vec(), vec!["b"]);
    }
}
