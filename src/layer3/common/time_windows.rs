// Time Window Container - Rolling time-based data window
// Bounded ring of (timestamp_ms, value) pairs with age-based pruning

use std::collections::VecDeque;

/// Rolling time window that stores (timestamp, data) pairs
pub struct TimeWindow<T> {
    duration_ms: i64,
    max_capacity: usize,
    data: VecDeque<(i64, T)>,
}

impl<T> TimeWindow<T> {
    /// duration_ms: retention; max_capacity: hard bound on stored items
    pub fn new(duration_ms: i64, max_capacity: usize) -> Self {
        let max_capacity = max_capacity.max(1);
        Self {
            duration_ms,
            max_capacity,
            data: VecDeque::with_capacity(max_capacity.min(10_000)),
        }
    }

    /// Add an item, evicting the oldest when full
    pub fn add(&mut self, timestamp: i64, item: T) {
        if self.data.len() >= self.max_capacity {
            self.data.pop_front();
        }
        self.data.push_back((timestamp, item));
    }

    /// Remove items older than duration_ms before current_time
    pub fn prune(&mut self, current_time: i64) {
        let cutoff = current_time - self.duration_ms;

        while let Some((ts, _)) = self.data.front() {
            if *ts < cutoff {
                self.data.pop_front();
            } else {
                break;
            }
        }
    }

    /// Newest item recorded at or before `timestamp`
    pub fn latest_at_or_before(&self, timestamp: i64) -> Option<&(i64, T)> {
        self.data.iter().rev().find(|(ts, _)| *ts <= timestamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(i64, T)> {
        self.data.iter()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn last(&self) -> Option<&(i64, T)> {
        self.data.back()
    }

    pub fn first(&self) -> Option<&(i64, T)> {
        self.data.front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pruning() {
        let mut window: TimeWindow<i32> = TimeWindow::new(100, 100);

        window.add(0, 1);
        window.add(50, 2);
        window.add(100, 3);
        window.add(150, 4);
        window.add(200, 5);

        window.prune(200);

        // Exactly duration old is kept
        assert_eq!(window.len(), 3);
        assert_eq!(window.first().unwrap().0, 100);
    }

    #[test]
    fn test_capacity() {
        let mut window: TimeWindow<i32> = TimeWindow::new(10_000, 3);

        window.add(100, 1);
        window.add(200, 2);
        window.add(300, 3);
        window.add(400, 4);

        assert_eq!(window.len(), 3);
        assert_eq!(window.first().unwrap().0, 200);
        assert_eq!(window.last().unwrap().1, 4);
    }

    #[test]
    fn test_latest_at_or_before() {
        let mut window: TimeWindow<f64> = TimeWindow::new(10_000, 100);
        window.add(100, 1.0);
        window.add(200, 2.0);
        window.add(300, 3.0);

        assert_eq!(window.latest_at_or_before(250).map(|(_, v)| *v), Some(2.0));
        assert_eq!(window.latest_at_or_before(300).map(|(_, v)| *v), Some(3.0));
        assert!(window.latest_at_or_before(50).is_none());
    }

    #[test]
    fn test_iteration_and_clear() {
        let mut window: TimeWindow<i32> = TimeWindow::new(10_000, 100);
        window.add(100, 1);
        window.add(200, 2);

        let sum: i32 = window.iter().map(|(_, v)| v).sum();
        assert_eq!(sum, 3);

        window.clear();
        assert!(window.is_empty());
    }
}
