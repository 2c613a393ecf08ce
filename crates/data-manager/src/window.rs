//! Rolling window of recent readings

use std::collections::VecDeque;

/// Fixed-length window over the most recent readings of one sensor
#[derive(Debug, Clone, PartialEq)]
pub struct RunningAverage {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RunningAverage {
    /// Window holding at most `capacity` readings (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a reading, evicting the oldest when full; returns the new mean
    pub fn push(&mut self, value: f64) -> f64 {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.sum() / self.values.len() as f64
    }

    /// Mean of the readings currently held
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.sum() / self.values.len() as f64)
        }
    }

    fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once the window has seen `capacity` readings
    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partial_window_averages_populated_slots() {
        let mut window = RunningAverage::new(5);
        assert_eq!(window.mean(), None);

        assert_eq!(window.push(10.0), 10.0);
        assert_eq!(window.push(20.0), 15.0);
        assert_eq!(window.len(), 2);
        assert!(!window.is_full());
    }

    #[test]
    fn test_oldest_reading_is_evicted() {
        let mut window = RunningAverage::new(3);
        for v in [1.0, 2.0, 3.0] {
            window.push(v);
        }
        assert!(window.is_full());
        assert_eq!(window.mean(), Some(2.0));

        assert_eq!(window.push(10.0), 5.0);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut window = RunningAverage::new(0);
        assert_eq!(window.capacity(), 1);
        window.push(4.0);
        assert_eq!(window.push(8.0), 8.0);
    }

    proptest! {
        #[test]
        fn prop_mean_matches_last_readings(
            values in prop::collection::vec(-50.0f64..80.0, 1..40),
            capacity in 1usize..8,
        ) {
            let mut window = RunningAverage::new(capacity);
            let mut last = 0.0;
            for &v in &values {
                last = window.push(v);
            }

            let tail = &values[values.len().saturating_sub(capacity)..];
            let expected = tail.iter().sum::<f64>() / tail.len() as f64;
            prop_assert!((last - expected).abs() < 1e-9);
            prop_assert_eq!(window.len(), tail.len());
        }
    }
}
