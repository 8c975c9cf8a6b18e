//! Volume history for the listener
//!
//! One scalar per decoded chunk, kept in a fixed-capacity ring. The audio
//! thread appends while an observer (status API, UI) takes snapshots.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Fixed-capacity ring of per-chunk volume summaries
pub struct VolumeHistory {
    entries: Mutex<VecDeque<f32>>,
    capacity: usize,
}

impl VolumeHistory {
    /// Create an empty history holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Mean absolute amplitude of a chunk
    pub fn summarize(samples: &[i16]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let total: u64 = samples.iter().map(|s| s.unsigned_abs() as u64).sum();
        total as f32 / samples.len() as f32
    }

    /// Record one summary for `samples`, evicting the oldest entry when full.
    /// Empty chunks are ignored.
    pub fn append(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        let volume = Self::summarize(samples);

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(volume);
    }

    /// All entries, oldest first
    pub fn snapshot(&self) -> Vec<f32> {
        self.entries.lock().iter().copied().collect()
    }

    /// The newest `count` entries, oldest first
    pub fn recent(&self, count: usize) -> Vec<f32> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).copied().collect()
    }

    pub fn latest(&self) -> Option<f32> {
        self.entries.lock().back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_summary_is_mean_absolute_amplitude() {
        assert_eq!(VolumeHistory::summarize(&[100, -100, 300, -300]), 200.0);
        assert_eq!(VolumeHistory::summarize(&[i16::MIN]), 32768.0);
        assert_eq!(VolumeHistory::summarize(&[]), 0.0);
    }

    #[test]
    fn test_wraparound_keeps_newest_in_order() {
        let history = VolumeHistory::new(3);
        for level in [10i16, 20, 30, 40, 50] {
            history.append(&[level, -level]);
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.snapshot(), vec![30.0, 40.0, 50.0]);
        assert_eq!(history.recent(2), vec![40.0, 50.0]);
        assert_eq!(history.recent(10), vec![30.0, 40.0, 50.0]);
        assert_eq!(history.latest(), Some(50.0));
    }

    #[test]
    fn test_empty_chunk_ignored() {
        let history = VolumeHistory::new(4);
        history.append(&[]);
        assert!(history.is_empty());
        assert_eq!(history.latest(), None);
    }

    #[test]
    fn test_concurrent_append_and_snapshot() {
        let history = Arc::new(VolumeHistory::new(64));

        let writer = {
            let history = history.clone();
            thread::spawn(move || {
                for i in 0..10_000i32 {
                    history.append(&[(i % 1000) as i16]);
                }
            })
        };

        for _ in 0..1000 {
            assert!(history.snapshot().len() <= 64);
        }
        writer.join().unwrap();

        // Last 64 appends were levels 9936..10000 mod 1000
        let expected: Vec<f32> = (9936..10_000).map(|i| (i % 1000) as f32).collect();
        assert_eq!(history.snapshot(), expected);
    }

    proptest! {
        #[test]
        fn prop_snapshot_holds_most_recent_summaries(
            capacity in 1usize..64,
            levels in proptest::collection::vec(0i16..i16::MAX, 0..300),
        ) {
            let history = VolumeHistory::new(capacity);
            for level in &levels {
                history.append(&[*level]);
            }

            let snapshot = history.snapshot();
            prop_assert!(snapshot.len() <= capacity);

            let skip = levels.len().saturating_sub(capacity);
            let expected: Vec<f32> = levels[skip..].iter().map(|l| *l as f32).collect();
            prop_assert_eq!(snapshot, expected);
        }
    }
}
