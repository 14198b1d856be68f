use crate::types::TrackingFrame;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bounded ring of the most recent frames, oldest evicted first.
///
/// The poll thread pushes while callers read. Reads clone frames out under a
/// short lock, so a caller never holds storage the writer later overwrites.
pub struct FrameHistory {
    capacity: usize,
    frames: Mutex<VecDeque<TrackingFrame>>,
}

impl FrameHistory {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn frames(&self) -> MutexGuard<'_, VecDeque<TrackingFrame>> {
        // Every mutation is a single push or pop, so a poisoned ring is still consistent
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames().is_empty()
    }

    pub fn push(&self, frame: TrackingFrame) {
        let mut frames = self.frames();
        if frames.len() == self.capacity {
            frames.pop_front();
        }
        frames.push_back(frame);
    }

    /// All retained frames, oldest first.
    pub fn snapshot(&self) -> Vec<TrackingFrame> {
        self.frames().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<TrackingFrame> {
        self.frames().back().cloned()
    }

    pub fn get(&self, frame_id: i64) -> Option<TrackingFrame> {
        self.frames()
            .iter()
            .rev()
            .find(|f| f.frame_id == frame_id)
            .cloned()
    }

    /// Newest frame whose timestamp is not after `timestamp`.
    pub fn at_or_before(&self, timestamp: i64) -> Option<TrackingFrame> {
        self.frames()
            .iter()
            .rev()
            .find(|f| f.timestamp <= timestamp)
            .cloned()
    }

    pub fn clear(&self) {
        self.frames().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: i64) -> TrackingFrame {
        TrackingFrame {
            frame_id: id,
            timestamp: id * 1_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let history = FrameHistory::new(3);
        for id in 1..=5 {
            history.push(frame(id));
        }
        let ids: Vec<i64> = history.snapshot().iter().map(|f| f.frame_id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(history.len(), 3);
        assert_eq!(history.latest().unwrap().frame_id, 5);
    }

    #[test]
    fn test_lookup_by_id_and_time() {
        let history = FrameHistory::new(10);
        for id in 1..=4 {
            history.push(frame(id));
        }
        assert_eq!(history.get(2).unwrap().timestamp, 2_000);
        assert!(history.get(9).is_none());
        assert_eq!(history.at_or_before(3_500).unwrap().frame_id, 3);
        assert!(history.at_or_before(999).is_none());
    }

    #[test]
    fn test_copies_are_independent() {
        let history = FrameHistory::new(2);
        history.push(frame(1));
        let mut copy = history.latest().unwrap();
        copy.frame_id = 42;
        assert_eq!(history.latest().unwrap().frame_id, 1);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let history = FrameHistory::new(0);
        history.push(frame(1));
        history.push(frame(2));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.snapshot().len(), 1);
        history.clear();
        assert!(history.is_empty());
    }
}
