use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// One line of the dashboard's message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub sequence: u64,
    pub timestamp: DateTime<Local>,
    pub text: String,
}

/// Bounded, append-only log. The oldest record is evicted once `capacity` is
/// reached. Sequence numbers start at 1 and are never reused, not even after
/// [`LogStore::clear`]. Records are immutable once appended and shared between
/// snapshots.
#[derive(Debug, Clone)]
pub struct LogStore {
    records: VecDeque<Arc<LogRecord>>,
    capacity: usize,
    next_sequence: u64,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogStore {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
            next_sequence: 1,
        }
    }

    pub fn append(&mut self, timestamp: DateTime<Local>, text: impl Into<String>) -> &LogRecord {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }

        let record = LogRecord {
            sequence: self.next_sequence,
            timestamp,
            text: text.into(),
        };
        self.next_sequence += 1;
        self.records.push_back(Arc::new(record));
        &self.records[self.records.len() - 1]
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Records oldest first.
    pub fn snapshot(&self) -> Vec<Arc<LogRecord>> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut store = LogStore::new(500);
        for n in 1..=600 {
            store.append(Local::now(), format!("message {}", n));
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 500);
        assert_eq!(snapshot[0].sequence, 101);
        assert_eq!(snapshot[0].text, "message 101");
        assert_eq!(snapshot[499].sequence, 600);
        assert!(snapshot.windows(2).all(|w| w[0].sequence + 1 == w[1].sequence));
    }

    #[test]
    fn snapshots_share_records() {
        let mut store = LogStore::new(10);
        store.append(Local::now(), "kept");
        let first = store.snapshot();
        store.append(Local::now(), "added");
        let second = store.snapshot();

        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn sequence_survives_clear() {
        let mut store = LogStore::new(10);
        store.append(Local::now(), "a");
        store.append(Local::now(), "b");
        store.clear();
        assert!(store.is_empty());

        let record = store.append(Local::now(), "c");
        assert_eq!(record.sequence, 3);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn zero_capacity_keeps_latest_record() {
        let mut store = LogStore::new(0);
        store.append(Local::now(), "first");
        store.append(Local::now(), "second");

        assert_eq!(store.capacity(), 1);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].text, "second");
    }
}
