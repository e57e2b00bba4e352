use std::collections::VecDeque;

use crate::classify::ErrorRecord;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Bounded, most-recent-first buffer of failures for one server.
#[derive(Debug, Clone)]
pub struct ErrorHistory {
    entries: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ErrorHistory {
    /// A capacity of zero is bumped to one so the latest failure is always kept.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: ErrorRecord) {
        self.entries.push_front(record);
        self.entries.truncate(self.capacity);
    }

    #[must_use]
    pub fn latest(&self) -> Option<&ErrorRecord> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.entries.iter()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<ErrorRecord> {
        self.entries.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classification, ErrorType};

    fn record(message: &str) -> ErrorRecord {
        ErrorRecord::new(&Classification::of(ErrorType::Network), message, "s", None)
    }

    #[test]
    fn newest_first() {
        let mut history = ErrorHistory::with_capacity(3);
        history.push(record("one"));
        history.push(record("two"));
        assert_eq!(history.latest().unwrap().message, "two");
        let messages: Vec<_> = history.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, ["two", "one"]);
    }

    #[test]
    fn bounded_by_capacity() {
        let mut history = ErrorHistory::with_capacity(2);
        for m in ["a", "b", "c", "d"] {
            history.push(record(m));
        }
        assert_eq!(history.len(), 2);
        let messages: Vec<_> = history.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, ["d", "c"]);
    }

    #[test]
    fn zero_capacity_keeps_latest() {
        let mut history = ErrorHistory::with_capacity(0);
        history.push(record("a"));
        history.push(record("b"));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.latest().unwrap().message, "b");
    }

    #[test]
    fn clear_empties() {
        let mut history = ErrorHistory::default();
        history.push(record("a"));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.capacity(), DEFAULT_HISTORY_CAPACITY);
    }
}
