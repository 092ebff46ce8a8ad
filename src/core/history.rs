//! Bounded rolling window of recent assistant responses.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Recent conversation turns for one session, oldest evicted first.
///
/// Shared between the session task and the turn task that appends on
/// completion, hence the internal lock.
pub struct ConversationHistory {
    entries: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl ConversationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append one entry, evicting the oldest when over capacity.
    pub fn push(&self, text: String) {
        if self.capacity == 0 || text.is_empty() {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(text);
    }

    /// Oldest-first snapshot of the window.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_snapshot_order() {
        let history = ConversationHistory::new(5);
        history.push("first".into());
        history.push("second".into());
        assert_eq!(history.snapshot(), vec!["first", "second"]);
    }

    #[test]
    fn test_oldest_evicted_first() {
        let history = ConversationHistory::new(3);
        for i in 0..5 {
            history.push(format!("turn {i}"));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.snapshot(), vec!["turn 2", "turn 3", "turn 4"]);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let history = ConversationHistory::new(0);
        history.push("ignored".into());
        assert!(history.is_empty());
    }

    #[test]
    fn test_empty_entries_ignored() {
        let history = ConversationHistory::new(3);
        history.push(String::new());
        assert!(history.is_empty());
    }

    #[test]
    fn test_clear() {
        let history = ConversationHistory::new(3);
        history.push("something".into());
        history.clear();
        assert!(history.is_empty());
    }
}
