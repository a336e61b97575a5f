use std::collections::VecDeque;

use serde::Serialize;

pub const EVENT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub seq: u64,
    pub event: String,
    pub data: serde_json::Value,
}

/// Bounded in-memory change feed. Sequence numbers never repeat within a daemon run.
#[derive(Debug)]
pub struct EventLog {
    next_seq: u64,
    capacity: usize,
    buf: VecDeque<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            next_seq: 1,
            capacity: capacity.max(1),
            buf: VecDeque::new(),
        }
    }

    pub fn publish(&mut self, event: impl Into<String>, data: serde_json::Value) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let event = event.into();
        tracing::debug!(seq, event = %event, "event published");
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(Event { seq, event, data });
        seq
    }

    pub fn latest_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Events strictly after `after_seq`, oldest first.
    pub fn since(&self, after_seq: u64, limit: usize) -> Vec<Event> {
        self.buf
            .iter()
            .filter(|e| e.seq > after_seq)
            .take(limit)
            .cloned()
            .collect()
    }

    /// True when events after `after_seq` have already been evicted.
    pub fn has_gap(&self, after_seq: u64) -> bool {
        match self.buf.front() {
            Some(first) => first.seq > after_seq.saturating_add(1),
            None => after_seq < self.latest_seq(),
        }
    }
}

/// Event name for an entity change, e.g. `student_added`.
pub fn event_name(noun: &str, action: &str) -> String {
    format!("{}_{}", noun, action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn since_returns_only_newer_events() {
        let mut log = EventLog::default();
        log.publish("staff_added", json!({ "id": "a" }));
        let second = log.publish("staff_updated", json!({ "id": "a" }));
        let got = log.since(1, 10);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].seq, second);
        assert_eq!(got[0].event, "staff_updated");
    }

    #[test]
    fn capacity_evicts_oldest_and_reports_gap() {
        let mut log = EventLog::with_capacity(2);
        log.publish("teacher_added", json!({}));
        log.publish("teacher_added", json!({}));
        log.publish("teacher_added", json!({}));
        assert_eq!(log.latest_seq(), 3);
        assert_eq!(log.since(0, 10).len(), 2);
        assert!(log.has_gap(0));
        assert!(!log.has_gap(1));
    }

    #[test]
    fn event_names_join_noun_and_action() {
        assert_eq!(event_name("teacher", "updated"), "teacher_updated");
    }

    #[test]
    fn cursor_past_the_end_sees_no_gap() {
        let mut log = EventLog::default();
        log.publish("student_added", json!({ "id": "a" }));
        assert!(!log.has_gap(u64::MAX));
        assert!(log.since(u64::MAX, 10).is_empty());
    }
}
