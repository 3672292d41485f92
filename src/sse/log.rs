#![expect(
    clippy::module_name_repetitions,
    reason = "MessageLog is the public name consumers look for"
)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use serde_json::Value;

use super::types::{EventKind, LogRecord, StreamEvent};

/// Default number of records kept by a [`MessageLog`].
pub const DEFAULT_CAPACITY: usize = 50;

/// Bounded, ordered buffer of human-readable records derived from stream events.
///
/// Once `capacity` is exceeded the oldest records are evicted first.
#[derive(Debug)]
pub struct MessageLog {
    capacity: usize,
    next_id: AtomicU64,
    records: RwLock<VecDeque<LogRecord>>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MessageLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: AtomicU64::new(1),
            records: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Format `event` into a [`LogRecord`] and append it, evicting from the front
    /// until the buffer is back at capacity. Returns the appended record.
    pub fn append(&self, event: &StreamEvent) -> LogRecord {
        self.push(event.kind(), format_event(event))
    }

    pub(crate) fn push(&self, kind: EventKind, content: String) -> LogRecord {
        let record = LogRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            kind,
            content,
        };

        // A VecDeque has no intermediate state a panic could leave behind.
        let mut records = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        records.push_back(record.clone());
        while records.len() > self.capacity {
            records.pop_front();
        }

        record
    }

    pub fn clear(&self) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Owned copy of the buffered records, oldest first.
    ///
    /// The copy does not reflect later appends.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// The most recently appended record still in the buffer.
    #[must_use]
    pub fn latest(&self) -> Option<LogRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Render `event` the way it is shown in the diagnostic log.
#[must_use]
pub fn format_event(event: &StreamEvent) -> String {
    match event {
        StreamEvent::Opened => "Connection established".to_owned(),
        StreamEvent::Message(message) => format_payload(&message.data),
        StreamEvent::Errored(error) => format!("Error - {error}"),
        StreamEvent::Closed => "Connection closed".to_owned(),
        StreamEvent::TimedOut => "Connection timed out".to_owned(),
        StreamEvent::TransportException(error) => format!("Exception - {error}"),
    }
}

/// Pretty-print JSON objects and arrays; keep anything else verbatim.
fn format_payload(data: &str) -> String {
    if data.is_empty() {
        return "Empty message".to_owned();
    }

    match serde_json::from_str::<Value>(data) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => {
            serde_json::to_string_pretty(&value).unwrap_or_else(|_e| data.to_owned())
        }
        _ => data.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::types::{ErrorEvent, MessageEvent};

    fn message(data: &str) -> StreamEvent {
        StreamEvent::Message(MessageEvent::new(data))
    }

    #[test]
    fn keeps_most_recent_records_in_order() {
        let log = MessageLog::new(3);
        for i in 0..7 {
            log.append(&message(&format!("m{i}")));
        }

        let snapshot = log.snapshot();
        let contents: Vec<_> = snapshot.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, ["m4", "m5", "m6"]);
        let ids: Vec<_> = snapshot.iter().map(|r| r.id).collect();
        assert_eq!(ids, [5, 6, 7]);
    }

    #[test]
    fn never_exceeds_capacity() {
        let log = MessageLog::default();
        for i in 0..(DEFAULT_CAPACITY * 3) {
            log.append(&message(&i.to_string()));
            assert!(log.len() <= DEFAULT_CAPACITY, "len after {i}");
        }
        assert_eq!(log.len(), DEFAULT_CAPACITY);
    }

    #[test]
    fn zero_capacity_holds_nothing() {
        let log = MessageLog::new(0);
        let record = log.append(&StreamEvent::Opened);

        assert_eq!(record.id, 1);
        assert!(log.is_empty());
    }

    #[test]
    fn json_object_is_pretty_printed() {
        let log = MessageLog::default();
        log.append(&message(r#"{"a":1}"#));

        assert_eq!(log.latest().unwrap().content, "{\n  \"a\": 1\n}");
    }

    #[test]
    fn non_json_payload_is_kept_verbatim() {
        let log = MessageLog::default();
        log.append(&message("not json"));
        assert_eq!(log.latest().unwrap().content, "not json");

        // Valid JSON scalars are not "structured" and stay raw.
        log.append(&message("42"));
        assert_eq!(log.latest().unwrap().content, "42");
    }

    #[test]
    fn empty_payload_has_placeholder() {
        assert_eq!(format_event(&message("")), "Empty message");
    }

    #[test]
    fn fixed_strings_for_other_kinds() {
        assert_eq!(format_event(&StreamEvent::Opened), "Connection established");
        assert_eq!(format_event(&StreamEvent::Closed), "Connection closed");
        assert_eq!(format_event(&StreamEvent::TimedOut), "Connection timed out");
        assert_eq!(
            format_event(&StreamEvent::Errored(ErrorEvent::new("boom"))),
            "Error - boom"
        );
        assert_eq!(
            format_event(&StreamEvent::TransportException(ErrorEvent::new("bad utf-8"))),
            "Exception - bad utf-8"
        );
    }

    #[test]
    fn clear_keeps_sequence_monotonic() {
        let log = MessageLog::default();
        log.append(&StreamEvent::Opened);
        log.append(&StreamEvent::Closed);
        log.clear();
        assert!(log.is_empty());

        let record = log.append(&StreamEvent::Opened);
        assert_eq!(record.id, 3);
    }

    #[test]
    fn snapshot_is_detached() {
        let log = MessageLog::default();
        log.append(&StreamEvent::Opened);
        let snapshot = log.snapshot();
        log.append(&StreamEvent::Closed);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(log.len(), 2);
    }
}
