//! ---
//! upkeep_section: "03-history-logging"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Task classification and update history."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use parking_lot::Mutex;

use crate::event::EventRecord;

/// Append-only, drainable record of task transitions.
#[derive(Debug, Default)]
pub struct EventHistory {
    records: Mutex<Vec<EventRecord>>,
}

impl EventHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn record(&self, event: EventRecord) {
        self.records.lock().push(event);
    }

    /// Return every record accumulated since the last drain and clear the log.
    pub fn drain(&self) -> Vec<EventRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Put undelivered records back ahead of anything recorded since they were drained.
    pub fn restore(&self, mut undelivered: Vec<EventRecord>) {
        if undelivered.is_empty() {
            return;
        }
        let mut records = self.records.lock();
        undelivered.append(&mut records);
        *records = undelivered;
    }

    /// Number of records waiting to be drained.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing is waiting to be drained.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn start(name: &str) -> EventRecord {
        EventRecord::DownloadingModule {
            name: name.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn drain_returns_in_order_then_empties() {
        let history = EventHistory::new();
        history.record(start("a"));
        history.record(start("b"));
        let drained = history.drain();
        assert_eq!(
            drained.iter().map(EventRecord::name).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(history.drain().is_empty());
        assert!(history.is_empty());
    }

    #[test]
    fn restored_records_precede_newer_ones() {
        let history = EventHistory::new();
        history.record(start("a"));
        history.record(start("b"));
        let drained = history.drain();
        history.record(start("c"));

        history.restore(drained);
        history.restore(Vec::new());
        assert_eq!(
            history.drain().iter().map(EventRecord::name).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }
}
