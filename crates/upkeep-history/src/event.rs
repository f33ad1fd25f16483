//! ---
//! upkeep_section: "03-history-logging"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Task classification and update history."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entry of the update history, serialized with a kebab-case `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EventRecord {
    /// A download task started working.
    DownloadingModule {
        /// Module name, `host` for host packages.
        name: String,
        /// Time the transition was observed.
        timestamp: DateTime<Utc>,
    },
    /// A download task reached a terminal state.
    DownloadedModule {
        /// Module name, `host` for host packages.
        name: String,
        /// Time the transition was observed.
        timestamp: DateTime<Utc>,
        /// `true` iff the task completed.
        succeeded: bool,
        /// Bytes received when the task ended.
        received_bytes: u64,
    },
    /// An install task started working.
    InstallingModule {
        /// Module name, `host` for host packages.
        name: String,
        /// Time the transition was observed.
        timestamp: DateTime<Utc>,
        /// Version being installed; absent for host installs.
        new_version: Option<u64>,
    },
    /// An install task reached a terminal state.
    InstalledModule {
        /// Module name, `host` for host packages.
        name: String,
        /// Time the transition was observed.
        timestamp: DateTime<Utc>,
        /// Version being installed; absent for host installs.
        new_version: Option<u64>,
        /// `true` iff the task completed.
        succeeded: bool,
        /// Whether the install upgraded from a prior version.
        delta: bool,
    },
}

impl EventRecord {
    /// Wire name of the record type.
    pub fn kind(&self) -> &'static str {
        match self {
            EventRecord::DownloadingModule { .. } => "downloading-module",
            EventRecord::DownloadedModule { .. } => "downloaded-module",
            EventRecord::InstallingModule { .. } => "installing-module",
            EventRecord::InstalledModule { .. } => "installed-module",
        }
    }

    /// Module name the record concerns.
    pub fn name(&self) -> &str {
        match self {
            EventRecord::DownloadingModule { name, .. }
            | EventRecord::DownloadedModule { name, .. }
            | EventRecord::InstallingModule { name, .. }
            | EventRecord::InstalledModule { name, .. } => name,
        }
    }

    /// Time the transition was observed.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EventRecord::DownloadingModule { timestamp, .. }
            | EventRecord::DownloadedModule { timestamp, .. }
            | EventRecord::InstallingModule { timestamp, .. }
            | EventRecord::InstalledModule { timestamp, .. } => *timestamp,
        }
    }

    /// Whether the record closes a task run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventRecord::DownloadedModule { .. } | EventRecord::InstalledModule { .. }
        )
    }

    /// Outcome carried by terminal records.
    pub fn succeeded(&self) -> Option<bool> {
        match self {
            EventRecord::DownloadedModule { succeeded, .. }
            | EventRecord::InstalledModule { succeeded, .. } => Some(*succeeded),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_wire_field_names() {
        let timestamp = Utc::now();
        let record = EventRecord::InstalledModule {
            name: "voice".into(),
            timestamp,
            new_version: Some(4),
            succeeded: true,
            delta: false,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], json!("installed-module"));
        assert_eq!(value["newVersion"], json!(4));
        assert_eq!(value["delta"], json!(false));
        assert_eq!(record.kind(), "installed-module");

        let decoded: EventRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn download_terminal_uses_received_bytes() {
        let record = EventRecord::DownloadedModule {
            name: "host".into(),
            timestamp: Utc::now(),
            succeeded: false,
            received_bytes: 512,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["receivedBytes"], json!(512));
        assert_eq!(record.succeeded(), Some(false));
        assert!(record.is_terminal());
    }
}
