//! ---
//! upkeep_section: "03-history-logging"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Task classification and update history."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Task taxonomy reported by the update engine, the classifier that turns
//! progress observations into history events, and the drainable history log.

/// Result alias used throughout the history crate.
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Error type for the history subsystem.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Wrapper for IO errors encountered while reading/writing journal files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    /// A progress payload did not match the engine's wire shape.
    #[error("malformed progress report: {0}")]
    MalformedProgress(String),
}

pub mod event;
pub mod journal;
pub mod log;
pub mod metrics;
pub mod task;
pub mod tracker;

pub use event::EventRecord;
pub use journal::replay as replay_journal;
pub use journal::{HistoryJournal, HistorySink, JournalEntry, JournalReader, JOURNAL_VERSION};
pub use log::EventHistory;
pub use metrics::UpdaterMetrics;
pub use task::{ModuleVersion, Progress, Task, TaskState, HOST_MODULE_NAME};
pub use tracker::ProgressTracker;
