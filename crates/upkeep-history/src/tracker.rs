//! ---
//! upkeep_section: "03-history-logging"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Task classification and update history."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::collections::HashSet;

use chrono::Utc;
use tracing::trace;

use crate::event::EventRecord;
use crate::task::{Progress, Task, TaskState, HOST_MODULE_NAME};

/// Per-name "active" markers used to classify progress into history events.
///
/// Download and install runs are tracked independently. A repeated `Working`
/// observation for an active name yields nothing; a terminal observation
/// always clears the marker and yields exactly one terminal record.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    downloading: HashSet<String>,
    installing: HashSet<String>,
}

impl ProgressTracker {
    /// Create a tracker with no active tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a progress observation, updating the active markers.
    pub fn classify(&mut self, progress: &Progress) -> Option<EventRecord> {
        match &progress.task {
            Task::HostDownload => self.download(HOST_MODULE_NAME, progress),
            Task::HostInstall { .. } => {
                self.install(HOST_MODULE_NAME, progress, None, progress.task.is_delta())
            }
            Task::ModuleDownload { module } => self.download(&module.name, progress),
            Task::ModuleInstall { module, .. } => self.install(
                &module.name,
                progress,
                Some(module.version),
                progress.task.is_delta(),
            ),
            Task::Unknown { kind } => {
                trace!(kind = %kind, "ignoring progress for unrecognised task kind");
                None
            }
        }
    }

    /// Whether a download run is open for `name`.
    pub fn is_downloading(&self, name: &str) -> bool {
        self.downloading.contains(name)
    }

    /// Whether an install run is open for `name`.
    pub fn is_installing(&self, name: &str) -> bool {
        self.installing.contains(name)
    }

    fn download(&mut self, name: &str, progress: &Progress) -> Option<EventRecord> {
        match progress.state {
            TaskState::Working => {
                if !self.downloading.insert(name.to_owned()) {
                    return None;
                }
                Some(EventRecord::DownloadingModule {
                    name: name.to_owned(),
                    timestamp: Utc::now(),
                })
            }
            TaskState::Complete | TaskState::Failed => {
                self.downloading.remove(name);
                Some(EventRecord::DownloadedModule {
                    name: name.to_owned(),
                    timestamp: Utc::now(),
                    succeeded: progress.state == TaskState::Complete,
                    received_bytes: progress.bytes_processed,
                })
            }
            TaskState::Waiting => None,
        }
    }

    fn install(
        &mut self,
        name: &str,
        progress: &Progress,
        new_version: Option<u64>,
        delta: bool,
    ) -> Option<EventRecord> {
        match progress.state {
            TaskState::Working => {
                if !self.installing.insert(name.to_owned()) {
                    return None;
                }
                Some(EventRecord::InstallingModule {
                    name: name.to_owned(),
                    timestamp: Utc::now(),
                    new_version,
                })
            }
            TaskState::Complete | TaskState::Failed => {
                self.installing.remove(name);
                Some(EventRecord::InstalledModule {
                    name: name.to_owned(),
                    timestamp: Utc::now(),
                    new_version,
                    succeeded: progress.state == TaskState::Complete,
                    delta,
                })
            }
            TaskState::Waiting => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ModuleVersion;

    fn module_download(name: &str, state: TaskState) -> Progress {
        Progress::new(
            Task::ModuleDownload {
                module: ModuleVersion::new(name, 1),
            },
            state,
            100,
        )
    }

    #[test]
    fn repeated_working_emits_single_start() {
        let mut tracker = ProgressTracker::new();
        let first = tracker.classify(&module_download("voice", TaskState::Working));
        assert!(matches!(first, Some(EventRecord::DownloadingModule { .. })));
        assert!(tracker
            .classify(&module_download("voice", TaskState::Working))
            .is_none());
        assert!(tracker.is_downloading("voice"));
    }

    #[test]
    fn terminal_clears_marker_even_without_start() {
        let mut tracker = ProgressTracker::new();
        let record = tracker
            .classify(&module_download("voice", TaskState::Failed))
            .unwrap();
        assert_eq!(record.succeeded(), Some(false));
        assert!(!tracker.is_downloading("voice"));
    }

    #[test]
    fn waiting_and_unknown_are_ignored() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker
            .classify(&module_download("voice", TaskState::Waiting))
            .is_none());
        let unknown = Progress::new(
            Task::Unknown {
                kind: "Prefetch".into(),
            },
            TaskState::Working,
            0,
        );
        assert!(tracker.classify(&unknown).is_none());
    }

    #[test]
    fn host_install_reports_delta_without_version() {
        let mut tracker = ProgressTracker::new();
        let task = Task::HostInstall {
            from_version: Some(serde_json::json!([1, 0, 9012])),
        };
        let record = tracker
            .classify(&Progress::new(task, TaskState::Complete, 0))
            .unwrap();
        match record {
            EventRecord::InstalledModule {
                name,
                new_version,
                succeeded,
                delta,
                ..
            } => {
                assert_eq!(name, HOST_MODULE_NAME);
                assert_eq!(new_version, None);
                assert!(succeeded);
                assert!(delta);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn download_and_install_markers_are_independent() {
        let mut tracker = ProgressTracker::new();
        tracker.classify(&Progress::new(Task::HostDownload, TaskState::Working, 0));
        let install = tracker.classify(&Progress::new(
            Task::HostInstall { from_version: None },
            TaskState::Working,
            0,
        ));
        assert!(matches!(install, Some(EventRecord::InstallingModule { .. })));
        assert!(tracker.is_downloading(HOST_MODULE_NAME));
        assert!(tracker.is_installing(HOST_MODULE_NAME));
    }
}
