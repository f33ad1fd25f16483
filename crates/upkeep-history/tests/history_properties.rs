//! ---
//! upkeep_section: "03-history-logging"
//! upkeep_subsection: "integration-tests"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Classification and drain properties of the update history."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use upkeep_history::{
    EventHistory, EventRecord, ModuleVersion, Progress, ProgressTracker, Task, TaskState,
};

fn install(name: &str, state: TaskState) -> Progress {
    Progress::new(
        Task::ModuleInstall {
            module: ModuleVersion::new(name, 7),
            from_version: None,
        },
        state,
        0,
    )
}

fn feed(tracker: &mut ProgressTracker, history: &EventHistory, states: &[TaskState]) {
    for state in states {
        if let Some(record) = tracker.classify(&install("voice", *state)) {
            history.record(record);
        }
    }
}

#[test]
fn one_start_per_working_run() {
    use TaskState::*;
    let mut tracker = ProgressTracker::new();
    let history = EventHistory::new();
    feed(
        &mut tracker,
        &history,
        &[
            Waiting, Working, Working, Working, Complete, Waiting, Working, Working, Failed,
        ],
    );

    let kinds: Vec<_> = history.drain().iter().map(EventRecord::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "installing-module",
            "installed-module",
            "installing-module",
            "installed-module"
        ]
    );
}

#[test]
fn terminal_outcome_follows_state() {
    let mut tracker = ProgressTracker::new();
    let history = EventHistory::new();
    feed(
        &mut tracker,
        &history,
        &[TaskState::Working, TaskState::Complete],
    );
    feed(
        &mut tracker,
        &history,
        &[TaskState::Working, TaskState::Failed],
    );

    let outcomes: Vec<_> = history
        .drain()
        .iter()
        .filter_map(EventRecord::succeeded)
        .collect();
    assert_eq!(outcomes, vec![true, false]);
}

#[test]
fn second_drain_is_empty() {
    let history = EventHistory::new();
    history.record(EventRecord::DownloadingModule {
        name: "host".into(),
        timestamp: Utc::now(),
    });
    assert_eq!(history.drain().len(), 1);
    assert!(history.drain().is_empty());
}

#[test]
fn concurrent_record_and_drain_loses_nothing() {
    const WRITERS: usize = 4;
    const PER_WRITER: usize = 500;

    let history = Arc::new(EventHistory::new());
    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let history = Arc::clone(&history);
            thread::spawn(move || {
                for index in 0..PER_WRITER {
                    history.record(EventRecord::DownloadingModule {
                        name: format!("m{writer}-{index}"),
                        timestamp: Utc::now(),
                    });
                }
            })
        })
        .collect();

    let mut collected = Vec::new();
    while writers.iter().any(|handle| !handle.is_finished()) {
        collected.extend(history.drain());
        thread::yield_now();
    }
    for handle in writers {
        handle.join().unwrap();
    }
    collected.extend(history.drain());

    assert_eq!(collected.len(), WRITERS * PER_WRITER);
    let mut names: Vec<_> = collected.iter().map(|r| r.name().to_owned()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), WRITERS * PER_WRITER);
}
