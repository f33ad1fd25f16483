//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "integration-tests"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Tracing bootstrap writes and flushes the rolling log file."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::fs;

use upkeep_common::{init_tracing, shutdown_tracing, LogFormat, LoggingConfig};

#[test]
fn shutdown_flushes_file_log() {
    std::env::set_var("UPKEEP_LOG", "info");
    let dir = tempfile::tempdir().unwrap();
    let config = LoggingConfig {
        directory: dir.path().to_path_buf(),
        format: LogFormat::StructuredJson,
        file_prefix: Some("restart".into()),
    };
    init_tracing("upkeep-test", &config).unwrap();
    tracing::warn!(target: "upkeep_core", "exiting for host restart");
    shutdown_tracing();
    shutdown_tracing();

    let contents: String = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
        .collect();
    assert!(contents.contains("tracing initialised"));
    assert!(contents.contains("exiting for host restart"));
}
