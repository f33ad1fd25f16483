//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "integration-tests"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Configuration loading behaviour."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use upkeep_common::config::AppConfig;
use upkeep_common::LogFormat;

const SAMPLE: &str = r#"
[engine]
binary_path = "/opt/app/updater"
release_channel = "canary"
repository_url = "https://updates.example.invalid"
root_path = "/opt/app"

[host]
allow_obsolete_host = true

[query]
timeout = 5

[logging]
format = "pretty"

[history]
journal_path = "/var/log/app/update-history.jsonl"
"#;

#[test]
fn parses_full_document() {
    let config: AppConfig = SAMPLE.parse().expect("config parses");
    assert_eq!(config.engine.release_channel, "canary");
    assert_eq!(config.engine.root_path, Some(PathBuf::from("/opt/app")));
    assert!(config.host.allow_obsolete_host);
    assert_eq!(config.host.modules_dir, "modules");
    assert_eq!(config.host.package_path, PathBuf::from("resources/app.asar"));
    assert_eq!(config.query.timeout, Duration::from_secs(5));
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert!(config.history.journal_path.is_some());
}

#[test]
fn empty_document_uses_defaults() {
    let config: AppConfig = "".parse().expect("defaults are valid");
    assert_eq!(config.engine.release_channel, "stable");
    assert!(config.engine.root_path.is_none());
    assert_eq!(config.query.timeout, Duration::from_secs(30));
}

#[test]
fn absolute_package_path_is_rejected() {
    let err = "[host]\npackage_path = \"/abs/app.asar\"\n"
        .parse::<AppConfig>()
        .expect_err("absolute package path must fail");
    assert!(err.to_string().contains("relative"));
}

#[test]
fn zero_timeout_is_rejected() {
    let err = "[query]\ntimeout = 0\n"
        .parse::<AppConfig>()
        .expect_err("zero timeout must fail");
    assert!(err.to_string().contains("timeout"));
}

#[test]
fn load_picks_first_existing_candidate() {
    std::env::remove_var(AppConfig::ENV_CONFIG_PATH);
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.toml");
    let present = dir.path().join("present.toml");
    std::fs::write(&present, SAMPLE).unwrap();

    let loaded = AppConfig::load_with_source(&[missing.clone(), present.clone()]).unwrap();
    assert_eq!(loaded.source, present);
    assert_eq!(loaded.config.engine.release_channel, "canary");

    let err = AppConfig::load(&[missing]).expect_err("no candidates exist");
    assert!(err.to_string().contains("no configuration files found"));
}
