//! ---
//! upkeep_section: "05-operator-interfaces"
//! upkeep_subsection: "integration-tests"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Command-line behaviour that does not need a running engine."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use assert_cmd::Command;

fn upkeepctl() -> Command {
    let mut cmd = Command::cargo_bin("upkeepctl").unwrap();
    cmd.env_remove("UPKEEP_CONFIG");
    cmd
}

fn write_config(dir: &Path, binary: &Path) -> std::path::PathBuf {
    let path = dir.join("upkeep.toml");
    fs::write(
        &path,
        format!(
            "[engine]\nbinary_path = {:?}\nroot_path = {:?}\n",
            binary.display().to_string(),
            dir.display().to_string()
        ),
    )
    .unwrap();
    path
}

#[test]
fn version_flag_prints_banner() {
    let output = upkeepctl().arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("upkeep v"));
}

#[test]
fn protocol_detects_marker_in_binary() {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("updater-v1");
    fs::write(&plain, b"\x7fELF plain engine").unwrap();
    let config = write_config(dir.path(), &plain);

    let output = upkeepctl()
        .arg("--config")
        .arg(&config)
        .arg("protocol")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "1");
}

#[test]
fn missing_engine_fails_engine_commands() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &dir.path().join("absent-updater"));

    upkeepctl()
        .arg("--config")
        .arg(&config)
        .arg("versions")
        .assert()
        .failure();
}
