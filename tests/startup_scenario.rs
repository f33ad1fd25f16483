//! ---
//! upkeep_section: "15-testing-qa-runbook"
//! upkeep_subsection: "integration-tests"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "End-to-end startup against a scripted engine process."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use upkeep_common::AppConfig;

fn read(path: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let full = Path::new(manifest_dir).join("..").join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn example_config_is_valid() {
    let config: AppConfig = read("configs/upkeep.example.toml")
        .parse()
        .expect("example config parses");
    assert!(config.engine.root_path.is_some());
    assert!(config.history.journal_path.is_some());
    assert_eq!(config.engine.extra.get("new_update_api").map(String::as_str), Some("true"));
}

#[cfg(unix)]
mod scripted_engine {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use upkeep_common::AppConfig;
    use upkeep_core::{HostProcess, StartOptions, StartOutcome, Updater, UpdaterSettings};
    use upkeep_engine::{CommandBody, EngineReply, ProcessLoader, ProtocolVersion};
    use upkeep_history::{replay_journal, EventRecord, HistoryJournal};
    use upkeep_versioning::{host_path, HostVersion, VersionManifest};

    const ENGINE_SCRIPT: &str = r#"#!/bin/sh
# Determined this is an architecture transition
read -r options
while read -r line; do
  echo "$line" >> "$0.received"
  id=$(echo "$line" | sed 's/^\[\([0-9]*\),.*/\1/')
  case "$line" in
    *QueryCurrentVersions*)
      echo "[$id,{\"VersionInfo\":{\"current_host\":[1,0,5],\"current_modules\":{\"voice\":3,\"rpc\":1},\"last_successful_update\":{\"version\":\"1.0.5\"}}}]"
      ;;
    *CollectGarbage*)
      echo "[$id,{\"TaskProgress\":[{\"HostDownload\":{}},\"Working\",50.0,1]}]"
      echo "[$id,{\"TaskProgress\":[{\"HostDownload\":{}},\"Complete\",100.0,2]}]"
      echo "[$id,\"Ok\"]"
      ;;
    *)
      echo "[$id,\"Ok\"]"
      ;;
  esac
done
"#;

    struct StayingProcess {
        exe: PathBuf,
    }

    impl HostProcess for StayingProcess {
        fn current_exe(&self) -> std::io::Result<PathBuf> {
            Ok(self.exe.clone())
        }

        fn relaunch_on_exit(&self, target: &Path) {
            panic!("unexpected relaunch into {}", target.display());
        }

        fn exit(&self) {
            panic!("unexpected exit");
        }
    }

    #[derive(Default)]
    struct RestartingProcess {
        exe: PathBuf,
        relaunched: Mutex<Option<PathBuf>>,
        exited: Mutex<bool>,
    }

    impl HostProcess for RestartingProcess {
        fn current_exe(&self) -> std::io::Result<PathBuf> {
            Ok(self.exe.clone())
        }

        fn relaunch_on_exit(&self, target: &Path) {
            *self.relaunched.lock() = Some(target.to_path_buf());
        }

        fn exit(&self) {
            *self.exited.lock() = true;
        }
    }

    fn config_for(engine: &Path, root: &Path) -> AppConfig {
        format!(
            "[engine]\nbinary_path = {:?}\nroot_path = {:?}\n\n[query]\ntimeout = 10\n",
            engine.display().to_string(),
            root.display().to_string()
        )
        .parse()
        .unwrap()
    }

    fn install_engine(dir: &Path) -> PathBuf {
        let path = dir.join("updater");
        fs::write(&path, ENGINE_SCRIPT).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn startup_commits_modules_and_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let engine = install_engine(dir.path());
        let journal_path = dir.path().join("history.jsonl");
        let config = config_for(&engine, dir.path());

        let settings = UpdaterSettings::from_config(&config).unwrap();
        assert_eq!(settings.protocol, ProtocolVersion::V2);

        let host_exe = dir.path().join("app-1.0.5").join("App");
        let updater = Updater::new(
            settings,
            &ProcessLoader::new(engine),
            Arc::new(StayingProcess { exe: host_exe }),
            None,
        );
        assert!(updater.is_valid());

        let outcome = tokio::time::timeout(
            Duration::from_secs(20),
            updater.start_current_version(None, StartOptions::default()),
        )
        .await
        .unwrap();
        let modules_dir = dir.path().join("app-1.0.5").join("modules");
        match outcome {
            StartOutcome::Committed { host, modules } => {
                assert_eq!(host.to_string(), "1.0.5");
                assert_eq!(
                    modules,
                    vec![modules_dir.join("voice-3"), modules_dir.join("rpc-1")]
                );
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(updater.search_path().entries()[0], modules_dir.join("rpc-1"));

        let reply = tokio::time::timeout(
            Duration::from_secs(20),
            updater.request(CommandBody::CollectGarbage, None),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reply, EngineReply::Ok);

        let mut journal = HistoryJournal::open(&journal_path).unwrap();
        assert_eq!(updater.persist_history(&mut journal).unwrap(), 2);

        let mut replayed = Vec::new();
        replay_journal(&journal_path, |entry| {
            replayed.push(entry.event);
            Ok(())
        })
        .unwrap();
        assert!(matches!(
            &replayed[..],
            [
                EventRecord::DownloadingModule { name: first, .. },
                EventRecord::DownloadedModule { name: second, succeeded: true, received_bytes: 2, .. },
            ] if first == "host" && second == "host"
        ));
        assert_eq!(json!(replayed[1])["type"], "downloaded-module");
    }

    #[tokio::test]
    async fn restart_delivers_running_manifest_to_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = install_engine(dir.path());
        let settings = UpdaterSettings::from_config(&config_for(&engine, dir.path())).unwrap();

        let process = Arc::new(RestartingProcess {
            exe: dir.path().join("app-1.0.4").join("App"),
            ..RestartingProcess::default()
        });
        let updater = Updater::new(settings, &ProcessLoader::new(&engine), process.clone(), None);

        let outcome = tokio::time::timeout(
            Duration::from_secs(20),
            updater.start_current_version(None, StartOptions::default()),
        )
        .await
        .unwrap();
        let committed = host_path(dir.path(), &HostVersion::new(vec![1, 0, 5])).join("App");
        assert!(matches!(&outcome, StartOutcome::Restarting { expected } if *expected == committed));
        assert_eq!(*process.relaunched.lock(), Some(committed));
        assert!(*process.exited.lock());
        drop(updater);

        let received = fs::read_to_string(dir.path().join("updater.received")).unwrap();
        let manifests: Vec<Value> = received
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|value| value[1].get("SetManifests").cloned())
            .collect();
        assert_eq!(
            manifests,
            vec![json!(["Running", VersionManifest::new("1.0.5")])]
        );
    }
}
