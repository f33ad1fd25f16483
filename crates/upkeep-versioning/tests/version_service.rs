//! ---
//! upkeep_section: "04-versioning"
//! upkeep_subsection: "integration-tests"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Version query shapes, manifest designation, and module registration."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{json, Value};
use upkeep_engine::{
    CommandChannel, EngineOptions, InMemoryEngine, ProtocolVersion, RequestId, ResponseSink,
};
use upkeep_versioning::{HostVersion, ModuleSearchPath, VersionManifest, VersionService, VersionSet};

struct NullSink;

impl ResponseSink for NullSink {
    fn on_progress(&self, _request_id: RequestId, _progress: &upkeep_history::Progress) {}
}

fn options() -> EngineOptions {
    EngineOptions {
        release_channel: "stable".into(),
        platform: "linux".into(),
        repository_url: "https://updates.example.invalid".into(),
        root_path: PathBuf::from("/opt/app"),
        user_data_path: None,
        current_os_arch: None,
        extra: IndexMap::new(),
    }
}

fn engine_answering_versions() -> InMemoryEngine {
    InMemoryEngine::new().with_responder(|_, _| {
        vec![json!({
            "VersionInfo": {
                "current_host": [1, 0, 9013],
                "current_modules": { "voice": 4, "rpc": 2 },
                "last_successful_update": null
            }
        })]
    })
}

fn service(engine: &InMemoryEngine, protocol: ProtocolVersion) -> VersionService {
    let channel = CommandChannel::connect(engine, &options(), Arc::new(NullSink));
    VersionService::new(Arc::new(channel), protocol)
}

async fn transmitted_query(protocol: ProtocolVersion, options: Option<Value>) -> Value {
    let engine = engine_answering_versions();
    service(&engine, protocol)
        .query_current_versions(options, None)
        .await
        .unwrap();
    engine.sent_values().remove(0)
}

#[tokio::test]
async fn protocol_one_sends_bare_tag() {
    assert_eq!(
        transmitted_query(ProtocolVersion::V1, None).await,
        json!([0, "QueryCurrentVersions"])
    );
    assert_eq!(
        transmitted_query(ProtocolVersion::V1, Some(json!({ "force": true }))).await,
        json!([0, "QueryCurrentVersions"])
    );
}

#[tokio::test]
async fn protocol_two_wraps_options() {
    assert_eq!(
        transmitted_query(ProtocolVersion::V2, None).await,
        json!([0, { "QueryCurrentVersions": { "options": null } }])
    );
    assert_eq!(
        transmitted_query(ProtocolVersion::V2, Some(json!({ "force": true }))).await,
        json!([0, { "QueryCurrentVersions": { "options": { "force": true } } }])
    );
}

#[tokio::test]
async fn query_decodes_version_set() {
    let engine = engine_answering_versions();
    let versions = service(&engine, ProtocolVersion::V2)
        .query_current_versions(None, None)
        .await
        .unwrap();
    assert_eq!(versions.current_host, HostVersion::new(vec![1, 0, 9013]));
    assert_eq!(
        versions.current_modules.iter().collect::<Vec<_>>(),
        vec![(&"voice".to_owned(), &4), (&"rpc".to_owned(), &2)]
    );
    assert!(versions.last_successful_update.is_none());
}

#[tokio::test]
async fn unexpected_reply_is_an_error() {
    let engine = InMemoryEngine::new().with_responder(|_, _| vec![json!("Ok")]);
    let result = service(&engine, ProtocolVersion::V1)
        .query_current_versions(None, None)
        .await;
    assert!(matches!(
        result,
        Err(upkeep_engine::ChannelError::UnexpectedReply(_))
    ));
}

#[test]
fn manifests_use_matching_primitives() {
    let engine = InMemoryEngine::new();
    let service = service(&engine, ProtocolVersion::V1);
    service
        .set_running_manifest(&VersionManifest::default())
        .unwrap();
    service
        .set_pinned_manifest_sync(&VersionManifest::new("1.0.9012"))
        .unwrap();
    service.query_current_versions_blocking(None).unwrap();

    assert_eq!(
        engine.sent_values(),
        vec![json!([0, { "SetManifests": ["Running", { "version": "0.0.0" }] }])]
    );
    assert_eq!(
        engine.blocking_values(),
        vec![
            json!([1, { "SetManifests": ["Pinned", { "version": "1.0.9012" }] }]),
            json!([2, "QueryCurrentVersions"])
        ]
    );
}

#[test]
fn later_modules_and_later_commits_take_priority() {
    let search_path = ModuleSearchPath::new();
    let host_dir = Path::new("/opt/app/app-1.0.9013");

    let first = VersionSet {
        current_host: HostVersion::new(vec![1, 0, 9013]),
        current_modules: IndexMap::from([("core".to_owned(), 9)]),
        last_successful_update: None,
    };
    VersionService::register_modules(&search_path, host_dir, "modules", &first);

    let second = VersionSet {
        current_modules: IndexMap::from([("A".to_owned(), 1), ("B".to_owned(), 2)]),
        ..first
    };
    let registered = VersionService::register_modules(&search_path, host_dir, "modules", &second);

    assert_eq!(
        registered,
        vec![host_dir.join("modules/A-1"), host_dir.join("modules/B-2")]
    );
    assert_eq!(
        search_path.entries(),
        vec![
            host_dir.join("modules/B-2"),
            host_dir.join("modules/A-1"),
            host_dir.join("modules/core-9"),
        ]
    );
}
