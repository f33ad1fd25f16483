//! ---
//! upkeep_section: "02-engine-protocol"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update engine wire protocol and command channel."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::Result;

/// Correlation id attached to every outgoing command.
pub type RequestId = u64;

/// Byte sequence present only in engine builds speaking protocol version 2.
pub const ARCHITECTURE_TRANSITION_MARKER: &[u8] = b"Determined this is an architecture transition";

/// Command protocol revision spoken by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Version queries are sent as a bare tag.
    #[default]
    V1,
    /// Version queries carry an options payload.
    V2,
}

impl ProtocolVersion {
    /// Inspect the engine binary for the architecture-transition marker.
    ///
    /// An unreadable binary is treated as version 1.
    pub fn detect(binary: &Path) -> Self {
        match std::fs::read(binary) {
            Ok(bytes) => {
                let version = Self::detect_in(&bytes);
                debug!(binary = %binary.display(), protocol = %version, "detected engine protocol");
                version
            }
            Err(err) => {
                warn!(binary = %binary.display(), error = %err, "unable to inspect engine binary; assuming protocol 1");
                Self::V1
            }
        }
    }

    /// Inspect raw engine bytes for the marker.
    pub fn detect_in(bytes: &[u8]) -> Self {
        let marker = ARCHITECTURE_TRANSITION_MARKER;
        if bytes.windows(marker.len()).any(|window| window == marker) {
            Self::V2
        } else {
            Self::V1
        }
    }

    /// Numeric protocol revision.
    pub fn number(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Manifest designation tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestKind {
    /// What this process instance reports as active.
    Running,
    /// A held version, if any.
    Pinned,
}

/// Body of a command sent to the engine, encoded externally tagged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CommandBody {
    /// Protocol 1 version query.
    QueryCurrentVersions,
    /// Protocol 2 version query.
    #[serde(rename = "QueryCurrentVersions")]
    QueryCurrentVersionsWithOptions {
        /// Engine-defined query options.
        options: Option<Value>,
    },
    /// Verify and repair installed artifacts.
    Repair {
        /// Engine-defined options.
        options: Option<Value>,
    },
    /// Delete artifacts no longer referenced by any manifest.
    CollectGarbage,
    /// Designate a manifest as running or pinned.
    SetManifests(ManifestKind, Value),
    /// Install a named module.
    InstallModule {
        /// Module name.
        name: String,
        /// Engine-defined options.
        options: Option<Value>,
    },
    /// Update host and modules to the latest release.
    UpdateToLatest {
        /// Engine-defined options.
        options: Option<Value>,
    },
    /// Pre-encoded body for commands this build does not model.
    #[serde(untagged)]
    Other(Value),
}

impl CommandBody {
    /// Version query in the shape the given protocol expects.
    pub fn query_current_versions(protocol: ProtocolVersion, options: Option<Value>) -> Self {
        match protocol {
            ProtocolVersion::V1 => Self::QueryCurrentVersions,
            ProtocolVersion::V2 => Self::QueryCurrentVersionsWithOptions { options },
        }
    }

    /// Command name used for logging and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::QueryCurrentVersions | Self::QueryCurrentVersionsWithOptions { .. } => {
                "QueryCurrentVersions"
            }
            Self::Repair { .. } => "Repair",
            Self::CollectGarbage => "CollectGarbage",
            Self::SetManifests(..) => "SetManifests",
            Self::InstallModule { .. } => "InstallModule",
            Self::UpdateToLatest { .. } => "UpdateToLatest",
            Self::Other(_) => "Other",
        }
    }
}

/// Serialize `[request_id, body]` as expected by the engine.
pub fn encode_command(request_id: RequestId, body: &CommandBody) -> Result<String> {
    Ok(serde_json::to_string(&(request_id, body))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoded(body: CommandBody) -> Value {
        serde_json::from_str(&encode_command(3, &body).unwrap()).unwrap()
    }

    #[test]
    fn query_shape_depends_on_protocol() {
        assert_eq!(
            encoded(CommandBody::query_current_versions(ProtocolVersion::V1, None)),
            json!([3, "QueryCurrentVersions"])
        );
        assert_eq!(
            encoded(CommandBody::query_current_versions(
                ProtocolVersion::V1,
                Some(json!({ "channel": "canary" }))
            )),
            json!([3, "QueryCurrentVersions"])
        );
        assert_eq!(
            encoded(CommandBody::query_current_versions(ProtocolVersion::V2, None)),
            json!([3, { "QueryCurrentVersions": { "options": null } }])
        );
        assert_eq!(
            encoded(CommandBody::query_current_versions(
                ProtocolVersion::V2,
                Some(json!({ "channel": "canary" }))
            )),
            json!([3, { "QueryCurrentVersions": { "options": { "channel": "canary" } } }])
        );
    }

    #[test]
    fn command_bodies_match_engine_shapes() {
        assert_eq!(
            encoded(CommandBody::CollectGarbage),
            json!([3, "CollectGarbage"])
        );
        assert_eq!(
            encoded(CommandBody::SetManifests(
                ManifestKind::Pinned,
                json!({ "version": "1.0.0" })
            )),
            json!([3, { "SetManifests": ["Pinned", { "version": "1.0.0" }] }])
        );
        assert_eq!(
            encoded(CommandBody::InstallModule {
                name: "voice".into(),
                options: None
            }),
            json!([3, { "InstallModule": { "name": "voice", "options": null } }])
        );
        assert_eq!(
            encoded(CommandBody::Repair {
                options: Some(json!({ "deep": true }))
            }),
            json!([3, { "Repair": { "options": { "deep": true } } }])
        );
        assert_eq!(
            encoded(CommandBody::Other(json!({ "Ping": {} }))),
            json!([3, { "Ping": {} }])
        );
    }

    #[test]
    fn marker_detection() {
        let mut bytes = b"\x7fELF padding ".to_vec();
        assert_eq!(ProtocolVersion::detect_in(&bytes), ProtocolVersion::V1);
        bytes.extend_from_slice(ARCHITECTURE_TRANSITION_MARKER);
        bytes.extend_from_slice(b" trailing");
        assert_eq!(ProtocolVersion::detect_in(&bytes), ProtocolVersion::V2);
    }

    #[test]
    fn missing_binary_is_protocol_one() {
        let dir = tempfile::tempdir().unwrap();
        let version = ProtocolVersion::detect(&dir.path().join("absent"));
        assert_eq!(version, ProtocolVersion::V1);
    }
}
