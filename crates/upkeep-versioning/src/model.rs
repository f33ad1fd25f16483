//! ---
//! upkeep_section: "04-versioning"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Version queries, manifests, and module search path."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version reported when the engine knows of no successful update.
pub const DEFAULT_MANIFEST_VERSION: &str = "0.0.0";

/// Host version tuple, rendered dot-joined (`1.0.9013`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostVersion(pub Vec<u32>);

impl HostVersion {
    /// Construct from tuple components.
    pub fn new(parts: impl Into<Vec<u32>>) -> Self {
        Self(parts.into())
    }

    /// Tuple components.
    pub fn parts(&self) -> &[u32] {
        &self.0
    }
}

impl fmt::Display for HostVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for HostVersion {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('.')
            .map(str::parse::<u32>)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

/// Manifest naming a committed version. Fields beyond `version` are kept opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionManifest {
    /// Version identifier.
    pub version: String,
    /// Engine-defined fields carried through unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VersionManifest {
    /// Manifest carrying only a version identifier.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            extra: Map::new(),
        }
    }
}

impl Default for VersionManifest {
    fn default() -> Self {
        Self::new(DEFAULT_MANIFEST_VERSION)
    }
}

/// Versions the engine considers current.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSet {
    /// Committed host version.
    pub current_host: HostVersion,
    /// Module versions in engine order.
    #[serde(default)]
    pub current_modules: IndexMap<String, u64>,
    /// Manifest of the last update that completed.
    #[serde(default)]
    pub last_successful_update: Option<VersionManifest>,
}

impl VersionSet {
    /// Manifest to report as running, defaulting to `0.0.0`.
    pub fn running_manifest(&self) -> VersionManifest {
        self.last_successful_update.clone().unwrap_or_default()
    }
}
