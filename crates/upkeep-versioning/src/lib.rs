//! ---
//! upkeep_section: "04-versioning"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Version queries, manifests, and module search path."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Version data reported by the engine, the service that queries and
//! designates versions, and the ordered module search path fed by commits.

pub mod model;
pub mod search_path;
pub mod service;

pub use model::{HostVersion, VersionManifest, VersionSet, DEFAULT_MANIFEST_VERSION};
pub use search_path::ModuleSearchPath;
pub use service::{host_path, module_path, VersionService};
pub use upkeep_engine::ManifestKind;
