//! ---
//! upkeep_section: "04-versioning"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Version queries, manifests, and module search path."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};
use upkeep_engine::{
    ChannelError, CommandBody, CommandChannel, EngineReply, ManifestKind, ProgressCallback,
    ProtocolVersion, RequestId, Result,
};

use crate::model::{HostVersion, VersionManifest, VersionSet};
use crate::search_path::ModuleSearchPath;

/// Directory holding the host package for `version` under the install root.
pub fn host_path(root: &Path, version: &HostVersion) -> PathBuf {
    root.join(format!("app-{version}"))
}

/// Directory of one module version inside a host directory.
pub fn module_path(host_dir: &Path, modules_dir: &str, name: &str, version: u64) -> PathBuf {
    host_dir.join(modules_dir).join(format!("{name}-{version}"))
}

/// Queries and designates versions through the command channel.
#[derive(Clone)]
pub struct VersionService {
    channel: Arc<CommandChannel>,
    protocol: ProtocolVersion,
}

impl VersionService {
    /// Service speaking `protocol` over `channel`.
    pub fn new(channel: Arc<CommandChannel>, protocol: ProtocolVersion) -> Self {
        Self { channel, protocol }
    }

    /// Protocol revision used for version queries.
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Ask the engine for the current version set and wait for its answer.
    pub async fn query_current_versions(
        &self,
        options: Option<Value>,
        progress: Option<ProgressCallback>,
    ) -> Result<VersionSet> {
        let body = CommandBody::query_current_versions(self.protocol, options);
        match self.channel.request(&body, progress).await? {
            EngineReply::VersionInfo(raw) => {
                let versions: VersionSet = serde_json::from_value(raw).map_err(|err| {
                    ChannelError::UnexpectedReply(format!("version info: {err}"))
                })?;
                debug!(host = %versions.current_host, modules = versions.current_modules.len(), "current versions received");
                Ok(versions)
            }
            other => Err(ChannelError::UnexpectedReply(format!(
                "expected VersionInfo, received {other:?}"
            ))),
        }
    }

    /// Send a version query over the blocking primitive. The answer arrives out of band.
    pub fn query_current_versions_blocking(&self, options: Option<Value>) -> Result<RequestId> {
        let body = CommandBody::query_current_versions(self.protocol, options);
        self.channel.send_blocking(&body)
    }

    /// Designate `manifest` as running. Resolves on transmission.
    pub fn set_running_manifest(&self, manifest: &VersionManifest) -> Result<RequestId> {
        let body = CommandBody::SetManifests(ManifestKind::Running, serde_json::to_value(manifest)?);
        self.channel.send(&body, None)
    }

    /// Designate `manifest` as pinned over the blocking primitive.
    ///
    /// Returns once the transport call returns, without an engine acknowledgement.
    pub fn set_pinned_manifest_sync(&self, manifest: &VersionManifest) -> Result<RequestId> {
        let body = CommandBody::SetManifests(ManifestKind::Pinned, serde_json::to_value(manifest)?);
        self.channel.send_blocking(&body)
    }

    /// Register one search path entry per module, in map order, each at the front.
    ///
    /// The last module of `versions` ends up with the highest priority, ahead of
    /// anything registered by earlier calls. Returns the paths in registration order.
    pub fn register_modules(
        search_path: &ModuleSearchPath,
        host_dir: &Path,
        modules_dir: &str,
        versions: &VersionSet,
    ) -> Vec<PathBuf> {
        let registered: Vec<PathBuf> = versions
            .current_modules
            .iter()
            .map(|(name, version)| {
                let path = module_path(host_dir, modules_dir, name, *version);
                search_path.push_front(path.clone());
                path
            })
            .collect();
        info!(host_dir = %host_dir.display(), modules = registered.len(), "module search paths registered");
        registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_path_joins_dotted_version() {
        let path = host_path(Path::new("/opt/app"), &HostVersion::new(vec![1, 0, 9013]));
        assert_eq!(path, PathBuf::from("/opt/app/app-1.0.9013"));
        assert_eq!(
            module_path(&path, "modules", "voice", 3),
            PathBuf::from("/opt/app/app-1.0.9013/modules/voice-3")
        );
    }
}
