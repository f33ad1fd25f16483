//! ---
//! upkeep_section: "02-engine-protocol"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update engine wire protocol and command channel."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use upkeep_common::EngineConfig;

use crate::Result;

/// Callback receiving every raw response line from the engine.
///
/// Bindings may invoke it from any thread.
pub type ResponseHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Process-local handle to the update engine.
pub trait EngineBinding: Send + Sync {
    /// Hand a serialized `[id, body]` payload to the engine without waiting.
    fn command(&self, payload: String) -> Result<()>;
    /// Hand a payload to the engine, returning once the transport call returns.
    fn command_blocking(&self, payload: String) -> Result<()>;
    /// Block until every payload accepted by [`EngineBinding::command`] has
    /// been written to the engine.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
    /// Resolve a well-known folder such as `desktop` or `start_menu`.
    fn known_folder(&self, name: &str) -> Result<PathBuf>;
    /// Create an application shortcut.
    fn create_shortcut(&self, options: &ShortcutOptions) -> Result<bool>;
    /// Binding name for logging.
    fn name(&self) -> &'static str;
}

/// Constructs engine bindings.
pub trait EngineLoader: Send + Sync {
    /// Build a binding that reports responses to `handler`.
    fn load(&self, options: &EngineOptions, handler: ResponseHandler)
        -> Result<Box<dyn EngineBinding>>;
}

/// Construction options handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Release channel to track.
    pub release_channel: String,
    /// Engine platform name (`win`, `osx`, `linux`).
    pub platform: String,
    /// Update repository base URL.
    pub repository_url: String,
    /// Installation root.
    pub root_path: PathBuf,
    /// Per-user data directory.
    pub user_data_path: Option<PathBuf>,
    /// Native architecture on Windows hosts.
    pub current_os_arch: Option<String>,
    /// Additional engine-specific options.
    #[serde(flatten)]
    pub extra: IndexMap<String, String>,
}

impl EngineOptions {
    /// Derive engine options from configuration. Returns `None` without a root path.
    pub fn from_config(config: &EngineConfig) -> Option<Self> {
        let root_path = config.root_path.clone()?;
        Some(Self {
            release_channel: config.release_channel.clone(),
            platform: config.platform.clone(),
            repository_url: config.repository_url.clone(),
            root_path,
            user_data_path: config.user_data_path.clone(),
            current_os_arch: config.current_os_arch.clone(),
            extra: config.extra.clone(),
        })
    }
}

/// Shortcut description understood by engine bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortcutOptions {
    /// Display name.
    pub name: String,
    /// Executable the shortcut launches.
    pub target_path: PathBuf,
    /// Arguments appended to the target.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Where to write the shortcut; bindings choose a default when absent.
    #[serde(default)]
    pub shortcut_path: Option<PathBuf>,
    /// Icon shown for the shortcut.
    #[serde(default)]
    pub icon_path: Option<PathBuf>,
    /// Tooltip or comment text.
    #[serde(default)]
    pub description: Option<String>,
    /// Working directory for the launched target.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_require_root_path() {
        let mut config = EngineConfig::default();
        assert!(EngineOptions::from_config(&config).is_none());

        config.root_path = Some(PathBuf::from("/opt/app"));
        config.extra.insert("install_id".into(), "abc".into());
        let options = EngineOptions::from_config(&config).unwrap();
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["root_path"], "/opt/app");
        assert_eq!(value["install_id"], "abc");
        assert_eq!(value["release_channel"], "stable");
    }
}
