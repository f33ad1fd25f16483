//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Shared primitives and utilities for the updater runtime."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_engine_binary() -> PathBuf {
    PathBuf::from("updater")
}

fn default_release_channel() -> String {
    "stable".to_owned()
}

fn default_platform() -> String {
    match std::env::consts::OS {
        "windows" => "win",
        "macos" => "osx",
        other => other,
    }
    .to_owned()
}

fn default_os_arch() -> Option<String> {
    if !cfg!(windows) {
        return None;
    }
    // WOW64 processes report the native architecture through PROCESSOR_ARCHITEW6432.
    let arch = std::env::var("PROCESSOR_ARCHITEW6432")
        .or_else(|_| std::env::var("PROCESSOR_ARCHITECTURE"))
        .unwrap_or_default();
    let label = if matches!(arch.as_str(), "AMD64" | "IA64") {
        "x64"
    } else {
        "x86"
    };
    Some(label.to_owned())
}

fn default_package_path() -> PathBuf {
    PathBuf::from("resources/app.asar")
}

fn default_modules_dir() -> String {
    "modules".to_owned()
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the updater runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "UPKEEP_CONFIG";

    /// Load configuration from disk, respecting the `UPKEEP_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.host.validate()?;
        if self.query.timeout.is_zero() {
            return Err(anyhow!("query timeout must be greater than zero"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Location of the update engine and the options it is constructed with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the engine executable. Also scanned for protocol markers.
    #[serde(default = "default_engine_binary")]
    pub binary_path: PathBuf,
    #[serde(default = "default_release_channel")]
    pub release_channel: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub repository_url: String,
    /// Installation root holding the `app-<version>` host directories.
    #[serde(default)]
    pub root_path: Option<PathBuf>,
    #[serde(default)]
    pub user_data_path: Option<PathBuf>,
    #[serde(default = "default_os_arch")]
    pub current_os_arch: Option<String>,
    /// Extra key/value pairs forwarded verbatim to the engine.
    #[serde(default)]
    pub extra: IndexMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary_path: default_engine_binary(),
            release_channel: default_release_channel(),
            platform: default_platform(),
            repository_url: String::new(),
            root_path: None,
            user_data_path: None,
            current_os_arch: default_os_arch(),
            extra: IndexMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.release_channel.trim().is_empty() {
            return Err(anyhow!("engine.release_channel must not be empty"));
        }
        if let Some(root) = &self.root_path {
            if root.as_os_str().is_empty() {
                return Err(anyhow!("engine.root_path must not be empty when set"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Application package location relative to the executable's directory.
    #[serde(default = "default_package_path")]
    pub package_path: PathBuf,
    #[serde(default = "default_modules_dir")]
    pub modules_dir: String,
    #[serde(default)]
    pub allow_obsolete_host: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            package_path: default_package_path(),
            modules_dir: default_modules_dir(),
            allow_obsolete_host: false,
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<()> {
        if self.package_path.is_absolute() {
            return Err(anyhow!(
                "host.package_path {} must be relative to the executable directory",
                self.package_path.display()
            ));
        }
        if self.modules_dir.trim().is_empty() {
            return Err(anyhow!("host.modules_dir must not be empty"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_query_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout: default_query_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistoryConfig {
    /// JSON-lines journal receiving drained update history.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}
