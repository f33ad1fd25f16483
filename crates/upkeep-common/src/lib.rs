//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Shared primitives and utilities for the updater runtime."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
//! Shared primitives for the upkeep workspace.
//! This crate exposes configuration loading, tracing bootstrap, and
//! version metadata utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    AppConfig, EngineConfig, HistoryConfig, HostConfig, LoadedAppConfig, LoggingConfig,
    QueryConfig,
};
pub use logging::{init_tracing, shutdown_tracing, LogFormat};
pub use version::VersionInfo;
