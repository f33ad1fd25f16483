//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Primary orchestration and lifecycle management."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use upkeep_engine::ChannelError;
use upkeep_history::HistoryError;

/// Result alias for updater operations.
pub type Result<T> = std::result::Result<T, UpdaterError>;

/// Errors surfaced by the updater facade.
#[derive(Debug, thiserror::Error)]
pub enum UpdaterError {
    /// Command channel failure, including an unavailable engine.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// Module commit attempted before any version query succeeded.
    #[error("no host version committed; query current versions first")]
    NoHostCommitted,
    /// The startup version query did not produce a version set.
    #[error("engine version query failed: {0}")]
    EngineQueryFailed(String),
    /// Backing up or replacing the application package failed.
    #[error("failed to back up and replace application package: {0}")]
    BackupSwapFailed(String),
    /// Filesystem or process inspection failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// History journal failure.
    #[error(transparent)]
    History(#[from] HistoryError),
}
