//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Primary orchestration and lifecycle management."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{info, warn};
use upkeep_common::AppConfig;
use upkeep_engine::EngineLoader;
use upkeep_history::UpdaterMetrics;

use crate::transition::{HostProcess, SystemProcess};
use crate::updater::{Updater, UpdaterSettings};

static INSTANCE: Lazy<RwLock<Option<Arc<Updater>>>> = Lazy::new(|| RwLock::new(None));

/// Build an updater from `config` and publish it as the process-wide instance.
///
/// Returns whether the published updater is valid. Without a configured
/// install root nothing is published and `false` is returned. A later call
/// replaces the previous instance.
pub fn install_updater(
    config: &AppConfig,
    loader: &dyn EngineLoader,
    process: Arc<dyn HostProcess>,
    metrics: Option<UpdaterMetrics>,
) -> bool {
    let Some(settings) = UpdaterSettings::from_config(config) else {
        warn!("no install root configured; updater disabled");
        return false;
    };
    let updater = Arc::new(Updater::new(settings, loader, process, metrics));
    let valid = updater.is_valid();
    *INSTANCE.write() = Some(updater);
    info!(valid, "process updater installed");
    valid
}

/// [`install_updater`] for the running process.
pub fn try_init_updater(config: &AppConfig, loader: &dyn EngineLoader) -> bool {
    install_updater(config, loader, Arc::new(SystemProcess::new()), None)
}

/// The process-wide updater, when one is installed and valid.
pub fn get_updater() -> Option<Arc<Updater>> {
    INSTANCE
        .read()
        .as_ref()
        .filter(|updater| updater.is_valid())
        .cloned()
}
