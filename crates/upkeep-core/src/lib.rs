//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Primary orchestration and lifecycle management."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
//! Update orchestrator facade, host transition controller, and the
//! process-global updater instance.

pub mod error;
pub mod global;
pub mod transition;
pub mod updater;

pub use error::{Result, UpdaterError};
pub use global::{get_updater, install_updater, try_init_updater};
pub use transition::{
    decide, swap_packages, HostProcess, HostState, HostTransitionController, SystemProcess,
    TransitionDecision,
};
pub use updater::{StartOptions, StartOutcome, Updater, UpdaterNotice, UpdaterSettings};
