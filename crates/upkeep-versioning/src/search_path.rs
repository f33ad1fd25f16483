//! ---
//! upkeep_section: "04-versioning"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Version queries, manifests, and module search path."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

/// Ordered module search path consulted by the host's module resolver.
///
/// Earlier entries win. Clones share the same list so the resolver and the
/// updater observe one another's changes.
#[derive(Debug, Clone, Default)]
pub struct ModuleSearchPath {
    entries: Arc<RwLock<VecDeque<PathBuf>>>,
}

impl ModuleSearchPath {
    /// Create an empty search path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `path` resolution priority over every existing entry.
    pub fn push_front(&self, path: impl Into<PathBuf>) {
        self.entries.write().push_front(path.into());
    }

    /// Append `path` with the lowest priority.
    pub fn push_back(&self, path: impl Into<PathBuf>) {
        self.entries.write().push_back(path.into());
    }

    /// Snapshot of the entries in priority order.
    pub fn entries(&self) -> Vec<PathBuf> {
        self.entries.read().iter().cloned().collect()
    }

    /// Whether `path` is registered.
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.read().iter().any(|entry| entry == path)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
