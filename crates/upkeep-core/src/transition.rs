//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Primary orchestration and lifecycle management."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use path_absolutize::Absolutize;
use tracing::{error, info, warn};
use upkeep_history::UpdaterMetrics;
use upkeep_logging::{log_lifecycle_event, LifecycleOutcome, LogContext};
use upkeep_versioning::{host_path, HostVersion};

use crate::error::{Result, UpdaterError};

/// Process operations the host transition depends on.
pub trait HostProcess: Send + Sync {
    /// Path of the running executable.
    fn current_exe(&self) -> io::Result<PathBuf>;
    /// Launch `target` detached, with inherited stdio, when the process exits.
    fn relaunch_on_exit(&self, target: &Path);
    /// Terminate the process. Production implementations do not return.
    fn exit(&self);
}

/// [`HostProcess`] backed by the operating system.
#[derive(Debug, Default)]
pub struct SystemProcess {
    relaunch: OnceCell<PathBuf>,
}

impl SystemProcess {
    /// Process handle with no relaunch registered.
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn_detached(target: &Path) -> io::Result<()> {
        let mut command = Command::new(target);
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        command.spawn().map(|_| ())
    }
}

impl HostProcess for SystemProcess {
    fn current_exe(&self) -> io::Result<PathBuf> {
        std::env::current_exe()
    }

    fn relaunch_on_exit(&self, target: &Path) {
        if self.relaunch.set(target.to_path_buf()).is_err() {
            warn!(target = %target.display(), "relaunch already registered; ignoring");
        }
    }

    fn exit(&self) {
        if let Some(target) = self.relaunch.get() {
            if let Err(err) = Self::spawn_detached(target) {
                error!(target = %target.display(), error = %err, "failed to relaunch host");
            }
        }
        upkeep_common::shutdown_tracing();
        std::process::exit(0);
    }
}

/// Lifecycle of the running host. `Restarting` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// Running the committed host, or allowed to keep an obsolete one.
    Stable,
    /// A relaunch of the committed host has been scheduled and exit requested.
    Restarting,
}

/// Outcome of comparing the running executable with the committed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionDecision {
    /// Keep running this process.
    Stay,
    /// Replace this process with `expected`.
    Restart {
        /// Executable currently running.
        current: PathBuf,
        /// Executable of the committed host.
        expected: PathBuf,
    },
}

/// Decide whether the running executable must be replaced.
pub fn decide(current: &Path, expected: &Path, allow_obsolete_host: bool) -> TransitionDecision {
    let current = resolve(current);
    let expected = resolve(expected);
    if current == expected || allow_obsolete_host {
        TransitionDecision::Stay
    } else {
        TransitionDecision::Restart { current, expected }
    }
}

fn resolve(path: &Path) -> PathBuf {
    path.absolutize()
        .map(|resolved| resolved.into_owned())
        .unwrap_or_else(|_| path.to_path_buf())
}

fn backup_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".backup");
    PathBuf::from(name)
}

/// Copy `target` to a `.backup` sibling, then overwrite it with `current`.
///
/// The replacement is skipped when the backup fails.
pub fn swap_packages(current: &Path, target: &Path) -> Result<()> {
    let backup = backup_path(target);
    fs::copy(target, &backup).map_err(|err| {
        UpdaterError::BackupSwapFailed(format!(
            "backup of {} to {}: {err}",
            target.display(),
            backup.display()
        ))
    })?;
    fs::copy(current, target).map_err(|err| {
        UpdaterError::BackupSwapFailed(format!(
            "copy of {} over {}: {err}",
            current.display(),
            target.display()
        ))
    })?;
    Ok(())
}

/// Decides on and performs the self-replacing restart of the host.
pub struct HostTransitionController {
    process: Arc<dyn HostProcess>,
    root_path: PathBuf,
    package_path: PathBuf,
    state: Mutex<HostState>,
    metrics: Option<UpdaterMetrics>,
}

impl HostTransitionController {
    /// Controller for hosts installed under `root_path`, whose application
    /// package lives at `package_path` relative to the executable's directory.
    pub fn new(
        process: Arc<dyn HostProcess>,
        root_path: PathBuf,
        package_path: PathBuf,
        metrics: Option<UpdaterMetrics>,
    ) -> Self {
        Self {
            process,
            root_path,
            package_path,
            state: Mutex::new(HostState::Stable),
            metrics,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HostState {
        *self.state.lock()
    }

    /// Executable path inside the host directory for `host`.
    pub fn expected_executable(&self, host: &HostVersion) -> Result<PathBuf> {
        let current = self.process.current_exe()?;
        let file_name = current.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("executable path {} has no file name", current.display()),
            )
        })?;
        Ok(host_path(&self.root_path, host).join(file_name))
    }

    /// Compare the running executable with the one for `host`.
    pub fn plan(&self, host: &HostVersion, allow_obsolete_host: bool) -> Result<TransitionDecision> {
        let current = self.process.current_exe()?;
        let expected = self.expected_executable(host)?;
        Ok(decide(&current, &expected, allow_obsolete_host))
    }

    /// Restart into the executable for `host` when it is not the running one.
    ///
    /// On the restart path the target package is backed up and overwritten
    /// with the running package (best effort), the relaunch is registered, and
    /// exit is requested. The returned state is `Restarting` from then on.
    pub fn transition(&self, host: &HostVersion, allow_obsolete_host: bool) -> Result<HostState> {
        let mut state = self.state.lock();
        if *state == HostState::Restarting {
            return Ok(HostState::Restarting);
        }

        let (current, expected) = match self.plan(host, allow_obsolete_host)? {
            TransitionDecision::Stay => return Ok(HostState::Stable),
            TransitionDecision::Restart { current, expected } => (current, expected),
        };

        let current_package = package_beside(&current, &self.package_path);
        let target_package = package_beside(&expected, &self.package_path);
        if let Err(err) = swap_packages(&current_package, &target_package) {
            warn!(error = %err, "continuing host transition without package swap");
        }

        self.process.relaunch_on_exit(&expected);
        *state = HostState::Restarting;
        drop(state);

        if let Some(metrics) = &self.metrics {
            metrics.record_restart();
        }
        let version = host.to_string();
        log_lifecycle_event(
            Some(&LogContext::new().with_phase("host-transition").with_module(&version)),
            "host.restart",
            &format!("restarting into {}", expected.display()),
            LifecycleOutcome::Success,
        );
        info!(from = %current.display(), to = %expected.display(), "exiting for host restart");
        self.process.exit();
        Ok(HostState::Restarting)
    }
}

fn package_beside(executable: &Path, package_path: &Path) -> PathBuf {
    executable
        .parent()
        .map(|dir| dir.join(package_path))
        .unwrap_or_else(|| package_path.to_path_buf())
}
