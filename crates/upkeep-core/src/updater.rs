//! ---
//! upkeep_section: "01-core-functionality"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Primary orchestration and lifecycle management."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use upkeep_common::{AppConfig, HostConfig};
use upkeep_engine::{
    CommandBody, CommandChannel, EngineFault, EngineLoader, EngineOptions, EngineReply,
    ProgressCallback, ProtocolVersion, RequestId, ResponseSink, ShortcutOptions,
};
use upkeep_history::{
    EventHistory, EventRecord, HistorySink, Progress, ProgressTracker, Task, TaskState,
    UpdaterMetrics,
};
use upkeep_logging::{log_lifecycle_event, upkeep_warn, LifecycleOutcome, LogContext};
use upkeep_versioning::{
    host_path, HostVersion, ModuleSearchPath, VersionManifest, VersionService, VersionSet,
};

use crate::error::{Result, UpdaterError};
use crate::transition::{HostProcess, HostState, HostTransitionController};

const NOTICE_CAPACITY: usize = 64;
const QUERY_COMMAND: &str = "QueryCurrentVersions";
const MANIFEST_COMMAND: &str = "SetManifests";

/// Out-of-band notifications derived from engine responses.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdaterNotice {
    /// A host install task completed.
    HostUpdated,
    /// The engine reported an installer state it cannot reconcile.
    InconsistentInstallerState(EngineFault),
    /// Any other engine error.
    UpdateError(EngineFault),
    /// A response that could not be decoded or routed.
    UnhandledResponse(String),
}

/// Everything needed to build an [`Updater`].
#[derive(Debug, Clone)]
pub struct UpdaterSettings {
    /// Options handed to the engine binding.
    pub engine: EngineOptions,
    /// Command protocol spoken by the engine.
    pub protocol: ProtocolVersion,
    /// Host layout and transition policy.
    pub host: HostConfig,
    /// Bound on the startup version query.
    pub query_timeout: Duration,
}

impl UpdaterSettings {
    /// Derive settings from configuration, detecting the engine protocol from its binary.
    ///
    /// Returns `None` when no install root is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let engine = EngineOptions::from_config(&config.engine)?;
        let protocol = ProtocolVersion::detect(&config.engine.binary_path);
        info!(protocol = %protocol, "determined engine protocol version");
        Some(Self {
            engine,
            protocol,
            host: config.host.clone(),
            query_timeout: config.query.timeout,
        })
    }
}

/// Options for [`Updater::start_current_version`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Keep running even when a newer host is committed.
    pub allow_obsolete_host: bool,
}

impl From<&HostConfig> for StartOptions {
    fn from(config: &HostConfig) -> Self {
        Self {
            allow_obsolete_host: config.allow_obsolete_host,
        }
    }
}

/// Result of the startup sequence. Startup never fails outright.
#[derive(Debug)]
pub enum StartOutcome {
    /// The committed host is running; module paths were registered.
    Committed {
        /// Committed host version.
        host: HostVersion,
        /// Module paths registered, in registration order.
        modules: Vec<PathBuf>,
    },
    /// A relaunch of the committed host was scheduled and exit requested.
    Restarting {
        /// Executable that will be launched.
        expected: PathBuf,
    },
    /// Startup continued without completing the update check.
    Degraded(UpdaterError),
}

/// Classifies progress into the history and publishes notices.
struct UpdateEvents {
    history: EventHistory,
    tracker: Mutex<ProgressTracker>,
    notices: broadcast::Sender<UpdaterNotice>,
    metrics: Option<UpdaterMetrics>,
}

impl UpdateEvents {
    fn notify(&self, notice: UpdaterNotice) {
        // No subscribers is not an error.
        let _ = self.notices.send(notice);
    }
}

impl ResponseSink for UpdateEvents {
    fn on_progress(&self, request_id: RequestId, progress: &Progress) {
        {
            let mut tracker = self.tracker.lock();
            if let Some(record) = tracker.classify(progress) {
                debug!(request_id, kind = record.kind(), name = record.name(), "update history event");
                if let Some(metrics) = &self.metrics {
                    metrics.record_event(&record);
                }
                self.history.record(record);
            }
        }

        if matches!(progress.task, Task::HostInstall { .. }) && progress.state == TaskState::Complete
        {
            info!(request_id, "host update installed");
            self.notify(UpdaterNotice::HostUpdated);
        }
    }

    fn on_reply(&self, request_id: RequestId, reply: &EngineReply) {
        if let EngineReply::Error(fault) = reply {
            let ctx = LogContext::new().with_request(request_id);
            upkeep_warn!(context = ctx, "engine reported error: {}", fault);
            if fault.is_inconsistent_installer_state() {
                self.notify(UpdaterNotice::InconsistentInstallerState(fault.clone()));
            } else {
                self.notify(UpdaterNotice::UpdateError(fault.clone()));
            }
        }
    }

    fn on_unhandled(&self, raw: &str) {
        self.notify(UpdaterNotice::UnhandledResponse(raw.to_owned()));
    }
}

/// Public entry point mediating between the application and the update engine.
pub struct Updater {
    channel: Arc<CommandChannel>,
    versions: VersionService,
    events: Arc<UpdateEvents>,
    transition: HostTransitionController,
    committed_host: OnceCell<HostVersion>,
    search_path: ModuleSearchPath,
    root_path: PathBuf,
    modules_dir: String,
    query_timeout: Duration,
    metrics: Option<UpdaterMetrics>,
}

impl Updater {
    /// Load the engine through `loader` and compose the updater.
    ///
    /// An engine that fails to load yields an updater whose [`Updater::is_valid`]
    /// is `false`; every engine operation then fails with `Unavailable`.
    pub fn new(
        settings: UpdaterSettings,
        loader: &dyn EngineLoader,
        process: Arc<dyn HostProcess>,
        metrics: Option<UpdaterMetrics>,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let events = Arc::new(UpdateEvents {
            history: EventHistory::new(),
            tracker: Mutex::new(ProgressTracker::new()),
            notices,
            metrics: metrics.clone(),
        });
        let sink: Arc<dyn ResponseSink> = events.clone();
        let channel = Arc::new(CommandChannel::connect(loader, &settings.engine, sink));
        let versions = VersionService::new(Arc::clone(&channel), settings.protocol);
        let root_path = settings.engine.root_path.clone();
        let transition = HostTransitionController::new(
            process,
            root_path.clone(),
            settings.host.package_path.clone(),
            metrics.clone(),
        );

        Self {
            channel,
            versions,
            events,
            transition,
            committed_host: OnceCell::new(),
            search_path: ModuleSearchPath::new(),
            root_path,
            modules_dir: settings.host.modules_dir,
            query_timeout: settings.query_timeout,
            metrics,
        }
    }

    /// Register modules into `search_path` instead of a private list.
    pub fn with_search_path(mut self, search_path: ModuleSearchPath) -> Self {
        self.search_path = search_path;
        self
    }

    /// Whether the engine binding initialised.
    pub fn is_valid(&self) -> bool {
        self.channel.is_valid()
    }

    /// Protocol revision used for version queries.
    pub fn protocol(&self) -> ProtocolVersion {
        self.versions.protocol()
    }

    /// Host version latched by the first successful version query.
    pub fn committed_host(&self) -> Option<&HostVersion> {
        self.committed_host.get()
    }

    /// Lifecycle state of the running host.
    pub fn host_state(&self) -> HostState {
        self.transition.state()
    }

    /// Module search path fed by module commits.
    pub fn search_path(&self) -> &ModuleSearchPath {
        &self.search_path
    }

    /// Receive notices published from engine responses.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdaterNotice> {
        self.events.notices.subscribe()
    }

    /// The underlying command channel, for callers that need the correlated tier.
    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    fn send(&self, body: CommandBody, progress: Option<ProgressCallback>) -> Result<RequestId> {
        let request_id = self.channel.send(&body, progress)?;
        self.count(body.name());
        Ok(request_id)
    }

    fn count(&self, command: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_command(command);
        }
    }

    /// Ask the engine to verify and repair installed artifacts.
    pub fn repair(
        &self,
        options: Option<Value>,
        progress: Option<ProgressCallback>,
    ) -> Result<RequestId> {
        self.send(CommandBody::Repair { options }, progress)
    }

    /// Ask the engine to delete unreferenced artifacts.
    pub fn collect_garbage(&self) -> Result<RequestId> {
        self.send(CommandBody::CollectGarbage, None)
    }

    /// Ask the engine to install `name`.
    pub fn install_module(
        &self,
        name: &str,
        options: Option<Value>,
        progress: Option<ProgressCallback>,
    ) -> Result<RequestId> {
        self.send(
            CommandBody::InstallModule {
                name: name.to_owned(),
                options,
            },
            progress,
        )
    }

    /// Ask the engine to update the host and modules to the latest release.
    pub fn update_to_latest(
        &self,
        options: Option<Value>,
        progress: Option<ProgressCallback>,
    ) -> Result<RequestId> {
        self.send(CommandBody::UpdateToLatest { options }, progress)
    }

    /// Send `body` and wait for the engine's terminal reply.
    pub async fn request(
        &self,
        body: CommandBody,
        progress: Option<ProgressCallback>,
    ) -> Result<EngineReply> {
        self.count(body.name());
        Ok(self.channel.request(&body, progress).await?)
    }

    /// Query the current versions, latching the host version on first success.
    pub async fn query_current_versions(&self, options: Option<Value>) -> Result<VersionSet> {
        self.count(QUERY_COMMAND);
        let versions = self.versions.query_current_versions(options, None).await?;
        if self.committed_host.set(versions.current_host.clone()).is_ok() {
            info!(host = %versions.current_host, "host version committed");
        }
        Ok(versions)
    }

    /// Send a version query over the blocking primitive; the answer arrives out of band.
    pub fn query_current_versions_blocking(&self, options: Option<Value>) -> Result<RequestId> {
        self.count(QUERY_COMMAND);
        Ok(self.versions.query_current_versions_blocking(options)?)
    }

    /// Designate `manifest` as running.
    pub fn set_running_manifest(&self, manifest: &VersionManifest) -> Result<RequestId> {
        let request_id = self.versions.set_running_manifest(manifest)?;
        self.count(MANIFEST_COMMAND);
        Ok(request_id)
    }

    /// Designate `manifest` as pinned without waiting for the engine.
    pub fn set_pinned_manifest_sync(&self, manifest: &VersionManifest) -> Result<RequestId> {
        let request_id = self.versions.set_pinned_manifest_sync(manifest)?;
        self.count(MANIFEST_COMMAND);
        Ok(request_id)
    }

    /// Query versions, designate the running manifest, and settle the host.
    ///
    /// Either restarts into the committed host or registers module paths for
    /// the running one. Failures are logged and reported as
    /// [`StartOutcome::Degraded`]; they never abort application startup.
    pub async fn start_current_version(
        &self,
        query_options: Option<Value>,
        options: StartOptions,
    ) -> StartOutcome {
        let ctx = LogContext::new().with_phase("startup");

        let versions = match tokio::time::timeout(
            self.query_timeout,
            self.query_current_versions(query_options),
        )
        .await
        {
            Ok(Ok(versions)) => versions,
            Ok(Err(err)) => return self.degrade_startup(&ctx, err.to_string()),
            Err(_) => {
                return self.degrade_startup(
                    &ctx,
                    format!("no reply within {}s", self.query_timeout.as_secs()),
                )
            }
        };

        let manifest = match &versions.last_successful_update {
            Some(manifest) => manifest.clone(),
            None => {
                upkeep_warn!(
                    context = ctx,
                    "engine reported no successful update; running manifest defaults to {}",
                    upkeep_versioning::DEFAULT_MANIFEST_VERSION
                );
                VersionManifest::default()
            }
        };
        if let Err(err) = self
            .set_running_manifest(&manifest)
            .and_then(|_| self.flush())
        {
            warn!(error = %err, "failed to designate running manifest");
        }

        let Some(host) = self.committed_host.get().cloned() else {
            return StartOutcome::Degraded(UpdaterError::NoHostCommitted);
        };

        match self.transition.transition(&host, options.allow_obsolete_host) {
            Ok(HostState::Restarting) => match self.transition.expected_executable(&host) {
                Ok(expected) => StartOutcome::Restarting { expected },
                Err(err) => StartOutcome::Degraded(err),
            },
            Ok(HostState::Stable) => {
                let modules = self.commit_modules_inner(&host, &versions);
                log_lifecycle_event(
                    Some(&ctx),
                    "host.commit",
                    &format!("running committed host {host}"),
                    LifecycleOutcome::Success,
                );
                StartOutcome::Committed { host, modules }
            }
            Err(err) => {
                error!(error = %err, "host transition failed; continuing on current host");
                StartOutcome::Degraded(err)
            }
        }
    }

    fn degrade_startup(&self, ctx: &LogContext, reason: String) -> StartOutcome {
        log_lifecycle_event(
            Some(ctx),
            "versions.query",
            &format!("version query failed: {reason}"),
            LifecycleOutcome::Fault,
        );
        if self.is_valid() {
            if let Err(err) = self
                .set_running_manifest(&VersionManifest::default())
                .and_then(|_| self.flush())
            {
                warn!(error = %err, "failed to designate default running manifest");
            }
        }
        StartOutcome::Degraded(UpdaterError::EngineQueryFailed(reason))
    }

    /// Register module search paths for the committed host.
    ///
    /// Uses `versions` when given, otherwise queries the engine. Fails with
    /// [`UpdaterError::NoHostCommitted`] before any successful version query.
    pub async fn commit_modules(
        &self,
        query_options: Option<Value>,
        versions: Option<VersionSet>,
    ) -> Result<Vec<PathBuf>> {
        let host = self
            .committed_host
            .get()
            .cloned()
            .ok_or(UpdaterError::NoHostCommitted)?;
        let versions = match versions {
            Some(versions) => versions,
            None => self.query_current_versions(query_options).await?,
        };
        Ok(self.commit_modules_inner(&host, &versions))
    }

    fn commit_modules_inner(&self, host: &HostVersion, versions: &VersionSet) -> Vec<PathBuf> {
        let host_dir = host_path(&self.root_path, host);
        VersionService::register_modules(&self.search_path, &host_dir, &self.modules_dir, versions)
    }

    /// Wait until every fire-and-forget command has been handed to the engine.
    pub fn flush(&self) -> Result<()> {
        Ok(self.channel.flush()?)
    }

    /// Drain the update history accumulated since the previous call.
    pub fn query_and_truncate_history(&self) -> Vec<EventRecord> {
        self.events.history.drain()
    }

    /// Drain the update history into `sink`, returning the number of records stored.
    ///
    /// When the sink fails, the record it rejected and every record after it
    /// go back into the history ahead of anything recorded meanwhile.
    pub fn persist_history(&self, sink: &mut dyn HistorySink) -> Result<usize> {
        let mut drained = self.query_and_truncate_history().into_iter();
        let mut stored = 0usize;
        while let Some(event) = drained.next() {
            if let Err(err) = sink.store(&event) {
                let mut undelivered = vec![event];
                undelivered.extend(drained);
                warn!(
                    stored,
                    kept = undelivered.len(),
                    error = %err,
                    "history sink failed; undelivered records kept"
                );
                self.events.history.restore(undelivered);
                return Err(err.into());
            }
            stored += 1;
        }
        Ok(stored)
    }

    /// Resolve a well-known folder through the engine binding.
    pub fn known_folder(&self, name: &str) -> Result<PathBuf> {
        Ok(self.channel.known_folder(name)?)
    }

    /// Create a shortcut through the engine binding.
    pub fn create_shortcut(&self, options: &ShortcutOptions) -> Result<bool> {
        Ok(self.channel.create_shortcut(options)?)
    }

    /// Install root holding the host directories.
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }
}
