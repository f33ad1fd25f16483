//! ---
//! upkeep_section: "05-operator-interfaces"
//! upkeep_subsection: "binary"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Control CLI for operators driving the update engine."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;
use tokio::runtime::Runtime;
use tracing::info;
use upkeep_common::{init_tracing, AppConfig, LoadedAppConfig};
use upkeep_core::{HostProcess, StartOptions, StartOutcome, Updater, UpdaterSettings};
use upkeep_engine::{CommandBody, ProcessLoader, ProgressCallback, ProtocolVersion};
use upkeep_history::{replay_journal, HistoryJournal, Progress};
use upkeep_versioning::VersionManifest;

const DEFAULT_CONFIG_CANDIDATES: [&str; 2] = ["upkeep.toml", "configs/upkeep.example.toml"];

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the startup sequence for a host executable and report the outcome.
    Start(StartArgs),
    /// Print the engine's current version set.
    Versions(OptionsArg),
    /// Verify and repair installed artifacts.
    Repair(OptionsArg),
    /// Delete artifacts no longer referenced by any manifest.
    Gc,
    /// Install a module.
    Install {
        /// Module name.
        name: String,
        #[command(flatten)]
        options: OptionsArg,
    },
    /// Update the host and modules to the latest release.
    Update(OptionsArg),
    /// Pin a manifest version.
    Pin {
        /// Version recorded in the pinned manifest.
        version: String,
    },
    /// Replay the persisted update history journal.
    History {
        /// Journal file; defaults to `history.journal_path`.
        #[arg(long, value_name = "FILE")]
        journal: Option<PathBuf>,
    },
    /// Resolve a well-known folder through the engine binding.
    Folder {
        /// Folder name such as `desktop` or `start_menu`.
        name: String,
    },
    /// Print the protocol version detected from the configured engine binary.
    Protocol,
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Host executable to settle; defaults to this binary.
    #[arg(long, value_name = "FILE")]
    exe: Option<PathBuf>,
    /// Keep running an obsolete host instead of restarting.
    #[arg(long)]
    allow_obsolete_host: bool,
}

#[derive(Debug, Args)]
pub struct OptionsArg {
    /// JSON options forwarded with the command.
    #[arg(long, value_name = "JSON")]
    options: Option<String>,
}

impl OptionsArg {
    fn parse(&self) -> Result<Option<Value>> {
        self.options
            .as_deref()
            .map(|raw| serde_json::from_str(raw).context("--options must be valid JSON"))
            .transpose()
    }
}

/// Reports the restart decision instead of replacing the CLI process.
struct ReportingProcess {
    exe: PathBuf,
}

impl HostProcess for ReportingProcess {
    fn current_exe(&self) -> io::Result<PathBuf> {
        Ok(self.exe.clone())
    }

    fn relaunch_on_exit(&self, target: &Path) {
        info!(target = %target.display(), "host relaunch requested");
    }

    fn exit(&self) {}
}

/// Execute the supplied command.
pub fn run(command: Command, config_path: Option<PathBuf>) -> Result<()> {
    let LoadedAppConfig { config, source } = load_config(config_path)?;
    init_tracing("upkeepctl", &config.logging)?;
    info!(config = %source.display(), "configuration loaded");

    match command {
        Command::Protocol => {
            println!("{}", ProtocolVersion::detect(&config.engine.binary_path));
            Ok(())
        }
        Command::History { journal } => {
            let path = journal
                .or_else(|| config.history.journal_path.clone())
                .ok_or_else(|| anyhow!("no journal given and history.journal_path is unset"))?;
            print_history(&path)
        }
        command => run_with_engine(command, &config),
    }
}

fn load_config(explicit: Option<PathBuf>) -> Result<LoadedAppConfig> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path);
    }
    candidates.extend(DEFAULT_CONFIG_CANDIDATES.iter().map(PathBuf::from));
    AppConfig::load_with_source(&candidates)
}

fn connect(config: &AppConfig, exe: PathBuf) -> Result<Updater> {
    let settings = UpdaterSettings::from_config(config)
        .ok_or_else(|| anyhow!("engine.root_path must be configured"))?;
    let loader = ProcessLoader::new(config.engine.binary_path.clone());
    let updater = Updater::new(settings, &loader, Arc::new(ReportingProcess { exe }), None);
    if !updater.is_valid() {
        bail!(
            "update engine {} is unavailable",
            config.engine.binary_path.display()
        );
    }
    Ok(updater)
}

fn run_with_engine(command: Command, config: &AppConfig) -> Result<()> {
    let exe = match &command {
        Command::Start(StartArgs { exe: Some(exe), .. }) => exe.clone(),
        _ => std::env::current_exe()?,
    };
    let updater = connect(config, exe)?;
    let runtime = Runtime::new()?;

    match command {
        Command::Start(args) => {
            let options = StartOptions {
                allow_obsolete_host: args.allow_obsolete_host || config.host.allow_obsolete_host,
            };
            match runtime.block_on(updater.start_current_version(None, options)) {
                StartOutcome::Committed { host, modules } => {
                    println!("Host {host} committed");
                    for module in modules {
                        println!("  {}", module.display());
                    }
                }
                StartOutcome::Restarting { expected } => {
                    println!("Restart required into {}", expected.display());
                }
                StartOutcome::Degraded(err) => println!("Startup degraded: {err}"),
            }
        }
        Command::Versions(options) => {
            let versions = runtime.block_on(updater.query_current_versions(options.parse()?))?;
            println!("{}", serde_json::to_string_pretty(&versions)?);
        }
        Command::Repair(options) => {
            let body = CommandBody::Repair {
                options: options.parse()?,
            };
            await_command(&updater, &runtime, body)?;
        }
        Command::Gc => await_command(&updater, &runtime, CommandBody::CollectGarbage)?,
        Command::Install { name, options } => {
            let body = CommandBody::InstallModule {
                name,
                options: options.parse()?,
            };
            await_command(&updater, &runtime, body)?;
        }
        Command::Update(options) => {
            let body = CommandBody::UpdateToLatest {
                options: options.parse()?,
            };
            await_command(&updater, &runtime, body)?;
        }
        Command::Pin { version } => {
            let request_id = updater.set_pinned_manifest_sync(&VersionManifest::new(version))?;
            println!("Pinned manifest sent as request {request_id}");
        }
        Command::Folder { name } => {
            println!("{}", updater.known_folder(&name)?.display());
        }
        Command::Protocol | Command::History { .. } => {}
    }

    persist_history(&updater, config)
}

fn await_command(updater: &Updater, runtime: &Runtime, body: CommandBody) -> Result<()> {
    let printer: ProgressCallback = Arc::new(|progress: &Progress| {
        let name = progress.task.module_name().unwrap_or("?");
        match progress.percent {
            Some(percent) => println!("{name}: {:?} {percent:.1}%", progress.state),
            None => println!(
                "{name}: {:?} {} bytes",
                progress.state, progress.bytes_processed
            ),
        }
    });
    let reply = runtime.block_on(updater.request(body, Some(printer)))?;
    println!("Engine replied: {reply:?}");
    Ok(())
}

fn persist_history(updater: &Updater, config: &AppConfig) -> Result<()> {
    let Some(path) = &config.history.journal_path else {
        return Ok(());
    };
    let mut journal = HistoryJournal::open(path)
        .with_context(|| format!("unable to open history journal {}", path.display()))?;
    let written = updater.persist_history(&mut journal)?;
    info!(journal = %path.display(), written, "update history persisted");
    Ok(())
}

fn print_history(path: &Path) -> Result<()> {
    let count = replay_journal(path, |entry| {
        println!(
            "{:>6} {} {:<20} {}",
            entry.sequence,
            entry.recorded_at.to_rfc3339(),
            entry.event.kind(),
            entry.event.name()
        );
        Ok(())
    })
    .with_context(|| format!("unable to replay history journal {}", path.display()))?;
    println!("{count} entries");
    Ok(())
}
