//! ---
//! upkeep_section: "02-engine-protocol"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update engine wire protocol and command channel."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::binding::{EngineBinding, EngineLoader, EngineOptions, ResponseHandler, ShortcutOptions};
use crate::{ChannelError, Result};

/// Loads [`ProcessBinding`]s for a fixed engine executable.
#[derive(Debug, Clone)]
pub struct ProcessLoader {
    binary: PathBuf,
}

impl ProcessLoader {
    /// Loader spawning the engine at `binary`.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Engine executable path.
    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl EngineLoader for ProcessLoader {
    fn load(
        &self,
        options: &EngineOptions,
        handler: ResponseHandler,
    ) -> Result<Box<dyn EngineBinding>> {
        Ok(Box::new(ProcessBinding::spawn(&self.binary, options, handler)?))
    }
}

/// Longest wait for queued commands to reach the engine.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
/// Time the engine gets to exit on its own once its input is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct QueueState {
    pending: usize,
    closed: bool,
}

/// Count of commands queued for the writer thread but not yet written.
#[derive(Debug, Default)]
struct Outbox {
    state: Mutex<QueueState>,
    drained: Condvar,
}

impl Outbox {
    fn enqueue(&self) {
        self.state.lock().pending += 1;
    }

    fn written(&self) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.drained.notify_all();
        }
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.drained.notify_all();
    }

    fn wait_drained(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.pending > 0 && !state.closed {
            if self.drained.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        match state.pending {
            0 => Ok(()),
            pending if state.closed => Err(ChannelError::Transport(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("engine input closed with {pending} commands undelivered"),
            ))),
            pending => Err(ChannelError::Transport(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{pending} commands still queued for the engine"),
            ))),
        }
    }
}

type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;

fn write_line(stdin: &SharedStdin, line: &str) -> io::Result<()> {
    let mut guard = stdin.lock();
    let pipe = guard
        .as_mut()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine input closed"))?;
    writeln!(pipe, "{line}")?;
    pipe.flush()
}

/// Engine running as a child process speaking JSON lines over stdio.
///
/// The first stdin line carries the [`EngineOptions`]; every later line is a
/// command. Each stdout line is a response handed to the [`ResponseHandler`].
/// Dropping the binding delivers queued commands, closes the engine's input
/// and kills the engine only if it does not exit within a short grace period.
pub struct ProcessBinding {
    child: Mutex<Child>,
    stdin: SharedStdin,
    outbound: mpsc::UnboundedSender<String>,
    outbox: Arc<Outbox>,
}

impl ProcessBinding {
    /// Spawn the engine and start its writer and reader threads.
    pub fn spawn(binary: &Path, options: &EngineOptions, handler: ResponseHandler) -> Result<Self> {
        if !binary.is_file() {
            return Err(ChannelError::Unavailable(format!(
                "engine executable {} not found",
                binary.display()
            )));
        }

        let mut child = Command::new(binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| {
                ChannelError::Unavailable(format!("failed to start {}: {err}", binary.display()))
            })?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(ChannelError::Unavailable(
                "engine stdio pipes unavailable".into(),
            ));
        };

        let handshake = serde_json::to_string(options)?;
        if let Err(err) = writeln!(stdin, "{handshake}").and_then(|_| stdin.flush()) {
            let _ = child.kill();
            return Err(ChannelError::Unavailable(format!(
                "engine rejected construction options: {err}"
            )));
        }

        let stdin: SharedStdin = Arc::new(Mutex::new(Some(stdin)));
        let outbox = Arc::new(Outbox::default());
        let (outbound, mut rx) = mpsc::unbounded_channel::<String>();

        let writer_stdin = Arc::clone(&stdin);
        let writer_outbox = Arc::clone(&outbox);
        thread::Builder::new()
            .name("upkeep-engine-writer".into())
            .spawn(move || {
                while let Some(line) = rx.blocking_recv() {
                    if let Err(err) = write_line(&writer_stdin, &line) {
                        warn!(error = %err, "engine stdin closed; dropping queued commands");
                        break;
                    }
                    writer_outbox.written();
                }
                writer_outbox.close();
                debug!("engine writer stopped");
            })?;

        thread::Builder::new()
            .name("upkeep-engine-reader".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    match line {
                        Ok(line) if line.trim().is_empty() => continue,
                        Ok(line) => handler(line),
                        Err(err) => {
                            warn!(error = %err, "failed reading engine output");
                            break;
                        }
                    }
                }
                debug!("engine output closed");
            })?;

        info!(binary = %binary.display(), pid = child.id(), "update engine started");
        Ok(Self {
            child: Mutex::new(child),
            stdin,
            outbound,
            outbox,
        })
    }

    fn close_input(&self) {
        match self.stdin.try_lock_for(FLUSH_TIMEOUT) {
            Some(mut stdin) => drop(stdin.take()),
            None => warn!("engine input busy; closing by termination"),
        }
    }
}

impl EngineBinding for ProcessBinding {
    fn command(&self, payload: String) -> Result<()> {
        self.outbox.enqueue();
        self.outbound.send(payload).map_err(|_| {
            self.outbox.written();
            ChannelError::Transport(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "engine writer stopped",
            ))
        })
    }

    fn command_blocking(&self, payload: String) -> Result<()> {
        write_line(&self.stdin, &payload)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.outbox.wait_drained(FLUSH_TIMEOUT)
    }

    fn known_folder(&self, name: &str) -> Result<PathBuf> {
        resolve_known_folder(name)
    }

    fn create_shortcut(&self, options: &ShortcutOptions) -> Result<bool> {
        write_shortcut(options)
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

impl Drop for ProcessBinding {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(error = %err, "engine shut down with commands undelivered");
        }
        self.close_input();

        let mut child = self.child.lock();
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(%status, "update engine exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Ok(None) | Err(_) => break,
            }
        }
        warn!("update engine still running after its input closed; killing");
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Map a well-known folder name onto the platform directory.
pub fn resolve_known_folder(name: &str) -> Result<PathBuf> {
    let folder = match name {
        "home" => dirs::home_dir(),
        "desktop" => dirs::desktop_dir(),
        "documents" => dirs::document_dir(),
        "downloads" => dirs::download_dir(),
        "appdata" | "roaming_app_data" => dirs::data_dir(),
        "local_app_data" => dirs::data_local_dir(),
        "config" => dirs::config_dir(),
        "cache" => dirs::cache_dir(),
        "start_menu" => start_menu_dir(),
        other => {
            return Err(ChannelError::Unsupported(format!(
                "unknown folder {other}"
            )))
        }
    };
    folder.ok_or_else(|| ChannelError::Unsupported(format!("folder {name} not available")))
}

fn start_menu_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        dirs::data_dir().map(|dir| dir.join("Microsoft/Windows/Start Menu/Programs"))
    } else {
        dirs::data_dir().map(|dir| dir.join("applications"))
    }
}

#[cfg(unix)]
fn write_shortcut(options: &ShortcutOptions) -> Result<bool> {
    let path = match &options.shortcut_path {
        Some(path) => path.clone(),
        None => start_menu_dir()
            .ok_or_else(|| ChannelError::Unsupported("no applications directory".into()))?
            .join(format!("{}.desktop", desktop_file_stem(&options.name))),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, desktop_entry(options))?;
    debug!(shortcut = %path.display(), "desktop entry written");
    Ok(true)
}

#[cfg(not(unix))]
fn write_shortcut(_options: &ShortcutOptions) -> Result<bool> {
    Err(ChannelError::Unsupported(
        "shortcuts require the native engine on this platform".into(),
    ))
}

#[cfg_attr(not(unix), allow(dead_code))]
fn desktop_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg_attr(not(unix), allow(dead_code))]
fn desktop_entry(options: &ShortcutOptions) -> String {
    let mut exec = format!("\"{}\"", options.target_path.display());
    for arg in &options.arguments {
        exec.push(' ');
        exec.push_str(arg);
    }

    let mut entry = format!(
        "[Desktop Entry]\nType=Application\nName={}\nExec={}\n",
        options.name, exec
    );
    if let Some(icon) = &options.icon_path {
        entry.push_str(&format!("Icon={}\n", icon.display()));
    }
    if let Some(comment) = &options.description {
        entry.push_str(&format!("Comment={comment}\n"));
    }
    if let Some(dir) = &options.working_directory {
        entry.push_str(&format!("Path={}\n", dir.display()));
    }
    entry
}
