//! Companion script lifecycle: at most one child process at a time, output
//! captured to the script log, slot cleared whenever the child exits.
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::ScriptConfig;
use crate::output::{pipe_output, OutputCapture};
use crate::script_dir::ScriptDir;

/// Flag passed to the script when auto-restart is requested.
pub const AUTO_RESTART_FLAG: &str = "--auto-restart";

/// How long the exit watcher waits for buffered output after the child is reaped.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Most recent output returned by `status()`; the full text stays in the accumulator.
pub const STATUS_OUTPUT_TAIL: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("A script is already running. Please stop it first.")]
    AlreadyRunning,
    #[error("failed to install script {}: {source}", path.display())]
    ScriptSetup {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to open log {}: {source}", path.display())]
    LogSink {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to launch {interpreter}: {source}")]
    Launch {
        interpreter: String,
        source: std::io::Error,
    },
    #[error("failed to signal process {pid}: {source}")]
    Signal { pid: u32, source: std::io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Termination was sent to the process tree rooted at `pid`.
    Stopped { pid: u32 },
    NotRunning,
}

/// Point-in-time view of the slot. `output` is at most `STATUS_OUTPUT_TAIL` bytes.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub output: Option<String>,
}

struct RunningScript {
    /// Distinguishes this run from later ones so a late exit never clears a newer slot.
    id: u64,
    pid: u32,
    output: OutputCapture,
}

type Slot = Arc<Mutex<Option<RunningScript>>>;

/// Owns the single companion-script slot.
pub struct Supervisor {
    interpreter: String,
    source: PathBuf,
    dir: ScriptDir,
    slot: Slot,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new(config: &ScriptConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            source: config.source.clone(),
            dir: ScriptDir::from_config(config),
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn script_dir(&self) -> &ScriptDir {
        &self.dir
    }

    /// Launch the script if nothing is running. Returns the child pid.
    ///
    /// Returns as soon as the process is spawned; output arrives later through
    /// the reader tasks. A running script is never replaced.
    pub async fn start(&self, auto_restart: bool) -> Result<u32, SupervisorError> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }

        let installed = self
            .dir
            .ensure_script(&self.source)
            .map_err(|e| SupervisorError::ScriptSetup {
                path: self.dir.script(),
                source: e,
            })?;

        let log_path = self.dir.log();
        let output = OutputCapture::open(&log_path).map_err(|e| SupervisorError::LogSink {
            path: log_path.clone(),
            source: e,
        })?;

        let args = build_args(&self.dir.script(), auto_restart);
        tracing::info!(
            interpreter = %self.interpreter,
            args = ?args,
            installed,
            work_dir = %self.dir.root().display(),
            log = %log_path.display(),
            "launching companion script"
        );

        let mut child = spawn_script(&self.interpreter, &args).map_err(|e| {
            SupervisorError::Launch {
                interpreter: self.interpreter.clone(),
                source: e,
            }
        })?;

        let Some(pid) = child.id() else {
            return Err(SupervisorError::Launch {
                interpreter: self.interpreter.clone(),
                source: std::io::Error::other("process exited before its pid was read"),
            });
        };

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pipe_output(stdout, output.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pipe_output(stderr, output.clone())));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *slot = Some(RunningScript {
            id,
            pid,
            output: output.clone(),
        });

        tokio::spawn(watch_exit(
            child,
            id,
            pid,
            readers,
            output,
            Arc::clone(&self.slot),
        ));

        tracing::info!(pid, auto_restart, "companion script started");
        Ok(pid)
    }

    /// Signal the running script's process tree and free the slot without
    /// waiting for the process to die.
    ///
    /// If the signal cannot be delivered the slot is left as is; the exit
    /// watcher still clears it once the child is reaped.
    pub async fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        let mut slot = self.slot.lock().await;
        let pid = match slot.as_ref() {
            Some(running) => running.pid,
            None => return Ok(StopOutcome::NotRunning),
        };

        signal_tree(pid)?;

        if let Some(running) = slot.take() {
            running.output.close().await;
        }
        tracing::info!(pid, "termination sent to companion script");
        Ok(StopOutcome::Stopped { pid })
    }

    pub async fn is_running(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub async fn status(&self) -> ScriptStatus {
        let slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(running) => ScriptStatus {
                running: true,
                pid: Some(running.pid),
                output: Some(running.output.tail(STATUS_OUTPUT_TAIL).await),
            },
            None => ScriptStatus {
                running: false,
                pid: None,
                output: None,
            },
        }
    }

    /// Occupy the slot with an already-running process that this supervisor did not spawn.
    #[cfg(test)]
    pub(crate) async fn track_pid(&self, pid: u32) -> std::io::Result<()> {
        std::fs::create_dir_all(self.dir.root())?;
        let output = OutputCapture::open(&self.dir.log())?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.slot.lock().await = Some(RunningScript { id, pid, output });
        Ok(())
    }

    /// Contents of the packaged script, or None if it does not exist.
    pub async fn script_source(&self) -> std::io::Result<Option<String>> {
        match tokio::fs::read_to_string(&self.source).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Interpreter arguments: the script path, then the optional auto-restart flag.
fn build_args(script: &Path, auto_restart: bool) -> Vec<OsString> {
    let mut args = vec![script.as_os_str().to_os_string()];
    if auto_restart {
        args.push(AUTO_RESTART_FLAG.into());
    }
    args
}

fn spawn_script(interpreter: &str, args: &[OsString]) -> std::io::Result<Child> {
    let mut cmd = Command::new(interpreter);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0); // New process group so stop() reaches descendants
    cmd.spawn()
}

/// Reap the child, drain its output, then close the log and free the slot.
/// Runs for every exit, whatever the exit code.
async fn watch_exit(
    mut child: Child,
    id: u64,
    pid: u32,
    readers: Vec<JoinHandle<()>>,
    output: OutputCapture,
    slot: Slot,
) {
    let status = child.wait().await;

    for reader in readers {
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
            tracing::debug!(pid, "script output still open after exit, not waiting");
        }
    }

    {
        let mut slot = slot.lock().await;
        output.close().await;
        if slot.as_ref().is_some_and(|running| running.id == id) {
            *slot = None;
        }
    }

    match status {
        Ok(status) if status.success() => tracing::info!(pid, "companion script exited"),
        Ok(status) => tracing::warn!(
            pid,
            exit_code = ?status.code(),
            "companion script exited abnormally"
        ),
        Err(e) => tracing::error!(pid, "failed to wait on companion script: {e}"),
    }
}

/// Send termination to the process group led by `pid`.
#[cfg(unix)]
fn signal_tree(pid: u32) -> Result<(), SupervisorError> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    killpg(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| SupervisorError::Signal {
        pid,
        source: std::io::Error::from(e),
    })
}

/// Kill the whole process tree rooted at `pid` with taskkill.
#[cfg(windows)]
fn signal_tree(pid: u32) -> Result<(), SupervisorError> {
    std::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/f", "/t"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|e| SupervisorError::Signal { pid, source: e })
}
