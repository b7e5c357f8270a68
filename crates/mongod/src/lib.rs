//! Owns the lifecycle of one `mongod` process: data directory, spawn,
//! termination and purge.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod descriptor;
mod error;
mod output;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use descriptor::{EngineFlags, FlagValue, NodeDescriptor, RESERVED_FLAGS, encode_args};
pub use error::{Error, Result};
pub use output::OutputMode;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mango_bootable::Bootable;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Default time a node gets to exit after SIGTERM before it is killed.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for configuring `Mongod`.
#[derive(Clone, Debug)]
pub struct MongodOptions {
    /// What to launch.
    pub descriptor: NodeDescriptor,

    /// Path to the `mongod` executable.
    pub executable: PathBuf,

    /// Where the engine's output goes.
    pub output: OutputMode,

    /// Grace period between SIGTERM and SIGKILL on stop.
    pub shutdown_timeout: Duration,
}

impl MongodOptions {
    /// Options with inherited output and the default shutdown timeout.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>, descriptor: NodeDescriptor) -> Self {
        Self {
            descriptor,
            executable: executable.into(),
            output: OutputMode::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// A live engine process. Only ever held inside its `Mongod`.
struct ProcessHandle {
    generation: u64,
    monitor: JoinHandle<()>,
    output_tasks: TaskTracker,
    pid: u32,
    shutdown_token: CancellationToken,
}

type ProcessSlot = Arc<Mutex<Option<ProcessHandle>>>;

/// Runs one `mongod` process.
pub struct Mongod {
    descriptor: NodeDescriptor,
    executable: PathBuf,
    generation: AtomicU64,
    name: String,
    output: OutputMode,
    process: ProcessSlot,
    shutdown_timeout: Duration,
}

impl Mongod {
    /// Creates a new instance of `Mongod`.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor has no data directory or an extra
    /// flag shadows a dedicated field.
    pub fn new(
        MongodOptions {
            descriptor,
            executable,
            output,
            shutdown_timeout,
        }: MongodOptions,
    ) -> Result<Self> {
        descriptor.validate()?;

        Ok(Self {
            name: format!("mongod-{}", descriptor.port),
            descriptor,
            executable,
            generation: AtomicU64::new(0),
            output,
            process: Arc::new(Mutex::new(None)),
            shutdown_timeout,
        })
    }

    /// The descriptor this node was built from.
    #[must_use]
    pub const fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    /// The node's data directory.
    #[must_use]
    pub fn dbpath(&self) -> &Path {
        &self.descriptor.dbpath
    }

    /// Whether a process handle is currently held.
    pub async fn is_running(&self) -> bool {
        self.process.lock().await.is_some()
    }

    /// OS process id of the running engine, if any.
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().map(|p| p.pid)
    }

    async fn prepare_data_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.dbpath())
            .await
            .map_err(|e| Error::Io("failed to create data directory", e))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(self.descriptor.args()).kill_on_drop(true);

        match self.output {
            OutputMode::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            OutputMode::Tracing => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        cmd
    }

    fn forward_output(&self, child: &mut Child) -> TaskTracker {
        let tracker = TaskTracker::new();

        if let Some(stdout) = child.stdout.take() {
            tracker.spawn(output::forward_stream(self.name.clone(), stdout));
        }

        if let Some(stderr) = child.stderr.take() {
            tracker.spawn(output::forward_stream(self.name.clone(), stderr));
        }

        tracker.close();
        tracker
    }

    /// Starts the engine. Returns as soon as the process has been spawned; it
    /// may not accept connections yet.
    ///
    /// If the process later exits on its own, the failure is logged and the
    /// node goes back to not running. The caller has already seen `Ok` by then.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if a process is held, or an error if
    /// the data directory cannot be created or the executable cannot be spawned.
    pub async fn start(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if process.is_some() {
            return Err(Error::AlreadyRunning);
        }

        self.prepare_data_dir().await?;

        let mut cmd = self.command();
        debug!(node = %self.name, "spawning {:?}", cmd);

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            executable: self.executable.clone(),
            source,
        })?;

        let pid = child.id().ok_or_else(|| {
            Error::Io(
                "spawned process has no pid",
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )
        })?;

        let output_tasks = self.forward_output(&mut child);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let shutdown_token = CancellationToken::new();

        let monitor = tokio::spawn(monitor(MonitorContext {
            child,
            generation,
            name: self.name.clone(),
            pid,
            shutdown_timeout: self.shutdown_timeout,
            shutdown_token: shutdown_token.clone(),
            slot: Arc::clone(&self.process),
        }));

        process.replace(ProcessHandle {
            generation,
            monitor,
            output_tasks,
            pid,
            shutdown_token,
        });

        info!(node = %self.name, pid, "mongod started");

        Ok(())
    }

    /// Sends SIGTERM and waits for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] if no process is held.
    pub async fn stop(&self) -> Result<()> {
        let handle = self.process.lock().await.take().ok_or(Error::NotRunning)?;

        info!(node = %self.name, pid = handle.pid, "mongod shutting down...");

        handle.shutdown_token.cancel();
        handle.monitor.await?;
        handle.output_tasks.wait().await;

        info!(node = %self.name, "mongod shutdown");

        Ok(())
    }

    /// Removes the data directory. A missing directory is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub async fn purge(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(self.dbpath()).await {
            Ok(()) => {
                info!(node = %self.name, dbpath = %self.dbpath().display(), "data directory purged");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(node = %self.name, "no data directory to purge");
                Ok(())
            }
            Err(e) => Err(Error::Io("failed to remove data directory", e)),
        }
    }
}

#[async_trait]
impl Bootable for Mongod {
    type Error = Error;

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        Self::start(self).await
    }

    async fn stop(&self) -> Result<()> {
        Self::stop(self).await
    }

    async fn purge(&self) -> Result<()> {
        Self::purge(self).await
    }
}

struct MonitorContext {
    child: Child,
    generation: u64,
    name: String,
    pid: u32,
    shutdown_timeout: Duration,
    shutdown_token: CancellationToken,
    slot: ProcessSlot,
}

/// Owns the child until it exits, either on request or on its own.
async fn monitor(
    MonitorContext {
        mut child,
        generation,
        name,
        pid,
        shutdown_timeout,
        shutdown_token,
        slot,
    }: MonitorContext,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        () = shutdown_token.cancelled() => None,
    };

    match exited {
        Some(status) => {
            match status {
                Ok(status) => error!(node = %name, pid, "mongod exited unexpectedly: {}", status),
                Err(e) => error!(node = %name, pid, "failed to wait for mongod: {}", e),
            }

            // only clear the slot if it still holds this process
            let mut slot = slot.lock().await;
            if slot.as_ref().is_some_and(|h| h.generation == generation) {
                slot.take();
            }
        }
        None => terminate(&mut child, pid, shutdown_timeout, &name).await,
    }
}

async fn terminate(child: &mut Child, pid: u32, shutdown_timeout: Duration, name: &str) {
    send_sigterm(child, pid, name);

    match tokio::time::timeout(shutdown_timeout, child.wait()).await {
        Ok(Ok(status)) => debug!(node = %name, pid, "mongod exited with status: {}", status),
        Ok(Err(e)) => error!(node = %name, pid, "failed to wait for mongod: {}", e),
        Err(_) => {
            warn!(node = %name, pid, "mongod did not exit within {:?}, killing", shutdown_timeout);
            if let Err(e) = child.kill().await {
                error!(node = %name, pid, "failed to kill mongod: {}", e);
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(_child: &mut Child, pid: u32, name: &str) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Ok(raw_pid) = i32::try_from(pid) else {
        error!(node = %name, pid, "pid out of range for SIGTERM");
        return;
    };

    if let Err(e) = signal::kill(Pid::from_raw(raw_pid), Signal::SIGTERM) {
        error!(node = %name, pid, "failed to send SIGTERM: {}", e);
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child, pid: u32, name: &str) {
    if let Err(e) = child.start_kill() {
        error!(node = %name, pid, "failed to terminate mongod: {}", e);
    }
}
