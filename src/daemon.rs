//! Background sync daemon supervision
//!
//! The daemon is a detached OS process running a scheduler. Separate CLI
//! invocations coordinate with it only through two files in the data
//! directory:
//!
//! - `sync-daemon.pid` -- PID of the worker. A claim, not a fact: every
//!   reader verifies it with a zero-signal probe and deletes it when the
//!   process is gone.
//! - `sync-daemon.log` -- the worker's stdout and stderr, appended.
//!
//! There is no file locking. Two concurrent `start` calls can both see
//! "not running" before either writes the PID file.

use crate::error::{Error, Result};
use crate::process::{self, Signal};
use crate::scheduler::SchedulerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const PID_FILE_NAME: &str = "sync-daemon.pid";
pub const LOG_FILE_NAME: &str = "sync-daemon.log";

/// Subcommand the CLI binary exposes as the worker entry point.
pub const WORKER_SUBCOMMAND: &str = "daemon-worker";

/// How long `stop` waits after SIGTERM before sending SIGKILL.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(5000);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Worker parameters, passed to the child as one JSON argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonOptions {
    /// Sync interval in milliseconds.
    pub interval: u64,
    pub folders: Vec<String>,
    pub account: Option<String>,
}

impl DaemonOptions {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_millis(self.interval),
            folders: self.folders.clone(),
            account: self.account.clone(),
        }
    }
}

/// Program and leading arguments used to launch the worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-run the current executable with the worker subcommand.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, [WORKER_SUBCOMMAND]))
    }
}

/// Returned by a successful [`SyncDaemon::start`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonHandle {
    pub pid: u32,
    pub log_file: PathBuf,
    pub options: DaemonOptions,
}

/// Returned by a successful [`SyncDaemon::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub pid: u32,
    /// The worker ignored SIGTERM for the whole grace period.
    pub forced_kill: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub is_running: bool,
    pub pid: Option<u32>,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub log_size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Starts, stops and inspects the background worker.
#[derive(Debug, Clone)]
pub struct SyncDaemon {
    data_dir: PathBuf,
    pid_file: PathBuf,
    log_file: PathBuf,
    worker: WorkerCommand,
}

impl SyncDaemon {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, worker: WorkerCommand) -> Self {
        let data_dir = data_dir.into();
        Self {
            pid_file: data_dir.join(PID_FILE_NAME),
            log_file: data_dir.join(LOG_FILE_NAME),
            data_dir,
            worker,
        }
    }

    #[must_use]
    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    #[must_use]
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// PID of the live daemon, if any. Removes a stale PID file.
    fn running_pid(&self) -> Result<Option<u32>> {
        let raw = match fs::read_to_string(&self.pid_file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match raw.trim().parse::<u32>() {
            Ok(pid) if process::is_alive(pid) => Ok(Some(pid)),
            Ok(pid) => {
                debug!("Removing stale PID file (PID {} is gone)", pid);
                self.remove_pid_file();
                Ok(None)
            }
            Err(_) => {
                warn!("Removing unreadable PID file {}", self.pid_file.display());
                self.remove_pid_file();
                Ok(None)
            }
        }
    }

    fn remove_pid_file(&self) {
        match fs::remove_file(&self.pid_file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.pid_file.display(), e),
        }
    }

    /// Spawn the detached worker and record its PID.
    ///
    /// The child gets its own process group, a null stdin, and the log
    /// file for stdout and stderr, so it survives the calling process.
    #[allow(clippy::zombie_processes)] // never waited; `process::is_alive` reaps it
    pub fn start(&self, options: DaemonOptions) -> Result<DaemonHandle> {
        if let Some(pid) = self.running_pid()? {
            return Err(Error::AlreadyRunning { pid });
        }
        options.scheduler_config().validate()?;

        fs::create_dir_all(&self.data_dir)?;
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)?;
        let stderr = stdout.try_clone()?;
        let payload = serde_json::to_string(&options)?;

        let child = Command::new(&self.worker.program)
            .args(&self.worker.args)
            .arg(&payload)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .spawn()?;
        let pid = child.id();

        if let Err(e) = fs::write(&self.pid_file, pid.to_string()) {
            let _ = process::send_signal(pid, Signal::Kill);
            return Err(e.into());
        }

        info!("Sync daemon started (PID {})", pid);
        Ok(DaemonHandle {
            pid,
            log_file: self.log_file.clone(),
            options,
        })
    }

    /// Stop the worker: SIGTERM, then SIGKILL after [`SHUTDOWN_GRACE`].
    ///
    /// The PID file is removed whatever happens, so a process that cannot
    /// be killed does not leave the status stuck.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let pid = self.running_pid()?.ok_or(Error::NotRunning)?;
        let result = terminate(pid).await;
        self.remove_pid_file();
        result
    }

    pub fn status(&self) -> Result<DaemonStatus> {
        let pid = self.running_pid()?;
        let metadata = fs::metadata(&self.log_file).ok();

        Ok(DaemonStatus {
            is_running: pid.is_some(),
            pid,
            pid_file: self.pid_file.clone(),
            log_file: self.log_file.clone(),
            log_size: metadata.as_ref().map(fs::Metadata::len),
            last_modified: metadata
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from),
        })
    }

    /// Last `lines` non-blank lines of the log; empty if there is no log.
    pub fn logs(&self, lines: usize) -> Result<Vec<String>> {
        let raw = match fs::read(&self.log_file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let text = String::from_utf8_lossy(&raw);
        let all: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].iter().map(ToString::to_string).collect())
    }

    /// Truncate the log file.
    pub fn clear_logs(&self) -> Result<()> {
        match OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.log_file)
        {
            Ok(_) => {
                info!("Cleared {}", self.log_file.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn terminate(pid: u32) -> Result<StopOutcome> {
    info!("Stopping sync daemon (PID {})", pid);

    match process::send_signal(pid, Signal::Terminate) {
        Ok(()) => {}
        Err(e) if process::is_no_such_process(&e) => {
            return Ok(StopOutcome {
                pid,
                forced_kill: false,
            });
        }
        Err(source) => return Err(Error::Terminate { pid, source }),
    }

    let deadline = Instant::now() + SHUTDOWN_GRACE;
    while Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
        if !process::is_alive(pid) {
            info!("Sync daemon exited");
            return Ok(StopOutcome {
                pid,
                forced_kill: false,
            });
        }
    }

    warn!(
        "Sync daemon ignored SIGTERM for {} ms, sending SIGKILL",
        SHUTDOWN_GRACE.as_millis()
    );
    match process::send_signal(pid, Signal::Kill) {
        Ok(()) => {}
        Err(e) if process::is_no_such_process(&e) => {}
        Err(source) => return Err(Error::Terminate { pid, source }),
    }
    Ok(StopOutcome {
        pid,
        forced_kill: true,
    })
}
