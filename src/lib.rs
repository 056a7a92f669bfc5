//! Automatic mail synchronization
//!
//! Periodic IMAP sync for a personal mail client, in the foreground or
//! as a detached background daemon.
//!
//! - [`SyncScheduler`] runs non-overlapping sync cycles on a fixed
//!   interval, keeps statistics and publishes [`SchedulerEvent`]s.
//! - [`SyncDaemon`] starts, stops and inspects a worker process that
//!   hosts its own scheduler. It coordinates only through a PID file and
//!   a log file in the data directory.
//! - [`AccountManager`] resolves stored accounts to IMAP parameters;
//!   [`ConfigResolver`] falls back to the default [`ImapConfig`] when
//!   multi-account storage is absent.
//!
//! Process control relies on Unix signals.

mod account;
mod config;
mod connection;
mod daemon;
mod engine;
mod error;
mod event;
mod process;
mod scheduler;
mod worker;

pub use account::{Account, AccountManager, ConfigResolver, DEFAULT_SYNC_INTERVAL, NewAccount};
pub use config::{ACCOUNTS_DB_FILE, DATA_DIR_VAR, ImapConfig, data_dir, default_port};
pub use daemon::{
    DaemonHandle, DaemonOptions, DaemonStatus, LOG_FILE_NAME, PID_FILE_NAME, SHUTDOWN_GRACE,
    StopOutcome, SyncDaemon, WORKER_SUBCOMMAND, WorkerCommand,
};
pub use engine::{
    EngineFactory, FolderOutcome, ImapSyncEngine, SyncEngine, SyncReport, imap_engine_factory,
};
pub use error::{Error, Result};
pub use event::{EventKind, SchedulerEvent, Subscription};
pub use scheduler::{
    CycleOutcome, MIN_INTERVAL, SchedulerConfig, SchedulerStats, SchedulerStatus, SyncScheduler,
};
pub use worker::{log_events, run_worker};
