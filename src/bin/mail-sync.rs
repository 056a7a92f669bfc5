#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for automatic mail synchronization

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use mail_autosync::{
    ACCOUNTS_DB_FILE, AccountManager, ConfigResolver, CycleOutcome, DEFAULT_SYNC_INTERVAL,
    DaemonOptions, FolderOutcome, ImapConfig, ImapSyncEngine, MIN_INTERVAL, SchedulerConfig, SyncDaemon,
    SyncEngine, SyncReport, SyncScheduler, WorkerCommand, data_dir, imap_engine_factory,
    run_worker,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mail-sync")]
#[command(about = "Automatic IMAP sync, in the foreground or as a background daemon")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(ClapArgs, Clone)]
struct SyncTarget {
    /// Folder to sync (repeatable)
    #[arg(long = "folder", default_value = "INBOX")]
    folders: Vec<String>,

    /// Stored account id or email (default IMAP config when omitted)
    #[arg(long)]
    account: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Sync once and exit
    Sync {
        #[command(flatten)]
        target: SyncTarget,
    },

    /// Sync periodically in the foreground until interrupted
    Auto {
        #[command(flatten)]
        target: SyncTarget,

        /// Seconds between syncs (minimum 60)
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Control the background sync daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Stored accounts
    Accounts {
        #[command(subcommand)]
        action: AccountsAction,
    },

    /// Worker entry point used by `daemon start`
    #[command(name = "daemon-worker", hide = true)]
    DaemonWorker {
        /// JSON-encoded worker options
        options: String,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon
    Start {
        #[command(flatten)]
        target: SyncTarget,

        /// Seconds between syncs (minimum 60)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Stop the daemon
    Stop,
    /// Show whether the daemon is running
    Status,
    /// Show the tail of the daemon log
    Logs {
        /// Number of lines
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
    /// Truncate the daemon log
    ClearLogs,
}

#[derive(Subcommand)]
enum AccountsAction {
    /// List stored accounts
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = Args::parse();
    let is_worker = matches!(args.command, Command::DaemonWorker { .. });

    // Scheduler events are the only output of `auto` and the worker, so
    // they log at info unless RUST_LOG says otherwise.
    let long_running = is_worker || matches!(args.command, Command::Auto { .. });
    let filter = if long_running {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!is_worker)
        .init();

    let data_dir = data_dir()?;
    let accounts = open_accounts(&data_dir).await;
    let resolver = resolver(accounts.clone());

    match &args.command {
        Command::Sync { target } => cmd_sync(&args, &resolver, target).await?,
        Command::Auto {
            target,
            interval_secs,
        } => {
            let interval = resolve_interval(accounts.as_deref(), target, *interval_secs).await?;
            cmd_auto(resolver, target, interval).await?;
        }
        Command::Daemon { action } => {
            let daemon = SyncDaemon::new(&data_dir, WorkerCommand::current_exe()?);
            cmd_daemon(&args, &daemon, accounts.as_deref(), action).await?;
        }
        Command::Accounts {
            action: AccountsAction::List,
        } => cmd_accounts(&args, accounts.as_deref()).await?,
        Command::DaemonWorker { options } => cmd_worker(resolver, options).await?,
    }

    Ok(())
}

/// Open the account database if one exists. Absent storage is not an
/// error: syncing falls back to the default config.
async fn open_accounts(data_dir: &Path) -> Option<Arc<AccountManager>> {
    let path = data_dir.join(ACCOUNTS_DB_FILE);
    if !path.exists() {
        debug!("No account database at {}", path.display());
        return None;
    }
    match AccountManager::open(&path).await {
        Ok(manager) => Some(Arc::new(manager)),
        Err(e) => {
            warn!("Cannot open account database {}: {}", path.display(), e);
            None
        }
    }
}

fn resolver(accounts: Option<Arc<AccountManager>>) -> ConfigResolver {
    let default_config = match ImapConfig::from_env() {
        Ok(config) => Some(config),
        Err(e) => {
            debug!("No default IMAP config: {}", e);
            None
        }
    };
    let resolver = ConfigResolver::new(default_config);
    match accounts {
        Some(accounts) => resolver.with_accounts(accounts),
        None => resolver,
    }
}

/// Explicit flag, else the account's stored interval, else the default.
async fn resolve_interval(
    accounts: Option<&AccountManager>,
    target: &SyncTarget,
    interval_secs: Option<u64>,
) -> anyhow::Result<Duration> {
    if let Some(secs) = interval_secs {
        return Ok(Duration::from_secs(secs));
    }
    let stored = match (accounts, target.account.as_deref()) {
        (Some(accounts), Some(account)) if accounts.accounts_table_exists().await => {
            accounts.get_sync_interval(account).await?
        }
        _ => DEFAULT_SYNC_INTERVAL,
    };
    Ok(stored.max(MIN_INTERVAL))
}

/// Resolves on SIGTERM or SIGINT. Handlers are registered before this
/// returns, so a signal sent while the scheduler starts is not lost.
fn shutdown_signal() -> anyhow::Result<impl Future<Output = ()>> {
    let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
    Ok(async move {
        tokio::select! {
            _ = terminate.recv() => {}
            _ = interrupt.recv() => {}
        }
    })
}

async fn cmd_sync(
    args: &Args,
    resolver: &ConfigResolver,
    target: &SyncTarget,
) -> anyhow::Result<()> {
    let config = resolver.resolve(target.account.as_deref()).await?;
    let account_id = config.account_id;
    let engine = ImapSyncEngine::new(config);
    let report = engine.sync_folders(&target.folders).await?;

    if let (Some(id), Some(accounts)) = (account_id, resolver.accounts()) {
        accounts.update_last_sync(id).await;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn cmd_auto(
    resolver: ConfigResolver,
    target: &SyncTarget,
    interval: Duration,
) -> anyhow::Result<()> {
    let scheduler = SyncScheduler::new(
        SchedulerConfig {
            interval,
            folders: target.folders.clone(),
            account: target.account.clone(),
        },
        resolver,
        imap_engine_factory(),
    )?;

    let shutdown = shutdown_signal()?;
    run_worker(&scheduler, shutdown).await;
    print_scheduler_summary(&scheduler);
    Ok(())
}

async fn cmd_worker(resolver: ConfigResolver, raw: &str) -> anyhow::Result<()> {
    let options = DaemonOptions::from_json(raw).context("invalid worker options")?;
    let scheduler = SyncScheduler::new(
        options.scheduler_config(),
        resolver,
        imap_engine_factory(),
    )?;

    let shutdown = shutdown_signal()?;
    run_worker(&scheduler, shutdown).await;
    print_scheduler_summary(&scheduler);
    Ok(())
}

async fn cmd_daemon(
    args: &Args,
    daemon: &SyncDaemon,
    accounts: Option<&AccountManager>,
    action: &DaemonAction,
) -> anyhow::Result<()> {
    match action {
        DaemonAction::Start {
            target,
            interval_secs,
        } => {
            let interval = resolve_interval(accounts, target, *interval_secs).await?;
            let options = DaemonOptions {
                interval: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                folders: target.folders.clone(),
                account: target.account.clone(),
            };
            let handle = daemon.start(options)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&handle)?);
            } else {
                println!("Sync daemon started (PID {})", handle.pid);
                println!("Log: {}", handle.log_file.display());
            }
        }
        DaemonAction::Stop => {
            let outcome = daemon.stop().await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else if outcome.forced_kill {
                println!("Sync daemon (PID {}) killed", outcome.pid);
            } else {
                println!("Sync daemon (PID {}) stopped", outcome.pid);
            }
        }
        DaemonAction::Status => {
            let status = daemon.status()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                match status.pid {
                    Some(pid) => println!("Daemon:   running (PID {pid})"),
                    None => println!("Daemon:   not running"),
                }
                println!("PID file: {}", status.pid_file.display());
                println!("Log file: {}", status.log_file.display());
                if let Some(size) = status.log_size {
                    println!("Log size: {size} bytes");
                }
                if let Some(modified) = status.last_modified {
                    println!("Modified: {}", modified.format("%Y-%m-%d %H:%M:%S"));
                }
            }
        }
        DaemonAction::Logs { lines } => {
            let logs = daemon.logs(*lines)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&logs)?);
            } else if logs.is_empty() {
                println!("No logs.");
            } else {
                for line in &logs {
                    println!("{line}");
                }
            }
        }
        DaemonAction::ClearLogs => {
            daemon.clear_logs()?;
            if !args.json {
                println!("Logs cleared.");
            }
        }
    }
    Ok(())
}

async fn cmd_accounts(args: &Args, accounts: Option<&AccountManager>) -> anyhow::Result<()> {
    let list = match accounts {
        Some(accounts) if accounts.accounts_table_exists().await => accounts.list_accounts().await?,
        _ => Vec::new(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }
    if list.is_empty() {
        println!("No stored accounts; the default IMAP config is used.");
        return Ok(());
    }

    println!(
        "{:<4} {:<32} {:<28} {:<8} {}",
        "ID", "Email", "Server", "Enabled", "Last sync"
    );
    println!("{}", "-".repeat(90));
    for account in &list {
        let email = if account.is_default {
            format!("{} *", account.email)
        } else {
            account.email.clone()
        };
        println!(
            "{:<4} {:<32} {:<28} {:<8} {}",
            account.id,
            truncate(&email, 31),
            truncate(&format!("{}:{}", account.imap_host, account.imap_port), 27),
            if account.enabled { "yes" } else { "no" },
            account
                .last_sync
                .map_or_else(|| "-".to_string(), |ts| ts.format("%Y-%m-%d %H:%M").to_string()),
        );
    }
    println!("\n{} account(s), * = default", list.len());
    Ok(())
}

fn print_report(report: &SyncReport) {
    for (folder, outcome) in &report.folders {
        match outcome {
            FolderOutcome::Synced { new_emails } => println!("{folder:<24} {new_emails} new"),
            FolderOutcome::Failed { error } => println!("{folder:<24} error: {error}"),
        }
    }
    println!(
        "\n{} new email(s), {} error(s)",
        report.total_new, report.total_errors
    );
}

fn print_scheduler_summary(scheduler: &SyncScheduler) {
    let status = scheduler.status();
    println!(
        "{} sync(s): {} ok, {} failed, {} new email(s)",
        status.stats.total_syncs,
        status.stats.successful_syncs,
        status.stats.failed_syncs,
        status.stats.total_new_emails
    );
    if let Some(CycleOutcome::Failure { error, .. }) = &status.last_sync_result {
        println!("Last error: {error}");
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
