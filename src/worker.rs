//! Daemon worker loop
//!
//! Hosts a scheduler inside the detached process, writes every event to
//! the log through `tracing`, and stops the scheduler when the shutdown
//! future resolves.

use crate::event::{EventKind, SchedulerEvent};
use crate::scheduler::SyncScheduler;
use std::future::Future;
use tracing::{info, warn};

fn log_event(event: &SchedulerEvent) {
    let name = event.kind().as_str();
    match event {
        SchedulerEvent::Started { interval, folders } => info!(
            event = name,
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "Auto-sync started for {}",
            folders.join(", ")
        ),
        SchedulerEvent::SyncStart { folders, account } => info!(
            event = name,
            account = account.as_deref().unwrap_or("default"),
            "Syncing {}",
            folders.join(", ")
        ),
        SchedulerEvent::SyncComplete { report, duration } => info!(
            event = name,
            new = report.total_new,
            errors = report.total_errors,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "Sync complete"
        ),
        SchedulerEvent::SyncError { error } => warn!(event = name, "Sync failed: {}", error),
        SchedulerEvent::Stopped => info!(event = name, "Auto-sync stopped"),
    }
}

/// Subscribe the event logger to all five event kinds.
pub fn log_events(scheduler: &SyncScheduler) {
    for kind in EventKind::ALL {
        scheduler.subscribe(kind, log_event);
    }
}

/// Run `scheduler` until `shutdown` resolves, then stop it.
///
/// A shutdown that arrives during the first cycle stops the scheduler
/// at once and then waits for that cycle to settle, so its stats and
/// terminal event are still recorded.
pub async fn run_worker<F>(scheduler: &SyncScheduler, shutdown: F)
where
    F: Future<Output = ()>,
{
    log_events(scheduler);
    info!("Sync worker running (PID {})", std::process::id());

    let start = scheduler.start();
    tokio::pin!(start);
    tokio::pin!(shutdown);
    tokio::select! {
        () = &mut start => {
            (&mut shutdown).await;
            info!("Shutdown requested");
            scheduler.stop();
        }
        () = &mut shutdown => {
            info!("Shutdown requested during the first sync");
            scheduler.stop();
            start.await;
        }
    }
}
