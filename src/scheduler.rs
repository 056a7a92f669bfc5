//! Periodic sync scheduler
//!
//! A [`SyncScheduler`] runs one sync cycle as soon as it starts, then one
//! cycle per interval. Cycles never overlap: the timer sleeps, runs a
//! cycle, waits for it to settle and only then sleeps again. Cycle
//! failures are recorded and reported as events; they never stop the
//! schedule.

use crate::account::ConfigResolver;
use crate::engine::{EngineFactory, SyncEngine, SyncReport};
use crate::error::{Error, Result};
use crate::event::{EventBus, EventKind, SchedulerEvent, Subscription, panic_message};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Shortest accepted sync interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(60);

/// What to sync and how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub folders: Vec<String>,
    /// Stored account identifier; `None` means the default config.
    pub account: Option<String>,
}

impl SchedulerConfig {
    /// Check the interval floor and that at least one folder is set.
    pub fn validate(&self) -> Result<()> {
        validate_interval(self.interval)?;
        validate_folders(&self.folders)
    }
}

/// Cumulative counters. Never reset while the scheduler lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub total_new_emails: u64,
    pub total_errors: u64,
}

/// Result of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Success { report: SyncReport, duration: Duration },
    Failure { error: String, duration: Duration },
}

impl CycleOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        match self {
            Self::Success { duration, .. } | Self::Failure { duration, .. } => *duration,
        }
    }
}

/// Read-only snapshot returned by [`SyncScheduler::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub interval: Duration,
    pub folders: Vec<String>,
    pub account: Option<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_result: Option<CycleOutcome>,
    pub stats: SchedulerStats,
    /// The configured interval while a timer is armed. Not a countdown.
    pub next_sync_in: Option<Duration>,
}

fn validate_interval(interval: Duration) -> Result<()> {
    if interval < MIN_INTERVAL {
        return Err(Error::Validation(format!(
            "Sync interval must be at least {} ms, got {} ms",
            MIN_INTERVAL.as_millis(),
            interval.as_millis()
        )));
    }
    Ok(())
}

fn validate_folders(folders: &[String]) -> Result<()> {
    if folders.is_empty() {
        return Err(Error::Validation(
            "At least one folder is required".into(),
        ));
    }
    Ok(())
}

struct State {
    running: bool,
    interval: Duration,
    folders: Vec<String>,
    account: Option<String>,
    last_sync_time: Option<DateTime<Utc>>,
    last_sync_result: Option<CycleOutcome>,
    stats: SchedulerStats,
    timer: Option<JoinHandle<()>>,
}

struct BoundEngine {
    engine: Arc<dyn SyncEngine>,
    account_id: Option<i64>,
}

struct Inner {
    state: Mutex<State>,
    events: EventBus,
    resolver: ConfigResolver,
    factory: EngineFactory,
    engine: OnceCell<BoundEngine>,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace any armed timer with a fresh one.
    ///
    /// Each tick runs its cycle in a separate task so that aborting the
    /// timer never cancels a cycle that is already running.
    fn arm_timer(self: &Arc<Self>, state: &mut State) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let interval = state.interval;
        let weak: Weak<Self> = Arc::downgrade(self);
        state.timer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let cycle = tokio::spawn(async move {
                    inner.run_cycle().await;
                });
                if let Err(e) = cycle.await {
                    warn!("Sync cycle task did not complete: {}", e);
                }
            }
        }));
        debug!("Sync timer armed ({} ms)", interval.as_millis());
    }

    async fn bind_engine(&self, account: Option<&str>) -> Result<BoundEngine> {
        let config = self.resolver.resolve(account).await?;
        info!(
            "Binding sync engine to {}@{}:{}",
            config.username, config.host, config.port
        );
        let account_id = config.account_id;
        Ok(BoundEngine {
            engine: (self.factory)(config),
            account_id,
        })
    }

    async fn attempt(
        &self,
        folders: &[String],
        account: Option<&str>,
    ) -> Result<(SyncReport, Option<i64>)> {
        let bound = self
            .engine
            .get_or_try_init(|| self.bind_engine(account))
            .await?;
        let report = bound.engine.sync_folders(folders).await?;
        Ok((report, bound.account_id))
    }

    async fn run_cycle(&self) -> CycleOutcome {
        let _cycle = self.cycle_lock.lock().await;

        let (folders, account) = {
            let mut state = self.state();
            state.stats.total_syncs += 1;
            (state.folders.clone(), state.account.clone())
        };

        self.events.emit(&SchedulerEvent::SyncStart {
            folders: folders.clone(),
            account: account.clone(),
        });

        let started = Instant::now();
        let result = AssertUnwindSafe(self.attempt(&folders, account.as_deref()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(Error::Imap(format!(
                    "Sync engine panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });
        let duration = started.elapsed();

        match result {
            Ok((report, account_id)) => {
                let outcome = CycleOutcome::Success {
                    report: report.clone(),
                    duration,
                };
                {
                    let mut state = self.state();
                    state.stats.successful_syncs += 1;
                    state.stats.total_new_emails += u64::from(report.total_new);
                    state.stats.total_errors += u64::from(report.total_errors);
                    state.last_sync_time = Some(Utc::now());
                    state.last_sync_result = Some(outcome.clone());
                }
                info!(
                    "Sync complete: {} new, {} error(s) in {} ms",
                    report.total_new,
                    report.total_errors,
                    duration.as_millis()
                );
                self.events
                    .emit(&SchedulerEvent::SyncComplete { report, duration });

                if let (Some(id), Some(accounts)) = (account_id, self.resolver.accounts()) {
                    accounts.update_last_sync(id).await;
                }
                outcome
            }
            Err(e) => {
                let error = e.to_string();
                let outcome = CycleOutcome::Failure {
                    error: error.clone(),
                    duration,
                };
                {
                    let mut state = self.state();
                    state.stats.failed_syncs += 1;
                    state.last_sync_time = Some(Utc::now());
                    state.last_sync_result = Some(outcome.clone());
                }
                warn!("Sync failed: {}", error);
                self.events.emit(&SchedulerEvent::SyncError { error });
                outcome
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

/// Runs sync cycles on a fixed interval.
///
/// Cheap to clone; clones share the same timer, state and subscribers.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    /// Create a stopped scheduler.
    ///
    /// The sync engine is built lazily by `factory` on the first cycle,
    /// from the config `resolver` returns for `config.account`, and kept
    /// for the scheduler's lifetime.
    pub fn new(
        config: SchedulerConfig,
        resolver: ConfigResolver,
        factory: EngineFactory,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    running: false,
                    interval: config.interval,
                    folders: config.folders,
                    account: config.account,
                    last_sync_time: None,
                    last_sync_result: None,
                    stats: SchedulerStats::default(),
                    timer: None,
                }),
                events: EventBus::default(),
                resolver,
                factory,
                engine: OnceCell::new(),
                cycle_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Start syncing: one cycle now, then one per interval.
    ///
    /// Returns once the immediate cycle has settled. Does nothing if the
    /// scheduler is already running.
    pub async fn start(&self) {
        let (interval, folders) = {
            let mut state = self.inner.state();
            if state.running {
                info!("Scheduler already running");
                return;
            }
            state.running = true;
            (state.interval, state.folders.clone())
        };

        info!(
            "Starting auto-sync every {} s for {}",
            interval.as_secs(),
            folders.join(", ")
        );
        self.inner
            .events
            .emit(&SchedulerEvent::Started { interval, folders });

        self.inner.run_cycle().await;

        let mut state = self.inner.state();
        if state.running && state.timer.is_none() {
            self.inner.arm_timer(&mut state);
        }
    }

    /// Cancel the pending timer. A cycle already in flight still runs to
    /// completion and still emits its result.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state();
            if !state.running {
                info!("Scheduler not running");
                return;
            }
            state.running = false;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }

        info!("Auto-sync stopped");
        self.inner.events.emit(&SchedulerEvent::Stopped);
    }

    /// Run one cycle outside the periodic schedule.
    pub async fn sync_now(&self) -> Result<CycleOutcome> {
        if !self.inner.state().running {
            return Err(Error::InvalidState(
                "Scheduler is not running".into(),
            ));
        }
        info!("Manual sync requested");
        Ok(self.inner.run_cycle().await)
    }

    /// Change the interval; re-arms the timer if one is armed.
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        validate_interval(interval)?;

        let mut state = self.inner.state();
        state.interval = interval;
        if state.running && state.timer.is_some() {
            self.inner.arm_timer(&mut state);
        }
        drop(state);

        info!("Sync interval set to {} s", interval.as_secs());
        Ok(())
    }

    /// Replace the folder list used by subsequent cycles.
    pub fn set_folders(&self, folders: Vec<String>) -> Result<()> {
        validate_folders(&folders)?;
        info!("Sync folders set to {}", folders.join(", "));
        self.inner.state().folders = folders;
        Ok(())
    }

    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let state = self.inner.state();
        SchedulerStatus {
            is_running: state.running,
            interval: state.interval,
            folders: state.folders.clone(),
            account: state.account.clone(),
            last_sync_time: state.last_sync_time,
            last_sync_result: state.last_sync_result.clone(),
            stats: state.stats,
            next_sync_in: state.timer.as_ref().map(|_| state.interval),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.state().running
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, handler)
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.inner.events.unsubscribe(subscription)
    }
}
