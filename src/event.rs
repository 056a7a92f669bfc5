//! Scheduler events and their subscription registry
//!
//! Handlers run synchronously, in registration order, on the task that
//! raised the event.

use crate::engine::SyncReport;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

/// Text of a panic payload, for logging.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Something that happened in a scheduler's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Started {
        interval: Duration,
        folders: Vec<String>,
    },
    SyncStart {
        folders: Vec<String>,
        account: Option<String>,
    },
    SyncComplete {
        report: SyncReport,
        duration: Duration,
    },
    SyncError {
        error: String,
    },
    Stopped,
}

/// Discriminant of [`SchedulerEvent`], used to pick subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Started,
    SyncStart,
    SyncComplete,
    SyncError,
    Stopped,
}

impl EventKind {
    pub const ALL: [Self; 5] = [
        Self::Started,
        Self::SyncStart,
        Self::SyncComplete,
        Self::SyncError,
        Self::Stopped,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::SyncStart => "sync-start",
            Self::SyncComplete => "sync-complete",
            Self::SyncError => "sync-error",
            Self::Stopped => "stopped",
        }
    }
}

impl SchedulerEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Started { .. } => EventKind::Started,
            Self::SyncStart { .. } => EventKind::SyncStart,
            Self::SyncComplete { .. } => EventKind::SyncComplete,
            Self::SyncError { .. } => EventKind::SyncError,
            Self::Stopped => EventKind::Stopped,
        }
    }
}

/// Handle returned by `subscribe`, passed back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Handler = Arc<dyn Fn(&SchedulerEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(Subscription, EventKind, Handler)>,
}

#[derive(Default)]
pub(crate) struct EventBus {
    registry: Mutex<Registry>,
}

impl EventBus {
    pub(crate) fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let subscription = Subscription(registry.next_id);
        registry.next_id += 1;
        registry.entries.push((subscription, kind, Arc::new(handler)));
        subscription
    }

    pub(crate) fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let before = registry.entries.len();
        registry.entries.retain(|(id, _, _)| *id != subscription);
        registry.entries.len() != before
    }

    /// Deliver `event` to every matching handler.
    ///
    /// The registry lock is released before handlers run, so a handler
    /// may subscribe or unsubscribe. A panicking handler is logged and
    /// skipped; the remaining handlers still run.
    pub(crate) fn emit(&self, event: &SchedulerEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                warn!(
                    "Handler for {} event panicked: {}",
                    kind.as_str(),
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}
