//! Folder synchronization engine
//!
//! The scheduler only knows the [`SyncEngine`] trait. [`ImapSyncEngine`]
//! is the IMAP-backed implementation used by the CLI and the daemon
//! worker.

use crate::config::ImapConfig;
use crate::connection::{self, ImapSession};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Per-folder result of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FolderOutcome {
    Synced {
        #[serde(rename = "newEmails")]
        new_emails: u32,
    },
    Failed {
        error: String,
    },
}

/// Aggregate result of syncing a list of folders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub total_new: u32,
    pub total_errors: u32,
    pub folders: BTreeMap<String, FolderOutcome>,
}

impl SyncReport {
    /// Record a folder outcome and update the totals.
    pub fn record(&mut self, folder: impl Into<String>, outcome: FolderOutcome) {
        match &outcome {
            FolderOutcome::Synced { new_emails } => {
                self.total_new = self.total_new.saturating_add(*new_emails);
            }
            FolderOutcome::Failed { .. } => self.total_errors = self.total_errors.saturating_add(1),
        }
        self.folders.insert(folder.into(), outcome);
    }
}

/// Synchronizes an ordered list of folders.
///
/// An `Err` means the whole cycle failed (e.g. the server was
/// unreachable). Failures limited to one folder are reported inside the
/// [`SyncReport`] instead.
#[async_trait]
pub trait SyncEngine: Send + Sync {
    async fn sync_folders(&self, folders: &[String]) -> Result<SyncReport>;
}

/// Builds the engine bound to a resolved IMAP config.
pub type EngineFactory = Arc<dyn Fn(ImapConfig) -> Arc<dyn SyncEngine> + Send + Sync>;

/// Factory producing [`ImapSyncEngine`]s.
#[must_use]
pub fn imap_engine_factory() -> EngineFactory {
    Arc::new(|config| Arc::new(ImapSyncEngine::new(config)) as Arc<dyn SyncEngine>)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FolderMark {
    uid_validity: Option<u32>,
    last_uid: u32,
}

/// IMAP-backed sync engine.
///
/// Keeps a per-folder high-water UID for its own lifetime; a message is
/// new when its UID is above the mark. A UIDVALIDITY change resets the
/// mark for that folder.
pub struct ImapSyncEngine {
    config: ImapConfig,
    marks: Mutex<HashMap<String, FolderMark>>,
}

impl ImapSyncEngine {
    #[must_use]
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            marks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ImapConfig {
        &self.config
    }

    async fn sync_folder(&self, session: &mut ImapSession, folder: &str) -> Result<u32> {
        let mailbox = session
            .select(folder)
            .await
            .map_err(|e| Error::Imap(format!("Failed to select {folder}: {e}")))?;

        let uids = session
            .uid_search("ALL")
            .await
            .map_err(|e| Error::Imap(format!("Search failed in {folder}: {e}")))?;

        let mut marks = self.marks.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = marks
            .get(folder)
            .copied()
            .filter(|mark| mark.uid_validity == mailbox.uid_validity)
            .map_or(0, |mark| mark.last_uid);

        let fresh = uids.iter().filter(|uid| **uid > previous).count();
        let highest = uids.iter().copied().max().unwrap_or(0).max(previous);
        marks.insert(
            folder.to_string(),
            FolderMark {
                uid_validity: mailbox.uid_validity,
                last_uid: highest,
            },
        );
        drop(marks);

        debug!("{}: {} message(s), {} new", folder, uids.len(), fresh);
        Ok(u32::try_from(fresh).unwrap_or(u32::MAX))
    }
}

#[async_trait]
impl SyncEngine for ImapSyncEngine {
    async fn sync_folders(&self, folders: &[String]) -> Result<SyncReport> {
        let mut session = connection::connect(&self.config).await?;
        let mut report = SyncReport::default();

        for folder in folders {
            match self.sync_folder(&mut session, folder).await {
                Ok(new_emails) => report.record(folder, FolderOutcome::Synced { new_emails }),
                Err(e) => {
                    warn!("Failed to sync folder {}: {}", folder, e);
                    report.record(
                        folder,
                        FolderOutcome::Failed {
                            error: e.to_string(),
                        },
                    );
                }
            }
        }

        session.logout().await.ok();
        info!(
            "Synced {} folder(s): {} new, {} error(s)",
            folders.len(),
            report.total_new,
            report.total_errors
        );
        Ok(report)
    }
}
