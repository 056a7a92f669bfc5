//! Stored mail accounts and IMAP config resolution
//!
//! Accounts live in an SQLite `accounts` table. Multi-account storage is
//! optional: when the table is missing or a lookup misses,
//! [`ConfigResolver`] falls back to the single default config.

use crate::config::ImapConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Interval used when an account has none configured.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    name TEXT,
    imap_host TEXT NOT NULL,
    imap_port INTEGER NOT NULL DEFAULT 993,
    imap_secure INTEGER NOT NULL DEFAULT 1,
    imap_user TEXT,
    imap_password TEXT NOT NULL,
    sync_interval INTEGER,
    is_default INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    last_sync TEXT
)";

const COLUMNS: &str = "id, email, name, imap_host, imap_port, imap_secure, imap_user, \
     imap_password, sync_interval, is_default, enabled, last_sync";

type AccountRow = (
    i64,
    String,
    Option<String>,
    String,
    i64,
    bool,
    Option<String>,
    String,
    Option<i64>,
    bool,
    bool,
    Option<String>,
);

/// A stored mail account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_secure: bool,
    /// Login name; the email address is used when unset.
    pub imap_user: Option<String>,
    #[serde(skip_serializing)]
    pub imap_password: String,
    /// Sync interval in seconds.
    pub sync_interval: Option<i64>,
    pub is_default: bool,
    pub enabled: bool,
    pub last_sync: Option<DateTime<Utc>>,
}

impl Account {
    fn from_row(row: AccountRow) -> Self {
        let (
            id,
            email,
            name,
            imap_host,
            imap_port,
            imap_secure,
            imap_user,
            imap_password,
            sync_interval,
            is_default,
            enabled,
            last_sync,
        ) = row;
        Self {
            id,
            email,
            name,
            imap_host,
            imap_port: u16::try_from(imap_port).unwrap_or(crate::config::default_port(imap_secure)),
            imap_secure,
            imap_user,
            imap_password,
            sync_interval,
            is_default,
            enabled,
            last_sync: last_sync
                .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                .map(|ts| ts.with_timezone(&Utc)),
        }
    }

    /// Flat IMAP parameters for this account.
    #[must_use]
    pub fn imap_config(&self) -> ImapConfig {
        ImapConfig {
            host: self.imap_host.clone(),
            port: self.imap_port,
            secure: self.imap_secure,
            username: self
                .imap_user
                .clone()
                .unwrap_or_else(|| self.email.clone()),
            password: self.imap_password.clone(),
            account_id: Some(self.id),
            account_email: Some(self.email.clone()),
        }
    }
}

/// Fields needed to store a new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub name: Option<String>,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_secure: bool,
    pub imap_user: Option<String>,
    pub imap_password: String,
    pub sync_interval: Option<i64>,
    pub is_default: bool,
}

/// Read access to stored accounts.
///
/// Constructed once and shared by reference with the scheduler and the
/// CLI.
#[derive(Clone)]
pub struct AccountManager {
    pool: SqlitePool,
}

impl AccountManager {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the account database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create the `accounts` table if it does not exist yet.
    pub async fn create_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Whether multi-account storage is available.
    ///
    /// Any storage error counts as "no".
    pub async fn accounts_table_exists(&self) -> bool {
        let probe = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'accounts'",
        )
        .fetch_one(&self.pool)
        .await;

        match probe {
            Ok((count,)) => count > 0,
            Err(e) => {
                debug!("Accounts table probe failed: {}", e);
                false
            }
        }
    }

    /// Look up an enabled account by numeric id or email address.
    pub async fn get_account(&self, identifier: &str) -> Result<Option<Account>> {
        let row = if let Ok(id) = identifier.trim().parse::<i64>() {
            sqlx::query_as::<_, AccountRow>(&format!(
                "SELECT {COLUMNS} FROM accounts WHERE id = ? AND enabled = 1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, AccountRow>(&format!(
                "SELECT {COLUMNS} FROM accounts WHERE email = ? AND enabled = 1"
            ))
            .bind(identifier.trim())
            .fetch_optional(&self.pool)
            .await?
        };
        Ok(row.map(Account::from_row))
    }

    /// IMAP parameters of an enabled account, `None` if not found.
    pub async fn get_imap_config(&self, identifier: &str) -> Result<Option<ImapConfig>> {
        Ok(self
            .get_account(identifier)
            .await?
            .map(|account| account.imap_config()))
    }

    /// The enabled account flagged as default.
    pub async fn get_default_account(&self) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {COLUMNS} FROM accounts WHERE is_default = 1 AND enabled = 1 ORDER BY id LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Account::from_row))
    }

    /// Sync interval configured for an account.
    ///
    /// Falls back to [`DEFAULT_SYNC_INTERVAL`] when the account is missing
    /// or has no interval set.
    pub async fn get_sync_interval(&self, identifier: &str) -> Result<Duration> {
        let interval = self
            .get_account(identifier)
            .await?
            .and_then(|account| account.sync_interval)
            .and_then(|secs| u64::try_from(secs).ok())
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_SYNC_INTERVAL, |secs| {
                Duration::from_millis(secs.saturating_mul(1000))
            });
        Ok(interval)
    }

    /// Stamp the account's last successful sync. Best effort: failures
    /// are logged and dropped.
    pub async fn update_last_sync(&self, account_id: i64) {
        let result = sqlx::query("UPDATE accounts SET last_sync = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(account_id)
            .execute(&self.pool)
            .await;

        if let Err(e) = result {
            warn!("Failed to update last sync for account {}: {}", account_id, e);
        }
    }

    /// All stored accounts, enabled or not.
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {COLUMNS} FROM accounts ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Account::from_row).collect())
    }

    /// Insert an account and return its id.
    ///
    /// Clearing the previous default and the insert share one transaction,
    /// so a rejected insert leaves the old default in place.
    pub async fn add_account(&self, account: &NewAccount) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        if account.is_default {
            sqlx::query("UPDATE accounts SET is_default = 0")
                .execute(&mut *tx)
                .await?;
        }
        let result = sqlx::query(
            "INSERT INTO accounts (email, name, imap_host, imap_port, imap_secure, imap_user, \
             imap_password, sync_interval, is_default) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&account.email)
        .bind(&account.name)
        .bind(&account.imap_host)
        .bind(i64::from(account.imap_port))
        .bind(account.imap_secure)
        .bind(&account.imap_user)
        .bind(&account.imap_password)
        .bind(account.sync_interval)
        .bind(account.is_default)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    /// Enable or disable an account.
    pub async fn set_enabled(&self, account_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE accounts SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Turns an optional account identifier into IMAP parameters.
///
/// Lookups go through the account manager when one is present and its
/// table exists; any miss falls back to the default config. Sync never
/// fails just because multi-account storage is absent.
#[derive(Clone)]
pub struct ConfigResolver {
    default_config: Option<ImapConfig>,
    accounts: Option<Arc<AccountManager>>,
}

impl ConfigResolver {
    #[must_use]
    pub const fn new(default_config: Option<ImapConfig>) -> Self {
        Self {
            default_config,
            accounts: None,
        }
    }

    #[must_use]
    pub fn with_accounts(mut self, accounts: Arc<AccountManager>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    #[must_use]
    pub const fn accounts(&self) -> Option<&Arc<AccountManager>> {
        self.accounts.as_ref()
    }

    pub async fn resolve(&self, account: Option<&str>) -> Result<ImapConfig> {
        if let (Some(identifier), Some(accounts)) = (account, &self.accounts) {
            if accounts.accounts_table_exists().await {
                match accounts.get_imap_config(identifier).await {
                    Ok(Some(config)) => return Ok(config),
                    Ok(None) => warn!(
                        "Account '{}' not found, using default IMAP config",
                        identifier
                    ),
                    Err(e) => warn!(
                        "Account lookup for '{}' failed ({}), using default IMAP config",
                        identifier, e
                    ),
                }
            } else {
                debug!("No accounts table, using default IMAP config");
            }
        }

        self.default_config
            .clone()
            .ok_or_else(|| Error::Config("No default IMAP configuration available".into()))
    }
}
