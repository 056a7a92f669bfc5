//! IMAP connection configuration and on-disk locations

use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Data directory override.
pub const DATA_DIR_VAR: &str = "MAIL_SYNC_DATA_DIR";

/// File name of the account database inside the data directory.
pub const ACCOUNTS_DB_FILE: &str = "accounts.db";

/// Flat IMAP connection parameters.
///
/// Built either from the single default config (environment) or from a
/// stored account, in which case `account_id` and `account_email` are
/// set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS when `true`, STARTTLS on a plain connection otherwise.
    pub secure: bool,
    pub username: String,
    pub password: String,
    pub account_id: Option<i64>,
    pub account_email: Option<String>,
}

impl ImapConfig {
    /// Load the default IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_SECURE` (default: `true`)
    /// - `IMAP_PORT` (default: `993` when secure, `143` otherwise)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let secure = match lookup("IMAP_SECURE") {
            None => true,
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| Error::Config(format!("Invalid IMAP_SECURE: {raw}")))?,
        };
        let port = match lookup("IMAP_PORT") {
            None => default_port(secure),
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
        };

        Ok(Self {
            host: lookup("IMAP_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            secure,
            username: lookup("IMAP_USERNAME")
                .ok_or_else(|| Error::Config("IMAP_USERNAME not set".into()))?,
            password: lookup("IMAP_PASSWORD")
                .ok_or_else(|| Error::Config("IMAP_PASSWORD not set".into()))?,
            account_id: None,
            account_email: None,
        })
    }
}

/// Standard IMAP port for the given transport security.
#[must_use]
pub const fn default_port(secure: bool) -> u16 {
    if secure { 993 } else { 143 }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Directory holding the PID file, the daemon log and the account
/// database.
///
/// `MAIL_SYNC_DATA_DIR` wins; otherwise the platform data directory.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = env::var(DATA_DIR_VAR) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("mail-autosync"))
        .ok_or_else(|| Error::Config("Cannot determine a data directory".into()))
}
