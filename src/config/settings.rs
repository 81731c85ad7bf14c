//! Gateway settings and configuration types.
//!
//! Settings are read from `~/.config/mailbridge/settings.json` (or the
//! platform equivalent) at startup. Every section has defaults, so a missing
//! file or a partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::email::ImapConfig;
use crate::services::{PerPage, QueryDefaults};

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Top-level gateway settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// IMAP transport settings.
    pub imap: ImapSettings,
    /// SMTP verification settings.
    pub smtp: SmtpSettings,
    /// Listing defaults.
    pub query: QuerySettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// IMAP transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapSettings {
    /// Implicit TLS (true) or plaintext (false).
    pub use_tls: bool,
    /// Connect plus login timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for ImapSettings {
    fn default() -> Self {
        Self {
            use_tls: true,
            connect_timeout_secs: 30,
        }
    }
}

/// SMTP verification configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    /// Verify SMTP at login when the credentials carry an SMTP endpoint.
    pub verify_on_connect: bool,
    /// Implicit TLS (true) or STARTTLS (false).
    pub use_tls: bool,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            verify_on_connect: true,
            use_tls: true,
        }
    }
}

/// Defaults for message listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Mailbox opened when a request names none.
    pub default_mailbox: String,
    /// Page size when a request gives none.
    pub default_per_page: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_mailbox: "INBOX".to_string(),
            default_per_page: 10,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Reads and validates settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Like [`load`](Self::load), but returns defaults when the file is missing.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Platform settings location, if a home directory can be resolved.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "mailbridge")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Rejects values that cannot be used.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.query.default_per_page == 0 {
            return Err(SettingsError::Invalid(
                "query.default_per_page must be at least 1".to_string(),
            ));
        }
        if self.query.default_mailbox.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "query.default_mailbox cannot be empty".to_string(),
            ));
        }
        if self.imap.connect_timeout_secs == 0 {
            return Err(SettingsError::Invalid(
                "imap.connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Transport configuration for the IMAP connector.
    pub fn imap_config(&self) -> ImapConfig {
        ImapConfig {
            use_tls: self.imap.use_tls,
            connect_timeout: Duration::from_secs(self.imap.connect_timeout_secs),
            verify_smtp: self.smtp.verify_on_connect,
            smtp_use_tls: self.smtp.use_tls,
        }
    }

    /// Listing defaults for the query services.
    pub fn query_defaults(&self) -> QueryDefaults {
        QueryDefaults {
            mailbox: self.query.default_mailbox.clone(),
            per_page: PerPage::Limited(self.query.default_per_page),
        }
    }
}
