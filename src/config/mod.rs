//! Configuration and settings management.
//!
//! This module provides the gateway settings types and loading. Settings are
//! stored as JSON; see [`Settings::default_path`].

mod settings;

pub use settings::{
    ImapSettings, LoggingSettings, QuerySettings, Settings, SettingsError, SmtpSettings,
};
