//! Account credentials and server endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A host/port pair for one backend server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl Endpoint {
    /// Creates a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns `host:port` for socket connection.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Login payload for one mail account.
///
/// The email address is the account identity: at most one live session
/// exists per identity.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account email address (also the login user name).
    pub email: String,
    /// Account password or app-specific password.
    pub password: String,
    /// Mail-access (IMAP) endpoint.
    pub imap: Endpoint,
    /// Mail-transfer (SMTP) endpoint, verified at connect time when present.
    #[serde(default)]
    pub smtp: Option<Endpoint>,
}

impl Credentials {
    /// Creates credentials without an SMTP endpoint.
    pub fn new(email: impl Into<String>, password: impl Into<String>, imap: Endpoint) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            imap,
            smtp: None,
        }
    }

    /// Sets the SMTP endpoint.
    pub fn with_smtp(mut self, smtp: Endpoint) -> Self {
        self.smtp = Some(smtp);
        self
    }
}

// Keeps the password out of logs and panic messages.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("imap", &self.imap)
            .field("smtp", &self.smtp)
            .finish()
    }
}
