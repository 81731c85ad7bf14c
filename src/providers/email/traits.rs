//! Mail backend trait definitions.
//!
//! This module defines the boundary between the gateway core and the
//! protocol implementation: [`Connector`] opens an authenticated channel and
//! [`MailConnection`] issues sequential protocol operations over it. The core
//! never speaks the wire protocol itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Credentials, MessageUid, NativeMailbox, QueryCriteria};

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors reported by a mail backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network, TLS, or transport failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Requested mailbox or message does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The server refused a command (NO/BAD response).
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// Message data could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Which flag namespace a store operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
    /// Server-defined system flags (`\Seen`, `\Answered`, ...).
    Flag,
    /// Free-form keywords.
    Keyword,
}

impl FlagKind {
    /// Returns true if `flag` belongs to this namespace.
    pub fn contains(&self, flag: &str) -> bool {
        let is_system = flag.starts_with('\\');
        match self {
            FlagKind::Flag => is_system,
            FlagKind::Keyword => !is_system,
        }
    }

    /// Spells a value the way the backend stores it: system flags gain a
    /// leading backslash when missing, keywords are kept verbatim.
    pub fn normalize(&self, value: &str) -> String {
        match self {
            FlagKind::Flag if !value.starts_with('\\') => format!("\\{}", value),
            _ => value.to_string(),
        }
    }
}

/// A flag mutation issued against one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum StoreOperation {
    /// Replace the set with exactly these values.
    Set(Vec<String>),
    /// Add these values.
    Add(Vec<String>),
    /// Remove these values.
    Remove(Vec<String>),
    /// Remove every value of the targeted kind.
    Clear,
}

/// Header-only fetch result for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedHeader {
    /// Message identifier.
    pub uid: MessageUid,
    /// Flags and keywords.
    pub flags: Vec<String>,
    /// Raw RFC 5322 header block, if the server returned one.
    pub header: Option<Vec<u8>>,
}

/// Full fetch result for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Message identifier.
    pub uid: MessageUid,
    /// Flags and keywords.
    pub flags: Vec<String>,
    /// Raw RFC 5322 message, if the server returned one.
    pub raw: Option<Vec<u8>>,
}

/// Status of a freshly opened mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Mailbox name as opened.
    pub name: String,
    /// Number of messages.
    pub exists: u32,
    /// Whether the mailbox was opened read-only.
    pub read_only: bool,
}

/// An authenticated channel to one backend account.
///
/// Commands run strictly one after another: every method takes `&mut self`,
/// so callers must hold exclusive access for the whole protocol exchange.
/// Operations on messages apply to the most recently opened mailbox.
#[async_trait]
pub trait MailConnection: Send {
    /// Returns the nested mailbox hierarchy in server order.
    async fn list_mailboxes(&mut self) -> Result<Vec<NativeMailbox>>;

    /// Creates a mailbox with the given full name.
    async fn create_mailbox(&mut self, full_name: &str) -> Result<()>;

    /// Renames a mailbox.
    async fn rename_mailbox(&mut self, from: &str, to: &str) -> Result<()>;

    /// Deletes a mailbox.
    async fn delete_mailbox(&mut self, full_name: &str) -> Result<()>;

    /// Opens (selects) a mailbox; `read_only` avoids implicit `\Seen` changes.
    async fn open_mailbox(&mut self, full_name: &str, read_only: bool) -> Result<MailboxStatus>;

    /// Searches the open mailbox, returning identifiers in ascending order.
    async fn search(&mut self, criteria: &QueryCriteria) -> Result<Vec<MessageUid>>;

    /// Fetches headers and flags for the given identifiers.
    async fn fetch_headers(&mut self, uids: &[MessageUid]) -> Result<Vec<FetchedHeader>>;

    /// Fetches one full message, or `None` if it does not exist.
    async fn fetch_message(
        &mut self,
        uid: MessageUid,
        mark_seen: bool,
    ) -> Result<Option<FetchedMessage>>;

    /// Applies a flag mutation to one message.
    async fn store(&mut self, uid: MessageUid, kind: FlagKind, operation: StoreOperation)
        -> Result<()>;

    /// Copies one message into another mailbox.
    async fn copy(&mut self, uid: MessageUid, destination: &str) -> Result<()>;

    /// Moves one message into another mailbox.
    async fn move_to(&mut self, uid: MessageUid, destination: &str) -> Result<()>;

    /// Logs out and closes the channel.
    async fn close(&mut self) -> Result<()>;
}

/// Opens authenticated connections.
///
/// Implementations fail with [`ProviderError::Authentication`] on rejected
/// credentials and [`ProviderError::Connection`] on transport failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection for the account.
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn MailConnection>>;
}
