//! Mail backend implementations.
//!
//! This module contains the collaborator traits the gateway core talks to and
//! their implementations:
//!
//! - [`ImapConnector`] / [`ImapConnection`] - IMAP with optional SMTP verification
//! - [`InMemoryConnector`] / [`InMemoryConnection`] - in-memory backend that records calls
//!
//! # Architecture
//!
//! A [`Connector`] turns [`Credentials`](crate::domain::Credentials) into an
//! authenticated [`MailConnection`]. The connection exposes the handful of
//! protocol operations the services need: mailbox management, opening a
//! mailbox, searching, fetching, storing flags, copying, and moving. Message
//! data comes back raw and is decoded by the helpers in [`mime`].
//!
//! # Example
//!
//! ```ignore
//! use mailbridge::domain::{Credentials, Endpoint, QueryCriteria};
//! use mailbridge::providers::email::{Connector, ImapConnector};
//!
//! let connector = ImapConnector::default();
//! let credentials = Credentials::new("me@example.com", "secret", Endpoint::new("imap.example.com", 993));
//! let mut connection = connector.connect(&credentials).await?;
//! connection.open_mailbox("INBOX", true).await?;
//! let unseen = connection.search(&QueryCriteria::Unseen).await?;
//! ```

mod imap;
pub mod mime;
mod mock;
mod traits;

pub use imap::{ImapConfig, ImapConnection, ImapConnector};
pub use mock::{
    build_raw_message, BackendCall, InMemoryBackend, InMemoryConnection, InMemoryConnector,
    MEMORY_DELIMITER,
};
pub use traits::{
    Connector, FetchedHeader, FetchedMessage, FlagKind, MailConnection, MailboxStatus,
    ProviderError, Result, StoreOperation,
};

#[cfg(test)]
pub use traits::MockConnector;
