//! Domain layer types for the mail gateway.
//!
//! This module contains the plain data types shared by the providers and
//! services: identifiers, credentials, the mailbox hierarchy, message
//! projections, and search criteria.

mod account;
mod criteria;
mod mailbox;
mod message;
mod types;

pub use account::{Credentials, Endpoint};
pub use criteria::QueryCriteria;
pub use mailbox::{
    MailboxId, MailboxNode, MailboxTree, NativeMailbox, OwnedMailbox, DEFAULT_DELIMITER,
};
pub use message::{BodyFormat, MessageDetail, MessageListing, MessageSummary, SEEN_FLAG};
pub use types::{MessageUid, SessionToken};
