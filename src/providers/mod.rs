//! External collaborator implementations.
//!
//! - [`email`] - Mail backends (IMAP/SMTP, in-memory)

pub mod email;
