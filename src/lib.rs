//! mailbridge - A session-scoped gateway to remote IMAP mailboxes
//!
//! This crate maps bearer tokens to live backend connections and exposes
//! mailbox hierarchy, message listing, message fetch, and message mutation
//! operations through them.

pub mod config;
pub mod domain;
pub mod providers;
pub mod services;

pub use services::{Gateway, GatewayError};
