//! Gateway core services.
//!
//! This module contains the session registry and the services that operate
//! through a session's connection.
//!
//! # Architecture
//!
//! ```text
//!  Caller (token)
//!       |
//!       v
//!    Gateway  -- resolves token -->  SessionRegistry
//!       |
//!       v
//!  MailboxService / QueryService / MutationService
//!       |
//!       v
//!  MailConnection (providers::email)
//! ```
//!
//! # Services Overview
//!
//! - [`SessionRegistry`]: Maps tokens and account identities to live connections
//! - [`MailboxService`]: Mailbox hierarchy snapshot and management
//! - [`QueryService`]: Paginated listings and single-message fetches
//! - [`MutationService`]: Flag, keyword, and location changes
//! - [`Gateway`]: Token-addressed facade over all of the above

mod error;
mod gateway;
mod mailbox_service;
mod mutation_service;
mod query_service;
mod session_registry;

pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use mailbox_service::MailboxService;
pub use mutation_service::{
    BoxAction, BoxChange, Destinations, FlagChange, MutationService, UpdateRequest,
};
pub use query_service::{
    compare_keys, sort_summaries, GetRequest, ListRequest, Pagination, PerPage, QueryDefaults,
    QueryService, Sort, SortField, SortKey, SortOrder, UNBOUNDED_LITERAL,
};
pub use session_registry::{Session, SessionRegistry};
