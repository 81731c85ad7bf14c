//! Structured search criteria.
//!
//! [`QueryCriteria`] is the already-compiled form of a caller's filter
//! expression. The core passes it through to the backend search operation
//! untouched; only the connection implementation interprets it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A boolean/string expression tree understood by the backend search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum QueryCriteria {
    /// Matches every message.
    #[default]
    All,
    /// Messages with `\Seen`.
    Seen,
    /// Messages without `\Seen`.
    Unseen,
    /// Messages with `\Flagged`.
    Flagged,
    /// Messages with `\Answered`.
    Answered,
    /// Messages with `\Deleted`.
    Deleted,
    /// Messages with `\Draft`.
    Draft,
    /// Messages carrying a keyword.
    Keyword(String),
    /// Sender contains the string.
    From(String),
    /// Recipient contains the string.
    To(String),
    /// Subject contains the string.
    Subject(String),
    /// Body contains the string.
    Body(String),
    /// Header or body contains the string.
    Text(String),
    /// Internal date on or after the day.
    Since(NaiveDate),
    /// Internal date before the day.
    Before(NaiveDate),
    /// Internal date within the day.
    On(NaiveDate),
    /// Negation.
    Not(Box<QueryCriteria>),
    /// Conjunction; an empty list matches everything.
    And(Vec<QueryCriteria>),
    /// Disjunction of two expressions.
    Or(Box<QueryCriteria>, Box<QueryCriteria>),
}

impl QueryCriteria {
    /// Builds `NOT criteria`.
    pub fn not(criteria: QueryCriteria) -> Self {
        Self::Not(Box::new(criteria))
    }

    /// Builds `left OR right`.
    pub fn or(left: QueryCriteria, right: QueryCriteria) -> Self {
        Self::Or(Box::new(left), Box::new(right))
    }

    /// Returns true for the match-all default.
    pub fn is_match_all(&self) -> bool {
        match self {
            Self::All => true,
            Self::And(items) => items.iter().all(Self::is_match_all),
            _ => false,
        }
    }
}
