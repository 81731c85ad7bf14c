//! Gateway error type.
//!
//! Backend failures arrive as [`ProviderError`]s; how they surface depends on
//! the operation that hit them, so besides the general [`From`] conversion
//! there are context-specific mappings for connecting, mailbox management,
//! and single-message fetches.

use thiserror::Error;

use crate::providers::email::ProviderError;

/// Errors returned by gateway operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Credentials were rejected at connect time.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The presented token does not belong to a live session.
    #[error("invalid token")]
    InvalidToken,

    /// Transport failure talking to the backend; retry by reconnecting.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The backend refused a mailbox create, rename, delete, or open.
    #[error("mailbox operation failed: {0}")]
    MailboxOperation(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// Caller input was rejected before reaching the backend.
    #[error("validation error: {0}")]
    Validation(String),

    /// The backend failed a command outside the cases above.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Returns true if an upstream surface should answer "unauthorized".
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::InvalidToken)
    }

    /// Maps a failure while opening a connection.
    pub(crate) fn from_connect(error: ProviderError) -> Self {
        match error {
            ProviderError::Authentication(msg) => Self::Authentication(msg),
            ProviderError::Connection(msg)
            | ProviderError::Rejected(msg)
            | ProviderError::NotFound(msg) => Self::Connectivity(msg),
            other => other.into(),
        }
    }

    /// Maps a failure during mailbox management.
    pub(crate) fn from_mailbox_op(error: ProviderError) -> Self {
        tracing::warn!(error = %error, "Mailbox operation failed");
        match error {
            ProviderError::Rejected(msg)
            | ProviderError::NotFound(msg)
            | ProviderError::InvalidRequest(msg) => Self::MailboxOperation(msg),
            other => other.into(),
        }
    }

    /// Maps a failure while fetching one message.
    pub(crate) fn from_message_fetch(error: ProviderError) -> Self {
        match error {
            ProviderError::NotFound(msg) | ProviderError::Decode(msg) => {
                Self::MessageNotFound(msg)
            }
            other => other.into(),
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(error: ProviderError) -> Self {
        if matches!(error, ProviderError::Connection(_) | ProviderError::Internal(_)) {
            tracing::error!(error = %error, "Backend failure");
        }
        match error {
            ProviderError::Authentication(msg) => Self::Authentication(msg),
            ProviderError::Connection(msg) => Self::Connectivity(msg),
            ProviderError::InvalidRequest(msg) => Self::Validation(msg),
            ProviderError::NotFound(msg)
            | ProviderError::Rejected(msg)
            | ProviderError::Decode(msg) => Self::Backend(msg),
            ProviderError::Internal(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_kinds() {
        assert!(GatewayError::InvalidToken.is_unauthorized());
        assert!(GatewayError::Authentication("x".to_string()).is_unauthorized());
        assert!(!GatewayError::Connectivity("x".to_string()).is_unauthorized());
        assert!(!GatewayError::Validation("x".to_string()).is_unauthorized());
    }

    #[test]
    fn connect_mapping() {
        assert_eq!(
            GatewayError::from_connect(ProviderError::Authentication("bad".to_string())),
            GatewayError::Authentication("bad".to_string())
        );
        assert_eq!(
            GatewayError::from_connect(ProviderError::Connection("refused".to_string())),
            GatewayError::Connectivity("refused".to_string())
        );
    }

    #[test]
    fn mailbox_mapping() {
        assert_eq!(
            GatewayError::from_mailbox_op(ProviderError::Rejected("exists".to_string())),
            GatewayError::MailboxOperation("exists".to_string())
        );
        assert_eq!(
            GatewayError::from_mailbox_op(ProviderError::Connection("eof".to_string())),
            GatewayError::Connectivity("eof".to_string())
        );
    }

    #[test]
    fn message_fetch_mapping() {
        assert!(matches!(
            GatewayError::from_message_fetch(ProviderError::Decode("bad header".to_string())),
            GatewayError::MessageNotFound(_)
        ));
        assert!(matches!(
            GatewayError::from_message_fetch(ProviderError::Rejected("no".to_string())),
            GatewayError::Backend(_)
        ));
    }

    #[test]
    fn error_display() {
        assert_eq!(GatewayError::InvalidToken.to_string(), "invalid token");
        assert_eq!(
            GatewayError::Validation("page must be at least 1".to_string()).to_string(),
            "validation error: page must be at least 1"
        );
    }
}
