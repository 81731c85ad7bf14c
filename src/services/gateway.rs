//! Token-addressed entry point.
//!
//! [`Gateway`] resolves a bearer token to its session and dispatches to the
//! mailbox, query, and mutation services. Every session-scoped call made with
//! an unknown token fails with [`GatewayError::InvalidToken`].

use std::sync::Arc;

use super::{
    sort_summaries, GatewayError, GetRequest, ListRequest, MailboxService, MutationService,
    QueryDefaults, QueryService, Result, Session, SessionRegistry, UpdateRequest,
};
use crate::domain::{
    Credentials, MailboxTree, MessageDetail, MessageListing, OwnedMailbox, SessionToken,
};
use crate::providers::email::Connector;

/// Session-scoped mail operations.
pub struct Gateway {
    registry: SessionRegistry,
    defaults: QueryDefaults,
}

impl Gateway {
    /// Creates a gateway with default query settings.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_registry(SessionRegistry::new(connector), QueryDefaults::default())
    }

    pub fn with_registry(registry: SessionRegistry, defaults: QueryDefaults) -> Self {
        Self { registry, defaults }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn defaults(&self) -> &QueryDefaults {
        &self.defaults
    }

    async fn session(&self, token: &SessionToken) -> Result<Arc<Session>> {
        self.registry
            .get(token)
            .await
            .ok_or(GatewayError::InvalidToken)
    }

    /// Authenticates and returns the session token, reusing a live session
    /// for the same account.
    pub async fn login(&self, credentials: &Credentials) -> Result<SessionToken> {
        let session = self.registry.connect(credentials).await?;
        Ok(session.token().clone())
    }

    /// Ends the session; unknown tokens are accepted silently.
    pub async fn logout(&self, token: &SessionToken) {
        self.registry.destroy(token).await;
    }

    pub async fn list_mailboxes(&self, token: &SessionToken) -> Result<MailboxTree> {
        let session = self.session(token).await?;
        MailboxService::new(&session).get_all().await
    }

    /// Looks up a mailbox by full name; `None` if no node matches exactly.
    pub async fn get_mailbox(
        &self,
        token: &SessionToken,
        full_name: &str,
    ) -> Result<Option<OwnedMailbox>> {
        let session = self.session(token).await?;
        MailboxService::new(&session).get(full_name).await
    }

    pub async fn create_mailbox(&self, token: &SessionToken, full_name: &str) -> Result<()> {
        let session = self.session(token).await?;
        MailboxService::new(&session).create(full_name).await
    }

    /// Renames a mailbox; without a new name nothing happens.
    pub async fn rename_mailbox(
        &self,
        token: &SessionToken,
        full_name: &str,
        new_name: Option<&str>,
    ) -> Result<()> {
        let session = self.session(token).await?;
        MailboxService::new(&session)
            .update(full_name, new_name)
            .await
    }

    pub async fn delete_mailbox(&self, token: &SessionToken, full_name: &str) -> Result<()> {
        let session = self.session(token).await?;
        MailboxService::new(&session).delete(full_name).await
    }

    /// Lists one page of messages, sorted if the request asks for it.
    pub async fn list_messages(
        &self,
        token: &SessionToken,
        request: &ListRequest,
    ) -> Result<MessageListing> {
        let session = self.session(token).await?;
        let mut listing = QueryService::new(&session, &self.defaults)
            .get_all(request)
            .await?;
        if let Some(sort) = request.sort {
            sort_summaries(&mut listing.messages, sort)?;
        }
        Ok(listing)
    }

    pub async fn get_message(
        &self,
        token: &SessionToken,
        request: &GetRequest,
    ) -> Result<MessageDetail> {
        let session = self.session(token).await?;
        QueryService::new(&session, &self.defaults)
            .get(request)
            .await
    }

    pub async fn update_message(
        &self,
        token: &SessionToken,
        request: &UpdateRequest,
    ) -> Result<MessageDetail> {
        let session = self.session(token).await?;
        MutationService::new(&session, &self.defaults)
            .update(request)
            .await
    }

    /// Tears down every session. Call once at process exit.
    pub async fn shutdown(&self) -> usize {
        self.registry.destroy_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Endpoint;
    use crate::providers::email::{InMemoryBackend, InMemoryConnector};

    fn gateway() -> Gateway {
        let backend = InMemoryBackend::new();
        backend.add_mailbox("INBOX");
        Gateway::new(Arc::new(
            InMemoryConnector::new(backend).with_account("me@example.com", "pw"),
        ))
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let gateway = gateway();
        let token = SessionToken::from("nope");

        let result = gateway.list_mailboxes(&token).await;
        assert_eq!(result.unwrap_err(), GatewayError::InvalidToken);
        assert!(gateway
            .list_messages(&token, &ListRequest::default())
            .await
            .unwrap_err()
            .is_unauthorized());
    }

    #[tokio::test]
    async fn logout_always_succeeds() {
        let gateway = gateway();
        let credentials =
            Credentials::new("me@example.com", "pw", Endpoint::new("imap.test", 993));
        let token = gateway.login(&credentials).await.unwrap();

        gateway.logout(&token).await;
        gateway.logout(&token).await;
        assert!(gateway.registry().is_empty().await);
    }
}
