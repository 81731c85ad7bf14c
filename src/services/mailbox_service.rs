//! Mailbox hierarchy operations for one session.

use super::{GatewayError, Result, Session};
use crate::domain::{MailboxTree, OwnedMailbox};

/// Mailbox management bound to a session's connection.
pub struct MailboxService<'a> {
    session: &'a Session,
}

impl<'a> MailboxService<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Fetches a fresh snapshot of the mailbox hierarchy.
    ///
    /// Backend order is preserved; nothing is sorted.
    pub async fn get_all(&self) -> Result<MailboxTree> {
        let native = {
            let mut connection = self.session.connection().await;
            connection.list_mailboxes().await?
        };
        Ok(MailboxTree::from_native(&native))
    }

    /// Finds a mailbox by its full name.
    pub async fn get(&self, full_name: &str) -> Result<Option<OwnedMailbox>> {
        let tree = self.get_all().await?;
        let id = tree.find(full_name).map(|node| node.id());
        Ok(id.map(|id| tree.into_mailbox(id)))
    }

    /// Creates a mailbox.
    pub async fn create(&self, full_name: &str) -> Result<()> {
        validate_name(full_name)?;
        let mut connection = self.session.connection().await;
        connection
            .create_mailbox(full_name)
            .await
            .map_err(GatewayError::from_mailbox_op)?;
        tracing::info!(account = %self.session.identity(), mailbox = %full_name, "Mailbox created");
        Ok(())
    }

    /// Renames a mailbox when a new name is given; does nothing otherwise.
    ///
    /// Children are renamed by the backend. Trees fetched earlier are stale
    /// afterwards.
    pub async fn update(&self, full_name: &str, new_name: Option<&str>) -> Result<()> {
        let Some(new_name) = new_name else {
            return Ok(());
        };
        validate_name(new_name)?;

        let mut connection = self.session.connection().await;
        connection
            .rename_mailbox(full_name, new_name)
            .await
            .map_err(GatewayError::from_mailbox_op)?;
        tracing::info!(
            account = %self.session.identity(),
            from = %full_name,
            to = %new_name,
            "Mailbox renamed"
        );
        Ok(())
    }

    /// Deletes a mailbox, subject to backend policy.
    pub async fn delete(&self, full_name: &str) -> Result<()> {
        let mut connection = self.session.connection().await;
        connection
            .delete_mailbox(full_name)
            .await
            .map_err(GatewayError::from_mailbox_op)?;
        tracing::info!(account = %self.session.identity(), mailbox = %full_name, "Mailbox deleted");
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(GatewayError::Validation(
            "mailbox name cannot be empty".to_string(),
        ));
    }
    Ok(())
}
