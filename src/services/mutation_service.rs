//! Message mutation: flags, keywords, and location.
//!
//! An update reads the message once to get a baseline, issues the requested
//! changes, and returns a projection computed locally from the baseline. The
//! message is not re-fetched, so the projection is the intended post-state.
//! Sub-operations are not rolled back when a later one fails.

use serde::{Deserialize, Serialize};

use super::query_service::{fetch_detail, QueryDefaults};
use super::{GatewayError, Result, Session};
use crate::domain::{BodyFormat, MessageDetail, MessageUid};
use crate::providers::email::{FlagKind, MailConnection, StoreOperation};

/// A change to one flag namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagChange {
    /// Replace the whole set; empty clears it.
    Replace(Vec<String>),
    /// Add and/or remove individual values.
    Delta {
        #[serde(default)]
        add: Option<Vec<String>>,
        #[serde(default)]
        remove: Option<Vec<String>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxAction {
    Copy,
    Move,
}

/// One destination path or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destinations {
    One(String),
    Many(Vec<String>),
}

impl Destinations {
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::One(path) => std::slice::from_ref(path),
            Self::Many(paths) => paths,
        }
    }
}

/// Copy or move request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxChange {
    pub action: BoxAction,
    pub destination: Destinations,
}

impl BoxChange {
    /// Copies into every listed mailbox.
    pub fn copy_to<I, S>(destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: BoxAction::Copy,
            destination: Destinations::Many(destinations.into_iter().map(Into::into).collect()),
        }
    }

    /// Moves into one mailbox.
    pub fn move_to(destination: impl Into<String>) -> Self {
        Self {
            action: BoxAction::Move,
            destination: Destinations::One(destination.into()),
        }
    }

    /// Checks destination counts: copy needs at least one, move exactly one.
    pub fn validate(&self) -> Result<()> {
        let destinations = self.destination.as_slice();
        if destinations.iter().any(|d| d.trim().is_empty()) {
            return Err(GatewayError::Validation(
                "destination mailbox cannot be empty".to_string(),
            ));
        }
        match (self.action, destinations.len()) {
            (_, 0) => Err(GatewayError::Validation(
                "at least one destination is required".to_string(),
            )),
            (BoxAction::Move, n) if n > 1 => Err(GatewayError::Validation(format!(
                "move accepts exactly one destination, got {}",
                n
            ))),
            _ => Ok(()),
        }
    }
}

/// Parameters for a message update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub mailbox: Option<String>,
    pub id: MessageUid,
    #[serde(default)]
    pub flags: Option<FlagChange>,
    #[serde(default)]
    pub keywords: Option<FlagChange>,
    #[serde(default)]
    pub new_box: Option<BoxChange>,
    /// Body rendering of the returned projection.
    #[serde(default)]
    pub format: BodyFormat,
}

impl UpdateRequest {
    pub fn new(id: MessageUid) -> Self {
        Self {
            mailbox: None,
            id,
            flags: None,
            keywords: None,
            new_box: None,
            format: BodyFormat::default(),
        }
    }

    fn has_changes(&self) -> bool {
        self.flags.is_some() || self.keywords.is_some() || self.new_box.is_some()
    }
}

/// Message mutations bound to a session's connection.
pub struct MutationService<'a> {
    session: &'a Session,
    defaults: &'a QueryDefaults,
}

impl<'a> MutationService<'a> {
    pub fn new(session: &'a Session, defaults: &'a QueryDefaults) -> Self {
        Self { session, defaults }
    }

    /// Applies the requested changes and returns the projected message.
    ///
    /// Destination counts are validated before anything is sent to the
    /// backend.
    pub async fn update(&self, request: &UpdateRequest) -> Result<MessageDetail> {
        if let Some(change) = &request.new_box {
            change.validate()?;
        }
        let mailbox = request.mailbox.as_deref().unwrap_or(&self.defaults.mailbox);

        let mut guard = self.session.connection().await;
        let connection: &mut dyn MailConnection = &mut **guard;

        let mut detail = fetch_detail(connection, mailbox, request.id, false, request.format).await?;
        if !request.has_changes() {
            return Ok(detail);
        }

        connection
            .open_mailbox(mailbox, false)
            .await
            .map_err(GatewayError::from_mailbox_op)?;

        let flags = &mut detail.summary.flags;
        if let Some(change) = &request.flags {
            apply_flag_change(connection, request.id, FlagKind::Flag, change, flags).await?;
        }
        if let Some(change) = &request.keywords {
            apply_flag_change(connection, request.id, FlagKind::Keyword, change, flags).await?;
        }

        if let Some(change) = &request.new_box {
            let destinations = change.destination.as_slice();
            match change.action {
                BoxAction::Copy => {
                    for destination in destinations {
                        connection
                            .copy(request.id, destination)
                            .await
                            .map_err(GatewayError::from_mailbox_op)?;
                    }
                }
                BoxAction::Move => {
                    if let Some(destination) = destinations.first() {
                        connection
                            .move_to(request.id, destination)
                            .await
                            .map_err(GatewayError::from_mailbox_op)?;
                    }
                }
            }
        }

        tracing::info!(
            account = %self.session.identity(),
            mailbox = %mailbox,
            id = %request.id,
            "Message updated"
        );
        Ok(detail)
    }
}

/// Issues one flag change and folds it into the projected set.
///
/// For a delta, supplying `remove` narrows the projected baseline of this
/// namespace to the values that appear in `add`.
async fn apply_flag_change(
    connection: &mut dyn MailConnection,
    uid: MessageUid,
    kind: FlagKind,
    change: &FlagChange,
    projected: &mut Vec<String>,
) -> Result<()> {
    match change {
        FlagChange::Replace(values) => {
            let operation = if values.is_empty() {
                StoreOperation::Clear
            } else {
                StoreOperation::Set(values.clone())
            };
            connection.store(uid, kind, operation).await?;

            projected.retain(|flag| !kind.contains(flag));
            union_into(projected, values.iter().map(|v| kind.normalize(v)));
        }
        FlagChange::Delta { add, remove } => {
            let added: Vec<String> = add
                .iter()
                .flatten()
                .map(|token| capitalize(token))
                .collect();

            if !added.is_empty() {
                connection
                    .store(uid, kind, StoreOperation::Add(added.clone()))
                    .await?;
            }
            if let Some(remove) = remove.as_ref().filter(|values| !values.is_empty()) {
                connection
                    .store(uid, kind, StoreOperation::Remove(remove.clone()))
                    .await?;
            }

            let added: Vec<String> = added.iter().map(|v| kind.normalize(v)).collect();
            if remove.is_some() {
                projected.retain(|flag| !kind.contains(flag) || added.contains(flag));
            }
            union_into(projected, added);
        }
    }
    Ok(())
}

fn union_into(set: &mut Vec<String>, values: impl IntoIterator<Item = String>) {
    for value in values {
        if !set.contains(&value) {
            set.push(value);
        }
    }
}

/// Uppercases the first letter and lowercases the rest, keeping a leading
/// backslash.
fn capitalize(token: &str) -> String {
    let (prefix, word) = match token.strip_prefix('\\') {
        Some(rest) => ("\\", rest),
        None => ("", token),
    };
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => format!(
            "{}{}{}",
            prefix,
            first.to_uppercase(),
            chars.as_str().to_lowercase()
        ),
        None => prefix.to_string(),
    }
}
