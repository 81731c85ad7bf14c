//! In-memory mail backend.
//!
//! [`InMemoryConnector`] hands out [`InMemoryConnection`] handles over a
//! shared [`InMemoryBackend`]. The backend keeps mailboxes and messages in
//! memory and records every protocol call so tests can assert the exact
//! sequence a service issued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::imap::{finish_smtp_verification, nest_mailboxes, normalize_flags, ListedName};
use super::mime::decode_header;
use super::{
    Connector, FetchedHeader, FetchedMessage, FlagKind, MailConnection, MailboxStatus,
    ProviderError, Result, StoreOperation,
};
use crate::domain::{Credentials, MessageUid, NativeMailbox, QueryCriteria, SEEN_FLAG};

/// Hierarchy separator used by the in-memory backend.
pub const MEMORY_DELIMITER: &str = "/";

/// One protocol call as observed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    ListMailboxes,
    CreateMailbox(String),
    RenameMailbox { from: String, to: String },
    DeleteMailbox(String),
    OpenMailbox { name: String, read_only: bool },
    Search(QueryCriteria),
    FetchHeaders(Vec<MessageUid>),
    FetchMessage { uid: MessageUid, mark_seen: bool },
    Store {
        uid: MessageUid,
        kind: FlagKind,
        operation: StoreOperation,
    },
    Copy { uid: MessageUid, destination: String },
    Move { uid: MessageUid, destination: String },
    Close,
}

impl BackendCall {
    /// Short operation name, used to key injected failures.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::ListMailboxes => "list",
            Self::CreateMailbox(_) => "create",
            Self::RenameMailbox { .. } => "rename",
            Self::DeleteMailbox(_) => "delete",
            Self::OpenMailbox { .. } => "open",
            Self::Search(_) => "search",
            Self::FetchHeaders(_) => "fetch_headers",
            Self::FetchMessage { .. } => "fetch_message",
            Self::Store { .. } => "store",
            Self::Copy { .. } => "copy",
            Self::Move { .. } => "move",
            Self::Close => "close",
        }
    }

    /// Returns true for calls that change server state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateMailbox(_)
                | Self::RenameMailbox { .. }
                | Self::DeleteMailbox(_)
                | Self::Store { .. }
                | Self::Copy { .. }
                | Self::Move { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    uid: MessageUid,
    flags: Vec<String>,
    raw: Vec<u8>,
}

#[derive(Debug, Clone)]
struct StoredMailbox {
    full_name: String,
    attributes: Vec<String>,
    messages: Vec<StoredMessage>,
    next_uid: u32,
}

impl StoredMailbox {
    fn new(full_name: &str) -> Self {
        Self {
            full_name: full_name.to_string(),
            attributes: Vec::new(),
            messages: Vec::new(),
            next_uid: 1,
        }
    }

    fn append(&mut self, raw: Vec<u8>, flags: Vec<String>) -> MessageUid {
        let uid = MessageUid(self.next_uid);
        self.next_uid += 1;
        self.messages.push(StoredMessage { uid, flags, raw });
        uid
    }

    fn message_mut(&mut self, uid: MessageUid) -> Option<&mut StoredMessage> {
        self.messages.iter_mut().find(|message| message.uid == uid)
    }
}

#[derive(Debug, Default)]
struct BackendState {
    mailboxes: Vec<StoredMailbox>,
    calls: Vec<BackendCall>,
    failures: HashMap<&'static str, ProviderError>,
}

impl BackendState {
    fn mailbox(&self, full_name: &str) -> Option<&StoredMailbox> {
        self.mailboxes.iter().find(|m| m.full_name == full_name)
    }

    fn mailbox_mut(&mut self, full_name: &str) -> Option<&mut StoredMailbox> {
        self.mailboxes.iter_mut().find(|m| m.full_name == full_name)
    }

    fn require_mailbox_mut(&mut self, full_name: &str) -> Result<&mut StoredMailbox> {
        self.mailbox_mut(full_name)
            .ok_or_else(|| ProviderError::Rejected(format!("mailbox does not exist: {}", full_name)))
    }
}

/// Shared in-memory mail store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a mailbox if it does not exist yet.
    pub fn add_mailbox(&self, full_name: &str) {
        let mut state = self.lock();
        if state.mailbox(full_name).is_none() {
            state.mailboxes.push(StoredMailbox::new(full_name));
        }
    }

    /// Sets the attributes reported for a mailbox.
    pub fn set_mailbox_attributes(&self, full_name: &str, attributes: &[&str]) {
        if let Some(mailbox) = self.lock().mailbox_mut(full_name) {
            mailbox.attributes = attributes.iter().map(|s| s.to_string()).collect();
        }
    }

    /// Appends a message to a mailbox, creating the mailbox if needed.
    pub fn add_message(&self, mailbox: &str, raw: Vec<u8>, flags: &[&str]) -> MessageUid {
        let mut state = self.lock();
        if state.mailbox(mailbox).is_none() {
            state.mailboxes.push(StoredMailbox::new(mailbox));
        }
        let flags = flags.iter().map(|s| s.to_string()).collect();
        match state.mailbox_mut(mailbox) {
            Some(stored) => stored.append(raw, flags),
            None => MessageUid(0),
        }
    }

    /// Returns mailbox full names in creation order.
    pub fn mailbox_names(&self) -> Vec<String> {
        self.lock()
            .mailboxes
            .iter()
            .map(|m| m.full_name.clone())
            .collect()
    }

    /// Returns message identifiers in a mailbox.
    pub fn uids(&self, mailbox: &str) -> Vec<MessageUid> {
        self.lock()
            .mailbox(mailbox)
            .map(|m| m.messages.iter().map(|message| message.uid).collect())
            .unwrap_or_default()
    }

    /// Returns the flags of one message.
    pub fn flags(&self, mailbox: &str, uid: MessageUid) -> Option<Vec<String>> {
        self.lock().mailbox(mailbox).and_then(|m| {
            m.messages
                .iter()
                .find(|message| message.uid == uid)
                .map(|message| message.flags.clone())
        })
    }

    /// Makes every subsequent call of the named operation fail.
    ///
    /// Operation names are those returned by [`BackendCall::operation`].
    pub fn fail_on(&self, operation: &'static str, error: ProviderError) {
        self.lock().failures.insert(operation, error);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Returns every call recorded so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Records a call and returns the injected failure for it, if any.
    fn record(&self, call: BackendCall) -> Result<MutexGuard<'_, BackendState>> {
        let mut state = self.lock();
        let failure = state.failures.get(call.operation()).cloned();
        state.calls.push(call);
        match failure {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

/// A connection to the in-memory backend.
#[derive(Debug)]
pub struct InMemoryConnection {
    backend: InMemoryBackend,
    selected: Option<String>,
    closed: Arc<AtomicUsize>,
}

impl InMemoryConnection {
    /// Opens a connection directly on a backend.
    pub fn new(backend: InMemoryBackend) -> Self {
        Self {
            backend,
            selected: None,
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn selected(&self) -> Result<&str> {
        self.selected
            .as_deref()
            .ok_or_else(|| ProviderError::InvalidRequest("no mailbox selected".to_string()))
    }
}

#[async_trait]
impl MailConnection for InMemoryConnection {
    async fn list_mailboxes(&mut self) -> Result<Vec<NativeMailbox>> {
        let state = self.backend.record(BackendCall::ListMailboxes)?;
        let listed = state
            .mailboxes
            .iter()
            .map(|m| ListedName {
                name: m.full_name.clone(),
                delimiter: Some(MEMORY_DELIMITER.to_string()),
                attributes: m.attributes.clone(),
            })
            .collect();
        Ok(nest_mailboxes(listed))
    }

    async fn create_mailbox(&mut self, full_name: &str) -> Result<()> {
        let mut state = self
            .backend
            .record(BackendCall::CreateMailbox(full_name.to_string()))?;
        if state.mailbox(full_name).is_some() {
            return Err(ProviderError::Rejected(format!(
                "mailbox already exists: {}",
                full_name
            )));
        }
        state.mailboxes.push(StoredMailbox::new(full_name));
        Ok(())
    }

    async fn rename_mailbox(&mut self, from: &str, to: &str) -> Result<()> {
        let mut state = self.backend.record(BackendCall::RenameMailbox {
            from: from.to_string(),
            to: to.to_string(),
        })?;
        if state.mailbox(to).is_some() {
            return Err(ProviderError::Rejected(format!("mailbox already exists: {}", to)));
        }
        state.require_mailbox_mut(from)?;

        let child_prefix = format!("{}{}", from, MEMORY_DELIMITER);
        for mailbox in state.mailboxes.iter_mut() {
            if mailbox.full_name == from {
                mailbox.full_name = to.to_string();
            } else if let Some(rest) = mailbox.full_name.strip_prefix(&child_prefix) {
                mailbox.full_name = format!("{}{}{}", to, MEMORY_DELIMITER, rest);
            }
        }
        Ok(())
    }

    async fn delete_mailbox(&mut self, full_name: &str) -> Result<()> {
        let mut state = self
            .backend
            .record(BackendCall::DeleteMailbox(full_name.to_string()))?;
        state.require_mailbox_mut(full_name)?;
        state.mailboxes.retain(|m| m.full_name != full_name);
        if self.selected.as_deref() == Some(full_name) {
            self.selected = None;
        }
        Ok(())
    }

    async fn open_mailbox(&mut self, full_name: &str, read_only: bool) -> Result<MailboxStatus> {
        let mut state = self.backend.record(BackendCall::OpenMailbox {
            name: full_name.to_string(),
            read_only,
        })?;
        let exists = state.require_mailbox_mut(full_name)?.messages.len() as u32;
        self.selected = Some(full_name.to_string());
        Ok(MailboxStatus {
            name: full_name.to_string(),
            exists,
            read_only,
        })
    }

    async fn search(&mut self, criteria: &QueryCriteria) -> Result<Vec<MessageUid>> {
        let selected = self.selected()?.to_string();
        let mut state = self.backend.record(BackendCall::Search(criteria.clone()))?;
        let mailbox = state.require_mailbox_mut(&selected)?;
        let mut uids: Vec<MessageUid> = mailbox
            .messages
            .iter()
            .filter(|message| matches(criteria, message))
            .map(|message| message.uid)
            .collect();
        uids.sort();
        Ok(uids)
    }

    async fn fetch_headers(&mut self, uids: &[MessageUid]) -> Result<Vec<FetchedHeader>> {
        let selected = self.selected()?.to_string();
        let mut state = self
            .backend
            .record(BackendCall::FetchHeaders(uids.to_vec()))?;
        let mailbox = state.require_mailbox_mut(&selected)?;
        Ok(uids
            .iter()
            .filter_map(|uid| mailbox.messages.iter().find(|m| m.uid == *uid))
            .map(|message| FetchedHeader {
                uid: message.uid,
                flags: message.flags.clone(),
                header: Some(header_block(&message.raw).to_vec()),
            })
            .collect())
    }

    async fn fetch_message(
        &mut self,
        uid: MessageUid,
        mark_seen: bool,
    ) -> Result<Option<FetchedMessage>> {
        let selected = self.selected()?.to_string();
        let mut state = self
            .backend
            .record(BackendCall::FetchMessage { uid, mark_seen })?;
        let mailbox = state.require_mailbox_mut(&selected)?;
        Ok(mailbox.message_mut(uid).map(|message| {
            if mark_seen && !message.flags.iter().any(|f| f == SEEN_FLAG) {
                message.flags.push(SEEN_FLAG.to_string());
            }
            FetchedMessage {
                uid,
                flags: message.flags.clone(),
                raw: Some(message.raw.clone()),
            }
        }))
    }

    async fn store(
        &mut self,
        uid: MessageUid,
        kind: FlagKind,
        operation: StoreOperation,
    ) -> Result<()> {
        let selected = self.selected()?.to_string();
        // Invalid values never reach the backend, so they are not recorded.
        let normalized = match &operation {
            StoreOperation::Set(values) => {
                StoreOperation::Set(normalize_flags(kind, values.clone())?)
            }
            StoreOperation::Add(values) => {
                StoreOperation::Add(normalize_flags(kind, values.clone())?)
            }
            StoreOperation::Remove(values) => {
                StoreOperation::Remove(normalize_flags(kind, values.clone())?)
            }
            StoreOperation::Clear => StoreOperation::Clear,
        };
        let mut state = self.backend.record(BackendCall::Store {
            uid,
            kind,
            operation,
        })?;
        let message = state
            .require_mailbox_mut(&selected)?
            .message_mut(uid)
            .ok_or_else(|| ProviderError::NotFound(format!("message {} not found", uid)))?;

        match normalized {
            StoreOperation::Set(values) => {
                message.flags.retain(|flag| !kind.contains(flag));
                for value in values {
                    if !message.flags.contains(&value) {
                        message.flags.push(value);
                    }
                }
            }
            StoreOperation::Add(values) => {
                for value in values {
                    if !message.flags.contains(&value) {
                        message.flags.push(value);
                    }
                }
            }
            StoreOperation::Remove(values) => {
                message.flags.retain(|flag| !values.contains(flag));
            }
            StoreOperation::Clear => message.flags.retain(|flag| !kind.contains(flag)),
        }
        Ok(())
    }

    async fn copy(&mut self, uid: MessageUid, destination: &str) -> Result<()> {
        let selected = self.selected()?.to_string();
        let mut state = self.backend.record(BackendCall::Copy {
            uid,
            destination: destination.to_string(),
        })?;
        let message = state
            .require_mailbox_mut(&selected)?
            .message_mut(uid)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("message {} not found", uid)))?;
        state
            .require_mailbox_mut(destination)?
            .append(message.raw, message.flags);
        Ok(())
    }

    async fn move_to(&mut self, uid: MessageUid, destination: &str) -> Result<()> {
        let selected = self.selected()?.to_string();
        let mut state = self.backend.record(BackendCall::Move {
            uid,
            destination: destination.to_string(),
        })?;
        state.require_mailbox_mut(destination)?;
        let source = state.require_mailbox_mut(&selected)?;
        let position = source
            .messages
            .iter()
            .position(|m| m.uid == uid)
            .ok_or_else(|| ProviderError::NotFound(format!("message {} not found", uid)))?;
        let message = source.messages.remove(position);
        state
            .require_mailbox_mut(destination)?
            .append(message.raw, message.flags);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        drop(self.backend.record(BackendCall::Close)?);
        Ok(())
    }
}

/// Opens [`InMemoryConnection`]s for registered accounts.
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    backend: InMemoryBackend,
    accounts: HashMap<String, String>,
    delay: Option<Duration>,
    failure: Option<ProviderError>,
    smtp_failure: Option<ProviderError>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl InMemoryConnector {
    /// Creates a connector over the backend with no accounts.
    pub fn new(backend: InMemoryBackend) -> Self {
        Self {
            backend,
            accounts: HashMap::new(),
            delay: None,
            failure: None,
            smtp_failure: None,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Registers an account and its password.
    pub fn with_account(mut self, email: impl Into<String>, password: impl Into<String>) -> Self {
        self.accounts.insert(email.into(), password.into());
        self
    }

    /// Delays every connect by the given duration.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes every connect fail with the given error.
    pub fn failing_with(mut self, error: ProviderError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Fails SMTP verification with the given error for credentials that
    /// carry an SMTP endpoint. The IMAP side still connects first.
    pub fn with_smtp_failure(mut self, error: ProviderError) -> Self {
        self.smtp_failure = Some(error);
        self
    }

    /// Returns the shared backend.
    pub fn backend(&self) -> &InMemoryBackend {
        &self.backend
    }

    /// Number of connections opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of connections closed so far.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn MailConnection>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        match self.accounts.get(&credentials.email) {
            Some(password) if *password == credentials.password => {}
            _ => {
                return Err(ProviderError::Authentication(format!(
                    "invalid credentials for {}",
                    credentials.email
                )))
            }
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        let connection: Box<dyn MailConnection> = Box::new(InMemoryConnection {
            backend: self.backend.clone(),
            selected: None,
            closed: Arc::clone(&self.closed),
        });

        if credentials.smtp.is_none() {
            return Ok(connection);
        }
        let verification = match &self.smtp_failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        };
        finish_smtp_verification(connection, &credentials.email, verification).await
    }
}

/// Builds a minimal RFC 5322 message.
pub fn build_raw_message(from: &str, to: &str, subject: &str, date: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
        from, to, subject, date, body
    )
    .into_bytes()
}

fn header_block(raw: &[u8]) -> &[u8] {
    raw.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|end| &raw[..end + 4])
        .unwrap_or(raw)
}

fn has_flag(message: &StoredMessage, flag: &str) -> bool {
    message.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
}

fn contains_text(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Evaluates criteria against a stored message.
fn matches(criteria: &QueryCriteria, message: &StoredMessage) -> bool {
    let header = || decode_header(&message.raw);
    match criteria {
        QueryCriteria::All => true,
        QueryCriteria::Seen => has_flag(message, SEEN_FLAG),
        QueryCriteria::Unseen => !has_flag(message, SEEN_FLAG),
        QueryCriteria::Flagged => has_flag(message, "\\Flagged"),
        QueryCriteria::Answered => has_flag(message, "\\Answered"),
        QueryCriteria::Deleted => has_flag(message, "\\Deleted"),
        QueryCriteria::Draft => has_flag(message, "\\Draft"),
        QueryCriteria::Keyword(keyword) => has_flag(message, keyword),
        QueryCriteria::From(value) => header().is_some_and(|h| contains_text(&h.from, value)),
        QueryCriteria::To(value) => {
            header().is_some_and(|h| h.to.iter().any(|to| contains_text(to, value)))
        }
        QueryCriteria::Subject(value) => {
            header().is_some_and(|h| contains_text(&h.subject, value))
        }
        QueryCriteria::Body(value) | QueryCriteria::Text(value) => {
            contains_text(&String::from_utf8_lossy(&message.raw), value)
        }
        QueryCriteria::Since(date) => header().is_some_and(|h| h.date.date_naive() >= *date),
        QueryCriteria::Before(date) => header().is_some_and(|h| h.date.date_naive() < *date),
        QueryCriteria::On(date) => header().is_some_and(|h| h.date.date_naive() == *date),
        QueryCriteria::Not(inner) => !matches(inner, message),
        QueryCriteria::And(items) => items.iter().all(|item| matches(item, message)),
        QueryCriteria::Or(left, right) => matches(left, message) || matches(right, message),
    }
}
