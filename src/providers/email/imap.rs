//! IMAP/SMTP backend implementation.
//!
//! [`ImapConnector`] opens authenticated IMAP sessions (optionally verifying
//! the SMTP transport with the same credentials) and hands them out as
//! [`ImapConnection`] handles implementing [`MailConnection`].
//!
//! # Protocol Details
//!
//! - Uses IMAP4rev1 (RFC 3501) via `async-imap`, addressing messages by UID
//! - Uses UID MOVE (RFC 6851) when available, falling back to
//!   COPY + `\Deleted` + EXPUNGE
//! - Verifies SMTP with direct TLS or STARTTLS via `lettre`

use std::sync::Arc;
use std::time::Duration;

use async_imap::error::Error as ImapError;
use async_imap::types::{Fetch, Flag, NameAttribute};
use async_trait::async_trait;
use futures::TryStreamExt;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, Tokio1Executor};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tokio_util::either::Either;

use super::{
    Connector, FetchedHeader, FetchedMessage, FlagKind, MailConnection, MailboxStatus,
    ProviderError, Result, StoreOperation,
};
use crate::domain::{Credentials, Endpoint, MessageUid, NativeMailbox, QueryCriteria};

/// Transport configuration for IMAP and SMTP.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    /// Whether IMAP uses implicit TLS (true) or plaintext (false).
    pub use_tls: bool,
    /// Upper bound for connect plus login.
    pub connect_timeout: Duration,
    /// Whether to verify SMTP when the credentials carry an SMTP endpoint.
    pub verify_smtp: bool,
    /// Whether SMTP uses implicit TLS (true) or STARTTLS (false).
    pub smtp_use_tls: bool,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            use_tls: true,
            connect_timeout: Duration::from_secs(30),
            verify_smtp: true,
            smtp_use_tls: true,
        }
    }
}

/// Stream type under the IMAP client: TLS or plain TCP, wrapped for futures io.
type ImapStream = Compat<Either<TlsStream<TcpStream>, TcpStream>>;

/// Authenticated IMAP session.
type ImapSession = async_imap::Session<ImapStream>;

/// Opens IMAP connections.
#[derive(Debug, Clone, Default)]
pub struct ImapConnector {
    config: ImapConfig,
}

impl ImapConnector {
    /// Creates a connector with the given transport configuration.
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }

    /// Returns the transport configuration.
    pub fn config(&self) -> &ImapConfig {
        &self.config
    }

    /// Establishes the transport to the IMAP server with the futures compat wrapper.
    async fn open_stream(&self, endpoint: &Endpoint) -> Result<ImapStream> {
        let tcp_stream = TcpStream::connect(endpoint.address())
            .await
            .map_err(|e| ProviderError::Connection(format!("TCP connect failed: {}", e)))?;

        if !self.config.use_tls {
            return Ok(Either::Right(tcp_stream).compat());
        }

        let config = ClientConfig::builder()
            .with_root_certificates(tokio_rustls::rustls::RootCertStore::from_iter(
                webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
            ))
            .with_no_client_auth();

        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(endpoint.host.clone())
            .map_err(|e| ProviderError::Connection(format!("invalid server name: {}", e)))?;

        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| ProviderError::Connection(format!("TLS handshake failed: {}", e)))?;

        Ok(Either::Left(tls_stream).compat())
    }

    async fn login(&self, credentials: &Credentials) -> Result<ImapSession> {
        let stream = self.open_stream(&credentials.imap).await?;
        let client = async_imap::Client::new(stream);

        client
            .login(&credentials.email, &credentials.password)
            .await
            .map_err(|(e, _client)| match e {
                ImapError::No(msg) | ImapError::Bad(msg) => {
                    ProviderError::Authentication(format!("IMAP login failed: {}", msg))
                }
                other => map_imap_error("LOGIN", other),
            })
    }

    /// Verifies the SMTP transport accepts the same credentials.
    async fn verify_smtp(&self, credentials: &Credentials, endpoint: &Endpoint) -> Result<()> {
        let smtp_credentials =
            SmtpCredentials::new(credentials.email.clone(), credentials.password.clone());

        let builder = if self.config.smtp_use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&endpoint.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&endpoint.host)
        }
        .map_err(|e| ProviderError::Connection(format!("SMTP relay error: {}", e)))?;

        let mailer: AsyncSmtpTransport<Tokio1Executor> = builder
            .credentials(smtp_credentials)
            .port(endpoint.port)
            .timeout(Some(self.config.connect_timeout))
            .build();

        match mailer.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ProviderError::Connection(
                "SMTP server did not accept the connection".to_string(),
            )),
            Err(e) if e.is_permanent() => Err(ProviderError::Authentication(format!(
                "SMTP login failed: {}",
                e
            ))),
            Err(e) => Err(ProviderError::Connection(format!(
                "SMTP verification failed: {}",
                e
            ))),
        }
    }
}

#[async_trait]
impl Connector for ImapConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn MailConnection>> {
        let session = tokio::time::timeout(self.config.connect_timeout, self.login(credentials))
            .await
            .map_err(|_| {
                ProviderError::Connection(format!(
                    "timed out connecting to {}",
                    credentials.imap.address()
                ))
            })??;

        tracing::info!(account = %credentials.email, host = %credentials.imap.host, "IMAP session authenticated");
        let connection: Box<dyn MailConnection> = Box::new(ImapConnection {
            session,
            account: credentials.email.clone(),
        });

        match (self.config.verify_smtp, credentials.smtp.as_ref()) {
            (true, Some(smtp)) => {
                let verification = self.verify_smtp(credentials, smtp).await;
                finish_smtp_verification(connection, &credentials.email, verification).await
            }
            _ => Ok(connection),
        }
    }
}

/// An authenticated IMAP session.
pub struct ImapConnection {
    session: ImapSession,
    account: String,
}

impl ImapConnection {
    /// Returns the account this connection is logged in as.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Consumes a stream to completion.
    async fn drain_stream<T, E>(
        stream: impl futures::Stream<Item = std::result::Result<T, E>>,
    ) -> std::result::Result<(), E> {
        use futures::StreamExt;
        futures::pin_mut!(stream);
        while let Some(result) = stream.next().await {
            result?;
        }
        Ok(())
    }

    async fn uid_store(&mut self, uid: MessageUid, command: &str) -> Result<()> {
        let stream = self
            .session
            .uid_store(uid.to_string(), command)
            .await
            .map_err(|e| map_imap_error("STORE", e))?;
        Self::drain_stream(stream)
            .await
            .map_err(|e| map_imap_error("STORE", e))
    }

    async fn current_flags(&mut self, uid: MessageUid) -> Result<Vec<String>> {
        let fetches: Vec<Fetch> = self
            .session
            .uid_fetch(uid.to_string(), "(UID FLAGS)")
            .await
            .map_err(|e| map_imap_error("FETCH", e))?
            .try_collect()
            .await
            .map_err(|e| map_imap_error("FETCH", e))?;

        fetches
            .iter()
            .find(|fetch| fetch.uid == Some(uid.0))
            .map(flag_strings)
            .ok_or_else(|| ProviderError::NotFound(format!("message {} not found", uid)))
    }
}

#[async_trait]
impl MailConnection for ImapConnection {
    async fn list_mailboxes(&mut self) -> Result<Vec<NativeMailbox>> {
        let names: Vec<_> = self
            .session
            .list(Some(""), Some("*"))
            .await
            .map_err(|e| map_imap_error("LIST", e))?
            .try_collect()
            .await
            .map_err(|e| map_imap_error("LIST", e))?;

        let listed = names
            .iter()
            .map(|name| ListedName {
                name: name.name().to_string(),
                delimiter: name.delimiter().map(str::to_string),
                attributes: name.attributes().iter().map(attribute_string).collect(),
            })
            .collect();

        Ok(nest_mailboxes(listed))
    }

    async fn create_mailbox(&mut self, full_name: &str) -> Result<()> {
        self.session
            .create(full_name)
            .await
            .map_err(|e| map_imap_error("CREATE", e))
    }

    async fn rename_mailbox(&mut self, from: &str, to: &str) -> Result<()> {
        self.session
            .rename(from, to)
            .await
            .map_err(|e| map_imap_error("RENAME", e))
    }

    async fn delete_mailbox(&mut self, full_name: &str) -> Result<()> {
        self.session
            .delete(full_name)
            .await
            .map_err(|e| map_imap_error("DELETE", e))
    }

    async fn open_mailbox(&mut self, full_name: &str, read_only: bool) -> Result<MailboxStatus> {
        let mailbox = if read_only {
            self.session.examine(full_name).await
        } else {
            self.session.select(full_name).await
        }
        .map_err(|e| map_imap_error(if read_only { "EXAMINE" } else { "SELECT" }, e))?;

        Ok(MailboxStatus {
            name: full_name.to_string(),
            exists: mailbox.exists,
            read_only,
        })
    }

    async fn search(&mut self, criteria: &QueryCriteria) -> Result<Vec<MessageUid>> {
        let query = render_search(criteria)?;
        let uids = self
            .session
            .uid_search(&query)
            .await
            .map_err(|e| map_imap_error("SEARCH", e))?;

        let mut uids: Vec<MessageUid> = uids.into_iter().map(MessageUid).collect();
        uids.sort();
        Ok(uids)
    }

    async fn fetch_headers(&mut self, uids: &[MessageUid]) -> Result<Vec<FetchedHeader>> {
        if uids.is_empty() {
            return Ok(vec![]);
        }

        let fetches: Vec<Fetch> = self
            .session
            .uid_fetch(uid_set(uids), "(UID FLAGS BODY.PEEK[HEADER])")
            .await
            .map_err(|e| map_imap_error("FETCH", e))?
            .try_collect()
            .await
            .map_err(|e| map_imap_error("FETCH", e))?;

        // Servers may answer in any order; report in the requested order.
        let mut headers = Vec::with_capacity(uids.len());
        for uid in uids {
            if let Some(fetch) = fetches.iter().find(|fetch| fetch.uid == Some(uid.0)) {
                headers.push(FetchedHeader {
                    uid: *uid,
                    flags: flag_strings(fetch),
                    header: fetch.header().map(<[u8]>::to_vec),
                });
            }
        }
        Ok(headers)
    }

    async fn fetch_message(
        &mut self,
        uid: MessageUid,
        mark_seen: bool,
    ) -> Result<Option<FetchedMessage>> {
        let query = if mark_seen {
            "(UID FLAGS BODY[])"
        } else {
            "(UID FLAGS BODY.PEEK[])"
        };

        let fetches: Vec<Fetch> = self
            .session
            .uid_fetch(uid.to_string(), query)
            .await
            .map_err(|e| map_imap_error("FETCH", e))?
            .try_collect()
            .await
            .map_err(|e| map_imap_error("FETCH", e))?;

        Ok(fetches
            .iter()
            .find(|fetch| fetch.uid == Some(uid.0))
            .map(|fetch| FetchedMessage {
                uid,
                flags: flag_strings(fetch),
                raw: fetch.body().map(<[u8]>::to_vec),
            }))
    }

    async fn store(
        &mut self,
        uid: MessageUid,
        kind: FlagKind,
        operation: StoreOperation,
    ) -> Result<()> {
        match operation {
            StoreOperation::Add(values) => {
                let values = normalize_flags(kind, values)?;
                if !values.is_empty() {
                    self.uid_store(uid, &format!("+FLAGS ({})", values.join(" ")))
                        .await?;
                }
            }
            StoreOperation::Remove(values) => {
                let values = normalize_flags(kind, values)?;
                if !values.is_empty() {
                    self.uid_store(uid, &format!("-FLAGS ({})", values.join(" ")))
                        .await?;
                }
            }
            StoreOperation::Set(values) => {
                let values = normalize_flags(kind, values)?;
                // FLAGS replaces both namespaces; carry the other one over.
                let mut combined: Vec<String> = self
                    .current_flags(uid)
                    .await?
                    .into_iter()
                    .filter(|flag| !kind.contains(flag) && is_settable(flag))
                    .collect();
                combined.extend(values);
                self.uid_store(uid, &format!("FLAGS ({})", combined.join(" ")))
                    .await?;
            }
            StoreOperation::Clear => {
                let current: Vec<String> = self
                    .current_flags(uid)
                    .await?
                    .into_iter()
                    .filter(|flag| kind.contains(flag) && is_settable(flag))
                    .collect();
                if !current.is_empty() {
                    self.uid_store(uid, &format!("-FLAGS ({})", current.join(" ")))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn copy(&mut self, uid: MessageUid, destination: &str) -> Result<()> {
        let (uid_set, mailbox) = copy_arguments(uid, destination)?;
        self.session
            .uid_copy(uid_set, mailbox)
            .await
            .map_err(|e| map_imap_error("COPY", e))
    }

    async fn move_to(&mut self, uid: MessageUid, destination: &str) -> Result<()> {
        let (uid_set, mailbox) = copy_arguments(uid, destination)?;
        if let Err(e) = self.session.uid_mv(&uid_set, destination).await {
            tracing::debug!(error = %e, "UID MOVE rejected, falling back to COPY");

            self.session
                .uid_copy(&uid_set, &mailbox)
                .await
                .map_err(|e| map_imap_error("COPY", e))?;

            self.uid_store(uid, "+FLAGS (\\Deleted)").await?;

            let expunge_stream = self
                .session
                .expunge()
                .await
                .map_err(|e| map_imap_error("EXPUNGE", e))?;
            Self::drain_stream(expunge_stream)
                .await
                .map_err(|e| map_imap_error("EXPUNGE", e))?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.session
            .logout()
            .await
            .map_err(|e| map_imap_error("LOGOUT", e))?;
        tracing::debug!(account = %self.account, "IMAP session logged out");
        Ok(())
    }
}

/// Maps a protocol error for the named command.
fn map_imap_error(command: &str, error: ImapError) -> ProviderError {
    match error {
        ImapError::No(msg) | ImapError::Bad(msg) => {
            ProviderError::Rejected(format!("{} failed: {}", command, msg))
        }
        ImapError::Io(e) => ProviderError::Connection(format!("{} failed: {}", command, e)),
        ImapError::ConnectionLost => {
            ProviderError::Connection(format!("{} failed: connection lost", command))
        }
        other => ProviderError::Internal(format!("{} failed: {}", command, other)),
    }
}

/// One LIST response entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ListedName {
    pub(crate) name: String,
    pub(crate) delimiter: Option<String>,
    pub(crate) attributes: Vec<String>,
}

/// Nests flat LIST results into a hierarchy, keeping first-appearance order.
///
/// Parents the server did not list are created without attributes.
pub(crate) fn nest_mailboxes(listed: Vec<ListedName>) -> Vec<NativeMailbox> {
    let mut roots = Vec::new();
    for entry in listed {
        let segments: Vec<&str> = match entry.delimiter.as_deref() {
            Some(delimiter) if !delimiter.is_empty() => entry.name.split(delimiter).collect(),
            _ => vec![entry.name.as_str()],
        };
        insert_path(
            &mut roots,
            &segments,
            entry.delimiter.as_deref(),
            &entry.attributes,
        );
    }
    roots
}

fn insert_path(
    level: &mut Vec<NativeMailbox>,
    segments: &[&str],
    delimiter: Option<&str>,
    attributes: &[String],
) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };

    let index = match level.iter().position(|mailbox| mailbox.name == *first) {
        Some(index) => index,
        None => {
            level.push(NativeMailbox::new(*first, delimiter));
            level.len() - 1
        }
    };

    if rest.is_empty() {
        level[index].attributes = attributes.to_vec();
    } else {
        insert_path(&mut level[index].children, rest, delimiter, attributes);
    }
}

fn attribute_string(attribute: &NameAttribute<'_>) -> String {
    match attribute {
        NameAttribute::NoInferiors => "\\Noinferiors".to_string(),
        NameAttribute::NoSelect => "\\Noselect".to_string(),
        NameAttribute::Marked => "\\Marked".to_string(),
        NameAttribute::Unmarked => "\\Unmarked".to_string(),
        NameAttribute::All => "\\All".to_string(),
        NameAttribute::Archive => "\\Archive".to_string(),
        NameAttribute::Drafts => "\\Drafts".to_string(),
        NameAttribute::Flagged => "\\Flagged".to_string(),
        NameAttribute::Junk => "\\Junk".to_string(),
        NameAttribute::Sent => "\\Sent".to_string(),
        NameAttribute::Trash => "\\Trash".to_string(),
        NameAttribute::Extension(name) => name.to_string(),
        other => format!("{:?}", other),
    }
}

fn flag_string(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Recent => "\\Recent".to_string(),
        Flag::MayCreate => "\\*".to_string(),
        Flag::Custom(name) => name.to_string(),
    }
}

fn flag_strings(fetch: &Fetch) -> Vec<String> {
    fetch.flags().map(|flag| flag_string(&flag)).collect()
}

/// `\Recent` is session-scoped and cannot be stored.
fn is_settable(flag: &str) -> bool {
    !flag.eq_ignore_ascii_case("\\Recent")
}

/// Closes a freshly opened connection when SMTP verification failed.
///
/// The verification error is returned unchanged; a failing close is only
/// logged.
pub(crate) async fn finish_smtp_verification(
    mut connection: Box<dyn MailConnection>,
    account: &str,
    verification: Result<()>,
) -> Result<Box<dyn MailConnection>> {
    let Err(error) = verification else {
        return Ok(connection);
    };
    tracing::warn!(account = %account, error = %error, "SMTP verification failed");
    if let Err(close_err) = connection.close().await {
        tracing::warn!(
            account = %account,
            error = %close_err,
            "IMAP logout after failed SMTP verification failed"
        );
    }
    Err(error)
}

/// RFC 3501 `ATOM-CHAR`: printable ASCII minus the atom specials.
fn is_atom_char(ch: char) -> bool {
    ch.is_ascii_graphic()
        && !matches!(ch, '(' | ')' | '{' | '%' | '*' | '"' | '\\' | ']')
}

/// Normalizes one flag and checks it can be sent as a bare atom.
fn flag_atom(kind: FlagKind, value: &str) -> Result<String> {
    let normalized = kind.normalize(value);
    let atom = match kind {
        FlagKind::Flag => normalized.strip_prefix('\\').unwrap_or(&normalized),
        FlagKind::Keyword => normalized.as_str(),
    };
    if atom.is_empty() || !atom.chars().all(is_atom_char) {
        return Err(ProviderError::InvalidRequest(format!(
            "invalid {:?} value: {:?}",
            kind, value
        )));
    }
    Ok(normalized)
}

/// Prefixes system flags given without their backslash; keywords pass through.
///
/// Empty values are skipped. Anything that is not a valid IMAP atom is
/// rejected.
pub(crate) fn normalize_flags(kind: FlagKind, values: Vec<String>) -> Result<Vec<String>> {
    values
        .into_iter()
        .filter(|value| !value.is_empty())
        .map(|value| flag_atom(kind, &value))
        .collect()
}

/// UID set and quoted mailbox for `UID COPY`, which async-imap sends as given.
fn copy_arguments(uid: MessageUid, destination: &str) -> Result<(String, String)> {
    Ok((uid.to_string(), quote(destination)?))
}

fn uid_set(uids: &[MessageUid]) -> String {
    uids.iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Renders criteria as an IMAP SEARCH key string.
fn render_search(criteria: &QueryCriteria) -> Result<String> {
    Ok(match criteria {
        QueryCriteria::All => "ALL".to_string(),
        QueryCriteria::Seen => "SEEN".to_string(),
        QueryCriteria::Unseen => "UNSEEN".to_string(),
        QueryCriteria::Flagged => "FLAGGED".to_string(),
        QueryCriteria::Answered => "ANSWERED".to_string(),
        QueryCriteria::Deleted => "DELETED".to_string(),
        QueryCriteria::Draft => "DRAFT".to_string(),
        QueryCriteria::Keyword(keyword) => {
            format!("KEYWORD {}", flag_atom(FlagKind::Keyword, keyword)?)
        }
        QueryCriteria::From(value) => format!("FROM {}", quote(value)?),
        QueryCriteria::To(value) => format!("TO {}", quote(value)?),
        QueryCriteria::Subject(value) => format!("SUBJECT {}", quote(value)?),
        QueryCriteria::Body(value) => format!("BODY {}", quote(value)?),
        QueryCriteria::Text(value) => format!("TEXT {}", quote(value)?),
        QueryCriteria::Since(date) => format!("SINCE {}", date.format("%d-%b-%Y")),
        QueryCriteria::Before(date) => format!("BEFORE {}", date.format("%d-%b-%Y")),
        QueryCriteria::On(date) => format!("ON {}", date.format("%d-%b-%Y")),
        QueryCriteria::Not(inner) => format!("NOT {}", render_search(inner)?),
        QueryCriteria::And(items) => match items.as_slice() {
            [] => "ALL".to_string(),
            [single] => render_search(single)?,
            items => format!(
                "({})",
                items
                    .iter()
                    .map(render_search)
                    .collect::<Result<Vec<_>>>()?
                    .join(" ")
            ),
        },
        QueryCriteria::Or(left, right) => {
            format!("OR {} {}", render_search(left)?, render_search(right)?)
        }
    })
}

/// Renders an IMAP quoted string. CR, LF, and NUL cannot be quoted.
fn quote(value: &str) -> Result<String> {
    if value.contains(['\r', '\n', '\0']) {
        return Err(ProviderError::InvalidRequest(format!(
            "line breaks are not allowed in {:?}",
            value
        )));
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    Ok(quoted)
}
