//! Message listing and fetching.
//!
//! Listings open the mailbox read-only, search it, cut the page window out
//! of the matching identifiers, and only then fetch headers for that window.
//! Messages whose headers cannot be decoded are left out of the page and
//! reported in [`MessageListing::dropped`].
//!
//! Sorting is a separate step over already fetched summaries, see
//! [`sort_summaries`].

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GatewayError, Result, Session};
use crate::domain::{
    BodyFormat, MessageDetail, MessageListing, MessageSummary, MessageUid, QueryCriteria,
};
use crate::providers::email::mime::{decode_header, decode_message, render_text_as_html};
use crate::providers::email::MailConnection;

/// Literal accepted in place of a page size to disable windowing.
pub const UNBOUNDED_LITERAL: &str = "infinity";

/// Defaults applied when a request leaves fields out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDefaults {
    /// Mailbox opened when none is named.
    pub mailbox: String,
    /// Page size used when none is given.
    pub per_page: PerPage,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            mailbox: "INBOX".to_string(),
            per_page: PerPage::Limited(10),
        }
    }
}

/// Page size: a positive count or unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPerPage", into = "RawPerPage")]
pub enum PerPage {
    Limited(usize),
    Unbounded,
}

impl Default for PerPage {
    fn default() -> Self {
        Self::Limited(10)
    }
}

impl FromStr for PerPage {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(UNBOUNDED_LITERAL) {
            return Ok(Self::Unbounded);
        }
        let count: usize = s
            .parse()
            .map_err(|_| GatewayError::Validation(format!("invalid page size: {}", s)))?;
        Self::try_from(RawPerPage::Count(count))
    }
}

impl fmt::Display for PerPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(count) => write!(f, "{}", count),
            Self::Unbounded => f.write_str(UNBOUNDED_LITERAL),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPerPage {
    Count(usize),
    Text(String),
}

impl TryFrom<RawPerPage> for PerPage {
    type Error = GatewayError;

    fn try_from(raw: RawPerPage) -> Result<Self> {
        match raw {
            RawPerPage::Count(0) => Err(GatewayError::Validation(
                "page size must be at least 1".to_string(),
            )),
            RawPerPage::Count(count) => Ok(Self::Limited(count)),
            RawPerPage::Text(text) => text.parse(),
        }
    }
}

impl From<PerPage> for RawPerPage {
    fn from(per_page: PerPage) -> Self {
        match per_page {
            PerPage::Limited(count) => Self::Count(count),
            PerPage::Unbounded => Self::Text(UNBOUNDED_LITERAL.to_string()),
        }
    }
}

/// 1-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub per_page: PerPage,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: PerPage::default(),
        }
    }
}

impl Pagination {
    /// Creates a validated pagination.
    pub fn new(page: usize, per_page: PerPage) -> Result<Self> {
        let pagination = Self { page, per_page };
        pagination.validate()?;
        Ok(pagination)
    }

    /// Rejects page numbers or page sizes below 1.
    pub fn validate(&self) -> Result<()> {
        if self.page < 1 {
            return Err(GatewayError::Validation(
                "page must be at least 1".to_string(),
            ));
        }
        if self.per_page == PerPage::Limited(0) {
            return Err(GatewayError::Validation(
                "page size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Index range of this page within `total` ordered candidates.
    ///
    /// When the page size covers every candidate, page 1 holds them all and
    /// later pages are empty.
    pub fn window(&self, total: usize) -> Range<usize> {
        let covers_all = match self.per_page {
            PerPage::Unbounded => true,
            PerPage::Limited(count) => count > total,
        };
        if covers_all {
            return if self.page <= 1 { 0..total } else { total..total };
        }

        let PerPage::Limited(count) = self.per_page else {
            return total..total;
        };
        let start = self.page.saturating_sub(1).saturating_mul(count).min(total);
        let end = self.page.saturating_mul(count).min(total);
        start..end
    }
}

/// Field used to order summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Id,
    From,
    /// Joined recipient text.
    To,
    Subject,
    Date,
    /// Whether `\Seen` is set.
    Seen,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Field plus direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    #[serde(default)]
    pub field: SortField,
    #[serde(default)]
    pub order: SortOrder,
}

/// A comparable value extracted from a summary.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey<'a> {
    Number(u64),
    Text(Cow<'a, str>),
    Instant(DateTime<Utc>),
    Flag(bool),
}

impl SortKey<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Instant(_) => "instant",
            Self::Flag(_) => "flag",
        }
    }
}

impl SortField {
    /// Extracts this field's key from a summary.
    pub fn key<'a>(&self, summary: &'a MessageSummary) -> SortKey<'a> {
        match self {
            Self::Id => SortKey::Number(u64::from(summary.id.0)),
            Self::From => SortKey::Text(Cow::Borrowed(&summary.from)),
            Self::To => SortKey::Text(Cow::Owned(summary.to.join(", "))),
            Self::Subject => SortKey::Text(Cow::Borrowed(&summary.subject)),
            Self::Date => SortKey::Instant(summary.date),
            Self::Seen => SortKey::Flag(summary.is_seen()),
        }
    }
}

/// Compares two keys of the same kind.
///
/// Text compares case-insensitively first, then by code point; flags order
/// false before true. Keys of different kinds are an internal error.
pub fn compare_keys(left: &SortKey<'_>, right: &SortKey<'_>) -> Result<Ordering> {
    match (left, right) {
        (SortKey::Number(a), SortKey::Number(b)) => Ok(a.cmp(b)),
        (SortKey::Instant(a), SortKey::Instant(b)) => Ok(a.cmp(b)),
        (SortKey::Flag(a), SortKey::Flag(b)) => Ok(a.cmp(b)),
        (SortKey::Text(a), SortKey::Text(b)) => Ok(a
            .to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))),
        (a, b) => Err(GatewayError::Internal(format!(
            "cannot compare {} with {}",
            a.kind(),
            b.kind()
        ))),
    }
}

/// Stable-sorts summaries; descending reverses the ascending result.
pub fn sort_summaries(summaries: &mut [MessageSummary], sort: Sort) -> Result<()> {
    let mut failure = None;
    summaries.sort_by(|a, b| {
        match compare_keys(&sort.field.key(a), &sort.field.key(b)) {
            Ok(ordering) => ordering,
            Err(e) => {
                failure.get_or_insert(e);
                Ordering::Equal
            }
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    if sort.order == SortOrder::Desc {
        summaries.reverse();
    }
    Ok(())
}

/// Parameters for a message listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListRequest {
    /// Mailbox full name; the configured default when absent.
    pub mailbox: Option<String>,
    /// Search criteria; match-all when absent.
    pub criteria: Option<QueryCriteria>,
    /// Page number, 1-based.
    pub page: Option<usize>,
    /// Page size; the configured default when absent.
    pub per_page: Option<PerPage>,
    /// Ordering applied to the fetched page.
    pub sort: Option<Sort>,
}

/// Parameters for a single-message fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(default)]
    pub mailbox: Option<String>,
    pub id: MessageUid,
    /// Set `\Seen` as a side effect of the fetch.
    #[serde(default)]
    pub mark_seen: bool,
    #[serde(default)]
    pub format: BodyFormat,
}

impl GetRequest {
    pub fn new(id: MessageUid) -> Self {
        Self {
            mailbox: None,
            id,
            mark_seen: false,
            format: BodyFormat::default(),
        }
    }
}

/// Message queries bound to a session's connection.
pub struct QueryService<'a> {
    session: &'a Session,
    defaults: &'a QueryDefaults,
}

impl<'a> QueryService<'a> {
    pub fn new(session: &'a Session, defaults: &'a QueryDefaults) -> Self {
        Self { session, defaults }
    }

    /// Resolves the request's pagination against the defaults.
    pub fn pagination(&self, request: &ListRequest) -> Result<Pagination> {
        Pagination::new(
            request.page.unwrap_or(1),
            request.per_page.unwrap_or(self.defaults.per_page),
        )
    }

    /// Lists one page of messages in backend order.
    pub async fn get_all(&self, request: &ListRequest) -> Result<MessageListing> {
        let pagination = self.pagination(request)?;
        let mailbox = request.mailbox.as_deref().unwrap_or(&self.defaults.mailbox);
        let criteria = request.criteria.clone().unwrap_or_default();

        let mut connection = self.session.connection().await;
        list_messages(&mut **connection, mailbox, &criteria, pagination).await
    }

    /// Fetches one message with its decoded body.
    pub async fn get(&self, request: &GetRequest) -> Result<MessageDetail> {
        let mailbox = request.mailbox.as_deref().unwrap_or(&self.defaults.mailbox);

        let mut connection = self.session.connection().await;
        fetch_detail(
            &mut **connection,
            mailbox,
            request.id,
            request.mark_seen,
            request.format,
        )
        .await
    }
}

pub(crate) async fn list_messages(
    connection: &mut dyn MailConnection,
    mailbox: &str,
    criteria: &QueryCriteria,
    pagination: Pagination,
) -> Result<MessageListing> {
    connection
        .open_mailbox(mailbox, true)
        .await
        .map_err(GatewayError::from_mailbox_op)?;

    let uids = connection.search(criteria).await?;
    let window = pagination.window(uids.len());
    let page = &uids[window];
    if page.is_empty() {
        return Ok(MessageListing::default());
    }

    let fetched = connection.fetch_headers(page).await?;

    let mut listing = MessageListing::default();
    for uid in page {
        let decoded = fetched
            .iter()
            .find(|item| item.uid == *uid)
            .and_then(|item| {
                let header = decode_header(item.header.as_deref()?)?;
                Some(MessageSummary {
                    id: item.uid,
                    from: header.from,
                    to: header.to,
                    subject: header.subject,
                    date: header.date,
                    flags: item.flags.clone(),
                })
            });
        match decoded {
            Some(summary) => listing.messages.push(summary),
            None => listing.dropped.push(*uid),
        }
    }

    if listing.has_dropped() {
        tracing::debug!(mailbox = %mailbox, dropped = ?listing.dropped, "Dropped undecodable messages");
    }
    Ok(listing)
}

pub(crate) async fn fetch_detail(
    connection: &mut dyn MailConnection,
    mailbox: &str,
    uid: MessageUid,
    mark_seen: bool,
    format: BodyFormat,
) -> Result<MessageDetail> {
    connection
        .open_mailbox(mailbox, !mark_seen)
        .await
        .map_err(GatewayError::from_mailbox_op)?;

    let fetched = connection
        .fetch_message(uid, mark_seen)
        .await
        .map_err(GatewayError::from_message_fetch)?
        .ok_or_else(|| GatewayError::MessageNotFound(format!("{} in {}", uid, mailbox)))?;

    let raw = fetched
        .raw
        .ok_or_else(|| GatewayError::MessageNotFound(format!("{} has no content", uid)))?;
    let decoded = decode_message(&raw).ok_or_else(|| {
        GatewayError::MessageNotFound(format!("{} could not be decoded", uid))
    })?;

    let body = match format {
        BodyFormat::Text => decoded.text.unwrap_or_default(),
        BodyFormat::Html => decoded.html.unwrap_or_else(|| {
            render_text_as_html(decoded.text.as_deref().unwrap_or_default())
        }),
    };

    Ok(MessageDetail {
        summary: MessageSummary {
            id: fetched.uid,
            from: decoded.header.from,
            to: decoded.header.to,
            subject: decoded.header.subject,
            date: decoded.header.date,
            flags: fetched.flags,
        },
        body,
    })
}
