//! Message projections.
//!
//! Listings carry header data only; a single-message fetch adds the decoded
//! body in the rendering the caller asked for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageUid;

/// The `\Seen` system flag.
pub const SEEN_FLAG: &str = "\\Seen";

/// Header-level view of a message, as returned in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    /// Persistent message identifier (UID) within its mailbox.
    pub id: MessageUid,
    /// Sender, formatted as `Name <address>` or a bare address.
    pub from: String,
    /// Recipients, at least one.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Origination date, serialized as ISO-8601.
    pub date: DateTime<Utc>,
    /// Flags and keywords currently set on the message.
    pub flags: Vec<String>,
}

impl MessageSummary {
    /// Returns true if the message carries the `\Seen` flag.
    pub fn is_seen(&self) -> bool {
        self.flags.iter().any(|flag| flag.eq_ignore_ascii_case(SEEN_FLAG))
    }
}

/// A fully fetched message with its decoded body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDetail {
    /// Header fields and flags.
    #[serde(flatten)]
    pub summary: MessageSummary,
    /// Decoded body in the requested format.
    pub body: String,
}

/// Result of a message listing.
///
/// Messages whose headers could not be decoded are left out of `messages`
/// and reported in `dropped`, so an empty mailbox can be told apart from a
/// page where every header failed to decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageListing {
    /// Successfully decoded summaries, in backend order.
    pub messages: Vec<MessageSummary>,
    /// Identifiers that were fetched but could not be decoded.
    pub dropped: Vec<MessageUid>,
}

impl MessageListing {
    /// Returns true if any message in the requested window was dropped.
    pub fn has_dropped(&self) -> bool {
        !self.dropped.is_empty()
    }
}

/// Body rendering requested for a single-message fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// Plain-text rendering.
    #[default]
    Text,
    /// HTML rendering, falling back to the text body rendered as HTML.
    Html,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn summary() -> MessageSummary {
        MessageSummary {
            id: MessageUid(42),
            from: "Alice <alice@example.com>".to_string(),
            to: vec!["bob@example.com".to_string()],
            subject: "Hello".to_string(),
            date: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            flags: vec!["\\Seen".to_string()],
        }
    }

    #[test]
    fn summary_projection_shape() {
        let json = serde_json::to_value(summary()).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["from"], "Alice <alice@example.com>");
        assert_eq!(json["to"][0], "bob@example.com");
        assert_eq!(json["date"], "2024-03-01T12:30:00Z");
        assert_eq!(json["flags"][0], "\\Seen");
    }

    #[test]
    fn detail_flattens_summary() {
        let detail = MessageDetail {
            summary: summary(),
            body: "Hi Bob".to_string(),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["subject"], "Hello");
        assert_eq!(json["body"], "Hi Bob");
        assert!(json.get("summary").is_none());
    }

    #[test]
    fn seen_detection_ignores_case() {
        let mut message = summary();
        assert!(message.is_seen());
        message.flags = vec!["\\seen".to_string()];
        assert!(message.is_seen());
        message.flags.clear();
        assert!(!message.is_seen());
    }

    #[test]
    fn body_format_defaults_to_text() {
        assert_eq!(BodyFormat::default(), BodyFormat::Text);
        let format: BodyFormat = serde_json::from_str("\"html\"").unwrap();
        assert_eq!(format, BodyFormat::Html);
    }

    #[test]
    fn listing_reports_drops() {
        let listing = MessageListing {
            messages: vec![],
            dropped: vec![MessageUid(3)],
        };
        assert!(listing.has_dropped());
        assert!(!MessageListing::default().has_dropped());
    }
}
