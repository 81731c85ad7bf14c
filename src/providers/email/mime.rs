//! MIME decoding helpers.
//!
//! Turns raw header blocks and messages returned by the backend into the
//! fields the gateway projects, using `mail-parser`.

use chrono::{DateTime, Utc};
use mail_parser::{Addr, Address, Message as ParsedMessage, MessageParser, PartType};

/// Header fields required for a message projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHeader {
    /// First sender, display formatted.
    pub from: String,
    /// Every recipient, display formatted.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Origination date.
    pub date: DateTime<Utc>,
}

/// A decoded message: header fields plus body renderings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Header fields.
    pub header: DecodedHeader,
    /// Plain-text body, if any.
    pub text: Option<String>,
    /// HTML body, if any.
    pub html: Option<String>,
}

/// Decodes a raw header block.
///
/// Returns `None` unless sender, at least one recipient, subject, and date
/// are all present and parseable.
pub fn decode_header(raw: &[u8]) -> Option<DecodedHeader> {
    let message = MessageParser::default().parse(raw)?;
    header_fields(&message)
}

/// Decodes a full raw message.
///
/// Returns `None` if the header is unusable.
pub fn decode_message(raw: &[u8]) -> Option<DecodedMessage> {
    let message = MessageParser::default().parse(raw)?;
    let header = header_fields(&message)?;

    Some(DecodedMessage {
        header,
        text: message.body_text(0).map(|s| s.to_string()),
        html: html_body(&message),
    })
}

/// First HTML body part as sent. `body_html` would synthesize markup from a
/// plain-text part, so the part type is checked here instead.
fn html_body(message: &ParsedMessage) -> Option<String> {
    match &message.html_part(0)?.body {
        PartType::Html(html) => Some(html.to_string()),
        _ => None,
    }
}

fn header_fields(message: &ParsedMessage) -> Option<DecodedHeader> {
    let from = addresses(message.from()).into_iter().next()?;
    let to = addresses(message.to());
    if to.is_empty() {
        return None;
    }
    let subject = message.subject()?.to_string();
    let date = message
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))?;

    Some(DecodedHeader {
        from,
        to,
        subject,
        date,
    })
}

/// Flattens an address header, including groups, into display strings.
fn addresses(header: Option<&Address>) -> Vec<String> {
    match header {
        Some(Address::List(list)) => list.iter().filter_map(display_address).collect(),
        Some(Address::Group(groups)) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .filter_map(display_address)
            .collect(),
        None => Vec::new(),
    }
}

/// Formats an address as `Name <email>`, or just the email without a name.
fn display_address(addr: &Addr) -> Option<String> {
    let email = addr.address()?;
    match addr.name() {
        Some(name) if !name.is_empty() => Some(format!("{} <{}>", name, email)),
        _ => Some(email.to_string()),
    }
}

/// Renders a plain-text body as HTML.
pub fn render_text_as_html(text: &str) -> String {
    let mut html = String::with_capacity(text.len() + 16);
    html.push_str("<p>");
    for ch in text.chars() {
        match ch {
            '&' => html.push_str("&amp;"),
            '<' => html.push_str("&lt;"),
            '>' => html.push_str("&gt;"),
            '"' => html.push_str("&quot;"),
            '\'' => html.push_str("&#39;"),
            '\n' => html.push_str("<br>"),
            '\r' => {}
            _ => html.push(ch),
        }
    }
    html.push_str("</p>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const HEADER: &[u8] = b"From: Alice Example <alice@example.com>\r\n\
To: bob@example.com, Carol <carol@example.com>\r\n\
Subject: Quarterly report\r\n\
Date: Fri, 01 Mar 2024 12:30:00 +0000\r\n\r\n";

    #[test]
    fn decodes_complete_header() {
        let header = decode_header(HEADER).unwrap();
        assert_eq!(header.from, "Alice Example <alice@example.com>");
        assert_eq!(
            header.to,
            vec![
                "bob@example.com".to_string(),
                "Carol <carol@example.com>".to_string()
            ]
        );
        assert_eq!(header.subject, "Quarterly report");
        assert_eq!(header.date, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn rejects_header_without_recipients() {
        let raw = b"From: alice@example.com\r\nSubject: Hi\r\nDate: Fri, 01 Mar 2024 12:30:00 +0000\r\n\r\n";
        assert!(decode_header(raw).is_none());
    }

    #[test]
    fn rejects_header_without_date() {
        let raw = b"From: alice@example.com\r\nTo: bob@example.com\r\nSubject: Hi\r\n\r\n";
        assert!(decode_header(raw).is_none());
    }

    #[test]
    fn decodes_plain_message_body() {
        let mut raw = HEADER.to_vec();
        raw.extend_from_slice(b"Numbers attached.\r\n");
        let message = decode_message(&raw).unwrap();
        assert_eq!(message.header.subject, "Quarterly report");
        assert!(message.text.unwrap().contains("Numbers attached."));
        assert_eq!(message.html, None);
    }

    #[test]
    fn plain_message_falls_back_to_escaped_html() {
        let mut raw = HEADER.to_vec();
        raw.extend_from_slice(b"line one\r\nline <two>\r\n");
        let message = decode_message(&raw).unwrap();

        assert_eq!(message.html, None);
        let html = render_text_as_html(message.text.as_deref().unwrap_or_default());
        assert!(html.contains("line one<br>line &lt;two&gt;"));
    }

    #[test]
    fn decodes_alternative_message() {
        let raw = b"From: alice@example.com\r\n\
To: bob@example.com\r\n\
Subject: Both\r\n\
Date: Fri, 01 Mar 2024 12:30:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
plain version\r\n\
--b1\r\n\
Content-Type: text/html\r\n\
\r\n\
<b>html version</b>\r\n\
--b1--\r\n";
        let message = decode_message(raw).unwrap();
        assert!(message.text.unwrap().contains("plain version"));
        assert!(message.html.unwrap().contains("<b>html version</b>"));
    }

    #[test]
    fn text_to_html_escapes_markup() {
        assert_eq!(
            render_text_as_html("a < b & \"c\"\nnext"),
            "<p>a &lt; b &amp; &quot;c&quot;<br>next</p>"
        );
    }
}
