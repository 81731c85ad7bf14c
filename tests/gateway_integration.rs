//! Integration tests for the gateway.
//!
//! These tests drive the public [`Gateway`] API end to end against the
//! in-memory backend. Each service module contains its own unit tests for
//! detailed logic.

use std::sync::Arc;

use mailbridge::domain::{
    BodyFormat, Credentials, Endpoint, MessageUid, QueryCriteria, SessionToken,
};
use mailbridge::providers::email::{build_raw_message, InMemoryBackend, InMemoryConnector};
use mailbridge::services::{
    BoxAction, BoxChange, Destinations, FlagChange, GetRequest, ListRequest, PerPage, Sort,
    SortField, SortOrder, UpdateRequest,
};
use mailbridge::{Gateway, GatewayError};
use pretty_assertions::assert_eq;

// ============================================================================
// Fixtures
// ============================================================================

const ACCOUNT: &str = "me@example.com";
const PASSWORD: &str = "hunter2";

fn credentials(password: &str) -> Credentials {
    Credentials::new(ACCOUNT, password, Endpoint::new("imap.example.com", 993))
}

fn seed(backend: &InMemoryBackend) {
    backend.add_mailbox("INBOX");
    backend.add_mailbox("Archive");
    backend.add_mailbox("Work");
    backend.add_mailbox("Work/Reports");

    let messages = [
        ("carol@example.com", "quarterly numbers", "Mon, 04 Mar 2024 09:00:00 +0000", &["\\Seen"][..]),
        ("alice@example.com", "Lunch?", "Fri, 01 Mar 2024 12:30:00 +0000", &[][..]),
        ("Bob@example.com", "build broken", "Sat, 02 Mar 2024 08:15:00 +0000", &["\\Flagged"][..]),
    ];
    for (from, subject, date, flags) in messages {
        backend.add_message(
            "INBOX",
            build_raw_message(from, ACCOUNT, subject, date, "Hello <there>\nsecond line"),
            flags,
        );
    }
}

async fn logged_in() -> (Gateway, InMemoryBackend, SessionToken) {
    let backend = InMemoryBackend::new();
    seed(&backend);
    let connector = InMemoryConnector::new(backend.clone()).with_account(ACCOUNT, PASSWORD);
    let gateway = Gateway::new(Arc::new(connector));
    let token = gateway.login(&credentials(PASSWORD)).await.unwrap();
    (gateway, backend, token)
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn login_reuses_session_per_account() {
    let (gateway, _, token) = logged_in().await;

    let again = gateway.login(&credentials(PASSWORD)).await.unwrap();
    assert_eq!(again, token);
    assert_eq!(gateway.registry().len().await, 1);
}

#[tokio::test]
async fn bad_password_is_authentication_error() {
    let (gateway, _, _) = logged_in().await;

    let result = gateway.login(&credentials("wrong")).await;
    assert!(matches!(result, Err(GatewayError::Authentication(_))));
    assert_eq!(gateway.registry().len().await, 1);
}

#[tokio::test]
async fn logout_invalidates_token() {
    let (gateway, _, token) = logged_in().await;

    gateway.logout(&token).await;

    let result = gateway.list_mailboxes(&token).await;
    assert_eq!(result.unwrap_err(), GatewayError::InvalidToken);
    let result = gateway.get_message(&token, &GetRequest::new(MessageUid(1))).await;
    assert_eq!(result.unwrap_err(), GatewayError::InvalidToken);
}

// ============================================================================
// Mailboxes
// ============================================================================

#[tokio::test]
async fn mailbox_lifecycle() {
    let (gateway, backend, token) = logged_in().await;

    let tree = gateway.list_mailboxes(&token).await.unwrap();
    let reports = tree.find("Work/Reports").unwrap();
    assert_eq!(reports.name(), "Reports");
    assert_eq!(reports.parent().map(|p| p.full_name()), Some("Work".to_string()));

    gateway.create_mailbox(&token, "Work/Travel").await.unwrap();
    assert!(gateway.get_mailbox(&token, "Work/Travel").await.unwrap().is_some());

    gateway
        .rename_mailbox(&token, "Work", Some("Job"))
        .await
        .unwrap();
    assert!(gateway.get_mailbox(&token, "Work/Reports").await.unwrap().is_none());
    assert!(backend.mailbox_names().contains(&"Job/Reports".to_string()));

    gateway.delete_mailbox(&token, "Archive").await.unwrap();
    let result = gateway.delete_mailbox(&token, "Archive").await;
    assert!(matches!(result, Err(GatewayError::MailboxOperation(_))));
}

// ============================================================================
// Listing and fetching
// ============================================================================

#[tokio::test]
async fn list_sorts_current_page() {
    let (gateway, _, token) = logged_in().await;

    let request = ListRequest {
        sort: Some(Sort {
            field: SortField::From,
            order: SortOrder::Asc,
        }),
        ..ListRequest::default()
    };
    let listing = gateway.list_messages(&token, &request).await.unwrap();
    let senders: Vec<&str> = listing.messages.iter().map(|m| m.from.as_str()).collect();
    assert_eq!(
        senders,
        vec!["alice@example.com", "Bob@example.com", "carol@example.com"]
    );
    assert!(!listing.has_dropped());

    let request = ListRequest {
        sort: Some(Sort {
            field: SortField::Date,
            order: SortOrder::Desc,
        }),
        ..ListRequest::default()
    };
    let listing = gateway.list_messages(&token, &request).await.unwrap();
    let subjects: Vec<&str> = listing.messages.iter().map(|m| m.subject.as_str()).collect();
    assert_eq!(subjects, vec!["quarterly numbers", "build broken", "Lunch?"]);
}

#[tokio::test]
async fn list_paginates_and_filters() {
    let (gateway, _, token) = logged_in().await;

    let request = ListRequest {
        page: Some(2),
        per_page: Some(PerPage::Limited(2)),
        ..ListRequest::default()
    };
    let listing = gateway.list_messages(&token, &request).await.unwrap();
    assert_eq!(listing.messages.len(), 1);
    assert_eq!(listing.messages[0].id, MessageUid(3));

    let request = ListRequest {
        criteria: Some(QueryCriteria::Unseen),
        per_page: Some(PerPage::Unbounded),
        ..ListRequest::default()
    };
    let listing = gateway.list_messages(&token, &request).await.unwrap();
    let ids: Vec<MessageUid> = listing.messages.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![MessageUid(2), MessageUid(3)]);

    let request = ListRequest {
        page: Some(0),
        ..ListRequest::default()
    };
    let result = gateway.list_messages(&token, &request).await;
    assert!(matches!(result, Err(GatewayError::Validation(_))));
}

#[tokio::test]
async fn get_renders_requested_format() {
    let (gateway, backend, token) = logged_in().await;

    let mut request = GetRequest::new(MessageUid(2));
    request.format = BodyFormat::Html;
    request.mark_seen = true;
    let detail = gateway.get_message(&token, &request).await.unwrap();

    assert_eq!(detail.summary.subject, "Lunch?");
    assert!(detail.body.contains("Hello &lt;there&gt;<br>second line"));
    assert!(backend
        .flags("INBOX", MessageUid(2))
        .unwrap()
        .contains(&"\\Seen".to_string()));

    let result = gateway
        .get_message(&token, &GetRequest::new(MessageUid(99)))
        .await;
    assert!(matches!(result, Err(GatewayError::MessageNotFound(_))));
}

// ============================================================================
// Mutation
// ============================================================================

#[tokio::test]
async fn update_flags_then_move() {
    let (gateway, backend, token) = logged_in().await;

    let mut request = UpdateRequest::new(MessageUid(3));
    request.flags = Some(FlagChange::Delta {
        add: Some(vec!["answered".to_string()]),
        remove: None,
    });
    request.keywords = Some(FlagChange::Replace(vec!["$Work".to_string()]));
    request.new_box = Some(BoxChange::move_to("Archive"));

    let detail = gateway.update_message(&token, &request).await.unwrap();
    assert_eq!(
        detail.summary.flags,
        vec![
            "\\Flagged".to_string(),
            "\\Answered".to_string(),
            "$Work".to_string()
        ]
    );
    assert_eq!(backend.uids("INBOX"), vec![MessageUid(1), MessageUid(2)]);
    assert_eq!(backend.uids("Archive").len(), 1);
}

#[tokio::test]
async fn invalid_move_touches_nothing() {
    let (gateway, backend, token) = logged_in().await;
    backend.clear_calls();

    let mut request = UpdateRequest::new(MessageUid(1));
    request.flags = Some(FlagChange::Replace(vec![]));
    request.new_box = Some(BoxChange {
        action: BoxAction::Move,
        destination: Destinations::Many(vec![
            "Archive".to_string(),
            "Work".to_string(),
        ]),
    });

    let result = gateway.update_message(&token, &request).await;
    assert!(matches!(result, Err(GatewayError::Validation(_))));
    assert!(backend.calls().is_empty());
    assert_eq!(
        backend.flags("INBOX", MessageUid(1)),
        Some(vec!["\\Seen".to_string()])
    );
}

#[tokio::test]
async fn shutdown_closes_every_session() {
    let (gateway, _, token) = logged_in().await;

    assert_eq!(gateway.shutdown().await, 1);
    assert!(!gateway.registry().has(&token).await);
}
