//! Session registry.
//!
//! Owns every live session and is the only place connections are opened or
//! closed. Each account identity maps to at most one session, and each token
//! to at most one session.
//!
//! # Concurrency
//!
//! The session table sits behind an async `RwLock`. Connections are opened
//! outside the lock; registration re-checks the identity under the write lock
//! and tears down the freshly opened connection if another caller won the
//! race. Protocol exchanges on a session are serialized by the per-session
//! connection mutex.
//!
//! # Reuse
//!
//! A session is only handed to a caller whose password matches the one it
//! was opened with. The password itself is not kept; the session holds a
//! salted PBKDF2 digest of it.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use super::{GatewayError, Result};
use crate::domain::{Credentials, SessionToken};
use crate::providers::email::{Connector, MailConnection};

const SALT_LEN: usize = 16;
const DIGEST_LEN: usize = ring::digest::SHA256_OUTPUT_LEN;
const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(4_096) {
    Some(n) => n,
    None => panic!("iteration count must be non-zero"),
};

/// Salted digest of the password a session was opened with.
struct SecretVerifier {
    salt: [u8; SALT_LEN],
    digest: [u8; DIGEST_LEN],
}

impl SecretVerifier {
    fn new(secret: &str) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| GatewayError::Internal("failed to generate salt".to_string()))?;

        let mut digest = [0u8; DIGEST_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            PBKDF2_ITERATIONS,
            &salt,
            secret.as_bytes(),
            &mut digest,
        );
        Ok(Self { salt, digest })
    }

    /// Constant-time comparison against the stored digest.
    fn matches(&self, secret: &str) -> bool {
        pbkdf2::verify(
            pbkdf2::PBKDF2_HMAC_SHA256,
            PBKDF2_ITERATIONS,
            &self.salt,
            secret.as_bytes(),
            &self.digest,
        )
        .is_ok()
    }
}

/// A live, authenticated session.
pub struct Session {
    token: SessionToken,
    identity: String,
    verifier: SecretVerifier,
    connection: Mutex<Box<dyn MailConnection>>,
    created_at: DateTime<Utc>,
}

impl Session {
    fn new(
        token: SessionToken,
        identity: String,
        verifier: SecretVerifier,
        connection: Box<dyn MailConnection>,
    ) -> Self {
        Self {
            token,
            identity,
            verifier,
            connection: Mutex::new(connection),
            created_at: Utc::now(),
        }
    }

    /// Bearer token addressing this session.
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Account identity (email address).
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Acquires exclusive use of the connection.
    ///
    /// Hold the guard for the whole protocol exchange; commands from another
    /// caller wait until it is dropped.
    pub async fn connection(&self) -> MutexGuard<'_, Box<dyn MailConnection>> {
        self.connection.lock().await
    }

    async fn close(&self) -> bool {
        let mut connection = self.connection.lock().await;
        match connection.close().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(account = %self.identity, error = %e, "Failed to close connection");
                false
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct SessionTable {
    by_token: HashMap<SessionToken, Arc<Session>>,
    by_identity: HashMap<String, SessionToken>,
}

impl SessionTable {
    fn by_identity(&self, identity: &str) -> Option<Arc<Session>> {
        self.by_identity
            .get(identity)
            .and_then(|token| self.by_token.get(token))
            .cloned()
    }

    fn remove(&mut self, token: &SessionToken) -> Option<Arc<Session>> {
        let session = self.by_token.remove(token)?;
        self.by_identity.remove(session.identity());
        Some(session)
    }
}

type TokenSource = Box<dyn Fn() -> SessionToken + Send + Sync>;

/// Registry of live sessions.
pub struct SessionRegistry {
    connector: Arc<dyn Connector>,
    sessions: RwLock<SessionTable>,
    token_source: TokenSource,
}

impl SessionRegistry {
    /// Creates an empty registry that opens connections through `connector`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            sessions: RwLock::new(SessionTable::default()),
            token_source: Box::new(SessionToken::generate),
        }
    }

    /// Replaces the token generator.
    pub fn with_token_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> SessionToken + Send + Sync + 'static,
    {
        self.token_source = Box::new(source);
        self
    }

    /// Returns the session for the account, creating one if none exists.
    ///
    /// An existing session is only returned when the password matches the
    /// one it was opened with; otherwise this fails with
    /// [`GatewayError::Authentication`] and the session is left alone.
    pub async fn connect(&self, credentials: &Credentials) -> Result<Arc<Session>> {
        if let Some(session) = self.find_by_identity(&credentials.email).await {
            return Self::reuse(session, credentials);
        }
        self.create(credentials).await
    }

    fn reuse(session: Arc<Session>, credentials: &Credentials) -> Result<Arc<Session>> {
        if !session.verifier.matches(&credentials.password) {
            tracing::warn!(account = %credentials.email, "Credentials do not match the live session");
            return Err(GatewayError::Authentication(
                "credentials do not match the active session".to_string(),
            ));
        }
        tracing::info!(account = %credentials.email, "Reusing existing session");
        Ok(session)
    }

    /// Opens a new connection and registers a session for it.
    ///
    /// If a session for the same account was registered while the connection
    /// was being opened, the new connection is closed and the existing
    /// session is returned, subject to the same password check as
    /// [`connect`](Self::connect).
    pub async fn create(&self, credentials: &Credentials) -> Result<Arc<Session>> {
        let verifier = SecretVerifier::new(&credentials.password)?;
        let mut connection = self
            .connector
            .connect(credentials)
            .await
            .map_err(|e| {
                tracing::warn!(account = %credentials.email, error = %e, "Connect failed");
                GatewayError::from_connect(e)
            })?;

        let mut table = self.sessions.write().await;

        if let Some(existing) = table.by_identity(&credentials.email) {
            drop(table);
            tracing::warn!(
                account = %credentials.email,
                "Session registered concurrently, closing duplicate connection"
            );
            if let Err(e) = connection.close().await {
                tracing::warn!(account = %credentials.email, error = %e, "Failed to close duplicate connection");
            }
            return Self::reuse(existing, credentials);
        }

        let token = loop {
            let candidate = (self.token_source)();
            if !table.by_token.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Arc::new(Session::new(
            token.clone(),
            credentials.email.clone(),
            verifier,
            connection,
        ));
        table
            .by_identity
            .insert(credentials.email.clone(), token.clone());
        table.by_token.insert(token, Arc::clone(&session));

        tracing::info!(account = %credentials.email, "Session created");
        Ok(session)
    }

    /// Looks up a session by token.
    pub async fn get(&self, token: &SessionToken) -> Option<Arc<Session>> {
        self.sessions.read().await.by_token.get(token).cloned()
    }

    /// Returns true if the token belongs to a live session.
    pub async fn has(&self, token: &SessionToken) -> bool {
        self.sessions.read().await.by_token.contains_key(token)
    }

    /// Looks up a session by account identity.
    pub async fn find_by_identity(&self, identity: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.by_identity(identity)
    }

    /// Closes and removes a session.
    ///
    /// Unknown tokens are ignored. Returns true if a session was removed.
    pub async fn destroy(&self, token: &SessionToken) -> bool {
        let removed = self.sessions.write().await.remove(token);
        match removed {
            Some(session) => {
                session.close().await;
                tracing::info!(account = %session.identity(), "Session destroyed");
                true
            }
            None => false,
        }
    }

    /// Closes every session concurrently and empties the registry.
    ///
    /// Individual close failures are logged, not returned. Returns the number
    /// of sessions torn down.
    pub async fn destroy_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> = {
            let mut table = self.sessions.write().await;
            table.by_identity.clear();
            table.by_token.drain().map(|(_, session)| session).collect()
        };

        let results = join_all(sessions.iter().map(|session| session.close())).await;
        let failed = results.iter().filter(|closed| !**closed).count();
        if failed > 0 {
            tracing::warn!(failed, total = sessions.len(), "Some connections failed to close");
        }
        tracing::info!(count = sessions.len(), "All sessions destroyed");
        sessions.len()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.by_token.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.by_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Endpoint;
    use crate::providers::email::{
        BackendCall, InMemoryBackend, InMemoryConnector, MockConnector, ProviderError,
    };
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn credentials(email: &str) -> Credentials {
        Credentials::new(email, "secret", Endpoint::new("imap.test", 993))
    }

    fn connector() -> InMemoryConnector {
        InMemoryConnector::new(InMemoryBackend::new())
            .with_account("alice@example.com", "secret")
            .with_account("bob@example.com", "secret")
    }

    #[tokio::test]
    async fn connect_reuses_session_for_identity() {
        let connector = connector();
        let registry = SessionRegistry::new(Arc::new(connector.clone()));

        let first = registry.connect(&credentials("alice@example.com")).await.unwrap();
        let second = registry.connect(&credentials("alice@example.com")).await.unwrap();

        assert_eq!(first.token(), second.token());
        assert_eq!(registry.len().await, 1);
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test]
    async fn reuse_requires_matching_password() {
        let connector = connector();
        let registry = SessionRegistry::new(Arc::new(connector.clone()));
        let session = registry.connect(&credentials("alice@example.com")).await.unwrap();

        let wrong = Credentials::new("alice@example.com", "guess", Endpoint::new("imap.test", 993));
        let result = registry.connect(&wrong).await;

        assert!(matches!(result, Err(GatewayError::Authentication(_))));
        assert!(registry.has(session.token()).await);
        assert_eq!(registry.len().await, 1);
        assert_eq!(connector.opened(), 1);
        assert_eq!(connector.closed(), 0);
    }

    #[test]
    fn verifier_is_salted() {
        let first = SecretVerifier::new("secret").unwrap();
        let second = SecretVerifier::new("secret").unwrap();

        assert!(first.matches("secret"));
        assert!(!first.matches("Secret"));
        assert!(!first.matches(""));
        assert_ne!(first.digest, second.digest);
    }

    #[tokio::test]
    async fn rejected_smtp_closes_imap_connection() {
        let smtp = Endpoint::new("smtp.test", 465);
        let cases = [
            (
                ProviderError::Authentication("535 bad credentials".to_string()),
                "authentication",
            ),
            (
                ProviderError::Connection("connection refused".to_string()),
                "connectivity",
            ),
        ];

        for (failure, expected) in cases {
            let connector = connector().with_smtp_failure(failure);
            let registry = SessionRegistry::new(Arc::new(connector.clone()));
            let creds = credentials("alice@example.com").with_smtp(smtp.clone());

            let result = registry.connect(&creds).await;
            let kind = match result {
                Err(GatewayError::Authentication(_)) => "authentication",
                Err(GatewayError::Connectivity(_)) => "connectivity",
                _ => "other",
            };

            assert_eq!(kind, expected);
            assert_eq!(connector.opened(), 1);
            assert_eq!(connector.closed(), 1);
            assert!(registry.is_empty().await);
        }
    }

    #[tokio::test]
    async fn smtp_check_skipped_without_endpoint() {
        let connector = connector()
            .with_smtp_failure(ProviderError::Authentication("unused".to_string()));
        let registry = SessionRegistry::new(Arc::new(connector.clone()));

        registry.connect(&credentials("alice@example.com")).await.unwrap();
        assert_eq!(connector.closed(), 0);
    }

    #[tokio::test]
    async fn concurrent_connects_share_one_session() {
        let connector = connector().with_delay(Duration::from_millis(20));
        let registry = SessionRegistry::new(Arc::new(connector.clone()));
        let creds = credentials("alice@example.com");

        let (first, second) = tokio::join!(registry.connect(&creds), registry.connect(&creds));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.token(), second.token());
        assert_eq!(registry.len().await, 1);
        assert_eq!(connector.opened(), 2);
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test]
    async fn created_session_is_visible() {
        let registry = SessionRegistry::new(Arc::new(connector()));
        let session = registry.create(&credentials("bob@example.com")).await.unwrap();

        assert!(registry.has(session.token()).await);
        let found = registry.get(session.token()).await.unwrap();
        assert_eq!(found.identity(), "bob@example.com");
        assert!(registry
            .find_by_identity("bob@example.com")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn token_collisions_are_regenerated() {
        let tokens = StdMutex::new(VecDeque::from(vec!["a", "a", "b"]));
        let registry = SessionRegistry::new(Arc::new(connector())).with_token_source(move || {
            let next = tokens.lock().unwrap().pop_front().unwrap_or("z");
            SessionToken::from(next)
        });

        let alice = registry.create(&credentials("alice@example.com")).await.unwrap();
        let bob = registry.create(&credentials("bob@example.com")).await.unwrap();

        assert_eq!(alice.token().as_str(), "a");
        assert_eq!(bob.token().as_str(), "b");
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let connector = connector();
        let registry = SessionRegistry::new(Arc::new(connector.clone()));
        let session = registry.create(&credentials("alice@example.com")).await.unwrap();
        let token = session.token().clone();

        assert!(registry.destroy(&token).await);
        assert!(!registry.destroy(&token).await);
        assert!(!registry.has(&token).await);
        assert!(registry.find_by_identity("alice@example.com").await.is_none());
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test]
    async fn destroy_unknown_token_is_noop() {
        let registry = SessionRegistry::new(Arc::new(connector()));
        assert!(!registry.destroy(&SessionToken::from("missing")).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn destroy_all_closes_despite_failures() {
        let connector = connector();
        let registry = SessionRegistry::new(Arc::new(connector.clone()));
        registry.create(&credentials("alice@example.com")).await.unwrap();
        registry.create(&credentials("bob@example.com")).await.unwrap();

        connector
            .backend()
            .fail_on("close", ProviderError::Connection("broken pipe".to_string()));

        assert_eq!(registry.destroy_all().await, 2);
        assert!(registry.is_empty().await);
        assert_eq!(connector.closed(), 2);
        let closes = connector
            .backend()
            .calls()
            .into_iter()
            .filter(|call| *call == BackendCall::Close)
            .count();
        assert_eq!(closes, 2);
    }

    #[tokio::test]
    async fn rejected_credentials_map_to_authentication() {
        let mut mock = MockConnector::new();
        mock.expect_connect()
            .times(1)
            .returning(|_| Err(ProviderError::Authentication("LOGIN rejected".to_string())));
        let registry = SessionRegistry::new(Arc::new(mock));

        let result = registry.connect(&credentials("alice@example.com")).await;
        assert!(matches!(result, Err(GatewayError::Authentication(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn transport_failure_maps_to_connectivity() {
        let mut mock = MockConnector::new();
        mock.expect_connect()
            .returning(|_| Err(ProviderError::Connection("connection refused".to_string())));
        let registry = SessionRegistry::new(Arc::new(mock));

        let result = registry.create(&credentials("alice@example.com")).await;
        assert!(matches!(result, Err(GatewayError::Connectivity(_))));
    }
}
