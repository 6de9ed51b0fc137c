//! # Session Manager
//!
//! Holds the single live session against the remote music server.
//!
//! ## Overview
//!
//! The `SessionManager` performs the handshake through an [`Authenticator`],
//! keeps the resulting token, expiry, remote entity counts and change
//! snapshot, and lazily re-authenticates with the last credentials when the
//! session is missing or about to expire.
//!
//! Failures never escape: a failed handshake clears the session, emits
//! `AuthEvent::AuthError` and leaves callers observing an absent session.
//!
//! ## Concurrency
//!
//! `ensure_authenticated` does not hold a lock across the handshake. Two
//! concurrent callers that both see an expired session each run a handshake;
//! the last one to finish wins. This is harmless for the remote server and
//! keeps batch workers from serializing on the session.
//!
//! ## Usage
//!
//! ```ignore
//! use core_auth::{Credentials, SessionManager};
//! use core_runtime::events::EventBus;
//!
//! let manager = SessionManager::new(authenticator, EventBus::new(100));
//! let creds = Credentials::password("https://music.example.com", "alice", "pw");
//! if manager.authenticate(creds).await {
//!     println!("{} songs on server", manager.remote_counts().await.songs);
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::credential_store::CredentialStore;
use crate::error::{AuthError, Result};
use crate::types::{ChangeSnapshot, Credentials, HandshakeResult, RemoteCounts, Session};

/// Safety margin before the reported expiry after which a session is
/// considered stale
pub const SESSION_EXPIRY_MARGIN_SECS: i64 = 300;

/// Lowest numeric API version that serves podcast actions (4.2.0)
pub const PODCAST_MIN_API_VERSION: u32 = 420_000;

/// One handshake round trip against the remote server
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn handshake(&self, credentials: &Credentials) -> Result<HandshakeResult>;
}

pub struct SessionManager {
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    credential_store: Option<CredentialStore>,
    session: Arc<RwLock<Option<Session>>>,
    credentials: Arc<RwLock<Option<Credentials>>>,
}

impl SessionManager {
    pub fn new(authenticator: Arc<dyn Authenticator>, event_bus: EventBus) -> Self {
        Self {
            authenticator,
            clock: Arc::new(SystemClock),
            event_bus,
            credential_store: None,
            session: Arc::new(RwLock::new(None)),
            credentials: Arc::new(RwLock::new(None)),
        }
    }

    /// Use a custom time source for expiry checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist credentials after each successful handshake
    pub fn with_credential_store(mut self, store: CredentialStore) -> Self {
        self.credential_store = Some(store);
        self
    }

    /// Run one handshake and replace the session with its outcome
    ///
    /// Returns whether a session is now held. The credentials are remembered
    /// for later `ensure_authenticated` calls even when the handshake fails.
    #[instrument(skip(self, credentials), fields(server = %credentials.server_url, user = %credentials.username))]
    pub async fn authenticate(&self, credentials: Credentials) -> bool {
        *self.credentials.write().await = Some(credentials.clone());

        let _ = self.event_bus.emit(CoreEvent::Auth(AuthEvent::SigningIn {
            server_url: credentials.server_url.clone(),
            username: credentials.username.clone(),
        }));

        match self.authenticator.handshake(&credentials).await {
            Ok(handshake) => {
                let session = Session::from_handshake(&credentials, handshake);
                info!(
                    api_version = session.api_version,
                    expires_at = %session.expires_at,
                    songs = session.counts.songs,
                    "Handshake succeeded"
                );

                let _ = self.event_bus.emit(CoreEvent::Auth(AuthEvent::SignedIn {
                    username: session.username.clone(),
                    api_version: session.api_version,
                }));
                *self.session.write().await = Some(session);

                if let Some(store) = &self.credential_store {
                    if let Err(e) = store.store(&credentials).await {
                        warn!(error = %e, "Could not persist credentials");
                    }
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "Handshake failed, session cleared");
                *self.session.write().await = None;

                let _ = self.event_bus.emit(CoreEvent::Auth(AuthEvent::AuthError {
                    code: e.code(),
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                }));
                false
            }
        }
    }

    /// Token present and `expires_at - 300s` still in the future
    pub async fn is_authenticated(&self) -> bool {
        let now = self.clock.now();
        self.session
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.is_valid_at(now, Self::margin()))
    }

    /// Re-authenticate with the last credentials if the session is stale
    ///
    /// Falls back to the credential store when no credentials were provided
    /// in this process.
    pub async fn ensure_authenticated(&self) -> bool {
        if self.is_authenticated().await {
            return true;
        }

        // Bound first so the read guard is released before restoring
        let cached = self.credentials.read().await.clone();
        let credentials = match cached {
            Some(credentials) => Some(credentials),
            None => match self.restore_credentials().await {
                Ok(restored) => restored,
                Err(e) => {
                    warn!(error = %e, "Could not restore credentials");
                    None
                }
            },
        };

        match credentials {
            Some(credentials) => {
                debug!("Session missing or stale, re-authenticating");
                self.authenticate(credentials).await
            }
            None => {
                debug!("No credentials to re-authenticate with");
                false
            }
        }
    }

    /// Load credentials from the credential store into memory
    ///
    /// Returns the restored credentials, or `None` when nothing is stored or
    /// no store is configured.
    pub async fn restore_credentials(&self) -> Result<Option<Credentials>> {
        let Some(store) = &self.credential_store else {
            return Ok(None);
        };

        let restored = store.load().await?;
        if let Some(credentials) = &restored {
            debug!(user = %credentials.username, "Credentials restored");
            *self.credentials.write().await = Some(credentials.clone());
        }
        Ok(restored)
    }

    /// Drop the session but keep the credentials for re-authentication
    pub async fn invalidate(&self) {
        if self.session.write().await.take().is_some() {
            debug!("Session invalidated");
        }
    }

    /// Drop the session and forget the credentials everywhere
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        let session = self.session.write().await.take();
        self.credentials.write().await.take();

        if let Some(store) = &self.credential_store {
            store.clear().await?;
        }

        let _ = self.event_bus.emit(CoreEvent::Auth(AuthEvent::SignedOut {
            username: session.map(|s| s.username),
        }));
        info!("Signed out");
        Ok(())
    }

    /// Token of a valid session
    pub async fn token(&self) -> Result<String> {
        let now = self.clock.now();
        self.session
            .read()
            .await
            .as_ref()
            .filter(|s| s.is_valid_at(now, Self::margin()))
            .map(|s| s.token.clone())
            .ok_or(AuthError::NotAuthenticated)
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// Per-kind counts of the current session; zero without one
    pub async fn remote_counts(&self) -> RemoteCounts {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.counts)
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> Option<ChangeSnapshot> {
        self.session.read().await.as_ref().map(|s| s.snapshot)
    }

    pub async fn api_version(&self) -> Option<u32> {
        self.session.read().await.as_ref().map(|s| s.api_version)
    }

    pub async fn supports_podcasts(&self) -> bool {
        self.api_version()
            .await
            .is_some_and(|v| v >= PODCAST_MIN_API_VERSION)
    }

    pub async fn server_url(&self) -> Option<String> {
        self.credentials
            .read()
            .await
            .as_ref()
            .map(|c| c.server_url.clone())
    }

    fn margin() -> chrono::Duration {
        chrono::Duration::seconds(SESSION_EXPIRY_MARGIN_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential_store::tests::MemorySecureStore;
    use bridge_traits::storage::SecureStore;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockAuthenticator {
        calls: AtomicUsize,
        fail: AtomicBool,
        expires_at: DateTime<Utc>,
    }

    impl MockAuthenticator {
        fn new(expires_at: DateTime<Utc>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                expires_at,
            }
        }
    }

    #[async_trait]
    impl Authenticator for MockAuthenticator {
        async fn handshake(&self, credentials: &Credentials) -> Result<HandshakeResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                return Err(AuthError::Rejected {
                    code: 4701,
                    message: "Session Expired".into(),
                });
            }
            Ok(HandshakeResult {
                token: format!("{}-{n}", credentials.username),
                expires_at: self.expires_at,
                counts: RemoteCounts {
                    songs: 120,
                    albums: 12,
                    artists: 3,
                    ..Default::default()
                },
                snapshot: ChangeSnapshot::default(),
                api_version: 440_001,
            })
        }
    }

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn set(&self, now: DateTime<Utc>) {
            *self.0.lock().unwrap() = now;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (Arc<MockAuthenticator>, Arc<ManualClock>, SessionManager, EventBus) {
        let auth = Arc::new(MockAuthenticator::new(noon() + chrono::Duration::hours(1)));
        let clock = Arc::new(ManualClock(Mutex::new(noon())));
        let bus = EventBus::new(16);
        let manager = SessionManager::new(auth.clone(), bus.clone()).with_clock(clock.clone());
        (auth, clock, manager, bus)
    }

    fn creds() -> Credentials {
        Credentials::password("https://m.example.com", "alice", "pw")
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let (_, _, manager, bus) = setup();
        let mut events = bus.subscribe();

        assert!(manager.authenticate(creds()).await);
        assert!(manager.is_authenticated().await);
        assert_eq!(manager.token().await.unwrap(), "alice-1");
        assert_eq!(manager.remote_counts().await.songs, 120);
        assert!(manager.supports_podcasts().await);

        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::SigningIn { .. })
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::SignedIn { api_version: 440_001, .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_clears_session_and_zeroes_counts() {
        let (auth, _, manager, bus) = setup();
        assert!(manager.authenticate(creds()).await);

        let mut events = bus.subscribe();
        auth.fail.store(true, Ordering::SeqCst);
        assert!(!manager.authenticate(creds()).await);

        assert!(!manager.is_authenticated().await);
        assert!(manager.session().await.is_none());
        assert!(manager.remote_counts().await.is_empty());
        assert!(!manager.supports_podcasts().await);
        assert!(matches!(manager.token().await, Err(AuthError::NotAuthenticated)));

        let _signing_in = events.recv().await.unwrap();
        match events.recv().await.unwrap() {
            CoreEvent::Auth(AuthEvent::AuthError {
                code, recoverable, ..
            }) => {
                assert_eq!(code, Some(4701));
                assert!(!recoverable);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expiry_margin_triggers_reauth() {
        let (auth, clock, manager, _) = setup();
        assert!(manager.authenticate(creds()).await);

        // 10 minutes left: still fine, no new handshake
        clock.set(noon() + chrono::Duration::minutes(50));
        assert!(manager.ensure_authenticated().await);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);

        // 4 minutes left: inside the margin
        clock.set(noon() + chrono::Duration::minutes(56));
        assert!(!manager.is_authenticated().await);
        // The mock keeps handing out the same expiry, so the new session is
        // also stale; only the handshake count matters here.
        manager.ensure_authenticated().await;
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ensure_without_credentials_is_noop() {
        let (auth, _, manager, _) = setup();
        assert!(!manager.ensure_authenticated().await);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalidate_keeps_credentials() {
        let (auth, _, manager, _) = setup();
        manager.authenticate(creds()).await;
        manager.invalidate().await;
        assert!(!manager.is_authenticated().await);

        assert!(manager.ensure_authenticated().await);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.token().await.unwrap(), "alice-2");
    }

    #[tokio::test]
    async fn test_credentials_restored_from_store() {
        let secure = Arc::new(MemorySecureStore::default());
        let (auth, clock, first, _) = setup();
        let first = first.with_credential_store(CredentialStore::new(secure.clone()));
        assert!(first.authenticate(creds()).await);

        // Fresh manager, as after a restart
        let second = SessionManager::new(auth.clone(), EventBus::new(4))
            .with_clock(clock)
            .with_credential_store(CredentialStore::new(secure));
        let restored = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            second.ensure_authenticated(),
        )
        .await
        .expect("ensure_authenticated must not block on its own lock");
        assert!(restored);
        assert_eq!(
            second.server_url().await.as_deref(),
            Some("https://m.example.com")
        );
    }

    #[tokio::test]
    async fn test_sign_out() {
        let secure = Arc::new(MemorySecureStore::default());
        let (_, _, manager, bus) = setup();
        let manager = manager.with_credential_store(CredentialStore::new(secure.clone()));
        manager.authenticate(creds()).await;

        let mut events = bus.subscribe();
        manager.sign_out().await.unwrap();

        assert!(!manager.ensure_authenticated().await);
        assert!(!secure.has_secret("library_sync.credentials").await.unwrap());
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::SignedOut {
                username: Some("alice".into())
            })
        );
    }
}
