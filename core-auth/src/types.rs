use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Secret half of a set of credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Secret {
    Password(String),
    ApiKey(String),
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Password(_) => f.write_str("Password([REDACTED])"),
            Secret::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
        }
    }
}

/// What the session manager needs to (re-)authenticate
///
/// # Examples
///
/// ```
/// use core_auth::Credentials;
///
/// let creds = Credentials::password("https://music.example.com", "alice", "hunter2");
/// assert_eq!(creds.handshake_auth(1_700_000_000).len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub server_url: String,
    pub username: String,
    pub secret: Secret,
}

impl Credentials {
    pub fn password(
        server_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            username: username.into(),
            secret: Secret::Password(password.into()),
        }
    }

    pub fn api_key(
        server_url: impl Into<String>,
        username: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            username: username.into(),
            secret: Secret::ApiKey(key.into()),
        }
    }

    /// Whether the handshake must carry `timestamp` and `user`
    pub fn is_password(&self) -> bool {
        matches!(self.secret, Secret::Password(_))
    }

    /// Value of the `auth` handshake parameter
    ///
    /// Password handshakes send `sha256(timestamp + sha256(password))` in
    /// lowercase hex. API keys are sent as-is and ignore the timestamp.
    pub fn handshake_auth(&self, timestamp: i64) -> String {
        match &self.secret {
            Secret::Password(password) => {
                let key = sha256_hex(password.as_bytes());
                sha256_hex(format!("{timestamp}{key}").as_bytes())
            }
            Secret::ApiKey(key) => key.clone(),
        }
    }
}

fn sha256_hex(input: &[u8]) -> String {
    format!("{:x}", Sha256::digest(input))
}

/// Per-kind entity counts reported by the handshake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCounts {
    pub songs: u64,
    pub albums: u64,
    pub artists: u64,
    pub genres: u64,
    pub playlists: u64,
    pub podcasts: u64,
    pub podcast_episodes: u64,
    pub catalogs: u64,
}

impl RemoteCounts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Remote change timestamps captured at handshake time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSnapshot {
    /// Last catalog update
    pub update: Option<DateTime<Utc>>,
    /// Last time entities were added
    pub add: Option<DateTime<Utc>>,
    /// Last catalog clean (removal of missing files)
    pub clean: Option<DateTime<Utc>>,
}

/// Successful handshake as reported by an [`Authenticator`](crate::Authenticator)
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub counts: RemoteCounts,
    pub snapshot: ChangeSnapshot,
    /// Numeric API version, e.g. `440001` for 4.4.1
    pub api_version: u32,
}

impl fmt::Debug for HandshakeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeResult")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("counts", &self.counts)
            .field("snapshot", &self.snapshot)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Live, in-memory session. Never persisted.
#[derive(Clone)]
pub struct Session {
    pub server_url: String,
    pub username: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub counts: RemoteCounts,
    pub snapshot: ChangeSnapshot,
    pub api_version: u32,
}

impl Session {
    pub(crate) fn from_handshake(credentials: &Credentials, handshake: HandshakeResult) -> Self {
        Self {
            server_url: credentials.server_url.clone(),
            username: credentials.username.clone(),
            token: handshake.token,
            expires_at: handshake.expires_at,
            counts: handshake.counts,
            snapshot: handshake.snapshot,
            api_version: handshake.api_version,
        }
    }

    /// Valid at `now` when `expires_at - margin` has not passed
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        !self.token.is_empty() && now < self.expires_at - margin
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("api_version", &self.api_version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_password_handshake_auth() {
        let creds = Credentials::password("https://m.example.com", "alice", "secret");

        // sha256("secret") = 2bb80d53...; the outer hash mixes in the timestamp
        let first = creds.handshake_auth(1_000);
        let second = creds.handshake_auth(1_001);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(first, second);
        assert_eq!(first, creds.handshake_auth(1_000));

        let key = sha256_hex(b"secret");
        assert_eq!(
            key,
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
        assert_eq!(first, sha256_hex(format!("1000{key}").as_bytes()));
    }

    #[test]
    fn test_api_key_is_sent_verbatim() {
        let creds = Credentials::api_key("https://m.example.com", "alice", "k3y");
        assert_eq!(creds.handshake_auth(42), "k3y");
        assert!(!creds.is_password());
    }

    #[test]
    fn test_debug_never_shows_secrets() {
        let creds = Credentials::password("https://m.example.com", "alice", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));

        let session = Session {
            server_url: "https://m.example.com".into(),
            username: "alice".into(),
            token: "tok-123".into(),
            expires_at: Utc::now(),
            counts: RemoteCounts::default(),
            snapshot: ChangeSnapshot::default(),
            api_version: 440001,
        };
        assert!(!format!("{session:?}").contains("tok-123"));
    }

    #[test]
    fn test_session_validity_margin() {
        let expires = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let session = Session {
            server_url: String::new(),
            username: String::new(),
            token: "t".into(),
            expires_at: expires,
            counts: RemoteCounts::default(),
            snapshot: ChangeSnapshot::default(),
            api_version: 0,
        };
        let margin = chrono::Duration::seconds(300);

        assert!(session.is_valid_at(expires - chrono::Duration::seconds(301), margin));
        assert!(!session.is_valid_at(expires - chrono::Duration::seconds(300), margin));
        assert!(!session.is_valid_at(expires, margin));
    }

    #[test]
    fn test_credentials_serde_round_trip() {
        let creds = Credentials::api_key("https://m.example.com", "bob", "abc");
        let json = serde_json::to_string(&creds).unwrap();
        assert!(json.contains("\"type\":\"api_key\""));
        let back: Credentials = serde_json::from_str(&json).unwrap();
        assert_eq!(back, creds);
    }
}
