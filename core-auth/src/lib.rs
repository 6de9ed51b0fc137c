//! # Session Management
//!
//! Authentication against the remote music server.
//!
//! ## Overview
//!
//! This crate owns the single live session the sync engine works with: the
//! handshake token, its expiry, the per-kind entity counts and the change
//! snapshot the server reports. The wire-level handshake sits behind the
//! [`Authenticator`] trait so this crate stays transport-agnostic.
//!
//! ## Features
//!
//! - Password (salted SHA-256 passphrase) and API-key credentials
//! - Lazy re-authentication with a 300 second expiry margin
//! - Credential persistence through the host `SecureStore`
//! - Auth state event emission on the core `EventBus`

pub mod credential_store;
pub mod error;
pub mod manager;
pub mod types;

pub use credential_store::CredentialStore;
pub use error::{AuthError, Result};
pub use manager::{Authenticator, SessionManager, PODCAST_MIN_API_VERSION, SESSION_EXPIRY_MARGIN_SECS};
pub use types::{ChangeSnapshot, Credentials, HandshakeResult, RemoteCounts, Secret, Session};
