//! # Ampache Provider
//!
//! Wire client for the Ampache XML API.
//!
//! ## Overview
//!
//! This crate provides:
//! - Request URL construction for `server/xml.server.php` actions
//! - The handshake, as a [`core_auth::Authenticator`]
//! - A flat open/close token stream over response bodies (quick-xml)
//! - Error envelope extraction for both historical envelope shapes
//!
//! Entity decoding lives in `core-sync`; this crate only knows the protocol.

pub mod client;
pub mod envelope;
pub mod error;
pub mod xml;

pub use client::{
    parse_api_version, parse_timestamp, Action, AmpacheClient, ApiRequest, ApiResponse,
    CLIENT_API_VERSION,
};
pub use envelope::ApiFault;
pub use error::{AmpacheError, Result};
pub use xml::{tokenize, XmlToken};
