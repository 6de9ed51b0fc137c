//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by every crate in the workspace:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Nothing here knows about the music server. The session manager, the sync
//! orchestrator and the host application all meet on these types: they read
//! the same [`config::CoreConfig`], publish to the same [`events::EventBus`]
//! and log through the subscriber installed by [`logging::init_logging`].

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
