//! Workspace facade crate.
//!
//! Re-exports the synchronization engine and runtime so host applications can
//! depend on `library-sync-workspace` alone. The `desktop-shims` feature wires
//! the desktop bridge implementations (reqwest HTTP client, TCP reachability
//! probe, OS keychain) as configuration defaults.

pub use core_runtime as runtime;
pub use core_sync as sync;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop as desktop;
