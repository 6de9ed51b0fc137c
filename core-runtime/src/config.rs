//! # Core Configuration Module
//!
//! Configuration for the library synchronization engine.
//!
//! ## Overview
//!
//! A builder produces a [`CoreConfig`] holding the server location, the local
//! database path and the host bridges the engine talks through. Validation is
//! fail-fast: a missing capability is reported before any network or database
//! work starts.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - wire requests (desktop default: reqwest)
//!
//! ## Optional Dependencies
//!
//! - `NetworkMonitor` - reachability guard; required when network awareness is
//!   enabled (desktop default: TCP probe against the server)
//! - `SecureStore` - credential persistence across restarts (desktop default:
//!   OS keychain)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .server_url("https://music.example.com")
//!     .database_path("/var/lib/library-sync/waves.db")
//!     .enable_podcasts(true)
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // No server URL: fails with an actionable message
//! CoreConfig::builder()
//!     .database_path("waves.db")
//!     .build()
//!     .expect("server url is required");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{HttpClient, NetworkMonitor, SecureStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Core configuration for the synchronization engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Base URL of the music server (scheme and host, optional path prefix)
    pub server_url: String,

    /// Path to the SQLite database holding sync-wave history
    pub database_path: PathBuf,

    /// HTTP client for API requests
    pub http_client: Arc<dyn HttpClient>,

    /// Reachability monitor consulted before every network-issuing operation
    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,

    /// Secure credential storage
    pub secure_store: Option<Arc<dyn SecureStore>>,

    /// Event bus buffer size
    pub event_buffer_size: usize,

    /// Feature flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("server_url", &self.server_url)
            .field("database_path", &self.database_path)
            .field("http_client", &"HttpClient { ... }")
            .field(
                "network_monitor",
                &self
                    .network_monitor
                    .as_ref()
                    .map(|_| "NetworkMonitor { ... }"),
            )
            .field(
                "secure_store",
                &self.secure_store.as_ref().map(|_| "SecureStore { ... }"),
            )
            .field("event_buffer_size", &self.event_buffer_size)
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Synchronize podcasts and episodes when the server supports them
    pub enable_podcasts: bool,

    /// Skip network operations while the monitor reports no connectivity
    /// (requires NetworkMonitor)
    pub enable_network_awareness: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_podcasts: true,
            enable_network_awareness: false,
        }
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The server URL is an absolute http(s) URL
    /// - Database path is not empty
    /// - Event buffer size is positive
    /// - Feature flags are consistent with available bridges
    pub fn validate(&self) -> Result<()> {
        validate_server_url(&self.server_url)?;

        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.features.enable_network_awareness && self.network_monitor.is_none() {
            return Err(Error::CapabilityMissing {
                capability: "NetworkMonitor".to_string(),
                message: "Network awareness enabled but no NetworkMonitor provided. \
                          Disable the feature or inject a NetworkMonitor implementation."
                    .to_string(),
            });
        }

        Ok(())
    }

    /// `host:port` of the configured server, used as a reachability probe target
    pub fn server_authority(&self) -> Option<String> {
        server_authority(&self.server_url)
    }
}

fn server_authority(server_url: &str) -> Option<String> {
    let parsed = url::Url::parse(server_url).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

fn validate_server_url(server_url: &str) -> Result<()> {
    let parsed = url::Url::parse(server_url)
        .map_err(|e| Error::Config(format!("Invalid server URL '{}': {}", server_url, e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::Config(format!(
                "Server URL must use http or https, got '{}'",
                other
            )))
        }
    }

    if parsed.host_str().is_none() {
        return Err(Error::Config("Server URL has no host".to_string()));
    }

    Ok(())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    Ok(Arc::new(ReqwestHttpClient::new()?))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for API requests. \
                  Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                  Other hosts: inject a platform HTTP client."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_network_monitor(server_url: &str) -> Option<Arc<dyn NetworkMonitor>> {
    use bridge_desktop::DesktopNetworkMonitor;

    let probe = server_authority(server_url)?;
    Some(Arc::new(DesktopNetworkMonitor::with_probe_addr(probe)))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_network_monitor(_server_url: &str) -> Option<Arc<dyn NetworkMonitor>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Option<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    Some(Arc::new(KeyringSecureStore::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Option<Arc<dyn SecureStore>> {
    None
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    server_url: Option<String>,
    database_path: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    event_buffer_size: Option<usize>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the server base URL (required).
    ///
    /// A trailing slash is dropped.
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.server_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    /// Sets the SQLite database path (required).
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// Optional when the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the network monitor used by the reachability guard.
    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    /// Sets the secure store used to persist credentials.
    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Sets the event bus buffer size (default 100).
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn enable_podcasts(mut self, enabled: bool) -> Self {
        self.features.enable_podcasts = enabled;
        self
    }

    pub fn enable_network_awareness(mut self, enabled: bool) -> Self {
        self.features.enable_network_awareness = enabled;
        self
    }

    /// Replace all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Missing bridges fall back to desktop defaults when the `desktop-shims`
    /// feature is enabled.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when the server URL or database path is missing or invalid
    /// - `Error::CapabilityMissing` when a required bridge has no implementation
    pub fn build(self) -> Result<CoreConfig> {
        let server_url = self.server_url.ok_or_else(|| {
            Error::Config("Server URL is required. Use .server_url() to set it.".to_string())
        })?;
        validate_server_url(&server_url)?;

        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let network_monitor = match self.network_monitor {
            Some(monitor) => Some(monitor),
            None if self.features.enable_network_awareness => {
                provide_default_network_monitor(&server_url)
            }
            None => None,
        };

        let secure_store = self.secure_store.or_else(provide_default_secure_store);

        let config = CoreConfig {
            server_url,
            database_path,
            http_client,
            network_monitor,
            secure_store,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::network::NetworkInfo;
    use bridge_traits::{HttpRequest, HttpResponse};

    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse::new(200, "<root/>"))
        }
    }

    struct MockNetworkMonitor;

    #[async_trait]
    impl NetworkMonitor for MockNetworkMonitor {
        async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
            Ok(NetworkInfo::connected())
        }
    }

    fn base_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .server_url("https://music.example.com/")
            .database_path("/tmp/waves.db")
            .http_client(Arc::new(MockHttpClient))
    }

    #[test]
    fn test_builder_with_required_fields() {
        let config = base_builder().build().unwrap();

        assert_eq!(config.server_url, "https://music.example.com");
        assert_eq!(config.database_path, PathBuf::from("/tmp/waves.db"));
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(config.features.enable_podcasts);
        assert!(!config.features.enable_network_awareness);
    }

    #[test]
    fn test_builder_requires_server_url() {
        let result = CoreConfig::builder()
            .database_path("/tmp/waves.db")
            .http_client(Arc::new(MockHttpClient))
            .build();

        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("Server URL is required")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_requires_database_path() {
        let result = CoreConfig::builder()
            .server_url("https://music.example.com")
            .http_client(Arc::new(MockHttpClient))
            .build();

        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("Database path is required")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_invalid_server_url() {
        for url in ["not a url", "ftp://music.example.com", "file:///srv/music"] {
            let result = CoreConfig::builder()
                .server_url(url)
                .database_path("/tmp/waves.db")
                .http_client(Arc::new(MockHttpClient))
                .build();
            assert!(matches!(result, Err(Error::Config(_))), "{} accepted", url);
        }
    }

    #[test]
    fn test_validate_rejects_zero_event_buffer() {
        let result = base_builder().event_buffer_size(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_network_awareness_with_monitor() {
        let config = base_builder()
            .enable_network_awareness(true)
            .network_monitor(Arc::new(MockNetworkMonitor))
            .build()
            .unwrap();

        assert!(config.features.enable_network_awareness);
        assert!(config.network_monitor.is_some());
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_network_awareness_requires_monitor() {
        let result = base_builder().enable_network_awareness(true).build();
        assert!(matches!(result, Err(Error::CapabilityMissing { .. })));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_http_client_required_without_shims() {
        let result = CoreConfig::builder()
            .server_url("https://music.example.com")
            .database_path("/tmp/waves.db")
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "HttpClient")
            }
            other => panic!("expected missing capability, got {:?}", other),
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let config = CoreConfig::builder()
            .server_url("http://music.example.com:4533")
            .database_path("/tmp/waves.db")
            .enable_network_awareness(true)
            .build()
            .unwrap();

        assert!(config.network_monitor.is_some());
        assert!(config.secure_store.is_some());
    }

    #[test]
    fn test_server_authority() {
        let config = base_builder().build().unwrap();
        assert_eq!(
            config.server_authority().as_deref(),
            Some("music.example.com:443")
        );

        let config = CoreConfig::builder()
            .server_url("http://10.0.0.2:8080/ampache")
            .database_path("/tmp/waves.db")
            .http_client(Arc::new(MockHttpClient))
            .build()
            .unwrap();
        assert_eq!(config.server_authority().as_deref(), Some("10.0.0.2:8080"));
    }

    #[test]
    fn test_debug_hides_bridges() {
        let config = base_builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("music.example.com"));
        assert!(debug.contains("HttpClient { ... }"));
    }
}
