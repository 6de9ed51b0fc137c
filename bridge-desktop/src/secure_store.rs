//! OS keychain credential storage
//!
//! Values are base64-encoded because keychain entries only hold strings.
//! Keychain calls block, so each one runs on tokio's blocking pool.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use tracing::debug;

/// Keychain entries are grouped under this service unless overridden
pub const DEFAULT_SERVICE: &str = "library-sync";

/// [`SecureStore`] backed by the platform keychain
///
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service
pub struct KeyringSecureStore {
    service_name: String,
}

impl KeyringSecureStore {
    pub fn new() -> Self {
        Self::with_service_name(DEFAULT_SERVICE)
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T>
    where
        F: FnOnce(&Entry) -> keyring::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = self.service_name.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || op(&Entry::new(&service, &key)?))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Keychain task failed: {e}")))?
            .map_err(|e| BridgeError::OperationFailed(format!("Keychain error: {e}")))
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        let encoded = STANDARD.encode(value);
        self.with_entry(key, move |entry| entry.set_password(&encoded))
            .await?;
        debug!(key, "Stored secret");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let stored = self
            .with_entry(key, |entry| match entry.get_password() {
                Ok(encoded) => Ok(Some(encoded)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(e),
            })
            .await?;

        stored
            .map(|encoded| {
                STANDARD.decode(encoded).map_err(|e| {
                    BridgeError::OperationFailed(format!("Corrupt secret {key}: {e}"))
                })
            })
            .transpose()
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
        .await?;
        debug!(key, "Deleted secret");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name() {
        assert_eq!(KeyringSecureStore::new().service_name, DEFAULT_SERVICE);
        assert_eq!(
            KeyringSecureStore::with_service_name("other").service_name,
            "other"
        );
    }

    #[tokio::test]
    async fn test_credentials_round_trip() {
        let store = KeyringSecureStore::with_service_name("test-library-sync");
        let key = "ampache-credentials-test";
        let value = br#"{"server_url":"https://music.example.com"}"#;

        // Headless CI machines usually have no secret service
        if let Err(e) = store.set_secret(key, value).await {
            println!("Keyring not available ({e}), skipping");
            return;
        }

        if let Ok(Some(retrieved)) = store.get_secret(key).await {
            assert_eq!(retrieved, value.to_vec());
        }
        store.delete_secret(key).await.unwrap();
        store.delete_secret(key).await.unwrap();
    }
}
