//! Credential Persistence
//!
//! Keeps the last successfully used [`Credentials`] in the host
//! [`SecureStore`] so the session manager can re-authenticate after a restart
//! without asking the user again. Values are JSON-encoded; they are never
//! logged.

use std::sync::Arc;

use bridge_traits::storage::SecureStore;
use tracing::{debug, info, warn};

use crate::error::{AuthError, Result};
use crate::types::Credentials;

const CREDENTIALS_KEY: &str = "library_sync.credentials";

#[derive(Clone)]
pub struct CredentialStore {
    secure_store: Arc<dyn SecureStore>,
}

impl CredentialStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        Self { secure_store }
    }

    /// Persist credentials, overwriting any previous value
    pub async fn store(&self, credentials: &Credentials) -> Result<()> {
        let json = serde_json::to_vec(credentials)
            .map_err(|e| AuthError::CredentialsCorrupted(e.to_string()))?;

        self.secure_store
            .set_secret(CREDENTIALS_KEY, &json)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to store credentials in secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(user = %credentials.username, "Credentials stored securely");
        Ok(())
    }

    /// Load stored credentials
    ///
    /// Corrupted entries are deleted and reported as
    /// `AuthError::CredentialsCorrupted`.
    pub async fn load(&self) -> Result<Option<Credentials>> {
        let data = self
            .secure_store
            .get_secret(CREDENTIALS_KEY)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?;

        let Some(data) = data else {
            debug!("No stored credentials");
            return Ok(None);
        };

        match serde_json::from_slice::<Credentials>(&data) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) => {
                warn!(error = %e, "Stored credentials are corrupted, removing them");
                if let Err(delete_err) = self.secure_store.delete_secret(CREDENTIALS_KEY).await {
                    warn!(error = %delete_err, "Failed to delete corrupted credentials");
                }
                Err(AuthError::CredentialsCorrupted(e.to_string()))
            }
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.secure_store
            .delete_secret(CREDENTIALS_KEY)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct MemorySecureStore {
        values: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl SecureStore for MemorySecureStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_load_clear() {
        let store = CredentialStore::new(Arc::new(MemorySecureStore::default()));
        assert!(store.load().await.unwrap().is_none());

        let creds = Credentials::password("https://m.example.com", "alice", "pw");
        store.store(&creds).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(creds));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_removed() {
        let secure = Arc::new(MemorySecureStore::default());
        secure.set_secret(CREDENTIALS_KEY, b"{not json").await.unwrap();

        let store = CredentialStore::new(secure.clone());
        assert!(matches!(
            store.load().await,
            Err(AuthError::CredentialsCorrupted(_))
        ));
        assert!(!secure.has_secret(CREDENTIALS_KEY).await.unwrap());
    }
}
