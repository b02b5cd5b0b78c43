//! Secure Credential Storage Abstraction

use async_trait::async_trait;

use crate::error::Result;

/// Secure credential storage trait
///
/// Abstracts secure storage mechanisms:
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service / libsecret
///
/// Used to hold the media server password so it never has to live in the
/// configuration file.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SecureStore;
///
/// async fn store_password(store: &dyn SecureStore, password: &str) -> Result<()> {
///     store.set_secret("subsonic_password", password).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value, replacing any previous value
    async fn set_secret(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a secret value
    ///
    /// Returns `Ok(None)` if the key doesn't exist. Returned data must not be
    /// logged.
    async fn get_secret(&self, key: &str) -> Result<Option<String>>;

    /// Delete a secret. Deleting a missing key succeeds.
    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// Check if a secret exists without retrieving it
    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub Store {}

        #[async_trait]
        impl SecureStore for Store {
            async fn set_secret(&self, key: &str, value: &str) -> Result<()>;
            async fn get_secret(&self, key: &str) -> Result<Option<String>>;
            async fn delete_secret(&self, key: &str) -> Result<()>;
        }
    }

    #[tokio::test]
    async fn test_has_secret_uses_get_secret() {
        let mut store = MockStore::new();
        store
            .expect_get_secret()
            .withf(|key| key == "subsonic_password")
            .returning(|_| Ok(Some("hunter2".to_string())));
        store
            .expect_get_secret()
            .withf(|key| key != "subsonic_password")
            .returning(|_| Ok(None));

        assert!(store.has_secret("subsonic_password").await.unwrap());
        assert!(!store.has_secret("other").await.unwrap());
    }
}
