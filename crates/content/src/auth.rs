//! Credential storage.
//!
//! The core never keeps credentials itself; it asks a [`CredentialStore`]
//! for the pair registered against an authority's realm whenever it builds
//! a request.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};

/// A username and password for HTTP Basic authentication.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}
impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("username", &self.username).field("password", &"***").finish()
    }
}

/// Get, set and clear credentials per authentication realm.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, realm: &str) -> Result<Option<Credentials>>;
    async fn set(&self, realm: &str, credentials: Credentials) -> Result<()>;
    async fn clear(&self, realm: &str) -> Result<()>;

    async fn has_credentials(&self, realm: &str) -> Result<bool> {
        Ok(self.get(realm).await?.is_some())
    }
}

/// Credentials held for the lifetime of the process.
#[derive(Default)]
pub struct MemoryCredentials {
    realms: RwLock<BTreeMap<String, Credentials>>,
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn get(&self, realm: &str) -> Result<Option<Credentials>> {
        Ok(self.realms.read().await.get(realm).cloned())
    }

    async fn set(&self, realm: &str, credentials: Credentials) -> Result<()> {
        self.realms.write().await.insert(realm.to_string(), credentials);
        Ok(())
    }

    async fn clear(&self, realm: &str) -> Result<()> {
        self.realms.write().await.remove(realm);
        Ok(())
    }
}

/// Credentials persisted as a JSON object of realm to credentials.
///
/// Every change rewrites the whole file atomically.
pub struct FileCredentials {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    async fn load(&self) -> Result<BTreeMap<String, Credentials>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).or_raise(|| ErrorKind::Credentials),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err).or_raise(|| ErrorKind::Credentials),
        }
    }

    async fn save(&self, realms: &BTreeMap<String, Credentials>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(realms).or_raise(|| ErrorKind::Credentials)?;
        cairn_storage::write_atomic(&self.path, bytes).await.or_raise(|| ErrorKind::Credentials)
    }
}

#[async_trait]
impl CredentialStore for FileCredentials {
    async fn get(&self, realm: &str) -> Result<Option<Credentials>> {
        let _lock = self.lock.lock().await;
        Ok(self.load().await?.remove(realm))
    }

    async fn set(&self, realm: &str, credentials: Credentials) -> Result<()> {
        let _lock = self.lock.lock().await;
        let mut realms = self.load().await?;
        realms.insert(realm.to_string(), credentials);
        self.save(&realms).await
    }

    async fn clear(&self, realm: &str) -> Result<()> {
        let _lock = self.lock.lock().await;
        let mut realms = self.load().await?;
        if realms.remove(realm).is_some() {
            self.save(&realms).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_credentials() {
        let store = MemoryCredentials::default();
        assert!(!store.has_credentials("realm").await.unwrap());
        store.set("realm", Credentials::new("ada", "secret")).await.unwrap();
        assert_eq!(store.get("realm").await.unwrap(), Some(Credentials::new("ada", "secret")));
        assert!(store.get("other").await.unwrap().is_none());
        store.clear("realm").await.unwrap();
        assert!(!store.has_credentials("realm").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_credentials_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth/credentials.json");
        FileCredentials::new(&path).set("a", Credentials::new("ada", "one")).await.unwrap();
        FileCredentials::new(&path).set("b", Credentials::new("bob", "two")).await.unwrap();

        let store = FileCredentials::new(&path);
        assert_eq!(store.get("a").await.unwrap().unwrap().username, "ada");
        store.clear("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.get("b").await.unwrap().unwrap().password, "two");
    }

    #[tokio::test]
    async fn test_file_credentials_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentials::new(dir.path().join("none.json"));
        assert!(store.get("realm").await.unwrap().is_none());
        store.clear("realm").await.unwrap();
    }

    #[test]
    fn test_debug_hides_password() {
        let debug = format!("{:?}", Credentials::new("ada", "secret"));
        assert!(!debug.contains("secret"));
    }
}
