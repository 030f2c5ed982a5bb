//! Optional credential cache seam.
//!
//! The host application may keep the master key in an OS credential store so
//! the vault unlocks without re-entering the password. The core only sees
//! this trait, and treats the cache as unreliable: `put` and `delete` are
//! best-effort, and a cached key that fails to open the catalog counts as no
//! cached key at all.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("credential cache error: {0}")]
pub struct CacheError(pub String);

pub trait CredentialCache: Send {
    fn put(&self, account: &str, secret: &[u8]) -> Result<(), CacheError>;
    fn get(&self, account: &str) -> Result<Option<Vec<u8>>, CacheError>;
    fn delete(&self, account: &str) -> Result<(), CacheError>;
}

impl<C: CredentialCache + Sync> CredentialCache for std::sync::Arc<C> {
    fn put(&self, account: &str, secret: &[u8]) -> Result<(), CacheError> {
        (**self).put(account, secret)
    }

    fn get(&self, account: &str) -> Result<Option<Vec<u8>>, CacheError> {
        (**self).get(account)
    }

    fn delete(&self, account: &str) -> Result<(), CacheError> {
        (**self).delete(account)
    }
}

/// In-memory reference implementation, used by the test suite and as the
/// template for real backends.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialCache for MemoryCache {
    fn put(&self, account: &str, secret: &[u8]) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|e| CacheError(e.to_string()))?;
        entries.insert(account.to_string(), secret.to_vec());
        Ok(())
    }

    fn get(&self, account: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.lock().map_err(|e| CacheError(e.to_string()))?;
        Ok(entries.get(account).cloned())
    }

    fn delete(&self, account: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|e| CacheError(e.to_string()))?;
        entries.remove(account);
        Ok(())
    }
}
