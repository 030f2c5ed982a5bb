//! Persistence for the vault config and the encrypted item catalog.
//!
//! Two artifacts live at the top of the vault directory: `vault-config.json`
//! (plaintext JSON) and `items.json.pvlt` (the JSON item array sealed as one
//! AES-GCM combined blob under the master key). Payload blobs live under
//! `files/`. The store owns no long-lived state; every operation reopens its
//! files.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;

use crate::crypto::{self, SecretBytes};
use crate::io as vault_io;
use crate::items::{VaultConfig, VaultItem};

pub const CONFIG_FILE: &str = "vault-config.json";
pub const CATALOG_FILE: &str = "items.json.pvlt";
pub const FILES_DIR: &str = "files";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid vault config")]
    InvalidConfig,

    #[error("catalog cannot be decrypted (wrong key or corrupted)")]
    WrongKeyOrCorrupt,

    #[error(transparent)]
    Crypto(#[from] crypto::CryptoError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] vault_io::VaultIoError),
}

pub struct CatalogStore {
    dir: PathBuf,
}

impl CatalogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.dir.join(CATALOG_FILE)
    }

    /// Resolve a payload basename under `files/`, creating the directory on
    /// first use.
    pub fn payload_path(&self, encrypted_file_name: &str) -> Result<PathBuf, CatalogError> {
        let files = self.dir.join(FILES_DIR);
        fs::create_dir_all(&files).map_err(vault_io::VaultIoError::from)?;
        Ok(files.join(encrypted_file_name))
    }

    /// Load the vault config; `None` when the vault is uninitialized.
    pub fn load_config(&self) -> Result<Option<VaultConfig>, CatalogError> {
        match vault_io::read_bytes(&self.config_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|_| CatalogError::InvalidConfig),
            Err(vault_io::VaultIoError::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_config(&self, config: &VaultConfig) -> Result<(), CatalogError> {
        let bytes = serde_json::to_vec_pretty(config)?;
        vault_io::write_bytes_atomic(&self.config_path(), &bytes)?;
        Ok(())
    }

    /// Load and decrypt the item catalog. A missing catalog file reads as an
    /// empty vault; an undecryptable one is indistinguishable from a wrong
    /// key.
    pub fn load_items(&self, master: &SecretBytes) -> Result<Vec<VaultItem>, CatalogError> {
        let sealed = match vault_io::read_bytes(&self.catalog_path()) {
            Ok(bytes) => bytes,
            Err(vault_io::VaultIoError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let plaintext =
            crypto::open(master, &sealed).map_err(|_| CatalogError::WrongKeyOrCorrupt)?;
        serde_json::from_slice(&plaintext).map_err(|_| CatalogError::WrongKeyOrCorrupt)
    }

    pub fn save_items(
        &self,
        items: &[VaultItem],
        master: &SecretBytes,
    ) -> Result<(), CatalogError> {
        let json = serde_json::to_vec(items)?;
        let sealed = crypto::seal(master, &json, None)?;
        vault_io::write_bytes_atomic(&self.catalog_path(), &sealed)?;
        Ok(())
    }
}
