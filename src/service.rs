//! The vault lifecycle state machine.
//!
//! A vault directory is in one of three states: uninitialized (no
//! `vault-config.json`), locked (config present, no master key in memory),
//! or unlocked (master key held). This module owns the transitions between
//! them and orchestrates the KDF, the AEAD primitive, the catalog store, and
//! the `PVLT1` codec. At most one operation runs at a time; the mutable
//! state sits behind a `Mutex`.
//!
//! The unlock path deliberately collapses key-unwrap and catalog-decrypt
//! failures into a single `WrongPasswordOrCorrupt` so callers cannot learn
//! which stage rejected a guess.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use secrecy::ExposeSecret;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::CredentialCache;
use crate::catalog::{CatalogError, CatalogStore};
use crate::crypto::{self, SecretBytes, clone_secret};
use crate::io as vault_io;
use crate::items::{CONFIG_VERSION, KdfConfig, VaultConfig, VaultItem};
use crate::kdf;
use crate::pvlt;

/// Consecutive failed unlocks tolerated before attenuation kicks in.
const MAX_FAILED_UNLOCKS: u32 = 5;
/// How long unlocks stay refused after the attenuation threshold.
const LOCKOUT_WINDOW: Duration = Duration::from_secs(60);

/// Expected byte length of the decoded wrapped master key:
/// nonce || 32-byte key || tag.
const WRAPPED_KEY_LEN: usize = crypto::NONCE_LEN + crypto::MASTER_KEY_LEN + crypto::TAG_LEN;

pub const PAYLOAD_EXTENSION: &str = "pvlt";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault is not initialized")]
    NotInitialized,

    #[error("vault already initialized")]
    AlreadyInitialized,

    #[error("vault is locked")]
    VaultLocked,

    #[error("invalid vault config")]
    InvalidConfig,

    #[error("unsupported kdf algorithm: {0}")]
    UnsupportedKdf(String),

    #[error("unlock failed (wrong password or vault corrupted)")]
    WrongPasswordOrCorrupt,

    #[error("too many failed unlock attempts; try again later")]
    LockedOut,

    #[error("item not found: {0}")]
    ItemNotFound(Uuid),

    #[error("payload {0} written but catalog update failed; manual cleanup required")]
    OrphanedPayload(String),

    #[error(transparent)]
    Kdf(#[from] kdf::KdfError),

    #[error(transparent)]
    Crypto(#[from] crypto::CryptoError),

    #[error(transparent)]
    Pvlt(#[from] pvlt::PvltError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] vault_io::VaultIoError),
}

impl From<CatalogError> for VaultError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::InvalidConfig => VaultError::InvalidConfig,
            CatalogError::WrongKeyOrCorrupt => VaultError::WrongPasswordOrCorrupt,
            CatalogError::Crypto(e) => VaultError::Crypto(e),
            CatalogError::Json(e) => VaultError::Json(e),
            CatalogError::Io(e) => VaultError::Io(e),
        }
    }
}

/// Snapshot handed back by the operations that unlock the vault.
///
/// The master key copy is zeroize-on-drop; callers that hold onto it must
/// discard it when they lock the vault.
#[derive(Debug)]
pub struct UnlockResult {
    pub master_key: SecretBytes,
    pub items: Vec<VaultItem>,
}

#[derive(Default)]
struct VaultState {
    master: Option<SecretBytes>,
    items: Vec<VaultItem>,
    failed_unlocks: u32,
    lockout_until: Option<Instant>,
}

/// One vault directory plus its in-memory state.
pub struct Vault {
    store: CatalogStore,
    cache: Option<Box<dyn CredentialCache>>,
    cache_account: String,
    state: Mutex<VaultState>,
}

impl Vault {
    /// Open a vault rooted at `dir`. The directory need not exist yet; it is
    /// created by the first successful [`Vault::create_vault`].
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            store: CatalogStore::new(dir),
            cache: None,
            cache_account: String::new(),
            state: Mutex::new(VaultState::default()),
        }
    }

    /// Open a vault with an injected credential cache. The master key is
    /// published under `account` on successful unlock and purged on lock.
    pub fn with_credential_cache(
        dir: impl Into<PathBuf>,
        cache: Box<dyn CredentialCache>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            store: CatalogStore::new(dir),
            cache: Some(cache),
            cache_account: account.into(),
            state: Mutex::new(VaultState::default()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.store.config_path().exists()
    }

    /// Create a fresh vault: generate the master key, wrap it under a KEK
    /// derived from `password`, persist the config and an empty catalog, and
    /// leave the vault unlocked.
    pub fn create_vault(
        &self,
        password: &[u8],
        iterations: Option<u32>,
    ) -> Result<UnlockResult, VaultError> {
        let mut state = self.state();
        if self.is_initialized() {
            return Err(VaultError::AlreadyInitialized);
        }

        let iterations = iterations.unwrap_or(kdf::DEFAULT_ITERATIONS);
        let salt = crypto::random_bytes::<{ kdf::SALT_LEN }>();
        let master = crypto::generate_master_key();

        let kek = kdf::derive_kek(password, &salt, iterations)?;
        let wrapped = crypto::seal(&kek, master.expose_secret(), None)?;

        let config = VaultConfig {
            version: CONFIG_VERSION,
            kdf: KdfConfig {
                algorithm: kdf::KDF_ALGORITHM.to_string(),
                salt_b64: BASE64.encode(salt),
                iterations,
            },
            wrapped_vault_key_b64: BASE64.encode(&wrapped),
            created_at: Utc::now(),
        };
        self.store.save_config(&config)?;
        self.store.save_items(&[], &master)?;

        self.publish_to_cache(&master);

        let result = UnlockResult {
            master_key: clone_secret(&master),
            items: Vec::new(),
        };
        state.master = Some(master);
        state.items = Vec::new();
        state.failed_unlocks = 0;
        state.lockout_until = None;
        Ok(result)
    }

    /// Unlock with a password. Wrong password and corrupted state are
    /// indistinguishable; repeated failures trip the lockout.
    pub fn unlock(&self, password: &[u8]) -> Result<UnlockResult, VaultError> {
        let mut state = self.state();

        let config = self.store.load_config()?.ok_or(VaultError::NotInitialized)?;
        check_lockout(&mut state)?;
        let (salt, wrapped) = parse_config(&config)?;

        let kek = kdf::derive_kek(password, &salt, config.kdf.iterations)?;
        let master = match crypto::open(&kek, &wrapped) {
            Ok(key) => SecretBytes::from(key.to_vec()),
            Err(_) => return Err(record_failed_unlock(&mut state)),
        };

        let items = match self.store.load_items(&master) {
            Ok(items) => items,
            Err(CatalogError::WrongKeyOrCorrupt) => {
                return Err(record_failed_unlock(&mut state));
            }
            Err(e) => return Err(e.into()),
        };

        state.failed_unlocks = 0;
        state.lockout_until = None;

        self.publish_to_cache(&master);

        let result = UnlockResult {
            master_key: clone_secret(&master),
            items: items.clone(),
        };
        state.master = Some(master);
        state.items = items;
        Ok(result)
    }

    /// Unlock with a previously cached master key. Anything that fails to
    /// open the catalog, including a key of the wrong size, reads as "no
    /// cached key" and leaves the vault locked.
    pub fn unlock_from_cache(
        &self,
        key_bytes: &[u8],
    ) -> Result<Option<UnlockResult>, VaultError> {
        let mut state = self.state();

        if !self.is_initialized() {
            return Ok(None);
        }
        if key_bytes.len() != crypto::MASTER_KEY_LEN {
            return Ok(None);
        }

        let master = SecretBytes::from(key_bytes.to_vec());
        let items = match self.store.load_items(&master) {
            Ok(items) => items,
            Err(CatalogError::WrongKeyOrCorrupt) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let result = UnlockResult {
            master_key: clone_secret(&master),
            items: items.clone(),
        };
        state.master = Some(master);
        state.items = items;
        Ok(Some(result))
    }

    /// Rotate the password: unwrap the master key with the current password,
    /// re-wrap it under a KEK derived from the new one with a fresh salt.
    /// Payload blobs and the catalog are untouched, and `createdAt` is
    /// preserved. Leaves the vault locked; the caller must re-unlock.
    pub fn change_password(
        &self,
        current: &[u8],
        new: &[u8],
        iterations: Option<u32>,
    ) -> Result<(), VaultError> {
        let mut state = self.state();

        let config = self.store.load_config()?.ok_or(VaultError::NotInitialized)?;
        let (salt, wrapped) = parse_config(&config)?;

        let kek = kdf::derive_kek(current, &salt, config.kdf.iterations)?;
        let master = crypto::open(&kek, &wrapped)
            .map_err(|_| VaultError::WrongPasswordOrCorrupt)?;

        let new_iterations = iterations.unwrap_or(config.kdf.iterations);
        let new_salt = crypto::random_bytes::<{ kdf::SALT_LEN }>();
        let new_kek = kdf::derive_kek(new, &new_salt, new_iterations)?;
        let rewrapped = crypto::seal(&new_kek, master.as_slice(), None)?;

        let new_config = VaultConfig {
            version: config.version,
            kdf: KdfConfig {
                algorithm: kdf::KDF_ALGORITHM.to_string(),
                salt_b64: BASE64.encode(new_salt),
                iterations: new_iterations,
            },
            wrapped_vault_key_b64: BASE64.encode(&rewrapped),
            created_at: config.created_at,
        };
        self.store.save_config(&new_config)?;

        state.master = None;
        state.items.clear();
        self.purge_cache();
        Ok(())
    }

    /// Drop the in-memory master key (zeroized on drop) and purge the
    /// credential cache.
    pub fn lock(&self) {
        let mut state = self.state();
        state.master = None;
        state.items.clear();
        self.purge_cache();
    }

    /// Snapshot of the unlocked catalog.
    pub fn items(&self) -> Result<Vec<VaultItem>, VaultError> {
        let state = self.state();
        if state.master.is_none() {
            return Err(VaultError::VaultLocked);
        }
        Ok(state.items.clone())
    }

    /// Encrypt `source` into the vault and append a catalog entry. The
    /// catalog rewrite is persisted before this returns; if it fails, the
    /// freshly written payload is removed so no orphan blob survives.
    pub fn add_file(&self, source: &Path) -> Result<VaultItem, VaultError> {
        let mut state = self.state();
        let master = clone_secret(state.master.as_ref().ok_or(VaultError::VaultLocked)?);

        let metadata = fs::metadata(source).map_err(vault_io::VaultIoError::from)?;
        let id = Uuid::new_v4();
        let encrypted_file_name = format!("{id}.{PAYLOAD_EXTENSION}");
        let dest = self.store.payload_path(&encrypted_file_name)?;

        pvlt::encrypt_file(&master, source, &dest, pvlt::DEFAULT_CHUNK_SIZE)?;

        let item = VaultItem {
            id,
            original_file_name: source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            original_file_extension: source
                .extension()
                .map(|e| e.to_string_lossy().into_owned()),
            original_byte_count: metadata.len(),
            added_at: Utc::now(),
            encrypted_file_name,
        };

        let mut items = state.items.clone();
        items.push(item.clone());
        if let Err(err) = self.store.save_items(&items, &master) {
            if fs::remove_file(&dest).is_err() {
                return Err(VaultError::OrphanedPayload(item.encrypted_file_name));
            }
            return Err(err.into());
        }

        state.items = items;
        Ok(item)
    }

    /// Decrypt an item's payload to `dest`. On failure `dest` is left
    /// untouched.
    pub fn export_item(&self, id: Uuid, dest: &Path) -> Result<(), VaultError> {
        let state = self.state();
        let master = state.master.as_ref().ok_or(VaultError::VaultLocked)?;
        let item = state
            .items
            .iter()
            .find(|i| i.id == id)
            .ok_or(VaultError::ItemNotFound(id))?;

        let source = self.store.payload_path(&item.encrypted_file_name)?;
        pvlt::decrypt_file(master, &source, dest)?;
        Ok(())
    }

    /// Remove an item: delete its payload (best effort) and persist the
    /// shrunken catalog.
    pub fn delete_item(&self, id: Uuid) -> Result<(), VaultError> {
        let mut state = self.state();
        let master = clone_secret(state.master.as_ref().ok_or(VaultError::VaultLocked)?);

        let index = state
            .items
            .iter()
            .position(|i| i.id == id)
            .ok_or(VaultError::ItemNotFound(id))?;

        let payload = self
            .store
            .payload_path(&state.items[index].encrypted_file_name)?;
        let _ = fs::remove_file(payload);

        let mut items = state.items.clone();
        items.remove(index);
        self.store.save_items(&items, &master)?;

        state.items = items;
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, VaultState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_to_cache(&self, master: &SecretBytes) {
        if let Some(cache) = &self.cache {
            let _ = cache.put(&self.cache_account, master.expose_secret());
        }
    }

    fn purge_cache(&self) {
        if let Some(cache) = &self.cache {
            let _ = cache.delete(&self.cache_account);
        }
    }
}

/// Validate config schema and decode the salt and wrapped key.
///
/// The algorithm label is gate-checked before any key derivation happens.
fn parse_config(config: &VaultConfig) -> Result<(Vec<u8>, Vec<u8>), VaultError> {
    if config.version != CONFIG_VERSION {
        return Err(VaultError::InvalidConfig);
    }
    if config.kdf.algorithm != kdf::KDF_ALGORITHM {
        return Err(VaultError::UnsupportedKdf(config.kdf.algorithm.clone()));
    }
    if config.kdf.iterations == 0 {
        return Err(VaultError::InvalidConfig);
    }

    let salt = config.kdf_salt().ok_or(VaultError::InvalidConfig)?;
    let wrapped = config.wrapped_vault_key().ok_or(VaultError::InvalidConfig)?;
    if wrapped.len() != WRAPPED_KEY_LEN {
        return Err(VaultError::InvalidConfig);
    }
    Ok((salt, wrapped))
}

fn check_lockout(state: &mut VaultState) -> Result<(), VaultError> {
    if let Some(until) = state.lockout_until {
        if Instant::now() < until {
            return Err(VaultError::LockedOut);
        }
        state.lockout_until = None;
        state.failed_unlocks = 0;
    }
    Ok(())
}

fn record_failed_unlock(state: &mut VaultState) -> VaultError {
    state.failed_unlocks += 1;
    if state.failed_unlocks >= MAX_FAILED_UNLOCKS {
        state.lockout_until = Some(Instant::now() + LOCKOUT_WINDOW);
    }
    VaultError::WrongPasswordOrCorrupt
}
