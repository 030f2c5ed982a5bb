//! Encryption core for a local, password-protected file vault.
//!
//! A vault is a directory: `vault-config.json` binds a password to a wrapped
//! 256-bit master key, `items.json.pvlt` holds the sealed item catalog, and
//! payloads live under `files/` as chunked `PVLT1` containers. [`Vault`] is
//! the entry point; the submodules expose the primitives it is built from.

pub mod cache;
pub mod crypto;
pub mod io;
pub mod kdf;
pub mod pvlt;

mod catalog;
mod items;
mod service;

pub use cache::{CacheError, CredentialCache, MemoryCache};
pub use items::{KdfConfig, VaultConfig, VaultItem};
pub use service::{PAYLOAD_EXTENSION, UnlockResult, Vault, VaultError};
