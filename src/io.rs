//! Vault file IO primitives.
//!
//! The goals of this module are:
//! - Restrictive file permissions (0600) for everything the vault persists.
//! - Crash-safe writes via the write-temp, fsync, atomic-rename pattern.
//!
//! This module is intentionally low-level and format-agnostic: it reads and
//! writes raw bytes. Higher layers own parsing, encryption, and schema
//! decisions. A single process owns the vault directory; cross-process
//! coordination is out of scope.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use thiserror::Error;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[derive(Debug, Error)]
pub enum VaultIoError {
    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("path has no parent directory")]
    NoParentDir,
}

pub fn read_bytes(path: &Path) -> Result<Vec<u8>, VaultIoError> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), VaultIoError> {
    let dir = path.parent().ok_or(VaultIoError::NoParentDir)?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.as_file_mut().write_all(bytes)?;
    tmp.as_file_mut().sync_all()?;

    #[cfg(unix)]
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(0o600))?;

    let _persisted = tmp.persist(path).map_err(std::io::Error::from)?;
    set_permissions_0600(path)?;

    fsync_dir(dir)?;
    Ok(())
}

pub(crate) fn set_permissions_0600(path: &Path) -> Result<(), std::io::Error> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    #[cfg(unix)]
    {
        let file = File::open(dir)?;
        file.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
