//! Password-to-key derivation for the vault key hierarchy.
//!
//! v1 vaults derive the key-encryption key (KEK) with PBKDF2-HMAC-SHA256
//! (RFC 8018). The algorithm label, salt, and iteration count are recorded
//! in `vault-config.json`, so a future schema version can switch schemes
//! without breaking existing vaults; the vault service gate-checks the label
//! before any derivation happens.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use thiserror::Error;

use crate::crypto::SecretBytes;

/// Algorithm label persisted in the vault config. The only label v1 accepts.
pub const KDF_ALGORITHM: &str = "PBKDF2-HMAC-SHA256";
/// Default PBKDF2 iteration count for new vaults.
pub const DEFAULT_ITERATIONS: u32 = 200_000;
/// Size (bytes) of the per-vault KDF salt.
pub const SALT_LEN: usize = 16;
/// Size (bytes) of the derived key-encryption key.
pub const KEK_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("iteration count must be positive")]
    InvalidIterations,

    #[error("derived key length must be positive")]
    InvalidKeyLength,
}

/// Derive `key_len` bytes from `password` and `salt` with PBKDF2-HMAC-SHA256.
///
/// The returned bytes are sensitive; they are handed back zeroize-on-drop
/// and callers should avoid copying them unnecessarily.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    key_len: usize,
) -> Result<SecretBytes, KdfError> {
    if iterations == 0 {
        return Err(KdfError::InvalidIterations);
    }
    if key_len == 0 {
        return Err(KdfError::InvalidKeyLength);
    }

    let mut out = vec![0u8; key_len];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    Ok(SecretBytes::from(out))
}

/// Derive the 256-bit KEK used to wrap and unwrap the master key.
pub fn derive_kek(password: &[u8], salt: &[u8], iterations: u32) -> Result<SecretBytes, KdfError> {
    derive_key(password, salt, iterations, KEK_LEN)
}
