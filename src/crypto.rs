//! Cryptographic building blocks for the vault core.
//!
//! This module intentionally provides small, composable primitives which
//! higher-level vault code wires together according to the vault format and
//! secure defaults.
//!
//! Design notes:
//!
//! - Key hierarchy: a randomly generated master key encrypts the catalog and
//!   every payload; the master key is wrapped (encrypted) with a KEK derived
//!   from the vault password.
//! - AEAD: AES-256-GCM provides authenticated encryption (confidentiality
//!   + integrity). Nonces must be unique per key.
//! - Combined form: everything sealed here travels as a single byte string
//!   `nonce || ciphertext || tag`, so callers never track nonces separately.
//!
//! Security foot-guns to avoid:
//!
//! - Never reuse a `(key, nonce)` pair with AES-GCM.
//! - Do not log or print keys, plaintext payloads, or decrypted secrets.
//! - Treat all returned plaintext bytes as sensitive and keep them in memory
//!   for as short a time as possible.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretSlice};
use thiserror::Error;
use zeroize::Zeroizing;

/// Size (bytes) of the master key.
pub const MASTER_KEY_LEN: usize = 32;
/// Size (bytes) of AES-GCM nonces.
pub const NONCE_LEN: usize = 12;
/// Size (bytes) of the AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;
/// Smallest valid combined blob: a nonce and a tag around an empty plaintext.
pub const MIN_COMBINED_LEN: usize = NONCE_LEN + TAG_LEN;

/// Secret bytes held in memory with zeroize-on-drop semantics.
///
/// We prefer `SecretSlice<u8>` (a boxed slice) because it:
/// - can be constructed from a `Vec<u8>` via `From<Vec<u8>>`
/// - ensures the backing memory is zeroized on drop
pub type SecretBytes = SecretSlice<u8>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length")]
    InvalidKeyLength,

    #[error("sealed blob too short")]
    Malformed,

    #[error("authentication failed")]
    AuthFailure,
}

/// Generate `N` cryptographically-secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a fresh 256-bit master key.
pub fn generate_master_key() -> SecretBytes {
    SecretBytes::from(random_bytes::<MASTER_KEY_LEN>().to_vec())
}

/// Copy a secret into a new zeroize-on-drop buffer.
pub fn clone_secret(secret: &SecretBytes) -> SecretBytes {
    SecretBytes::from(secret.expose_secret().to_vec())
}

/// Seal `plaintext` under `key` with AES-256-GCM, returning the combined
/// form `nonce || ciphertext || tag`.
///
/// A fresh random nonce is generated when the caller does not supply one.
/// Callers that construct nonces themselves (the chunked file codec) own the
/// uniqueness guarantee.
pub fn seal(
    key: &SecretBytes,
    plaintext: &[u8],
    nonce: Option<[u8; NONCE_LEN]>,
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.expose_secret())
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    let nonce = nonce.unwrap_or_else(random_bytes::<NONCE_LEN>);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::AuthFailure)?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(combined)
}

/// Open a combined `nonce || ciphertext || tag` blob sealed by [`seal`].
///
/// Returns an error if authentication fails (tamper detected or wrong key).
/// Plaintext is returned wrapped in `Zeroizing<Vec<u8>>` to reduce
/// accidental retention.
pub fn open(key: &SecretBytes, combined: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if combined.len() < MIN_COMBINED_LEN {
        return Err(CryptoError::Malformed);
    }

    let cipher = Aes256Gcm::new_from_slice(key.expose_secret())
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    let (nonce, ciphertext) = combined.split_at(NONCE_LEN);

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthFailure)?;
    Ok(Zeroizing::new(plaintext))
}
