use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version written into new vault configs.
pub const CONFIG_VERSION: u32 = 1;

/// Persisted vault configuration (`vault-config.json`).
///
/// Plaintext JSON; its integrity is provided by the AEAD tag of the wrapped
/// master key it contains. Tampering with any field that matters makes the
/// unwrap fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfig {
    pub version: u32,
    pub kdf: KdfConfig,
    pub wrapped_vault_key_b64: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfConfig {
    pub algorithm: String,
    pub salt_b64: String,
    pub iterations: u32,
}

impl VaultConfig {
    /// Decode the KDF salt. `None` when the stored base64 is malformed.
    pub fn kdf_salt(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.kdf.salt_b64).ok()
    }

    /// Decode the wrapped master key blob. `None` when the stored base64 is
    /// malformed.
    pub fn wrapped_vault_key(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.wrapped_vault_key_b64).ok()
    }
}

/// One catalog entry.
///
/// `original_byte_count` is informational only; the sealed payload is the
/// source of truth for content and length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultItem {
    #[serde(with = "uuid_as_string")]
    pub id: Uuid,
    pub original_file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file_extension: Option<String>,
    pub original_byte_count: u64,
    pub added_at: DateTime<Utc>,
    pub encrypted_file_name: String,
}

pub mod uuid_as_string {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use uuid::Uuid;

    pub fn serialize<S>(uuid: &Uuid, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&uuid.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Uuid, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Uuid::parse_str(&s).map_err(de::Error::custom)
    }
}
