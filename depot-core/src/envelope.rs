//! Persisted shape of envelope-encrypted objects.
//!
//! The field set here is the compatibility surface for objects already on
//! disk: ciphertext, wrapped DEK, 12-byte nonce, algorithm string, integer
//! key version, tenant id, unix timestamp. Binary fields serialize as
//! standard base64.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Nonce length shared by both algorithms.
pub const NONCE_SIZE: usize = 12;

/// AES-256 key length.
pub const KEY_SIZE: usize = 32;

/// GCM authentication tag length.
pub const GCM_TAG_SIZE: usize = 16;

/// Cipher used for the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Authenticated; used for artifacts and metadata.
    #[serde(rename = "AES-256-GCM")]
    Aes256Gcm,
    /// Unauthenticated; used for streams only.
    #[serde(rename = "AES-256-CTR")]
    Aes256Ctr,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "AES-256-GCM",
            Algorithm::Aes256Ctr => "AES-256-CTR",
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Algorithm::Aes256Gcm)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES-256-GCM" => Ok(Algorithm::Aes256Gcm),
            "AES-256-CTR" => Ok(Algorithm::Aes256Ctr),
            other => Err(format!("unknown algorithm: {}", other)),
        }
    }
}

/// An envelope-encrypted blob.
///
/// Immutable after creation. Rotating the key produces a new value with a
/// higher `key_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub encrypted_dek: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    pub algorithm: Algorithm,
    pub key_version: u32,
    pub tenant_id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub encrypted_at: DateTime<Utc>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> EncryptedData {
        EncryptedData {
            ciphertext: vec![1, 2, 3],
            encrypted_dek: vec![4, 5],
            nonce: vec![0; NONCE_SIZE],
            algorithm: Algorithm::Aes256Gcm,
            key_version: 1,
            tenant_id: "tenant".to_string(),
            encrypted_at: Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid ts"),
        }
    }

    #[test]
    fn test_algorithm_wire_names() {
        let json = serde_json::to_string(&Algorithm::Aes256Ctr).expect("serialize");
        assert_eq!(json, "\"AES-256-CTR\"");
        assert_eq!("AES-256-GCM".parse::<Algorithm>(), Ok(Algorithm::Aes256Gcm));
        assert!("AES-128-GCM".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_persisted_shape() {
        let value = serde_json::to_value(sample()).expect("serialize");
        assert_eq!(value["ciphertext"], "AQID");
        assert_eq!(value["algorithm"], "AES-256-GCM");
        assert_eq!(value["key_version"], 1);
        assert_eq!(value["encrypted_at"], 1_700_000_000);
        assert_eq!(value["tenant_id"], "tenant");
    }

    #[test]
    fn test_unknown_algorithm_is_rejected_on_read() {
        let mut value = serde_json::to_value(sample()).expect("serialize");
        value["algorithm"] = serde_json::Value::String("ROT13".into());
        assert!(serde_json::from_value::<EncryptedData>(value).is_err());
    }

    #[test]
    fn test_only_gcm_is_authenticated() {
        assert!(Algorithm::Aes256Gcm.is_authenticated());
        assert!(!Algorithm::Aes256Ctr.is_authenticated());
    }
}
