//! Abstract KMS capability and an in-process implementation.
//!
//! Concrete cloud providers plug in behind [`KmsProvider`]. [`LocalKms`]
//! wraps keys with AES-256-GCM under per-key-id master keys and is meant for
//! development and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use depot_core::{KmsError, KEY_SIZE, NONCE_SIZE};
use rand::RngCore;
use zeroize::Zeroizing;

/// A freshly generated data key, in both forms.
///
/// Only `ciphertext` may be persisted. `plaintext` is zeroed on drop.
pub struct DataKey {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub ciphertext: Vec<u8>,
    pub key_id: String,
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("plaintext", &"<redacted>")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("key_id", &self.key_id)
            .finish()
    }
}

/// Key management capability.
///
/// Implementations report transport failures as [`KmsError::Unavailable`]
/// and do not retry.
#[async_trait]
pub trait KmsProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Wrap `plaintext` under the key `key_id`.
    async fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Unwrap `ciphertext` produced by [`encrypt`](Self::encrypt).
    async fn decrypt(&self, key_id: &str, ciphertext: &[u8])
        -> Result<Zeroizing<Vec<u8>>, KmsError>;

    /// Generate a random 256-bit data key wrapped under `key_id`.
    async fn generate_data_key(&self, key_id: &str) -> Result<DataKey, KmsError>;
}

/// Fill a fresh 256-bit key from the OS-seeded thread RNG.
pub(crate) fn random_key() -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; KEY_SIZE]);
    rand::rng().fill_bytes(key.as_mut_slice());
    key
}

pub(crate) fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

/// In-process KMS.
///
/// Wrapped output is `nonce || AES-256-GCM(master, plaintext)`.
pub struct LocalKms {
    keys: RwLock<HashMap<String, Zeroizing<[u8; KEY_SIZE]>>>,
}

impl LocalKms {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// A KMS holding a single master key.
    pub fn with_key(key_id: impl Into<String>, master: [u8; KEY_SIZE]) -> Self {
        let kms = Self::new();
        kms.insert_key(key_id, master);
        kms
    }

    /// Create a random master key under `key_id`, replacing any existing one.
    pub fn create_key(&self, key_id: impl Into<String>) {
        let mut master = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut master);
        self.insert_key(key_id, master);
    }

    pub fn insert_key(&self, key_id: impl Into<String>, master: [u8; KEY_SIZE]) {
        let mut keys = self
            .keys
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        keys.insert(key_id.into(), Zeroizing::new(master));
    }

    pub fn has_key(&self, key_id: &str) -> bool {
        self.keys
            .read()
            .map(|keys| keys.contains_key(key_id))
            .unwrap_or(false)
    }

    fn cipher_for(&self, key_id: &str) -> Result<Aes256Gcm, KmsError> {
        let keys = self.keys.read().map_err(|_| KmsError::Internal {
            reason: "key table lock poisoned".to_string(),
        })?;
        let master = keys.get(key_id).ok_or_else(|| KmsError::KeyNotFound {
            key_id: key_id.to_string(),
        })?;
        Aes256Gcm::new_from_slice(master.as_slice()).map_err(|e| KmsError::Internal {
            reason: e.to_string(),
        })
    }
}

impl Default for LocalKms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KmsProvider for LocalKms {
    fn name(&self) -> &str {
        "local"
    }

    async fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let cipher = self.cipher_for(key_id)?;
        let nonce = random_nonce();
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| KmsError::Internal {
                reason: "key wrap failed".to_string(),
            })?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    async fn decrypt(
        &self,
        key_id: &str,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        if ciphertext.len() <= NONCE_SIZE {
            return Err(KmsError::InvalidCiphertext);
        }
        let cipher = self.cipher_for(key_id)?;
        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map(Zeroizing::new)
            .map_err(|_| KmsError::InvalidCiphertext)
    }

    async fn generate_data_key(&self, key_id: &str) -> Result<DataKey, KmsError> {
        let plaintext = random_key();
        let ciphertext = self.encrypt(key_id, &plaintext).await?;
        Ok(DataKey {
            plaintext,
            ciphertext,
            key_id: key_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wrap_unwrap() {
        let kms = LocalKms::new();
        kms.create_key("kek-1");

        let wrapped = kms.encrypt("kek-1", b"secret").await.expect("wrap");
        assert_ne!(&wrapped[NONCE_SIZE..], b"secret");
        let unwrapped = kms.decrypt("kek-1", &wrapped).await.expect("unwrap");
        assert_eq!(unwrapped.as_slice(), b"secret");
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let kms = LocalKms::new();
        let err = kms.encrypt("missing", b"x").await.unwrap_err();
        assert_eq!(
            err,
            KmsError::KeyNotFound {
                key_id: "missing".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_wrong_key_rejects() {
        let kms = LocalKms::new();
        kms.create_key("a");
        kms.create_key("b");
        let wrapped = kms.encrypt("a", b"secret").await.expect("wrap");
        assert_eq!(
            kms.decrypt("b", &wrapped).await.unwrap_err(),
            KmsError::InvalidCiphertext
        );
        assert_eq!(
            kms.decrypt("a", &wrapped[..4]).await.unwrap_err(),
            KmsError::InvalidCiphertext
        );
    }

    #[tokio::test]
    async fn test_generate_data_key() {
        let kms = LocalKms::with_key("kek", [9u8; KEY_SIZE]);
        let dek = kms.generate_data_key("kek").await.expect("dek");
        assert_eq!(dek.plaintext.len(), KEY_SIZE);
        assert_eq!(dek.key_id, "kek");

        let unwrapped = kms.decrypt("kek", &dek.ciphertext).await.expect("unwrap");
        assert_eq!(unwrapped.as_slice(), dek.plaintext.as_slice());
        assert!(format!("{:?}", dek).contains("<redacted>"));
    }
}
