//! Envelope encryption engine.
//!
//! Every object is sealed under a fresh per-object data key (DEK). The DEK is
//! wrapped by a tenant-scoped key encryption key (KEK) that only the KMS ever
//! sees. The tenant id is bound into every GCM tag as associated data, so a
//! ciphertext written for one tenant can never be opened under another.

use std::collections::HashMap;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use depot_core::{
    Algorithm, CryptoError, EncryptedData, KmsError, TenantContext, GCM_TAG_SIZE, KEY_SIZE,
    NONCE_SIZE,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::key_cache::KeyCache;
use super::kms::{random_key, random_nonce, KmsProvider};

/// Version stamped on freshly sealed objects.
pub const INITIAL_KEY_VERSION: u32 = 1;

/// Cache key under which an unwrapped tenant master key is held.
pub fn tmk_cache_key(tenant: &TenantContext) -> String {
    format!("tmk:{}", tenant.tenant_id())
}

/// HKDF info string for a tenant KEK, e.g. `tenant:<id>:artifacts`.
pub fn kek_context(tenant: &TenantContext, purpose: &str) -> String {
    format!("tenant:{}:{}", tenant.tenant_id(), purpose)
}

/// Envelope-encryption service.
///
/// Holds no key material of its own beyond what the [`KeyCache`] keeps.
#[derive(Clone)]
pub struct EncryptionService {
    pub(super) kms: Arc<dyn KmsProvider>,
    key_cache: Arc<KeyCache>,
}

impl EncryptionService {
    pub fn new(kms: Arc<dyn KmsProvider>, key_cache: Arc<KeyCache>) -> Self {
        Self { kms, key_cache }
    }

    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.key_cache
    }

    pub fn kms_name(&self) -> &str {
        self.kms.name()
    }

    // ========================================================================
    // ARTIFACTS
    // ========================================================================

    /// Seal `plaintext` for `tenant` with AES-256-GCM under a fresh DEK, and
    /// wrap the DEK under `kek_key_id`.
    pub async fn encrypt_artifact(
        &self,
        tenant: &TenantContext,
        plaintext: &[u8],
        kek_key_id: &str,
    ) -> Result<EncryptedData, CryptoError> {
        let tenant_id = tenant.tenant_id().to_string();
        let dek = random_key();
        let nonce = random_nonce();

        let ciphertext = seal(&dek, &nonce, plaintext, tenant_id.as_bytes())?;
        let encrypted_dek = self
            .kms
            .encrypt(kek_key_id, &dek)
            .await
            .map_err(CryptoError::KeyWrap)?;

        Ok(EncryptedData {
            ciphertext,
            encrypted_dek,
            nonce: nonce.to_vec(),
            algorithm: Algorithm::Aes256Gcm,
            key_version: INITIAL_KEY_VERSION,
            tenant_id,
            encrypted_at: Utc::now(),
        })
    }

    /// Open an artifact sealed by [`encrypt_artifact`](Self::encrypt_artifact).
    ///
    /// The stored tenant id is the associated data and must equal the
    /// caller's. A record written for another tenant, a relabelled record, a
    /// tampered ciphertext and a wrong KEK all fail with the same
    /// [`CryptoError::DecryptionFailed`]. Only KMS unavailability is
    /// reported separately, since it says nothing about the ciphertext.
    pub async fn decrypt_artifact(
        &self,
        tenant: &TenantContext,
        data: &EncryptedData,
        kek_key_id: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        if data.tenant_id.is_empty() {
            return Err(CryptoError::MissingTenant);
        }
        if data.algorithm != Algorithm::Aes256Gcm {
            return Err(CryptoError::InvalidEnvelope {
                reason: format!("{} objects are opened as streams", data.algorithm),
            });
        }
        if data.nonce.len() != NONCE_SIZE {
            tracing::debug!(nonce_len = data.nonce.len(), "Rejecting envelope with bad nonce");
            return Err(CryptoError::DecryptionFailed);
        }

        let dek = self.unwrap_dek(kek_key_id, &data.encrypted_dek).await?;
        let caller = tenant.tenant_id().to_string();
        if caller != data.tenant_id {
            tracing::warn!(
                caller = %caller,
                stored = %data.tenant_id,
                "Envelope tenant differs from caller"
            );
            return Err(CryptoError::DecryptionFailed);
        }

        open(&dek, &data.nonce, &data.ciphertext, data.tenant_id.as_bytes())
    }

    /// Re-seal an artifact under `new_kek_key_id` with a fresh DEK.
    ///
    /// Returns a new object with `key_version + 1`; `data` is left untouched.
    pub async fn reencrypt_artifact(
        &self,
        tenant: &TenantContext,
        data: &EncryptedData,
        old_kek_key_id: &str,
        new_kek_key_id: &str,
    ) -> Result<EncryptedData, CryptoError> {
        let plaintext = Zeroizing::new(self.decrypt_artifact(tenant, data, old_kek_key_id).await?);
        let mut rotated = self
            .encrypt_artifact(tenant, &plaintext, new_kek_key_id)
            .await?;
        rotated.key_version = data.key_version.saturating_add(1);
        Ok(rotated)
    }

    /// Structural checks on a stored envelope.
    ///
    /// This does not authenticate anything; only decryption does.
    pub fn verify_integrity(data: &EncryptedData) -> Result<(), CryptoError> {
        if data.tenant_id.is_empty() {
            return Err(CryptoError::MissingTenant);
        }
        if data.nonce.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidEnvelope {
                reason: format!("nonce must be {} bytes, got {}", NONCE_SIZE, data.nonce.len()),
            });
        }
        if data.encrypted_dek.is_empty() {
            return Err(CryptoError::InvalidEnvelope {
                reason: "wrapped data key is empty".to_string(),
            });
        }
        if data.key_version == 0 {
            return Err(CryptoError::InvalidEnvelope {
                reason: "key version must start at 1".to_string(),
            });
        }
        if data.algorithm.is_authenticated() && data.ciphertext.len() < GCM_TAG_SIZE {
            return Err(CryptoError::InvalidEnvelope {
                reason: "ciphertext shorter than authentication tag".to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // METADATA
    // ========================================================================

    /// Encrypt every value of a metadata map.
    ///
    /// Each output value is base64 of the JSON-encoded [`EncryptedData`], so
    /// it fits text columns and carries its own nonce and wrapped key.
    pub async fn encrypt_metadata(
        &self,
        tenant: &TenantContext,
        fields: &HashMap<String, String>,
        kek_key_id: &str,
    ) -> Result<HashMap<String, String>, CryptoError> {
        let mut out = HashMap::with_capacity(fields.len());
        for (field, value) in fields {
            let encoded = self
                .encrypt_field(tenant, value, kek_key_id)
                .await
                .map_err(|e| field_error(field, e))?;
            out.insert(field.clone(), encoded);
        }
        Ok(out)
    }

    /// Inverse of [`encrypt_metadata`](Self::encrypt_metadata).
    pub async fn decrypt_metadata(
        &self,
        tenant: &TenantContext,
        fields: &HashMap<String, String>,
        kek_key_id: &str,
    ) -> Result<HashMap<String, String>, CryptoError> {
        let mut out = HashMap::with_capacity(fields.len());
        for (field, value) in fields {
            let decoded = self
                .decrypt_field(tenant, value, kek_key_id)
                .await
                .map_err(|e| field_error(field, e))?;
            out.insert(field.clone(), decoded);
        }
        Ok(out)
    }

    async fn encrypt_field(
        &self,
        tenant: &TenantContext,
        value: &str,
        kek_key_id: &str,
    ) -> Result<String, CryptoError> {
        let sealed = self
            .encrypt_artifact(tenant, value.as_bytes(), kek_key_id)
            .await?;
        let json = serde_json::to_vec(&sealed).map_err(|e| CryptoError::InvalidEnvelope {
            reason: e.to_string(),
        })?;
        Ok(STANDARD.encode(json))
    }

    async fn decrypt_field(
        &self,
        tenant: &TenantContext,
        value: &str,
        kek_key_id: &str,
    ) -> Result<String, CryptoError> {
        let json = STANDARD
            .decode(value.as_bytes())
            .map_err(|e| CryptoError::InvalidEnvelope {
                reason: e.to_string(),
            })?;
        let sealed: EncryptedData =
            serde_json::from_slice(&json).map_err(|e| CryptoError::InvalidEnvelope {
                reason: e.to_string(),
            })?;
        let plaintext = self.decrypt_artifact(tenant, &sealed, kek_key_id).await?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }

    // ========================================================================
    // KEY HIERARCHY
    // ========================================================================

    /// 32 random bytes for a new tenant master key.
    pub fn generate_tmk() -> Zeroizing<Vec<u8>> {
        random_key()
    }

    /// Derive a 256-bit KEK from a tenant master key with HKDF-SHA256.
    ///
    /// `context` is the HKDF info string and separates purposes: the same
    /// master key yields unrelated KEKs for `tenant:<id>:artifacts` and
    /// `tenant:<id>:metadata`.
    pub fn derive_kek(tmk: &[u8], context: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
        if tmk.is_empty() || context.is_empty() {
            return Err(CryptoError::KeyDerivation);
        }
        let hk = Hkdf::<Sha256>::new(None, tmk);
        let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
        hk.expand(context.as_bytes(), okm.as_mut_slice())
            .map_err(|_| CryptoError::KeyDerivation)?;
        Ok(okm)
    }

    /// Wrap a tenant master key under `kms_key_id` and keep the plaintext in
    /// the key cache.
    pub async fn wrap_tenant_master_key(
        &self,
        tenant: &TenantContext,
        tmk: &[u8],
        kms_key_id: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        let wrapped = self
            .kms
            .encrypt(kms_key_id, tmk)
            .await
            .map_err(CryptoError::KeyWrap)?;
        self.key_cache.set(tmk_cache_key(tenant), tmk);
        Ok(wrapped)
    }

    /// Unwrap a tenant master key, serving from the key cache when possible.
    ///
    /// A miss always goes to the KMS.
    pub async fn unwrap_tenant_master_key(
        &self,
        tenant: &TenantContext,
        wrapped_tmk: &[u8],
        kms_key_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let cache_key = tmk_cache_key(tenant);
        if let Some(tmk) = self.key_cache.get(&cache_key) {
            return Ok(tmk);
        }

        let tmk = self
            .kms
            .decrypt(kms_key_id, wrapped_tmk)
            .await
            .map_err(CryptoError::KeyUnwrap)?;
        self.key_cache.set(cache_key, &tmk);
        Ok(tmk)
    }

    /// Unwrap the tenant master key and derive the KEK for `purpose`.
    pub async fn derive_tenant_kek(
        &self,
        tenant: &TenantContext,
        wrapped_tmk: &[u8],
        kms_key_id: &str,
        purpose: &str,
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
        let tmk = self
            .unwrap_tenant_master_key(tenant, wrapped_tmk, kms_key_id)
            .await?;
        Self::derive_kek(&tmk, &kek_context(tenant, purpose))
    }

    /// Unwrap a DEK. KMS outages are reported as such; every other failure
    /// collapses into `DecryptionFailed`.
    pub(super) async fn unwrap_dek(
        &self,
        kek_key_id: &str,
        encrypted_dek: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let dek = match self.kms.decrypt(kek_key_id, encrypted_dek).await {
            Ok(dek) => dek,
            Err(e @ KmsError::Unavailable { .. }) => return Err(CryptoError::KeyUnwrap(e)),
            Err(e) => {
                tracing::debug!(error = %e, kek = %kek_key_id, "Data key unwrap rejected");
                return Err(CryptoError::DecryptionFailed);
            }
        };
        if dek.len() != KEY_SIZE {
            tracing::debug!(len = dek.len(), "Unwrapped data key has wrong length");
            return Err(CryptoError::DecryptionFailed);
        }
        Ok(dek)
    }
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService")
            .field("kms", &self.kms.name())
            .field("key_cache", &self.key_cache)
            .finish()
    }
}

fn field_error(field: &str, source: CryptoError) -> CryptoError {
    CryptoError::MetadataField {
        field: field.to_string(),
        source: Box::new(source),
    }
}

fn seal(key: &[u8], nonce: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::CipherSetup {
        reason: e.to_string(),
    })?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)
}

fn open(key: &[u8], nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::CipherSetup {
        reason: e.to_string(),
    })?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| {
            tracing::debug!("GCM open failed");
            CryptoError::DecryptionFailed
        })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::kms::LocalKms;
    use depot_core::TenantId;

    const KEK: &str = "kek-primary";

    fn service() -> (EncryptionService, Arc<LocalKms>) {
        let kms = Arc::new(LocalKms::new());
        kms.create_key(KEK);
        kms.create_key("kek-next");
        let svc = EncryptionService::new(kms.clone(), Arc::new(KeyCache::default()));
        (svc, kms)
    }

    fn tenant(slug: &str) -> TenantContext {
        TenantContext::new(TenantId::now_v7(), slug, slug.to_uppercase())
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (svc, _) = service();
        let alpha = tenant("alpha");

        let sealed = svc
            .encrypt_artifact(&alpha, b"layer bytes", KEK)
            .await
            .expect("encrypt");
        assert_eq!(sealed.algorithm, Algorithm::Aes256Gcm);
        assert_eq!(sealed.nonce.len(), NONCE_SIZE);
        assert_eq!(sealed.key_version, INITIAL_KEY_VERSION);
        assert_eq!(sealed.tenant_id, alpha.tenant_id().to_string());
        assert_ne!(sealed.ciphertext.as_slice(), b"layer bytes");

        let opened = svc.decrypt_artifact(&alpha, &sealed, KEK).await.expect("decrypt");
        assert_eq!(opened, b"layer bytes");
    }

    #[tokio::test]
    async fn test_cross_tenant_decrypt_fails_uniformly() {
        let (svc, _) = service();
        let alpha = tenant("alpha");
        let beta = tenant("beta");
        let sealed = svc.encrypt_artifact(&alpha, b"secret", KEK).await.expect("encrypt");

        assert_eq!(
            svc.decrypt_artifact(&beta, &sealed, KEK).await,
            Err(CryptoError::DecryptionFailed)
        );

        // Relabelling the stored tenant does not help either.
        let mut relabelled = sealed.clone();
        relabelled.tenant_id = beta.tenant_id().to_string();
        assert_eq!(
            svc.decrypt_artifact(&beta, &relabelled, KEK).await,
            Err(CryptoError::DecryptionFailed)
        );

        // Nor does it still open for the tenant that sealed it.
        assert_eq!(
            svc.decrypt_artifact(&alpha, &relabelled, KEK).await,
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[tokio::test]
    async fn test_tampering_is_detected() {
        let (svc, _) = service();
        let alpha = tenant("alpha");
        let sealed = svc.encrypt_artifact(&alpha, b"secret", KEK).await.expect("encrypt");

        let mut flipped = sealed.clone();
        flipped.ciphertext[0] ^= 0x01;
        assert_eq!(
            svc.decrypt_artifact(&alpha, &flipped, KEK).await,
            Err(CryptoError::DecryptionFailed)
        );

        let mut bad_nonce = sealed.clone();
        bad_nonce.nonce[3] ^= 0xff;
        assert_eq!(
            svc.decrypt_artifact(&alpha, &bad_nonce, KEK).await,
            Err(CryptoError::DecryptionFailed)
        );

        let mut bad_dek = sealed.clone();
        bad_dek.encrypted_dek[NONCE_SIZE] ^= 0x01;
        assert_eq!(
            svc.decrypt_artifact(&alpha, &bad_dek, KEK).await,
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[tokio::test]
    async fn test_wrong_kek_is_uniform_failure() {
        let (svc, _) = service();
        let alpha = tenant("alpha");
        let sealed = svc.encrypt_artifact(&alpha, b"secret", KEK).await.expect("encrypt");
        assert_eq!(
            svc.decrypt_artifact(&alpha, &sealed, "kek-next").await,
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[tokio::test]
    async fn test_empty_tenant_rejected() {
        let (svc, _) = service();
        let alpha = tenant("alpha");
        let mut sealed = svc.encrypt_artifact(&alpha, b"x", KEK).await.expect("encrypt");
        sealed.tenant_id.clear();
        assert_eq!(
            svc.decrypt_artifact(&alpha, &sealed, KEK).await,
            Err(CryptoError::MissingTenant)
        );
    }

    #[tokio::test]
    async fn test_wrap_failure_surfaces_as_key_wrap() {
        let (svc, _) = service();
        let err = svc
            .encrypt_artifact(&tenant("alpha"), b"x", "no-such-kek")
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::KeyWrap(KmsError::KeyNotFound { .. })));
    }

    #[tokio::test]
    async fn test_reencrypt_bumps_version() {
        let (svc, _) = service();
        let alpha = tenant("alpha");
        let original = svc.encrypt_artifact(&alpha, b"payload", KEK).await.expect("encrypt");

        let rotated = svc
            .reencrypt_artifact(&alpha, &original, KEK, "kek-next")
            .await
            .expect("rotate");
        assert_eq!(rotated.key_version, original.key_version + 1);
        assert_ne!(rotated.encrypted_dek, original.encrypted_dek);
        assert_eq!(
            svc.decrypt_artifact(&alpha, &rotated, "kek-next").await.expect("decrypt"),
            b"payload"
        );
        // The old object still opens under the old KEK.
        assert!(svc.decrypt_artifact(&alpha, &original, KEK).await.is_ok());
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let (svc, _) = service();
        let alpha = tenant("alpha");
        let mut fields = HashMap::new();
        fields.insert("license".to_string(), "MIT".to_string());
        fields.insert("maintainer".to_string(), "ops@example.com".to_string());

        let sealed = svc.encrypt_metadata(&alpha, &fields, KEK).await.expect("encrypt");
        assert_eq!(sealed.len(), 2);
        assert_ne!(sealed["license"], "MIT");

        let opened = svc.decrypt_metadata(&alpha, &sealed, KEK).await.expect("decrypt");
        assert_eq!(opened, fields);
    }

    #[tokio::test]
    async fn test_metadata_error_names_field() {
        let (svc, _) = service();
        let alpha = tenant("alpha");
        let mut fields = HashMap::new();
        fields.insert("license".to_string(), "not-base64!!".to_string());

        match svc.decrypt_metadata(&alpha, &fields, KEK).await {
            Err(CryptoError::MetadataField { field, source }) => {
                assert_eq!(field, "license");
                assert!(matches!(*source, CryptoError::InvalidEnvelope { .. }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_verify_integrity() {
        let (svc, _) = service();
        let sealed = svc
            .encrypt_artifact(&tenant("alpha"), b"x", KEK)
            .await
            .expect("encrypt");
        assert!(EncryptionService::verify_integrity(&sealed).is_ok());

        let mut short_nonce = sealed.clone();
        short_nonce.nonce.truncate(8);
        assert!(matches!(
            EncryptionService::verify_integrity(&short_nonce),
            Err(CryptoError::InvalidEnvelope { .. })
        ));

        let mut no_tenant = sealed.clone();
        no_tenant.tenant_id.clear();
        assert_eq!(
            EncryptionService::verify_integrity(&no_tenant),
            Err(CryptoError::MissingTenant)
        );

        let mut truncated = sealed;
        truncated.ciphertext.truncate(4);
        assert!(EncryptionService::verify_integrity(&truncated).is_err());
    }

    #[test]
    fn test_derive_kek_is_domain_separated() {
        let tmk = [5u8; KEY_SIZE];
        let a = EncryptionService::derive_kek(&tmk, "tenant:t1:artifacts").expect("derive");
        let b = EncryptionService::derive_kek(&tmk, "tenant:t1:metadata").expect("derive");
        let a2 = EncryptionService::derive_kek(&tmk, "tenant:t1:artifacts").expect("derive");
        assert_ne!(*a, *b);
        assert_eq!(*a, *a2);
        assert_eq!(
            EncryptionService::derive_kek(&[], "ctx"),
            Err(CryptoError::KeyDerivation)
        );
    }

    #[test]
    fn test_generate_tmk_is_random() {
        let a = EncryptionService::generate_tmk();
        let b = EncryptionService::generate_tmk();
        assert_eq!(a.len(), KEY_SIZE);
        assert_ne!(a.as_slice(), b.as_slice());
    }

    #[tokio::test]
    async fn test_tenant_kek_survives_cache_miss() {
        let (svc, _) = service();
        let alpha = tenant("alpha");
        let tmk = EncryptionService::generate_tmk();

        let wrapped = svc
            .wrap_tenant_master_key(&alpha, &tmk, KEK)
            .await
            .expect("wrap");
        let cached = svc
            .derive_tenant_kek(&alpha, &wrapped, KEK, "artifacts")
            .await
            .expect("derive from cache");

        svc.key_cache().clear();
        let fresh = svc
            .derive_tenant_kek(&alpha, &wrapped, KEK, "artifacts")
            .await
            .expect("derive via kms");
        assert_eq!(*cached, *fresh);
        assert!(svc.key_cache().get(&tmk_cache_key(&alpha)).is_some());
    }

    #[test]
    fn test_kek_context_format() {
        let id = TenantId::now_v7();
        let ctx = TenantContext::new(id, "alpha", "Alpha");
        assert_eq!(kek_context(&ctx, "metadata"), format!("tenant:{}:metadata", id));
    }
}
