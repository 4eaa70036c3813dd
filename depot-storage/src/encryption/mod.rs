//! Envelope encryption: KMS capability, key cache and the encryption service.

pub mod key_cache;
pub mod kms;
pub mod service;
pub mod stream;

pub use key_cache::{KeyCache, DEFAULT_KEY_SWEEP_INTERVAL, DEFAULT_KEY_TTL};
pub use kms::{DataKey, KmsProvider, LocalKms};
pub use service::{kek_context, tmk_cache_key, EncryptionService, INITIAL_KEY_VERSION};
pub use stream::{MAX_STREAM_BYTES, STREAM_CHUNK_SIZE};
