//! Streaming encryption for large payloads.
//!
//! Layout: `[u16 BE wrapped-DEK length][wrapped DEK][12-byte nonce][ciphertext]`.
//! The payload is AES-256-CTR with IV `nonce || 0u32`, so one stream holds at
//! most 2^32 blocks (64 GiB).
//!
//! CTR provides confidentiality only. Streams are not authenticated; callers
//! that need tamper evidence must add their own MAC or checksum on top.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use depot_core::{CryptoError, KEY_SIZE, NONCE_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroizing;

use super::kms::random_nonce;
use super::service::EncryptionService;

type Aes256Ctr = ctr::Ctr32BE<Aes256>;

/// Plaintext bytes processed per read.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Largest payload one CTR stream can carry.
pub const MAX_STREAM_BYTES: u64 = (u32::MAX as u64 + 1) * 16;

fn stream_error(e: std::io::Error) -> CryptoError {
    CryptoError::Stream {
        reason: e.to_string(),
    }
}

fn ctr_cipher(dek: &[u8], nonce: &[u8]) -> Result<Aes256Ctr, CryptoError> {
    if dek.len() != KEY_SIZE {
        return Err(CryptoError::CipherSetup {
            reason: format!("data key must be {} bytes", KEY_SIZE),
        });
    }
    let mut iv = [0u8; 16];
    iv[..NONCE_SIZE].copy_from_slice(nonce);
    Aes256Ctr::new_from_slices(dek, &iv).map_err(|e| CryptoError::CipherSetup {
        reason: e.to_string(),
    })
}

/// Run `reader` through `cipher` into `writer`. Returns bytes processed.
async fn pump<R, W>(
    cipher: &mut Aes256Ctr,
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, CryptoError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Zeroizing::new(vec![0u8; STREAM_CHUNK_SIZE]);
    let mut total: u64 = 0;

    loop {
        let n = reader.read(buf.as_mut_slice()).await.map_err(stream_error)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > MAX_STREAM_BYTES {
            return Err(CryptoError::Stream {
                reason: "stream exceeds CTR counter space".to_string(),
            });
        }
        cipher
            .try_apply_keystream(&mut buf[..n])
            .map_err(|_| CryptoError::Stream {
                reason: "keystream exhausted".to_string(),
            })?;
        writer.write_all(&buf[..n]).await.map_err(stream_error)?;
    }

    writer.flush().await.map_err(stream_error)?;
    Ok(total)
}

impl EncryptionService {
    /// Encrypt everything `reader` yields into `writer` under a fresh DEK
    /// wrapped by `kek_key_id`. Returns the number of plaintext bytes.
    pub async fn encrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        kek_key_id: &str,
    ) -> Result<u64, CryptoError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let data_key = self
            .kms
            .generate_data_key(kek_key_id)
            .await
            .map_err(CryptoError::KeyWrap)?;
        let wrapped_len = u16::try_from(data_key.ciphertext.len()).map_err(|_| {
            CryptoError::InvalidEnvelope {
                reason: "wrapped data key too large for stream header".to_string(),
            }
        })?;

        let nonce = random_nonce();
        let mut cipher = ctr_cipher(&data_key.plaintext, &nonce)?;

        writer.write_u16(wrapped_len).await.map_err(stream_error)?;
        writer
            .write_all(&data_key.ciphertext)
            .await
            .map_err(stream_error)?;
        writer.write_all(&nonce).await.map_err(stream_error)?;

        pump(&mut cipher, reader, writer).await
    }

    /// Inverse of [`encrypt_stream`](Self::encrypt_stream). Returns the
    /// number of plaintext bytes written.
    pub async fn decrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        kek_key_id: &str,
    ) -> Result<u64, CryptoError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let wrapped_len = reader.read_u16().await.map_err(stream_error)? as usize;
        if wrapped_len == 0 {
            return Err(CryptoError::InvalidEnvelope {
                reason: "stream header carries no data key".to_string(),
            });
        }
        let mut wrapped = vec![0u8; wrapped_len];
        reader.read_exact(&mut wrapped).await.map_err(stream_error)?;
        let mut nonce = [0u8; NONCE_SIZE];
        reader.read_exact(&mut nonce).await.map_err(stream_error)?;

        let dek = self.unwrap_dek(kek_key_id, &wrapped).await?;
        let mut cipher = ctr_cipher(&dek, &nonce)?;

        pump(&mut cipher, reader, writer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::{KeyCache, LocalKms};
    use std::sync::Arc;

    fn service() -> EncryptionService {
        let kms = Arc::new(LocalKms::new());
        kms.create_key("kek");
        EncryptionService::new(kms, Arc::new(KeyCache::default()))
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_stream_round_trip_across_chunks() {
        let svc = service();
        let plaintext = payload(STREAM_CHUNK_SIZE * 2 + 123);

        let mut sealed = Vec::new();
        let written = svc
            .encrypt_stream(&mut plaintext.as_slice(), &mut sealed, "kek")
            .await
            .expect("encrypt");
        assert_eq!(written, plaintext.len() as u64);

        let wrapped_len = u16::from_be_bytes([sealed[0], sealed[1]]) as usize;
        let header = 2 + wrapped_len + NONCE_SIZE;
        assert_eq!(sealed.len(), header + plaintext.len());
        assert_ne!(&sealed[header..header + 64], &plaintext[..64]);

        let mut opened = Vec::new();
        let read = svc
            .decrypt_stream(&mut sealed.as_slice(), &mut opened, "kek")
            .await
            .expect("decrypt");
        assert_eq!(read, plaintext.len() as u64);
        assert_eq!(opened, plaintext);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let svc = service();
        let mut sealed = Vec::new();
        svc.encrypt_stream(&mut &b""[..], &mut sealed, "kek")
            .await
            .expect("encrypt");

        let mut opened = Vec::new();
        let read = svc
            .decrypt_stream(&mut sealed.as_slice(), &mut opened, "kek")
            .await
            .expect("decrypt");
        assert_eq!(read, 0);
        assert!(opened.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let svc = service();
        let mut out = Vec::new();
        let err = svc
            .decrypt_stream(&mut &[0u8, 40, 1, 2][..], &mut out, "kek")
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::Stream { .. }));

        let err = svc
            .decrypt_stream(&mut &[0u8, 0][..], &mut out, "kek")
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidEnvelope { .. }));
    }

    #[tokio::test]
    async fn test_wrong_kek_fails() {
        let svc = service();
        let mut sealed = Vec::new();
        svc.encrypt_stream(&mut &b"hello"[..], &mut sealed, "kek")
            .await
            .expect("encrypt");

        let mut out = Vec::new();
        let err = svc
            .decrypt_stream(&mut sealed.as_slice(), &mut out, "other")
            .await
            .unwrap_err();
        assert_eq!(err, CryptoError::DecryptionFailed);
        assert!(out.is_empty());
    }
}
