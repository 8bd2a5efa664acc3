//! The encrypted credential blob primitive (spec §3, §6): AES-256-GCM with
//! a random nonce per encryption, key exactly 32 bytes, blob format is
//! `base64(nonce || ciphertext+tag)`.

use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{CredentialError, CredentialResult};

const KEY_LEN: usize = 32;

pub struct EncryptionKey {
    key: LessSafeKey,
}

impl EncryptionKey {
    /// `key_bytes` must be exactly 32 bytes (spec §6).
    pub fn new(key_bytes: &[u8]) -> CredentialResult<Self> {
        if key_bytes.len() != KEY_LEN {
            return Err(CredentialError::InvalidKey(format!(
                "expected a {KEY_LEN}-byte key, got {}",
                key_bytes.len()
            )));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes)
            .map_err(|_| CredentialError::InvalidKey("ring rejected the key material".into()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
        })
    }

    /// Encrypt `plaintext`, returning a base64 blob of `nonce || ciphertext+tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> CredentialResult<String> {
        let rng = SystemRandom::new();
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| CredentialError::EncryptFailed)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CredentialError::EncryptFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + in_out.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&in_out);
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt). Fails on a
    /// different key, on truncation, or on tampering (spec §8 invariant 4).
    pub fn decrypt(&self, blob_b64: &str) -> CredentialResult<Vec<u8>> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(blob_b64)
            .map_err(|e| CredentialError::MalformedBlob(e.to_string()))?;
        if blob.len() < NONCE_LEN {
            return Err(CredentialError::MalformedBlob(
                "blob shorter than the nonce".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CredentialError::MalformedBlob("invalid nonce".to_string()))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CredentialError::DecryptFailed)?;
        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> EncryptionKey {
        EncryptionKey::new(&[byte; KEY_LEN]).unwrap()
    }

    #[test]
    fn round_trips() {
        let k = key(1);
        let blob = k.encrypt(b"hello world").unwrap();
        assert_eq!(k.decrypt(&blob).unwrap(), b"hello world");
    }

    #[test]
    fn wrong_key_always_fails() {
        let k1 = key(1);
        let k2 = key(2);
        let blob = k1.encrypt(b"secret").unwrap();
        assert!(k2.decrypt(&blob).is_err());
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let k = key(1);
        let blob = k.encrypt(b"secret").unwrap();
        let mut raw = base64::engine::general_purpose::STANDARD.decode(&blob).unwrap();
        raw.truncate(raw.len() - 4);
        let truncated = base64::engine::general_purpose::STANDARD.encode(raw);
        assert!(k.decrypt(&truncated).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let k = key(1);
        let blob = k.encrypt(b"secret").unwrap();
        let mut raw = base64::engine::general_purpose::STANDARD.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = base64::engine::general_purpose::STANDARD.encode(raw);
        assert!(k.decrypt(&tampered).is_err());
    }

    #[test]
    fn rejects_non_32_byte_keys() {
        assert!(EncryptionKey::new(&[0u8; 16]).is_err());
        assert!(EncryptionKey::new(&[0u8; 33]).is_err());
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let k = key(1);
        let a = k.encrypt(b"same plaintext").unwrap();
        let b = k.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }
}
