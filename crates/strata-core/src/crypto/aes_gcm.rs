use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

use strata_types::error::{CodecStage, Result, StrataError};
use strata_types::mac::Mac;

use super::CryptoEngine;

const NONCE_KEY_CONTEXT: &[u8] = b"strata:nonce-key:v1";

/// Derive the nonce-derivation key from the encryption key.
pub(super) fn nonce_key(encryption_key: &[u8; 32]) -> [u8; 32] {
    *Mac::compute(encryption_key, NONCE_KEY_CONTEXT).as_bytes()
}

/// Synthesize a deterministic nonce from the plaintext.
///
/// Sealing must be deterministic for a given repository configuration so
/// that a blob's MAC (computed over the sealed bytes) is stable across
/// runs. The nonce is the truncated keyed hash of the plaintext: it
/// repeats only for identical plaintexts, which produce identical
/// ciphertexts under the content-addressing invariant.
pub(super) fn derive_nonce(nonce_key: &[u8; 32], plaintext: &[u8]) -> [u8; 12] {
    let digest = Mac::compute(nonce_key, plaintext);
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&digest.as_bytes()[..12]);
    nonce
}

/// AES-256-GCM authenticated encryption engine with derived nonces.
pub struct Aes256GcmEngine {
    cipher: Aes256Gcm,
    nonce_key: [u8; 32],
}

impl Aes256GcmEngine {
    pub fn new(key: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new_from_slice(key).expect("valid 32-byte key for AES-256-GCM");
        Self {
            cipher,
            nonce_key: nonce_key(key),
        }
    }
}

impl CryptoEngine for Aes256GcmEngine {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let nonce_bytes = derive_nonce(&self.nonce_key, plaintext);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| StrataError::codec(CodecStage::Encrypt, format!("AES-GCM: {e}")))?;

        // Wire format: [12-byte nonce][ciphertext with appended 16-byte tag]
        let mut out = Vec::with_capacity(12 + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 12 + 16 {
            return Err(StrataError::codec(CodecStage::Auth, "ciphertext too short"));
        }
        let (nonce_bytes, ciphertext) = data.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| StrataError::codec(CodecStage::Auth, "authentication failed"))
    }

    fn is_encrypting(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_is_deterministic() {
        let engine = Aes256GcmEngine::new(&[0x11; 32]);
        let a = engine.encrypt(b"same plaintext", b"aad").unwrap();
        let b = engine.encrypt(b"same plaintext", b"aad").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_plaintexts_get_distinct_nonces() {
        let key = nonce_key(&[0x11; 32]);
        assert_ne!(derive_nonce(&key, b"one"), derive_nonce(&key, b"two"));
    }

    #[test]
    fn roundtrip_with_aad() {
        let engine = Aes256GcmEngine::new(&[0x22; 32]);
        let sealed = engine.encrypt(b"payload", b"context").unwrap();
        assert_eq!(engine.decrypt(&sealed, b"context").unwrap(), b"payload");
        assert!(engine.decrypt(&sealed, b"other-context").is_err());
    }

    #[test]
    fn wrong_key_fails_auth() {
        let engine = Aes256GcmEngine::new(&[0x33; 32]);
        let sealed = engine.encrypt(b"payload", b"").unwrap();
        let other = Aes256GcmEngine::new(&[0x44; 32]);
        assert!(other.decrypt(&sealed, b"").is_err());
    }
}
