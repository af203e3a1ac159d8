use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use strata_types::error::{CodecStage, Result, StrataError};

use super::aes_gcm::{derive_nonce, nonce_key};
use super::CryptoEngine;

/// ChaCha20-Poly1305 authenticated encryption engine. Same wire format and
/// nonce derivation as the AES-GCM engine: `[12-byte nonce][ciphertext +
/// 16-byte tag]`, nonce synthesized from the plaintext.
pub struct ChaCha20Poly1305Engine {
    cipher: ChaCha20Poly1305,
    nonce_key: [u8; 32],
}

impl ChaCha20Poly1305Engine {
    pub fn new(key: &[u8; 32]) -> Self {
        let cipher =
            ChaCha20Poly1305::new_from_slice(key).expect("valid 32-byte key for ChaCha20-Poly1305");
        Self {
            cipher,
            nonce_key: nonce_key(key),
        }
    }
}

impl CryptoEngine for ChaCha20Poly1305Engine {
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
            .map_err(|e| {
                StrataError::codec(CodecStage::Encrypt, format!("ChaCha20-Poly1305: {e}"))
            })?;

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
