use strata_types::error::{Result, StrataError};
use strata_types::mac::Mac;

use crate::compress;
use crate::config::{CompressionAlgorithm, EncryptionAlgorithm, RepositoryConfig};
use crate::crypto::aes_gcm::Aes256GcmEngine;
use crate::crypto::chacha20_poly1305::ChaCha20Poly1305Engine;
use crate::crypto::key::derive_key;
use crate::crypto::{CryptoEngine, PlaintextEngine};

/// AAD bound to every sealed blob, versioning the seal envelope itself.
const SEAL_CONTEXT: &[u8] = b"strata:seal:v1";

/// Integrity-sealing of byte ranges: compression followed by authenticated
/// encryption, both parameterized by the repository configuration.
///
/// `seal` and `unseal` are exact inverses for a given configuration. Blob
/// MACs are always computed over the sealed bytes.
pub struct Codec {
    compression: CompressionAlgorithm,
    engine: Box<dyn CryptoEngine>,
    hash_key: [u8; 32],
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("compression", &self.compression)
            .field("is_encrypting", &self.engine.is_encrypting())
            .finish_non_exhaustive()
    }
}

impl Codec {
    /// Build the codec for a repository. A passphrase is required exactly
    /// when the configuration enables encryption.
    pub fn from_config(config: &RepositoryConfig, passphrase: Option<&str>) -> Result<Self> {
        let engine: Box<dyn CryptoEngine> = match config.encryption.algorithm {
            EncryptionAlgorithm::None => Box::new(PlaintextEngine),
            algorithm => {
                let passphrase = passphrase.ok_or_else(|| {
                    StrataError::Config("repository is encrypted: passphrase required".into())
                })?;
                let key = derive_key(
                    passphrase,
                    &config.encryption.key_derivation,
                    &config.encryption.salt,
                )?;
                match algorithm {
                    EncryptionAlgorithm::Aes256Gcm => Box::new(Aes256GcmEngine::new(&key)),
                    EncryptionAlgorithm::Chacha20Poly1305 => {
                        Box::new(ChaCha20Poly1305Engine::new(&key))
                    }
                    EncryptionAlgorithm::None => unreachable!(),
                }
            }
        };

        Ok(Self {
            compression: config.compression.algorithm,
            engine,
            hash_key: config.hashing.key,
        })
    }

    /// Seal a byte range: compress, then encrypt. The result is a
    /// self-contained byte string that `unseal` inverts.
    pub fn seal(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = compress::compress(self.compression, data)?;
        self.engine.encrypt(&compressed, SEAL_CONTEXT)
    }

    /// Invert `seal`: decrypt, then decompress. Authentication failures are
    /// fatal to the surrounding operation and never retried.
    pub fn unseal(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = self.engine.decrypt(data, SEAL_CONTEXT)?;
        compress::decompress(&compressed)
    }

    /// Compute the repository MAC of a byte string (sealed blob bytes,
    /// packfile bytes, state bytes).
    pub fn mac_of(&self, data: &[u8]) -> Mac {
        Mac::compute(&self.hash_key, data)
    }

    pub fn is_encrypting(&self) -> bool {
        self.engine.is_encrypting()
    }

    pub fn hash_key(&self) -> &[u8; 32] {
        &self.hash_key
    }
}
