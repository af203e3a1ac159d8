use rand::RngCore;
use serde::{Deserialize, Serialize};

use strata_types::error::{Result, StrataError};
use strata_types::mac::Mac;

/// Current configuration format version.
pub const CONFIG_VERSION: u32 = 1;

/// Default soft packfile size threshold (bytes).
pub const DEFAULT_PACKFILE_SIZE: u32 = 20 * 1024 * 1024;

/// The repository configuration, persisted once at the backend's `config`
/// key when the repository is created. Every writer and reader derives its
/// codec and chunking parameters from this object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub version: u32,
    /// Random identity assigned at creation, also seeds snapshot ids.
    pub repository_id: Mac,
    pub chunking: ChunkingConfig,
    pub hashing: HashingConfig,
    pub compression: CompressionConfig,
    pub encryption: EncryptionConfig,
    /// Soft size threshold: a packfile is flushed once its serialized
    /// size estimate crosses this value.
    pub packfile_size: u32,
}

/// Content-defined chunking parameters, recorded for the scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub algorithm: String,
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            algorithm: "fastcdc".to_string(),
            min_size: 64 * 1024,
            avg_size: 256 * 1024,
            max_size: 1024 * 1024,
        }
    }
}

/// Keyed-hash parameters. The key is generated at creation and shared by
/// every MAC computation against this repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingConfig {
    pub algorithm: String,
    pub key: [u8; 32],
}

impl HashingConfig {
    fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self {
            algorithm: "blake2b-256".to_string(),
            key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    #[default]
    Lz4,
    Zstd,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub algorithm: CompressionAlgorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionAlgorithm {
    #[default]
    None,
    Aes256Gcm,
    Chacha20Poly1305,
}

/// KDF parameters for deriving the encryption key from a passphrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyDerivationConfig {
    pub algorithm: String,
    pub time_cost: u32,
    pub memory_cost: u32,
    pub parallelism: u32,
}

impl Default for KeyDerivationConfig {
    fn default() -> Self {
        Self {
            algorithm: "argon2id".to_string(),
            time_cost: 3,
            memory_cost: 65536, // 64 MiB
            parallelism: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    pub algorithm: EncryptionAlgorithm,
    pub key_derivation: KeyDerivationConfig,
    pub salt: Vec<u8>,
}

impl EncryptionConfig {
    fn generate(algorithm: EncryptionAlgorithm) -> Self {
        let mut salt = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self {
            algorithm,
            key_derivation: KeyDerivationConfig::default(),
            salt,
        }
    }
}

impl RepositoryConfig {
    /// Build a fresh configuration with random repository id, hash key and
    /// KDF salt.
    pub fn new(encryption: EncryptionAlgorithm, compression: CompressionAlgorithm) -> Self {
        Self {
            version: CONFIG_VERSION,
            repository_id: Mac::random(),
            chunking: ChunkingConfig::default(),
            hashing: HashingConfig::generate(),
            compression: CompressionConfig {
                algorithm: compression,
            },
            encryption: EncryptionConfig::generate(encryption),
            packfile_size: DEFAULT_PACKFILE_SIZE,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Decode a configuration object and validate it.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let config: RepositoryConfig = rmp_serde::from_slice(data)
            .map_err(|e| StrataError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(StrataError::Config(format!(
                "unsupported configuration version: {}",
                self.version
            )));
        }
        if self.packfile_size == 0 {
            return Err(StrataError::Config("packfile_size must be non-zero".into()));
        }
        let c = &self.chunking;
        if c.min_size == 0 || c.min_size > c.avg_size || c.avg_size > c.max_size {
            return Err(StrataError::Config(format!(
                "invalid chunking sizes: min={} avg={} max={}",
                c.min_size, c.avg_size, c.max_size
            )));
        }
        if self.hashing.algorithm != "blake2b-256" {
            return Err(StrataError::Config(format!(
                "unsupported hashing algorithm: {}",
                self.hashing.algorithm
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let config = RepositoryConfig::new(EncryptionAlgorithm::None, CompressionAlgorithm::Lz4);
        let bytes = config.serialize().unwrap();
        let decoded = RepositoryConfig::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.repository_id, config.repository_id);
        assert_eq!(decoded.hashing.key, config.hashing.key);
        assert_eq!(decoded.packfile_size, config.packfile_size);
    }

    #[test]
    fn distinct_repositories_get_distinct_identities() {
        let a = RepositoryConfig::new(EncryptionAlgorithm::None, CompressionAlgorithm::None);
        let b = RepositoryConfig::new(EncryptionAlgorithm::None, CompressionAlgorithm::None);
        assert_ne!(a.repository_id, b.repository_id);
        assert_ne!(a.hashing.key, b.hashing.key);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut config =
            RepositoryConfig::new(EncryptionAlgorithm::None, CompressionAlgorithm::None);
        config.version = 99;
        let bytes = rmp_serde::to_vec(&config).unwrap();
        let err = RepositoryConfig::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported configuration version"));
    }

    #[test]
    fn rejects_inverted_chunking_sizes() {
        let mut config =
            RepositoryConfig::new(EncryptionAlgorithm::None, CompressionAlgorithm::None);
        config.chunking.min_size = config.chunking.max_size + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_packfile_size() {
        let mut config =
            RepositoryConfig::new(EncryptionAlgorithm::None, CompressionAlgorithm::None);
        config.packfile_size = 0;
        assert!(config.validate().is_err());
    }
}
