use argon2::Argon2;
use zeroize::Zeroizing;

use strata_types::error::{Result, StrataError};

use crate::config::KeyDerivationConfig;

// KDF parameter bounds to reject maliciously crafted configurations.
const MAX_TIME_COST: u32 = 10;
const MAX_PARALLELISM: u32 = 16;
const MAX_MEMORY_KIB: u32 = 524_288; // 512 MiB
const MIN_SALT_LEN: usize = 16;
const MAX_SALT_LEN: usize = 64;

/// Validate KDF parameters are within safe bounds.
pub fn validate_kdf(kdf: &KeyDerivationConfig, salt: &[u8]) -> Result<()> {
    if kdf.algorithm != "argon2id" {
        return Err(StrataError::KeyDerivation(format!(
            "unsupported KDF algorithm: {}",
            kdf.algorithm
        )));
    }
    if kdf.time_cost == 0 || kdf.time_cost > MAX_TIME_COST {
        return Err(StrataError::KeyDerivation(format!(
            "time_cost out of bounds: {}",
            kdf.time_cost
        )));
    }
    if kdf.parallelism == 0 || kdf.parallelism > MAX_PARALLELISM {
        return Err(StrataError::KeyDerivation(format!(
            "parallelism out of bounds: {}",
            kdf.parallelism
        )));
    }
    if kdf.memory_cost == 0 || kdf.memory_cost > MAX_MEMORY_KIB {
        return Err(StrataError::KeyDerivation(format!(
            "memory_cost out of bounds: {}",
            kdf.memory_cost
        )));
    }
    if salt.len() < MIN_SALT_LEN || salt.len() > MAX_SALT_LEN {
        return Err(StrataError::KeyDerivation(format!(
            "salt length out of bounds: {}",
            salt.len()
        )));
    }
    Ok(())
}

/// Derive a 32-byte encryption key from a passphrase using Argon2id.
pub fn derive_key(
    passphrase: &str,
    kdf: &KeyDerivationConfig,
    salt: &[u8],
) -> Result<Zeroizing<[u8; 32]>> {
    validate_kdf(kdf, salt)?;

    let params = argon2::Params::new(kdf.memory_cost, kdf.time_cost, kdf.parallelism, Some(32))
        .map_err(|e| StrataError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, output.as_mut())
        .map_err(|e| StrataError::KeyDerivation(format!("argon2 hash: {e}")))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_kdf() -> KeyDerivationConfig {
        KeyDerivationConfig {
            algorithm: "argon2id".to_string(),
            time_cost: 1,
            memory_cost: 8192,
            parallelism: 1,
        }
    }

    #[test]
    fn derive_is_deterministic() {
        let kdf = test_kdf();
        let salt = [0x42u8; 32];
        let a = derive_key("passphrase", &kdf, &salt).unwrap();
        let b = derive_key("passphrase", &kdf, &salt).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn derive_depends_on_passphrase_and_salt() {
        let kdf = test_kdf();
        let salt = [0x42u8; 32];
        let a = derive_key("passphrase", &kdf, &salt).unwrap();
        let b = derive_key("other", &kdf, &salt).unwrap();
        let c = derive_key("passphrase", &kdf, &[0x43u8; 32]).unwrap();
        assert_ne!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn rejects_bad_algorithm() {
        let mut kdf = test_kdf();
        kdf.algorithm = "scrypt".to_string();
        assert!(derive_key("x", &kdf, &[0u8; 32]).is_err());
    }

    #[test]
    fn rejects_excessive_memory() {
        let mut kdf = test_kdf();
        kdf.memory_cost = u32::MAX;
        assert!(derive_key("x", &kdf, &[0u8; 32]).is_err());
    }

    #[test]
    fn rejects_short_salt() {
        let kdf = test_kdf();
        assert!(derive_key("x", &kdf, &[0u8; 8]).is_err());
    }

    #[test]
    fn memory_limit_boundary() {
        let mut kdf = test_kdf();
        kdf.memory_cost = MAX_MEMORY_KIB;
        assert!(validate_kdf(&kdf, &[0u8; 32]).is_ok());
        kdf.memory_cost = MAX_MEMORY_KIB + 1;
        assert!(validate_kdf(&kdf, &[0u8; 32]).is_err());
    }
}
