use blake2::digest::consts::U32;
use blake2::digest::Mac as _;
use blake2::Blake2bMac;
use rand::RngCore;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

type KeyedBlake2b256 = Blake2bMac<U32>;

/// A 32-byte blob fingerprint computed as keyed BLAKE2b-256.
///
/// The same value serves as the blob's identity inside the repository
/// state and as its address on the storage backend.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mac(pub [u8; 32]);

// Serialized as a raw 32-byte string (msgpack bin), not a 32-element
// sequence: fingerprints dominate the persisted index, so the compact
// form matters.
impl Serialize for Mac {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

struct MacVisitor;

impl<'de> Visitor<'de> for MacVisitor {
    type Value = Mac;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("32 bytes")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Mac, E> {
        let arr: [u8; 32] = v
            .try_into()
            .map_err(|_| E::invalid_length(v.len(), &self))?;
        Ok(Mac(arr))
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Mac, A::Error> {
        let mut arr = [0u8; 32];
        for (i, slot) in arr.iter_mut().enumerate() {
            *slot = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }
        Ok(Mac(arr))
    }
}

impl<'de> Deserialize<'de> for Mac {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_bytes(MacVisitor)
    }
}

impl Mac {
    /// Compute a MAC using keyed BLAKE2b-256 (BLAKE2b-MAC with 32-byte output).
    pub fn compute(key: &[u8; 32], data: &[u8]) -> Self {
        let mut hasher =
            KeyedBlake2b256::new_from_slice(key).expect("valid 32-byte key for BLAKE2b");
        hasher.update(data);
        let result = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&result.into_bytes());
        Mac(out)
    }

    /// Generate a random MAC-shaped value (lock keys, id seeds).
    pub fn random() -> Self {
        let mut buf = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut buf);
        Mac(buf)
    }

    /// Hex-encode the full MAC for use as a storage key (lowercase, 64 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a MAC from a 64-character hex string.
    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
        if bytes.len() != 32 {
            return Err(format!("expected 32 bytes, got {}", bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Mac(arr))
    }

    /// First byte as a two-char hex string, used for shard directories.
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mac({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        [0xAA; 32]
    }

    #[test]
    fn compute_deterministic() {
        let key = test_key();
        let data = b"hello world";
        let m1 = Mac::compute(&key, data);
        let m2 = Mac::compute(&key, data);
        assert_eq!(m1, m2);
    }

    #[test]
    fn compute_different_data_different_mac() {
        let key = test_key();
        assert_ne!(Mac::compute(&key, b"hello"), Mac::compute(&key, b"world"));
    }

    #[test]
    fn compute_different_key_different_mac() {
        let data = b"same data";
        assert_ne!(Mac::compute(&[0xAA; 32], data), Mac::compute(&[0xBB; 32], data));
    }

    #[test]
    fn hex_roundtrip() {
        let m = Mac::compute(&test_key(), b"roundtrip");
        let hex = m.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Mac::from_hex(&hex).unwrap(), m);
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(Mac::from_hex("xyz").is_err());
        assert!(Mac::from_hex("ab").is_err());
    }

    #[test]
    fn shard_prefix_is_first_byte() {
        let m = Mac([0xAB; 32]);
        assert_eq!(m.shard_prefix(), "ab");
    }

    #[test]
    fn empty_data_produces_valid_mac() {
        let m = Mac::compute(&test_key(), b"");
        assert_ne!(m.0, [0u8; 32]);
    }

    #[test]
    fn serde_roundtrip() {
        let m = Mac::compute(&test_key(), b"serde");
        let serialized = rmp_serde::to_vec(&m).unwrap();
        let deserialized: Mac = rmp_serde::from_slice(&serialized).unwrap();
        assert_eq!(m, deserialized);
    }

    #[test]
    fn serializes_as_compact_bytes() {
        let m = Mac([0x5A; 32]);
        let serialized = rmp_serde::to_vec(&m).unwrap();
        // msgpack bin8: marker + length + 32 payload bytes.
        assert_eq!(serialized.len(), 34);
    }
}
