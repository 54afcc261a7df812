use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

use crate::error::CryptoError;

/// 32-byte hash. Equality is bytewise; display is lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// First 8 bytes interpreted little-endian. This is the quorum shuffle
    /// and swarm seed for the block carrying this hash.
    pub fn seed_u64(&self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(b)
    }

    pub fn from_hex(s: &str) -> Result<Hash, CryptoError> {
        let raw = hex::decode(s.trim()).map_err(|_| CryptoError::BadHex(s.to_string()))?;
        if raw.len() != 32 {
            return Err(CryptoError::BadHex(s.to_string()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&raw);
        Ok(Hash(out))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl From<[u8; 32]> for Hash {
    fn from(b: [u8; 32]) -> Self {
        Hash(b)
    }
}

/// Legacy Keccak-256 (not SHA3-256): the chain's canonical hash.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut h = Keccak256::new();
    h.update(data);
    let out = h.finalize();
    let mut a = [0u8; 32];
    a.copy_from_slice(&out);
    Hash(a)
}

/// Keccak the input and reduce the digest mod the ed25519 group order.
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order(keccak256(data).0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_le_prefix() {
        let mut b = [0u8; 32];
        b[0] = 0x01;
        b[1] = 0x02;
        assert_eq!(Hash(b).seed_u64(), 0x0201);
    }

    #[test]
    fn hex_round_trip() {
        let h = keccak256(b"xeq");
        let parsed = Hash::from_hex(&h.to_string()).unwrap();
        assert_eq!(h, parsed);
        assert!(Hash::from_hex("abcd").is_err());
    }
}
