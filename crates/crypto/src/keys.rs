use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::hash::{hash_to_scalar, Hash};

/// Compressed ed25519 point. Equality is bytewise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct PublicKey(pub [u8; 32]);

/// Scalar (kept reduced at construction sites). Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey(pub [u8; 32]);

/// Shared-secret point `8·r·A`, input to per-output scalar derivation.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KeyDerivation(pub [u8; 32]);

/// Global double-spend identifier. The core only compares these bytewise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct KeyImage(pub [u8; 32]);

/// Schnorr signature `(c, r)` over the prefix hash.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Signature {
    pub c: [u8; 32],
    pub r: [u8; 32],
}

#[derive(Clone)]
pub struct Keypair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl PublicKey {
    pub const NULL: PublicKey = PublicKey([0u8; 32]);

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn decompress(&self) -> Option<EdwardsPoint> {
        CompressedEdwardsY(self.0).decompress()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl fmt::Debug for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyImage({})", hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(c: {}, r: {})", hex::encode(self.c), hex::encode(self.r))
    }
}

fn scalar_of(sec: &SecretKey) -> Scalar {
    Scalar::from_bytes_mod_order(sec.0)
}

/// Derive a keypair from 32 seed bytes: reduce mod l, multiply the basepoint.
/// This is the `generate_keys(pub, sec, recovery, true)` path the coinbase
/// key schedule relies on, so the reduction must happen here and nowhere else.
pub fn generate_keys(seed: &[u8; 32]) -> Keypair {
    let sec = Scalar::from_bytes_mod_order(*seed);
    let public = EdwardsPoint::mul_base(&sec).compress().to_bytes();
    Keypair {
        public: PublicKey(public),
        secret: SecretKey(sec.to_bytes()),
    }
}

/// Fresh keypair from the OS RNG (per-block tx keys).
pub fn random_keypair() -> Keypair {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    let kp = generate_keys(&seed);
    seed.zeroize();
    kp
}

/// True iff the bytes decompress to a valid curve point.
pub fn check_key(key: &PublicKey) -> bool {
    key.decompress().is_some()
}

/// `D = 8 · r · A`. Fails if `A` is not a valid point.
pub fn generate_key_derivation(
    public: &PublicKey,
    secret: &SecretKey,
) -> Result<KeyDerivation, CryptoError> {
    let point = public.decompress().ok_or(CryptoError::InvalidPoint)?;
    let shared = (point * scalar_of(secret)).mul_by_cofactor();
    Ok(KeyDerivation(shared.compress().to_bytes()))
}

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if v == 0 {
            break;
        }
    }
}

/// `Hs(D || varint(index))`, the per-output scalar.
pub fn derivation_to_scalar(derivation: &KeyDerivation, output_index: u64) -> Scalar {
    let mut buf = Vec::with_capacity(32 + 9);
    buf.extend_from_slice(&derivation.0);
    write_varint(&mut buf, output_index);
    hash_to_scalar(&buf)
}

/// One-time output key `P = Hs(D || i)·G + B`.
pub fn derive_public_key(
    derivation: &KeyDerivation,
    output_index: u64,
    base: &PublicKey,
) -> Result<PublicKey, CryptoError> {
    let base_point = base.decompress().ok_or(CryptoError::InvalidPoint)?;
    let scalar = derivation_to_scalar(derivation, output_index);
    let out = EdwardsPoint::mul_base(&scalar) + base_point;
    Ok(PublicKey(out.compress().to_bytes()))
}

fn sig_challenge(prefix_hash: &Hash, key: &PublicKey, comm: &[u8; 32]) -> Scalar {
    let mut buf = Vec::with_capacity(96);
    buf.extend_from_slice(&prefix_hash.0);
    buf.extend_from_slice(&key.0);
    buf.extend_from_slice(comm);
    hash_to_scalar(&buf)
}

/// Schnorr sign `prefix_hash` under `sec` (whose public key is `key`).
pub fn generate_signature(prefix_hash: &Hash, key: &PublicKey, sec: &SecretKey) -> Signature {
    let mut k_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut k_bytes);
    let k = Scalar::from_bytes_mod_order(k_bytes);
    k_bytes.zeroize();

    let comm = EdwardsPoint::mul_base(&k).compress().to_bytes();
    let c = sig_challenge(prefix_hash, key, &comm);
    let r = k - c * scalar_of(sec);
    Signature {
        c: c.to_bytes(),
        r: r.to_bytes(),
    }
}

/// Verify a Schnorr signature; bad points or non-canonical scalars fail.
pub fn check_signature(prefix_hash: &Hash, key: &PublicKey, sig: &Signature) -> bool {
    let point = match key.decompress() {
        Some(p) => p,
        None => return false,
    };
    let c = match Option::<Scalar>::from(Scalar::from_canonical_bytes(sig.c)) {
        Some(s) => s,
        None => return false,
    };
    let r = match Option::<Scalar>::from(Scalar::from_canonical_bytes(sig.r)) {
        Some(s) => s,
        None => return false,
    };
    let comm = (EdwardsPoint::mul_base(&r) + point * c).compress().to_bytes();
    sig_challenge(prefix_hash, key, &comm) == c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::keccak256;

    #[test]
    fn sign_verify_round_trip() {
        let kp = random_keypair();
        let h = keccak256(b"registration payload");
        let sig = generate_signature(&h, &kp.public, &kp.secret);
        assert!(check_signature(&h, &kp.public, &sig));

        let other = keccak256(b"something else");
        assert!(!check_signature(&other, &kp.public, &sig));
    }

    #[test]
    fn derivation_is_symmetric() {
        // r·A·8 == a·R·8 for A = a·G, R = r·G.
        let a = random_keypair();
        let r = random_keypair();
        let d1 = generate_key_derivation(&a.public, &r.secret).unwrap();
        let d2 = generate_key_derivation(&r.public, &a.secret).unwrap();
        assert_eq!(d1.0, d2.0);
    }

    #[test]
    fn derived_keys_differ_by_index() {
        let a = random_keypair();
        let r = random_keypair();
        let d = generate_key_derivation(&a.public, &r.secret).unwrap();
        let k0 = derive_public_key(&d, 0, &a.public).unwrap();
        let k1 = derive_public_key(&d, 1, &a.public).unwrap();
        assert_ne!(k0, k1);
    }
}
