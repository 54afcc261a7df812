//! Curve25519 / Keccak primitive surface consumed by the consensus core.
//!
//! Everything here is deliberately small: fixed-size key and hash newtypes,
//! the handful of derivation operations the coinbase and staking paths need,
//! and the confidential-amount codec. Ring signatures, bulletproofs and the
//! PoW hash live outside this workspace.

pub mod error;
pub mod hash;
pub mod keys;
pub mod rct;

pub use error::CryptoError;
pub use hash::{hash_to_scalar, keccak256, Hash};
pub use keys::{
    check_key, check_signature, derivation_to_scalar, derive_public_key, generate_key_derivation,
    generate_keys, generate_signature, random_keypair, KeyDerivation, KeyImage, Keypair, PublicKey,
    SecretKey, Signature,
};
pub use rct::{decode_rct_amount, encode_rct_amount, EncryptedAmount, RctPayload, RctType};
