//! Confidential-amount payload carried by v2+ transactions.
//!
//! The full RingCT machinery (commitments, range proofs, MLSAGs) is an
//! external collaborator; the consensus core only needs the transaction fee
//! and the ability to open per-output amounts under a key derivation, which
//! is what this module provides.

use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};

use crate::hash::keccak256;
use crate::keys::{derivation_to_scalar, KeyDerivation};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RctType {
    #[default]
    Null,
    Full,
    Simple,
    Bulletproof,
    Bulletproof2,
}

impl RctType {
    /// Types whose outputs carry a decodable masked amount.
    pub fn amount_decodable(&self) -> bool {
        !matches!(self, RctType::Null)
    }
}

/// 8-byte masked amount, one per output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EncryptedAmount(pub [u8; 8]);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RctPayload {
    pub rct_type: RctType,
    pub txn_fee: u64,
    pub ecdh_amounts: Vec<EncryptedAmount>,
}

fn amount_mask(shared: &Scalar) -> [u8; 8] {
    let mut buf = Vec::with_capacity(6 + 32);
    buf.extend_from_slice(b"amount");
    buf.extend_from_slice(&shared.to_bytes());
    let h = keccak256(&buf);
    let mut m = [0u8; 8];
    m.copy_from_slice(&h.0[..8]);
    m
}

pub fn encode_rct_amount(amount: u64, shared: &Scalar) -> EncryptedAmount {
    let mask = amount_mask(shared);
    let mut out = amount.to_le_bytes();
    for (o, m) in out.iter_mut().zip(mask.iter()) {
        *o ^= m;
    }
    EncryptedAmount(out)
}

fn decode_with_scalar(enc: &EncryptedAmount, shared: &Scalar) -> u64 {
    let mask = amount_mask(shared);
    let mut out = enc.0;
    for (o, m) in out.iter_mut().zip(mask.iter()) {
        *o ^= m;
    }
    u64::from_le_bytes(out)
}

/// Open output `index` of `payload` under `derivation`. `None` when the
/// rct type carries no amounts or the index is out of range.
pub fn decode_rct_amount(
    payload: &RctPayload,
    index: usize,
    derivation: &KeyDerivation,
) -> Option<u64> {
    if !payload.rct_type.amount_decodable() {
        return None;
    }
    let enc = payload.ecdh_amounts.get(index)?;
    let shared = derivation_to_scalar(derivation, index as u64);
    Some(decode_with_scalar(enc, &shared))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_key_derivation, random_keypair};

    #[test]
    fn amount_round_trip() {
        let wallet = random_keypair();
        let tx_key = random_keypair();
        let derivation = generate_key_derivation(&wallet.public, &tx_key.secret).unwrap();

        let amounts = [0u64, 1, 10_000, u64::MAX];
        let payload = RctPayload {
            rct_type: RctType::Bulletproof2,
            txn_fee: 20,
            ecdh_amounts: amounts
                .iter()
                .enumerate()
                .map(|(i, a)| encode_rct_amount(*a, &derivation_to_scalar(&derivation, i as u64)))
                .collect(),
        };

        for (i, a) in amounts.iter().enumerate() {
            assert_eq!(decode_rct_amount(&payload, i, &derivation), Some(*a));
        }
        assert_eq!(decode_rct_amount(&payload, amounts.len(), &derivation), None);
    }

    #[test]
    fn null_type_has_no_amounts() {
        let payload = RctPayload::default();
        let wallet = random_keypair();
        let tx_key = random_keypair();
        let derivation = generate_key_derivation(&wallet.public, &tx_key.secret).unwrap();
        assert_eq!(decode_rct_amount(&payload, 0, &derivation), None);
    }
}
