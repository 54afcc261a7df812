//! Tag-length encoded `extra` sub-fields.
//!
//! The raw blob stays authoritative on the transaction; this module parses
//! on demand and re-encodes canonically (fields sorted ascending by tag,
//! stable within a tag). Decoders skip unknown tags so old daemons can relay
//! transactions carrying newer fields.

use serde::{Deserialize, Serialize};
use xeq_crypto::{PublicKey, SecretKey, Signature};

use crate::types::{Address, Height};

pub const TAG_PUB_KEY: u8 = 0x01;
pub const TAG_NONCE: u8 = 0x02;
pub const TAG_ADDITIONAL_PUB_KEYS: u8 = 0x04;
pub const TAG_SERVICE_NODE_REGISTER: u8 = 0x70;
pub const TAG_SERVICE_NODE_DEREGISTER: u8 = 0x71;
pub const TAG_SERVICE_NODE_WINNER: u8 = 0x72;
pub const TAG_SERVICE_NODE_PUBKEY: u8 = 0x73;
pub const TAG_SERVICE_NODE_CONTRIBUTOR: u8 = 0x74;
pub const TAG_TX_SECRET_KEY: u8 = 0x75;
pub const TAG_BURNED_AMOUNT: u8 = 0x76;
pub const TAG_MEMO: u8 = 0x77;

/// Registration authorization signed by the service node key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceNodeRegister {
    pub public_spend_keys: Vec<PublicKey>,
    pub public_view_keys: Vec<PublicKey>,
    pub portions_for_operator: u64,
    pub portions: Vec<u64>,
    pub expiration_timestamp: u64,
    pub service_node_signature: Signature,
}

/// Quorum-voted removal, pointing at a testee of an earlier quorum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceNodeDeregister {
    pub block_height: Height,
    pub service_node_index: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxExtraField {
    PubKey(PublicKey),
    Nonce(Vec<u8>),
    AdditionalPubKeys(Vec<PublicKey>),
    ServiceNodeRegister(ServiceNodeRegister),
    ServiceNodeDeregister(ServiceNodeDeregister),
    ServiceNodeWinner(PublicKey),
    ServiceNodePubkey(PublicKey),
    ServiceNodeContributor(Address),
    TxSecretKey(SecretKey),
    BurnedAmount(u64),
    Memo(Vec<u8>),
}

impl TxExtraField {
    pub fn tag(&self) -> u8 {
        match self {
            TxExtraField::PubKey(_) => TAG_PUB_KEY,
            TxExtraField::Nonce(_) => TAG_NONCE,
            TxExtraField::AdditionalPubKeys(_) => TAG_ADDITIONAL_PUB_KEYS,
            TxExtraField::ServiceNodeRegister(_) => TAG_SERVICE_NODE_REGISTER,
            TxExtraField::ServiceNodeDeregister(_) => TAG_SERVICE_NODE_DEREGISTER,
            TxExtraField::ServiceNodeWinner(_) => TAG_SERVICE_NODE_WINNER,
            TxExtraField::ServiceNodePubkey(_) => TAG_SERVICE_NODE_PUBKEY,
            TxExtraField::ServiceNodeContributor(_) => TAG_SERVICE_NODE_CONTRIBUTOR,
            TxExtraField::TxSecretKey(_) => TAG_TX_SECRET_KEY,
            TxExtraField::BurnedAmount(_) => TAG_BURNED_AMOUNT,
            TxExtraField::Memo(_) => TAG_MEMO,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            TxExtraField::PubKey(k)
            | TxExtraField::ServiceNodeWinner(k)
            | TxExtraField::ServiceNodePubkey(k) => k.0.to_vec(),
            TxExtraField::Nonce(n) | TxExtraField::Memo(n) => n.clone(),
            TxExtraField::AdditionalPubKeys(keys) => {
                bincode::serialize(keys).unwrap_or_default()
            }
            TxExtraField::ServiceNodeRegister(r) => bincode::serialize(r).unwrap_or_default(),
            TxExtraField::ServiceNodeDeregister(d) => bincode::serialize(d).unwrap_or_default(),
            TxExtraField::ServiceNodeContributor(a) => bincode::serialize(a).unwrap_or_default(),
            TxExtraField::TxSecretKey(k) => k.0.to_vec(),
            TxExtraField::BurnedAmount(v) => v.to_le_bytes().to_vec(),
        }
    }

    fn decode(tag: u8, payload: &[u8]) -> Option<TxExtraField> {
        fn key32(payload: &[u8]) -> Option<[u8; 32]> {
            payload.try_into().ok()
        }
        match tag {
            TAG_PUB_KEY => Some(TxExtraField::PubKey(PublicKey(key32(payload)?))),
            TAG_NONCE => Some(TxExtraField::Nonce(payload.to_vec())),
            TAG_ADDITIONAL_PUB_KEYS => {
                bincode::deserialize(payload).ok().map(TxExtraField::AdditionalPubKeys)
            }
            TAG_SERVICE_NODE_REGISTER => {
                bincode::deserialize(payload).ok().map(TxExtraField::ServiceNodeRegister)
            }
            TAG_SERVICE_NODE_DEREGISTER => {
                bincode::deserialize(payload).ok().map(TxExtraField::ServiceNodeDeregister)
            }
            TAG_SERVICE_NODE_WINNER => {
                Some(TxExtraField::ServiceNodeWinner(PublicKey(key32(payload)?)))
            }
            TAG_SERVICE_NODE_PUBKEY => {
                Some(TxExtraField::ServiceNodePubkey(PublicKey(key32(payload)?)))
            }
            TAG_SERVICE_NODE_CONTRIBUTOR => {
                bincode::deserialize(payload).ok().map(TxExtraField::ServiceNodeContributor)
            }
            TAG_TX_SECRET_KEY => Some(TxExtraField::TxSecretKey(SecretKey(key32(payload)?))),
            TAG_BURNED_AMOUNT => {
                let raw: [u8; 8] = payload.try_into().ok()?;
                Some(TxExtraField::BurnedAmount(u64::from_le_bytes(raw)))
            }
            TAG_MEMO => Some(TxExtraField::Memo(payload.to_vec())),
            _ => None,
        }
    }
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

fn read_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *data.get(*pos)?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

/// Canonical encoding: fields sorted ascending by tag (stable), each as
/// `tag || varint(len) || payload`.
pub fn encode(fields: &[TxExtraField]) -> Vec<u8> {
    let mut sorted: Vec<&TxExtraField> = fields.iter().collect();
    sorted.sort_by_key(|f| f.tag());

    let mut out = Vec::new();
    for field in sorted {
        let payload = field.payload();
        out.push(field.tag());
        write_varint(&mut out, payload.len() as u64);
        out.extend_from_slice(&payload);
    }
    out
}

/// Parse every recognizable field, skipping unknown tags. Truncated blobs
/// yield whatever was parsed before the cut.
pub fn parse(extra: &[u8]) -> Vec<TxExtraField> {
    let mut fields = Vec::new();
    let mut pos = 0;
    while pos < extra.len() {
        let tag = extra[pos];
        pos += 1;
        let len = match read_varint(extra, &mut pos) {
            Some(l) => l as usize,
            None => break,
        };
        if pos + len > extra.len() {
            break;
        }
        if let Some(field) = TxExtraField::decode(tag, &extra[pos..pos + len]) {
            fields.push(field);
        }
        pos += len;
    }
    fields
}

/// Append `field` to an existing blob, keeping the result canonical.
pub fn append(extra: &mut Vec<u8>, field: TxExtraField) {
    let mut fields = parse(extra);
    fields.push(field);
    *extra = encode(&fields);
}

// --- typed getters (first matching field wins) ---

pub fn get_tx_pub_key(extra: &[u8]) -> Option<PublicKey> {
    parse(extra).into_iter().find_map(|f| match f {
        TxExtraField::PubKey(k) => Some(k),
        _ => None,
    })
}

pub fn get_service_node_register(extra: &[u8]) -> Option<ServiceNodeRegister> {
    parse(extra).into_iter().find_map(|f| match f {
        TxExtraField::ServiceNodeRegister(r) => Some(r),
        _ => None,
    })
}

pub fn get_service_node_deregister(extra: &[u8]) -> Option<ServiceNodeDeregister> {
    parse(extra).into_iter().find_map(|f| match f {
        TxExtraField::ServiceNodeDeregister(d) => Some(d),
        _ => None,
    })
}

pub fn get_service_node_winner(extra: &[u8]) -> Option<PublicKey> {
    parse(extra).into_iter().find_map(|f| match f {
        TxExtraField::ServiceNodeWinner(k) => Some(k),
        _ => None,
    })
}

pub fn get_service_node_pubkey(extra: &[u8]) -> Option<PublicKey> {
    parse(extra).into_iter().find_map(|f| match f {
        TxExtraField::ServiceNodePubkey(k) => Some(k),
        _ => None,
    })
}

pub fn get_service_node_contributor(extra: &[u8]) -> Option<Address> {
    parse(extra).into_iter().find_map(|f| match f {
        TxExtraField::ServiceNodeContributor(a) => Some(a),
        _ => None,
    })
}

pub fn get_tx_secret_key(extra: &[u8]) -> Option<SecretKey> {
    parse(extra).into_iter().find_map(|f| match f {
        TxExtraField::TxSecretKey(k) => Some(k),
        _ => None,
    })
}

pub fn get_burned_amount(extra: &[u8]) -> Option<u64> {
    parse(extra).into_iter().find_map(|f| match f {
        TxExtraField::BurnedAmount(v) => Some(v),
        _ => None,
    })
}

pub fn get_memo(extra: &[u8]) -> Option<Vec<u8>> {
    parse(extra).into_iter().find_map(|f| match f {
        TxExtraField::Memo(m) => Some(m),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_sorts_by_tag() {
        let winner = PublicKey([7u8; 32]);
        let pubkey = PublicKey([9u8; 32]);
        let blob = encode(&[
            TxExtraField::ServiceNodeWinner(winner),
            TxExtraField::PubKey(pubkey),
        ]);
        // pub key tag (0x01) must precede winner tag (0x72)
        assert_eq!(blob[0], TAG_PUB_KEY);
        assert_eq!(get_tx_pub_key(&blob), Some(pubkey));
        assert_eq!(get_service_node_winner(&blob), Some(winner));
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let mut blob = encode(&[TxExtraField::BurnedAmount(42)]);
        // splice an unknown tag in front
        let mut unknown = vec![0x5a, 0x03, 1, 2, 3];
        unknown.extend_from_slice(&blob);
        blob = unknown;
        assert_eq!(get_burned_amount(&blob), Some(42));
    }

    #[test]
    fn truncated_blob_parses_prefix() {
        let mut blob = encode(&[TxExtraField::BurnedAmount(42), TxExtraField::Memo(vec![1; 16])]);
        blob.truncate(blob.len() - 4);
        assert_eq!(get_burned_amount(&blob), Some(42));
        assert_eq!(get_memo(&blob), None);
    }

    #[test]
    fn duplicate_tags_first_wins() {
        let a = PublicKey([1u8; 32]);
        let b = PublicKey([2u8; 32]);
        let blob = encode(&[TxExtraField::PubKey(a), TxExtraField::PubKey(b)]);
        assert_eq!(get_tx_pub_key(&blob), Some(a));
    }

    #[test]
    fn register_round_trip() {
        let reg = ServiceNodeRegister {
            public_spend_keys: vec![PublicKey([3u8; 32])],
            public_view_keys: vec![PublicKey([4u8; 32])],
            portions_for_operator: 10,
            portions: vec![10],
            expiration_timestamp: 1_700_000_000,
            service_node_signature: Signature::default(),
        };
        let blob = encode(&[TxExtraField::ServiceNodeRegister(reg.clone())]);
        assert_eq!(get_service_node_register(&blob), Some(reg));
    }
}
