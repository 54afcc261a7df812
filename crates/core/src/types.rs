use serde::{Deserialize, Serialize};
use xeq_crypto::{keccak256, Hash, PublicKey};

use crate::tx::{Transaction, TxIn};

/// Block index; 0 is genesis.
pub type Height = u64;

/// Monotonically non-decreasing consensus epoch selector.
pub type ForkVersion = u8;

/// Public half of an account: spend and view keys. Equality is structural.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Address {
    pub spend_public_key: PublicKey,
    pub view_public_key: PublicKey,
    pub is_subaddress: bool,
}

impl Address {
    pub const NULL: Address = Address {
        spend_public_key: PublicKey::NULL,
        view_public_key: PublicKey::NULL,
        is_subaddress: false,
    };

    pub fn is_null(&self) -> bool {
        self.spend_public_key.is_null() && self.view_public_key.is_null()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Block {
    pub major_version: u8,
    pub minor_version: u8,
    pub prev_id: Hash,
    pub timestamp: u64,
    pub nonce: u32,
    pub miner_tx: Transaction,
    pub tx_hashes: Vec<Hash>,
}

impl Block {
    /// Height committed by the coinbase's generated input.
    pub fn height(&self) -> Height {
        match self.miner_tx.vin.first() {
            Some(TxIn::Gen { height }) => *height,
            _ => 0,
        }
    }

    /// Block id. PoW hashing is external; this is the identity hash used to
    /// key checkpoints and quorum seeds.
    pub fn hash(&self) -> Hash {
        let blob = bincode::serialize(self).unwrap_or_default();
        keccak256(&blob)
    }
}
