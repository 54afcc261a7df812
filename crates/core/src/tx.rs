use serde::{Deserialize, Serialize};
use xeq_crypto::{keccak256, Hash, KeyImage, PublicKey, RctPayload, Signature};

use crate::config::HF_VERSION_FEE_BURNING;
use crate::tx_extra;
use crate::types::{ForkVersion, Height};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum TxVersion {
    #[default]
    V0,
    V1,
    V2,
    /// Per-output unlock times.
    V3,
    V4,
}

impl TxVersion {
    pub fn max_for_fork(fork_version: ForkVersion) -> TxVersion {
        if fork_version < 5 {
            TxVersion::V2
        } else if fork_version < 9 {
            TxVersion::V3
        } else {
            TxVersion::V4
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TxType {
    #[default]
    Standard,
    Stake,
    Swap,
    Deregister,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxIn {
    /// Coinbase input, committing the block height.
    Gen { height: Height },
    ToKey {
        amount: u64,
        key_offsets: Vec<u64>,
        k_image: KeyImage,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOutTarget {
    ToKey { key: PublicKey },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub amount: u64,
    pub target: TxOutTarget,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Transaction {
    pub version: TxVersion,
    pub tx_type: TxType,
    /// Whole-tx unlock; superseded by `output_unlock_times` from v3 on.
    pub unlock_time: u64,
    pub output_unlock_times: Vec<u64>,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    /// Tag-length encoded sub-fields; the blob is authoritative, parse on use.
    pub extra: Vec<u8>,
    pub rct_signatures: RctPayload,
    pub signatures: Vec<Vec<Signature>>,
}

impl Transaction {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn hash(&self) -> Hash {
        keccak256(&self.to_bytes())
    }

    /// Canonical weight of a serialized transaction.
    pub fn weight(&self) -> u64 {
        self.to_bytes().len() as u64
    }

    pub fn is_transfer(&self) -> bool {
        self.tx_type == TxType::Standard
    }

    pub fn is_deregister(&self) -> bool {
        self.tx_type == TxType::Deregister
    }

    /// Unlock time governing output `i` (per-output from v3).
    pub fn output_unlock_time(&self, i: usize) -> u64 {
        if self.version >= TxVersion::V3 {
            self.output_unlock_times.get(i).copied().unwrap_or(self.unlock_time)
        } else {
            self.unlock_time
        }
    }

    /// Fee credited to the miner. From the fee-burning fork on, the burned
    /// portion recorded in extra no longer reaches the miner.
    pub fn miner_fee(&self, fork_version: ForkVersion) -> Option<u64> {
        if self.version == TxVersion::V0 {
            return None;
        }
        let mut fee = self.rct_signatures.txn_fee;
        if fork_version >= HF_VERSION_FEE_BURNING {
            let burned = tx_extra::get_burned_amount(&self.extra).unwrap_or(0);
            fee = fee.saturating_sub(burned);
        }
        Some(fee)
    }

    /// Total fee committed by the rct payload (miner share plus burn).
    pub fn total_fee(&self) -> u64 {
        self.rct_signatures.txn_fee
    }

    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.vin.iter().filter_map(|i| match i {
            TxIn::ToKey { k_image, .. } => Some(k_image),
            TxIn::Gen { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx_extra::TxExtraField;

    #[test]
    fn miner_fee_subtracts_burn_after_fork() {
        let mut tx = Transaction {
            version: TxVersion::V4,
            ..Default::default()
        };
        tx.rct_signatures.txn_fee = 1_000;
        tx.extra = crate::tx_extra::encode(&[TxExtraField::BurnedAmount(400)]);

        assert_eq!(tx.miner_fee(8), Some(1_000));
        assert_eq!(tx.miner_fee(HF_VERSION_FEE_BURNING), Some(600));
    }

    #[test]
    fn v0_has_no_fee() {
        let tx = Transaction::default();
        assert_eq!(tx.miner_fee(9), None);
    }

    #[test]
    fn per_output_unlock_from_v3() {
        let tx = Transaction {
            version: TxVersion::V3,
            unlock_time: 7,
            output_unlock_times: vec![100, 200],
            ..Default::default()
        };
        assert_eq!(tx.output_unlock_time(0), 100);
        assert_eq!(tx.output_unlock_time(1), 200);

        let tx2 = Transaction {
            version: TxVersion::V2,
            unlock_time: 7,
            output_unlock_times: vec![100],
            ..Default::default()
        };
        assert_eq!(tx2.output_unlock_time(0), 7);
    }
}
