//! Interfaces the core consumes from its collaborators: the blockchain it
//! sits next to and the key-value store that persists registry and pool
//! state. Verification contexts mirror what transport layers need to decide
//! whether a peer misbehaved.

use serde::{Deserialize, Serialize};
use xeq_crypto::Hash;

use crate::config::Network;
use crate::tx::Transaction;
use crate::types::{Block, ForkVersion, Height};

/// Relay state of a pool transaction. The variants form an upgrade lattice:
/// `None < Local < Stem < Fluff < Block`; a tx only ever moves up.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RelayMethod {
    #[default]
    None,
    /// Hidden origin (i2p/tor); treated as another stem hop for loops.
    Local,
    /// Dandelion++ stem phase, embargoed.
    Stem,
    /// Broadcast phase.
    Fluff,
    /// Arrived inside a (popped) block.
    Block,
}

impl RelayMethod {
    /// Move up the lattice; returns true when the method changed.
    pub fn upgrade(&mut self, other: RelayMethod) -> bool {
        if other > *self {
            *self = other;
            true
        } else {
            false
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteVerificationContext {
    pub verification_failed: bool,
    pub invalid_block_height: bool,
    pub duplicate_voters: bool,
    pub voters_quorum_index_out_of_bounds: bool,
    pub service_node_index_out_of_bounds: bool,
    pub signature_not_valid: bool,
    pub added_to_pool: bool,
    pub full_tx_deregister_made: bool,
    pub not_enough_votes: bool,
}

/// Informational outcome of a pool admission; transport decides whether to
/// drop the peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxVerificationContext {
    /// How the tx should be relayed, if at all.
    pub relay: RelayMethod,
    pub verification_failed: bool,
    /// The tx belongs to an alternative chain; inputs could not be checked.
    pub verification_impossible: bool,
    pub added_to_pool: bool,
    pub low_mixin: bool,
    pub double_spend: bool,
    pub invalid_input: bool,
    pub invalid_output: bool,
    pub too_big: bool,
    pub overspend: bool,
    pub fee_too_low: bool,
    pub too_few_outputs: bool,
    pub invalid_version: bool,
    pub invalid_type: bool,
    pub vote_ctx: VoteVerificationContext,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVerificationContext {
    pub added_to_main_chain: bool,
    pub verification_failed: bool,
    pub marked_as_orphaned: bool,
    pub already_exists: bool,
    pub partial_block_reward: bool,
    pub bad_pow: bool,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain access failed: {0}")]
    Access(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("kv store failure: {0}")]
    Failure(String),
}

/// Chain state and validation the core relies on but does not own.
pub trait Blockchain: Send + Sync {
    fn nettype(&self) -> Network;
    fn get_hard_fork_version(&self, height: Height) -> ForkVersion;
    fn get_current_hard_fork_version(&self) -> ForkVersion;
    fn get_current_blockchain_height(&self) -> Height;
    /// Zero hash when the height is unknown.
    fn get_block_id_by_height(&self, height: Height) -> Hash;
    fn get_blocks(&self, start_height: Height, count: u64) -> Result<Vec<Block>, ChainError>;
    /// Returns `(found, missed)`.
    fn get_transactions(&self, hashes: &[Hash]) -> (Vec<Transaction>, Vec<Hash>);
    fn check_fee(&self, tx_weight: u64, fee: u64) -> bool;
    fn check_tx_outputs(&self, tx: &Transaction, tvc: &mut TxVerificationContext) -> bool;
    /// Returns `(ok, max_used_block_height, max_used_block_id)`.
    fn check_tx_inputs(
        &self,
        tx: &Transaction,
        tvc: &mut TxVerificationContext,
        kept_by_block: bool,
    ) -> (bool, Height, Hash);
    fn have_tx(&self, id: &Hash) -> bool;
    fn have_tx_keyimges_as_spent(&self, tx: &Transaction) -> bool;
}

/// Persisted metadata of one pool transaction, stored next to its blob.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPoolMeta {
    pub weight: u64,
    pub fee: u64,
    pub max_used_block_id: Hash,
    pub max_used_block_height: Height,
    pub last_failed_id: Hash,
    pub last_failed_height: Height,
    pub receive_time: u64,
    pub last_relayed_time: u64,
    pub relayed: bool,
    pub do_not_relay: bool,
    pub double_spend_seen: bool,
    pub pruned: bool,
    pub kept_by_block: bool,
    pub is_deregister: bool,
    pub relay_method: RelayMethod,
}

impl TxPoolMeta {
    pub fn dandelionpp_stem(&self) -> bool {
        self.relay_method == RelayMethod::Stem
    }

    /// Matches the broadcast-visible ("legacy") relay categories.
    pub fn matches_legacy(&self) -> bool {
        matches!(self.relay_method, RelayMethod::Fluff | RelayMethod::Block)
    }
}

/// Write-transaction guard; dropping without `commit` aborts the scope.
pub trait DbWriteTxn {
    fn commit(self: Box<Self>) -> Result<(), DbError>;
}

/// The daemon's database, as seen by the core: an opaque registry blob plus
/// a tx-pool table keyed by hash.
pub trait NodeDb: Send + Sync {
    fn begin_write<'a>(&'a self) -> Result<Box<dyn DbWriteTxn + 'a>, DbError>;

    fn set_service_node_data(&self, blob: &[u8]) -> Result<(), DbError>;
    fn get_service_node_data(&self) -> Result<Option<Vec<u8>>, DbError>;
    fn clear_service_node_data(&self) -> Result<(), DbError>;

    fn add_txpool_tx(&self, id: &Hash, blob: &[u8], meta: &TxPoolMeta) -> Result<(), DbError>;
    fn update_txpool_tx(&self, id: &Hash, meta: &TxPoolMeta) -> Result<(), DbError>;
    fn remove_txpool_tx(&self, id: &Hash) -> Result<(), DbError>;
    fn get_txpool_tx_meta(&self, id: &Hash) -> Result<Option<TxPoolMeta>, DbError>;
    fn get_txpool_tx_blob(&self, id: &Hash) -> Result<Option<Vec<u8>>, DbError>;
    fn txpool_has_tx(&self, id: &Hash) -> bool;
    fn txpool_tx_count(&self) -> usize;
    /// Iterate pool entries; the callback returns false to stop early.
    fn for_all_txpool_txes(
        &self,
        include_blob: bool,
        f: &mut dyn FnMut(&Hash, &TxPoolMeta, Option<&[u8]>) -> bool,
    ) -> Result<(), DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_lattice_only_upgrades() {
        let mut m = RelayMethod::None;
        assert!(m.upgrade(RelayMethod::Local));
        assert!(m.upgrade(RelayMethod::Stem));
        assert!(!m.upgrade(RelayMethod::Local));
        assert!(m.upgrade(RelayMethod::Block));
        assert!(!m.upgrade(RelayMethod::Fluff));
        assert_eq!(m, RelayMethod::Block);
    }
}
