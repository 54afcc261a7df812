use serde::{Deserialize, Serialize};

use crate::service_nodes::rules::{get_min_node_contribution, SwarmId};
use crate::types::{Address, ForkVersion, Height};

/// One funding row of a service node, insertion-ordered by first
/// contribution and unique by address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub amount: u64,
    pub reserved: u64,
    pub address: Address,
}

impl Contribution {
    pub fn new(reserved: u64, address: Address) -> Self {
        Contribution {
            amount: 0,
            reserved,
            address,
        }
    }
}

/// Registry entry for one staked node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceNodeInfo {
    pub registration_height: Height,
    /// When the node last received a reward; together these form the
    /// waiting-since key that drives winner selection.
    pub last_reward_block_height: Height,
    pub last_reward_transaction_index: u32,
    pub contributors: Vec<Contribution>,
    pub total_contributed: u64,
    pub total_reserved: u64,
    pub staking_requirement: u64,
    pub portions_for_operator: u64,
    pub swarm_id: SwarmId,
    pub operator_address: Address,
}

impl ServiceNodeInfo {
    pub fn is_valid(&self) -> bool {
        self.total_contributed >= self.total_reserved
    }

    pub fn is_fully_funded(&self) -> bool {
        self.total_contributed >= self.staking_requirement
    }

    pub fn min_contribution(&self, fork_version: ForkVersion) -> u64 {
        get_min_node_contribution(fork_version, self.staking_requirement, self.total_reserved)
    }
}

/// Registry entry paired with its key, as returned to RPC-facing queries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNodePubkeyInfo {
    pub pubkey: xeq_crypto::PublicKey,
    pub info: ServiceNodeInfo,
}
