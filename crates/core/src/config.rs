//! Chain constants and per-network configuration.
//!
//! Every value in this file is consensus-critical: a single changed digit
//! forks the chain. Values are carried in atomic units (1 XEQ = `COIN`).

use crate::types::{Address, ForkVersion, Height};
use serde::{Deserialize, Serialize};

pub const CRYPTONOTE_MAX_BLOCK_NUMBER: u64 = 500_000_000;
pub const CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW: u64 = 60;
pub const CRYPTONOTE_COINBASE_BLOB_RESERVED_SIZE: u64 = 600;

pub const CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE_V1: u64 = 90_000;
pub const CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE_V2: u64 = 80_000;
pub const CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE_V5: u64 = 1_000_000;

/// Number of atomic units in one coin.
pub const COIN: u64 = 10_000;

pub const MONEY_SUPPLY: u64 = 840_000_000_000;
pub const EMISSION_SPEED_FACTOR_PER_MINUTE: u64 = 20;
pub const FINAL_SUBSIDY_PER_MINUTE: u64 = 0;
pub const BASE_REWARD_CLAMP_THRESHOLD: u64 = 10_000;

pub const DIFFICULTY_TARGET_V1: u64 = 60;
pub const DIFFICULTY_TARGET_V2: u64 = 180;
pub const DIFFICULTY_TARGET_V3: u64 = 120;

// One-off mints and burns referenced by the governance schedule.
pub const TRITON_SWAP: u64 = 107_695_988_100;
pub const BURN_1: u64 = 70_000_000_000;
pub const MINT_BRIDGE: u64 = 167_195_840_000;
pub const BURN_2: u64 = 40_000_000_000;
pub const CORP_MINT: u64 = 80_000_000_000;
pub const NEW_XEQ_BRIDGE: u64 = 20_000_000_000;

// Service node staking.
pub const SERVICE_NODE_VERSION: ForkVersion = 5;
pub const STAKING_PORTIONS: u64 = 0xffff_ffff_ffff_fffc;
pub const STAKING_REQUIREMENT_LOCK_BLOCKS: u64 = 20_160;
pub const STAKING_REQUIREMENT_LOCK_BLOCKS_TESTNET: u64 = 1_440;
pub const STAKING_REQUIREMENT_LOCK_BLOCKS_FAKECHAIN: u64 = 30;
pub const STAKING_REQUIREMENT_LOCK_BLOCKS_EXCESS: u64 = 20;
pub const STAKING_AUTHORIZATION_EXPIRATION_WINDOW: u64 = 60 * 60 * 24 * 7 * 2;

pub const MAX_NUMBER_OF_CONTRIBUTORS: u64 = 4;
pub const MAX_NUMBER_OF_CONTRIBUTORS_V2: u64 = 100;
pub const MAX_NUMBER_OF_CONTRIBUTORS_V3: u64 = 1_000;

pub const MIN_PORTIONS: u64 = STAKING_PORTIONS / MAX_NUMBER_OF_CONTRIBUTORS;

// v12 pool-staking bounds, in whole coins (multiplied by COIN at use sites).
pub const MAX_OPERATOR_V12: u64 = 35_000;
pub const MIN_OPERATOR_V12: u64 = 10_000;
pub const MAX_POOL_STAKERS_V12: u64 = 65_000;
pub const MIN_POOL_STAKERS_V12: u64 = 100;

// Mempool.
pub const CRYPTONOTE_MEMPOOL_TX_LIVETIME: u64 = 86_400 * 3;
pub const CRYPTONOTE_MEMPOOL_TX_FROM_ALT_BLOCK_LIVETIME: u64 = 604_800;
pub const MEMPOOL_PRUNE_DEREGISTER_LIFETIME: u64 = 24 * 60 * 60;
pub const DEFAULT_TXPOOL_MAX_WEIGHT: u64 = 648_000_000;

pub const HF_VERSION_PER_BYTE_FEE: ForkVersion = 100;
pub const HF_VERSION_FEE_BURNING: ForkVersion = 9;

pub const CRYPTONOTE_DANDELIONPP_EMBARGO_AVERAGE: u64 = 173;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
    Stagenet,
    Fakechain,
}

impl Network {
    pub fn staking_lock_blocks(&self) -> u64 {
        match self {
            Network::Testnet => STAKING_REQUIREMENT_LOCK_BLOCKS_TESTNET,
            Network::Fakechain => STAKING_REQUIREMENT_LOCK_BLOCKS_FAKECHAIN,
            _ => STAKING_REQUIREMENT_LOCK_BLOCKS,
        }
    }

    /// Height the governance/dev-fund schedules are anchored to.
    pub fn governance_fork_height(&self) -> Height {
        match self {
            Network::Mainnet | Network::Fakechain => 352_846,
            Network::Testnet => 250,
            Network::Stagenet => 12_000,
        }
    }
}

/// `(version, activation height)`, ascending. Vote thresholds and times are
/// the concern of the hard-fork voting machinery, not the core.
pub const MAINNET_HARD_FORKS: &[(ForkVersion, Height)] = &[
    (1, 1),
    (2, 8),
    (3, 100),
    (4, 45_000),
    (5, 106_950),
    (6, 181_056),
    (7, 352_846),
    (8, 426_143),
    (9, 500_000),
    (10, 548_732),
    (11, 663_269),
    (12, 841_197),
    (13, 898_176),
    (14, 936_500),
    (15, 991_430),
    (16, 1_001_320),
    (17, 1_056_414),
    (18, 1_238_350),
    (19, 1_248_886),
];

pub const TESTNET_HARD_FORKS: &[(ForkVersion, Height)] = &[
    (1, 1),
    (2, 8),
    (3, 10),
    (4, 11),
    (5, 12),
    (6, 13),
    (7, 14),
    (8, 15),
    (9, 75),
    (10, 125),
    (11, 126),
    (12, 150),
    (13, 200),
    (14, 250),
    (15, 300),
    (16, 350),
];

pub const STAGENET_HARD_FORKS: &[(ForkVersion, Height)] = &[(1, 1)];

pub fn hard_fork_table(nettype: Network) -> &'static [(ForkVersion, Height)] {
    match nettype {
        Network::Mainnet | Network::Fakechain => MAINNET_HARD_FORKS,
        Network::Testnet => TESTNET_HARD_FORKS,
        Network::Stagenet => STAGENET_HARD_FORKS,
    }
}

/// Fork version in force at `height`.
pub fn hard_fork_version_at(nettype: Network, height: Height) -> ForkVersion {
    let mut version = 1;
    for &(v, h) in hard_fork_table(nettype) {
        if height >= h {
            version = v;
        } else {
            break;
        }
    }
    version
}

/// First height at which `version` is in force, or `None` if that fork is
/// not scheduled on this network.
pub fn fork_activation_height(nettype: Network, version: ForkVersion) -> Option<Height> {
    hard_fork_table(nettype)
        .iter()
        .find(|&&(v, _)| v == version)
        .map(|&(_, h)| h)
}

/// Governance and dev-fund payout destinations. Address *strings* are
/// decoded by the embedding daemon (base58 handling lives there); the core
/// consumes the resulting key pairs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GovernanceWallets {
    pub governance: Address,
    pub bridge: Address,
    pub new_bridge: Address,
    pub dev_fund: Address,
    pub new_gov: Address,
    pub new_dev: Address,
}

impl GovernanceWallets {
    /// Governance payout address for the given fork epoch.
    pub fn governance_wallet(&self, fork_version: ForkVersion) -> &Address {
        if fork_version < 11 {
            &self.governance
        } else if fork_version < 14 {
            &self.bridge
        } else if fork_version < 19 {
            &self.new_bridge
        } else {
            &self.new_gov
        }
    }

    /// Dev-fund payout address for the given fork epoch.
    pub fn dev_fund_wallet(&self, fork_version: ForkVersion) -> &Address {
        if fork_version < 19 {
            &self.dev_fund
        } else {
            &self.new_dev
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_lookup_brackets() {
        assert_eq!(hard_fork_version_at(Network::Mainnet, 0), 1);
        assert_eq!(hard_fork_version_at(Network::Mainnet, 7), 1);
        assert_eq!(hard_fork_version_at(Network::Mainnet, 8), 2);
        assert_eq!(hard_fork_version_at(Network::Mainnet, 106_950), 5);
        assert_eq!(hard_fork_version_at(Network::Mainnet, 1_248_885), 18);
        assert_eq!(hard_fork_version_at(Network::Mainnet, 2_000_000), 19);
    }

    #[test]
    fn fork_activation() {
        assert_eq!(fork_activation_height(Network::Mainnet, 5), Some(106_950));
        assert_eq!(fork_activation_height(Network::Stagenet, 5), None);
    }

    #[test]
    fn portions_divide_evenly() {
        assert_eq!(STAKING_PORTIONS % MAX_NUMBER_OF_CONTRIBUTORS, 0);
        assert_eq!(STAKING_PORTIONS % 2, 0);
        assert_eq!(STAKING_PORTIONS % 3, 0);
    }
}
