//! Versioned reward schedule.
//!
//! `block_reward_parts` splits each block's emission into miner, service
//! node, governance and dev-fund components. Governance and dev-fund grants
//! are minted above the emission curve: they are added to the base reward
//! first and subtracted back out when computing the adjusted base.

use serde::{Deserialize, Serialize};

use crate::config::{
    Network, BASE_REWARD_CLAMP_THRESHOLD, BURN_2, COIN, CORP_MINT,
    CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE_V1, CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE_V2,
    CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE_V5, DIFFICULTY_TARGET_V1, DIFFICULTY_TARGET_V2,
    DIFFICULTY_TARGET_V3, EMISSION_SPEED_FACTOR_PER_MINUTE, FINAL_SUBSIDY_PER_MINUTE,
    MINT_BRIDGE, MONEY_SUPPLY, NEW_XEQ_BRIDGE, SERVICE_NODE_VERSION, STAKING_PORTIONS,
};
use crate::error::RewardError;
use crate::service_nodes::rules::mul128_div64;
use crate::types::{Address, ForkVersion, Height};

/// Stake portion share, paired with a payout address.
pub type StakePortions = u64;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRewardParts {
    pub original_base_reward: u64,
    pub adjusted_base_reward: u64,
    pub governance: u64,
    pub dev_fund: u64,
    pub service_node_total: u64,
    pub operator_reward: u64,
    pub staker_reward: u64,
    pub service_node_paid: u64,
    pub base_miner: u64,
    pub base_miner_fee: u64,
}

impl BlockRewardParts {
    pub fn miner_reward(&self) -> u64 {
        self.base_miner + self.base_miner_fee
    }
}

/// Inputs that vary per candidate block.
#[derive(Clone, Debug, Default)]
pub struct RewardContext {
    pub fee: u64,
    pub height: Height,
    pub winner_info: Vec<(Address, StakePortions)>,
}

fn block_target_seconds(fork_version: ForkVersion) -> u64 {
    if fork_version < 2 {
        DIFFICULTY_TARGET_V1
    } else if fork_version < 3 {
        DIFFICULTY_TARGET_V2
    } else {
        DIFFICULTY_TARGET_V3
    }
}

/// Minimum block weight granted the full reward; also the anchor for the
/// pool's per-tx weight limit.
pub fn get_min_block_weight(fork_version: ForkVersion) -> u64 {
    full_reward_zone(fork_version)
}

fn full_reward_zone(fork_version: ForkVersion) -> u64 {
    if fork_version < 2 {
        CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE_V1
    } else if fork_version < 5 {
        CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE_V2
    } else {
        CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE_V5
    }
}

/// Emission-curve base reward with the block-weight penalty applied.
pub fn get_base_block_reward(
    median_weight: u64,
    current_block_weight: u64,
    already_generated_coins: u64,
    fork_version: ForkVersion,
) -> Result<u64, RewardError> {
    let target_minutes = block_target_seconds(fork_version) / 60;
    let emission_speed_factor = EMISSION_SPEED_FACTOR_PER_MINUTE - (target_minutes - 1);

    let mut base_reward =
        (MONEY_SUPPLY.saturating_sub(already_generated_coins)) >> emission_speed_factor;
    if base_reward < FINAL_SUBSIDY_PER_MINUTE * target_minutes {
        base_reward = FINAL_SUBSIDY_PER_MINUTE * target_minutes;
    }
    if base_reward < BASE_REWARD_CLAMP_THRESHOLD {
        base_reward = BASE_REWARD_CLAMP_THRESHOLD;
    }

    let median_weight = median_weight.max(full_reward_zone(fork_version));
    if current_block_weight <= median_weight {
        return Ok(base_reward);
    }
    if current_block_weight > 2 * median_weight {
        return Err(RewardError::WeightTooBig {
            weight: current_block_weight,
            median: median_weight,
        });
    }

    // penalized = base · (2·M − W) · W / M², evaluated in 128 bits
    let m = u128::from(median_weight);
    let w = u128::from(current_block_weight);
    let penalized = u128::from(base_reward) * (2 * m - w) / m * w / m;
    Ok(penalized as u64)
}

/// One-off and periodic governance grants, keyed by absolute height.
/// Each branch is consensus-critical, hex literals included.
pub fn allow_governance(height: Height, nettype: Network) -> u64 {
    match nettype {
        Network::Mainnet | Network::Fakechain => {
            let fork_height: u64 = 352_846;
            if height == fork_height {
                1_000_000 * COIN
            } else if height == fork_height + 21_600 {
                1_000_000 * COIN
            } else if height == fork_height + 2 * 21_600 {
                1_000_000 * COIN
            } else if height == fork_height + 3 * 21_600 {
                1_000_000 * COIN
            } else if height == fork_height + 4 * 21_600 {
                1_000_000 * COIN
            } else if height == fork_height + 5 * 21_600 {
                1_000_000 * COIN
            } else if height == fork_height + 6 * 21_600 {
                1_000_000 * COIN
            } else if height == 500_000 {
                // wXEQ pre-sale, burnt again at height 500100
                11_000_000 * COIN
            } else if height == 663_269 {
                MINT_BRIDGE
            } else if height == 841_197 {
                BURN_2
            } else if height == 898_176 {
                CORP_MINT
            } else if height == fork_height + 583_654 {
                NEW_XEQ_BRIDGE
            } else if height > fork_height + 583_654 && height % 21_600 == 0 && height < 991_430 {
                200_000 * COIN
            } else if height == fork_height + 638_584 {
                CORP_MINT * 5
            } else if height > fork_height + 638_584 && height % 10_800 == 0 && height < 1_056_414 {
                225_000 * COIN
            } else if height == fork_height + 703_568 {
                // Written exactly as the schedule defines it; `10e6` is 1e7.
                ((0x502f_9000u64 / 0x2 * 0x3) as f64
                    / f64::exp2(0xfe014 as f64 / 130_500.0)
                    / 100.0
                    * 10e6) as u64
            } else if height > fork_height + 0xd8303 && height % 2 == 0 && height < 0x12e56f {
                0xB_A43B_7400
            } else if height > fork_height + 0xd8321 && height < 0x12e5d4 {
                0x2_540B_E400
            } else {
                0
            }
        }
        Network::Testnet => {
            let fork_height: u64 = 250;
            if height == fork_height {
                1_000_000 * COIN
            } else if height == fork_height + 216 {
                1_000_000 * COIN
            } else if height == fork_height + 2 * 216 {
                1_000_000 * COIN
            } else if height == fork_height + 3 * 216 {
                1_000_000 * COIN
            } else if height == fork_height + 4 * 216 {
                1_000_000 * COIN
            } else if height == fork_height + 5 * 216 {
                1_000_000 * COIN
            } else if height == fork_height + 6 * 216 {
                1_000_000 * COIN
            } else if height == fork_height + 7 {
                NEW_XEQ_BRIDGE
            } else if height > fork_height + 7 && height % 10 == 0 {
                200_000 * COIN
            } else if height == fork_height + 50 {
                CORP_MINT * 5
            } else if height > fork_height + 50 && height % 5 == 0 {
                225_000 * COIN
            } else if height == 500_000 {
                11_000_000 * COIN
            } else {
                0
            }
        }
        Network::Stagenet => 0,
    }
}

/// Dev-fund grants; active from fork 17.
pub fn allow_dev_fund(height: Height, nettype: Network) -> u64 {
    if !matches!(nettype, Network::Mainnet | Network::Fakechain) {
        return 0;
    }
    let fork_height: u64 = 352_846;
    if height == fork_height + 703_568 {
        125_000 * COIN
    } else if height > fork_height + 703_568 && height % 10_800 == 0 && height < 1_238_350 {
        125_000 * COIN
    } else if height > fork_height + 885_504 && height % 5_400 == 0 {
        125_000 * COIN
    } else {
        0
    }
}

/// Share of the adjusted base reward reserved for service nodes.
pub fn service_node_reward_formula(base_reward: u64, fork_version: ForkVersion) -> u64 {
    if fork_version > 11 {
        base_reward / 4 * 3
    } else if fork_version >= SERVICE_NODE_VERSION {
        base_reward / 2
    } else {
        0
    }
}

/// `portions / STAKING_PORTIONS` of `total`, in 128-bit precision.
pub fn get_portion_of_reward(portions: u64, total_service_node_reward: u64) -> u64 {
    mul128_div64(total_service_node_reward, portions, STAKING_PORTIONS)
}

/// What the winner rows of a coinbase will actually pay out.
pub fn calculate_sum_of_portions(
    winner_info: &[(Address, StakePortions)],
    parts: &BlockRewardParts,
    fork_version: ForkVersion,
) -> u64 {
    let mut reward = 0u64;
    for (i, (_, portions)) in winner_info.iter().enumerate() {
        if fork_version >= 17 {
            reward += get_portion_of_reward(*portions, parts.service_node_total);
        } else if fork_version >= 12 {
            let part = if i == 0 {
                parts.operator_reward
            } else {
                parts.staker_reward
            };
            reward += get_portion_of_reward(*portions, part);
        } else {
            reward += get_portion_of_reward(*portions, parts.service_node_total);
        }
    }
    reward
}

/// Winner rows used when no service node is eligible.
pub fn null_winner() -> Vec<(Address, StakePortions)> {
    vec![(Address::NULL, STAKING_PORTIONS)]
}

/// Assemble the full reward split for one block.
pub fn block_reward_parts(
    median_weight: u64,
    current_block_weight: u64,
    already_generated_coins: u64,
    fork_version: ForkVersion,
    ctx: &RewardContext,
    nettype: Network,
) -> Result<BlockRewardParts, RewardError> {
    let mut result = BlockRewardParts::default();

    let mut base_reward = get_base_block_reward(
        median_weight,
        current_block_weight,
        already_generated_coins,
        fork_version,
    )?;

    result.governance = if fork_version >= 7 {
        allow_governance(ctx.height, nettype)
    } else {
        0
    };
    base_reward += result.governance;

    result.dev_fund = if fork_version >= 17 {
        allow_dev_fund(ctx.height, nettype)
    } else {
        0
    };
    base_reward += result.dev_fund;

    if base_reward == 0 {
        return Err(RewardError::ZeroBaseReward);
    }

    if already_generated_coins == 0 {
        result.original_base_reward = base_reward;
        result.adjusted_base_reward = base_reward;
        result.base_miner = base_reward;
        return Ok(result);
    }

    result.original_base_reward = base_reward;
    result.adjusted_base_reward = result.original_base_reward - (result.governance + result.dev_fund);
    result.service_node_total =
        service_node_reward_formula(result.adjusted_base_reward, fork_version);
    result.operator_reward = result.service_node_total / 2;
    result.staker_reward = result.service_node_total - result.operator_reward;

    result.service_node_paid = if ctx.winner_info.is_empty() {
        calculate_sum_of_portions(&null_winner(), &result, fork_version)
    } else {
        calculate_sum_of_portions(&ctx.winner_info, &result, fork_version)
    };

    result.base_miner = result.adjusted_base_reward - result.service_node_total;
    result.base_miner_fee = ctx.fee;
    Ok(result)
}
