//! Staking arithmetic and quorum shuffle primitives.
//!
//! All portion math is 128-bit multiply / 64-bit divide; floats never touch
//! reward amounts. The staking requirement curve does use doubles, exactly
//! as the schedule defines it, with the final truncation to atomic units.

use rand::RngCore;
use rand_mt::Mt19937GenRand64;

use crate::config::{
    Network, COIN, MAX_NUMBER_OF_CONTRIBUTORS, MAX_NUMBER_OF_CONTRIBUTORS_V2, MIN_PORTIONS,
    MIN_POOL_STAKERS_V12, STAKING_PORTIONS,
};
use crate::types::{Address, ForkVersion, Height};
use xeq_crypto::{keccak256, Hash};

pub const QUORUM_SIZE: usize = 10;
pub const MIN_VOTES_TO_KICK_SERVICE_NODE: usize = 7;
pub const NTH_OF_THE_NETWORK_TO_TEST: usize = 100;
pub const MIN_NODES_TO_TEST: usize = 50;

pub const MAX_SWARM_SIZE: usize = 10;
pub const MIN_SWARM_SIZE: usize = 5;
pub const IDEAL_SWARM_MARGIN: usize = 2;
pub const IDEAL_SWARM_SIZE: usize = MIN_SWARM_SIZE + IDEAL_SWARM_MARGIN;
pub const NEW_SWARM_SIZE: usize = IDEAL_SWARM_SIZE;
pub const SWARM_BUFFER: usize = 5;

pub type SwarmId = u64;
pub const UNASSIGNED_SWARM_ID: SwarmId = u64::MAX;
pub const QUEUE_SWARM_ID: SwarmId = 0;

/// How long a deregister vote stays actionable, in blocks (two hours at the
/// pre-/post-retarget block times).
pub const DEREGISTER_LIFETIME_BY_HEIGHT: u64 = 40;
pub const DEREGISTER_LIFETIME_BY_HEIGHT_V2: u64 = 60;

/// `a·b / denom` where the product is evaluated in 128 bits and the low
/// 64 bits of the quotient are returned.
#[inline]
pub fn mul128_div64(a: u64, b: u64, denom: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) / u128::from(denom)) as u64
}

/// Stake amount a portion share corresponds to.
pub fn portions_to_amount(portions: u64, staking_requirement: u64) -> u64 {
    mul128_div64(staking_requirement, portions, STAKING_PORTIONS)
}

/// Lowest `x` such that `staking_requirement · x / STAKING_PORTIONS ≥ amount`.
pub fn get_portions_to_make_amount(staking_requirement: u64, amount: u64) -> u64 {
    let num = u128::from(amount) * u128::from(STAKING_PORTIONS)
        + u128::from(staking_requirement - 1);
    (num / u128::from(staking_requirement)) as u64
}

/// Portions must each clear the per-slot minimum (capped by what is left)
/// and never overdraw the remaining pool.
pub fn check_service_node_portions(portions: &[u64], min_portions: u64) -> bool {
    let mut portions_left = STAKING_PORTIONS;
    for &portion in portions {
        let min_for_slot = portions_left.min(min_portions);
        if portion < min_for_slot || portion > portions_left {
            return false;
        }
        portions_left -= portion;
    }
    true
}

pub fn check_service_node_portions_default(portions: &[u64]) -> bool {
    check_service_node_portions(portions, MIN_PORTIONS)
}

/// Required stake for a node registering at `height`.
pub fn get_staking_requirement(nettype: Network, height: Height) -> u64 {
    let hardfork_height: u64 = if nettype == Network::Mainnet { 106_950 } else { 581 };
    let height = height.max(hardfork_height);
    let height_adjusted = height - hardfork_height;

    if nettype == Network::Testnet {
        return if height >= 150 {
            100_000 * COIN
        } else if height >= 14 {
            let base = 70_000 * COIN;
            let variable =
                ((20_000.0 * COIN as f64) / f64::exp2(height_adjusted as f64 / 356_446.0)) as u64;
            base + variable
        } else {
            let base = 10_000 * COIN;
            let variable =
                ((30_000.0 * COIN as f64) / f64::exp2(height_adjusted as f64 / 129_600.0)) as u64;
            base + variable
        };
    }

    let (base, variable) = if height >= 841_197 {
        (100_000 * COIN, 0)
    } else if height >= 352_846 {
        (
            70_000 * COIN,
            ((20_000.0 * COIN as f64) / f64::exp2(height_adjusted as f64 / 356_446.0)) as u64,
        )
    } else {
        (
            10_000 * COIN,
            ((30_000.0 * COIN as f64) / f64::exp2(height_adjusted as f64 / 129_600.0)) as u64,
        )
    };
    base + variable
}

/// Minimum acceptable new-contributor stake at the given fork.
pub fn get_min_node_contribution(
    fork_version: ForkVersion,
    staking_requirement: u64,
    total_reserved: u64,
) -> u64 {
    if fork_version >= 12 {
        MIN_POOL_STAKERS_V12 * COIN
    } else if fork_version > 9 {
        (staking_requirement - total_reserved)
            .min(staking_requirement / MAX_NUMBER_OF_CONTRIBUTORS_V2)
    } else {
        (staking_requirement - total_reserved)
            .min(staking_requirement / MAX_NUMBER_OF_CONTRIBUTORS)
    }
}

/// Rejection-sampled uniform draw in `[0, n)`. The division form (rather
/// than modulo) is part of the shuffle's cross-platform definition.
pub fn uniform_distribution_portable(rng: &mut Mt19937GenRand64, n: u64) -> u64 {
    let secure_max = u64::MAX - u64::MAX % n;
    loop {
        let x = rng.next_u64();
        if x < secure_max {
            return x / (secure_max / n);
        }
    }
}

/// Seeded Fisher–Yates used for quorum and swarm assignment. Deterministic
/// across platforms for a given seed.
pub fn xeq_shuffle<T>(items: &mut [T], seed: u64) {
    if items.len() <= 1 {
        return;
    }
    let mut rng = Mt19937GenRand64::new(seed);
    for i in 1..items.len() {
        let j = uniform_distribution_portable(&mut rng, (i + 1) as u64) as usize;
        if i != j {
            items.swap(i, j);
        }
    }
}

/// Hash committed by a registration signature: addresses, operator share,
/// per-contributor portions, expiry.
pub fn get_registration_hash(
    addresses: &[Address],
    portions_for_operator: u64,
    portions: &[u64],
    expiration_timestamp: u64,
) -> Hash {
    let mut buf = Vec::with_capacity(addresses.len() * 64 + portions.len() * 8 + 16);
    for addr in addresses {
        buf.extend_from_slice(&addr.spend_public_key.0);
        buf.extend_from_slice(&addr.view_public_key.0);
    }
    buf.extend_from_slice(&portions_for_operator.to_le_bytes());
    for portion in portions {
        buf.extend_from_slice(&portion.to_le_bytes());
    }
    buf.extend_from_slice(&expiration_timestamp.to_le_bytes());
    keccak256(&buf)
}
