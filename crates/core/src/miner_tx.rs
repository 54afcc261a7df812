//! Coinbase construction and the governance/dev-fund output validators.
//!
//! Construction and validation are mirror images: the validator re-derives
//! every output key and amount from `(height, fork version, registry
//! snapshot)` and compares byte for byte.

use log::{debug, error};

use xeq_crypto::{
    derive_public_key, generate_key_derivation, random_keypair, Keypair, PublicKey,
};

use crate::config::{
    GovernanceWallets, Network, CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW, SERVICE_NODE_VERSION,
};
use crate::error::MinerTxError;
use crate::keys::deterministic_keypair;
use crate::reward::{
    block_reward_parts, get_portion_of_reward, null_winner, BlockRewardParts, RewardContext,
    StakePortions,
};
use crate::tx_extra::{self, TxExtraField};
use crate::tx::{Transaction, TxIn, TxOut, TxOutTarget, TxType, TxVersion};
use crate::types::{Address, ForkVersion, Height};

/// Everything the miner-tx builder needs besides the chain tip numbers.
#[derive(Clone, Debug)]
pub struct MinerTxContext<'a> {
    pub nettype: Network,
    pub wallets: &'a GovernanceWallets,
    pub snode_winner_key: PublicKey,
    pub snode_winner_info: Vec<(Address, StakePortions)>,
}

/// One-time output key addressed to `address`, derived from a transaction
/// key at a fixed output position.
pub fn get_deterministic_output_key(
    address: &Address,
    tx_key: &Keypair,
    output_index: u64,
) -> Result<PublicKey, MinerTxError> {
    let derivation = generate_key_derivation(&address.view_public_key, &tx_key.secret)
        .map_err(|_| MinerTxError::Derivation)?;
    derive_public_key(&derivation, output_index, &address.spend_public_key)
        .map_err(|_| MinerTxError::Derivation)
}

/// Check a governance output key against the deterministic height key.
pub fn validate_governance_reward_key(
    height: Height,
    governance_wallet: &Address,
    output_index: u64,
    output_key: &PublicKey,
) -> bool {
    let sn_key = deterministic_keypair(height);
    match get_deterministic_output_key(governance_wallet, &sn_key, output_index) {
        Ok(correct_key) => correct_key == *output_key,
        Err(_) => {
            error!("failed to generate deterministic output key for governance wallet output validation");
            false
        }
    }
}

/// Check a dev-fund output key against the deterministic height key.
pub fn validate_dev_fund_reward_key(
    height: Height,
    dev_fund_wallet: &Address,
    output_index: u64,
    output_key: &PublicKey,
) -> bool {
    let sn_key = deterministic_keypair(height);
    match get_deterministic_output_key(dev_fund_wallet, &sn_key, output_index) {
        Ok(correct_key) => correct_key == *output_key,
        Err(_) => {
            error!("failed to generate deterministic output key for dev fund wallet output validation");
            false
        }
    }
}

fn push_output(
    tx: &mut Transaction,
    sn_key: &Keypair,
    amount: u64,
    address: &Address,
    output_index: u64,
    unlock_time: u64,
) -> Result<u64, MinerTxError> {
    let key = get_deterministic_output_key(address, sn_key, output_index)?;
    tx.vout.push(TxOut {
        amount,
        target: TxOutTarget::ToKey { key },
    });
    tx.output_unlock_times.push(unlock_time);
    Ok(amount)
}

/// Build the coinbase for a block template. Returns the transaction and
/// the reward split it satisfies.
#[allow(clippy::too_many_arguments)]
pub fn construct_miner_tx(
    height: Height,
    median_weight: u64,
    already_generated_coins: u64,
    current_block_weight: u64,
    fee: u64,
    miner_address: &Address,
    extra_nonce: &[u8],
    hard_fork_version: ForkVersion,
    miner_context: &MinerTxContext<'_>,
) -> Result<(Transaction, BlockRewardParts), MinerTxError> {
    let mut tx = Transaction {
        version: TxVersion::max_for_fork(hard_fork_version),
        tx_type: TxType::Standard,
        ..Default::default()
    };

    let null_info;
    let service_node_info: &[(Address, StakePortions)] =
        if miner_context.snode_winner_info.is_empty() {
            null_info = null_winner();
            &null_info
        } else {
            &miner_context.snode_winner_info
        };

    let txkey = random_keypair();
    tx_extra::append(&mut tx.extra, TxExtraField::PubKey(txkey.public));
    if !extra_nonce.is_empty() {
        tx_extra::append(&mut tx.extra, TxExtraField::Nonce(extra_nonce.to_vec()));
    }

    // same deterministic key addresses service node and governance rows
    let sn_key = deterministic_keypair(height);
    if already_generated_coins != 0 {
        tx_extra::append(&mut tx.extra, TxExtraField::PubKey(sn_key.public));
    }
    tx_extra::append(
        &mut tx.extra,
        TxExtraField::ServiceNodeWinner(miner_context.snode_winner_key),
    );

    let reward_context = RewardContext {
        fee,
        height,
        winner_info: miner_context.snode_winner_info.clone(),
    };
    let reward_parts = block_reward_parts(
        median_weight,
        current_block_weight,
        already_generated_coins,
        hard_fork_version,
        &reward_context,
        miner_context.nettype,
    )?;

    let mut summary_amounts = 0u64;

    // miner reward, at output 0 under the fresh tx key
    {
        let derivation = generate_key_derivation(&miner_address.view_public_key, &txkey.secret)
            .map_err(|_| MinerTxError::Derivation)?;
        let out_key = derive_public_key(&derivation, 0, &miner_address.spend_public_key)
            .map_err(|_| MinerTxError::Derivation)?;
        tx.vout.push(TxOut {
            amount: reward_parts.miner_reward(),
            target: TxOutTarget::ToKey { key: out_key },
        });
        tx.output_unlock_times
            .push(height + CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW);
        summary_amounts += reward_parts.miner_reward();
    }

    if hard_fork_version >= SERVICE_NODE_VERSION {
        for (i, (address, portions)) in service_node_info.iter().enumerate() {
            let amount = if hard_fork_version >= 17 {
                get_portion_of_reward(*portions, reward_parts.service_node_total)
            } else if hard_fork_version >= 12 {
                let part = if i == 0 {
                    reward_parts.operator_reward
                } else {
                    reward_parts.staker_reward
                };
                get_portion_of_reward(*portions, part)
            } else {
                get_portion_of_reward(*portions, reward_parts.service_node_total)
            };
            summary_amounts += push_output(
                &mut tx,
                &sn_key,
                amount,
                address,
                (1 + i) as u64,
                height + CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW,
            )?;
        }
    }

    if hard_fork_version >= 7 && reward_parts.governance > 0 {
        let wallet = miner_context.wallets.governance_wallet(hard_fork_version);
        let index = tx.vout.len() as u64;
        summary_amounts += push_output(
            &mut tx,
            &sn_key,
            reward_parts.governance,
            wallet,
            index,
            height + 4,
        )?;
    }

    if hard_fork_version >= 17 && reward_parts.dev_fund > 0 {
        let wallet = miner_context.wallets.dev_fund_wallet(hard_fork_version);
        let index = tx.vout.len() as u64;
        summary_amounts += push_output(
            &mut tx,
            &sn_key,
            reward_parts.dev_fund,
            wallet,
            index,
            height + CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW,
        )?;
    }

    let expected_amount = reward_parts.miner_reward()
        + reward_parts.service_node_paid
        + reward_parts.governance
        + reward_parts.dev_fund;
    if summary_amounts != expected_amount {
        error!(
            "failed to construct miner tx, summary_amounts = {} not equal total block_reward = {}",
            summary_amounts, expected_amount
        );
        return Err(MinerTxError::Conservation {
            got: summary_amounts,
            expected: expected_amount,
        });
    }

    tx.unlock_time = height + CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW;
    tx.vin.push(TxIn::Gen { height });

    debug!(
        "miner tx generated ok, block_reward={} current_block_weight={} already_generated_coins={}",
        reward_parts.original_base_reward, current_block_weight, already_generated_coins
    );
    Ok((tx, reward_parts))
}
