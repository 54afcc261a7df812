//! The service node registry.
//!
//! A single mutex guards the whole state: the info map, the rollback log,
//! the quorum snapshots and the scan height. Mutators append undo events to
//! the log; chain detachment replays them in reverse until a barrier forces
//! a full rescan. Registry state round-trips through the daemon database as
//! one opaque blob.

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use xeq_crypto::{
    check_key, check_signature, derive_public_key, generate_key_derivation, Hash, KeyDerivation,
    PublicKey,
};

use crate::api::{Blockchain, NodeDb};
use crate::config::{
    COIN, CRYPTONOTE_MAX_BLOCK_NUMBER, MAX_NUMBER_OF_CONTRIBUTORS,
    MAX_NUMBER_OF_CONTRIBUTORS_V2, MAX_NUMBER_OF_CONTRIBUTORS_V3, MAX_OPERATOR_V12,
    MAX_POOL_STAKERS_V12, MIN_OPERATOR_V12, MIN_POOL_STAKERS_V12, SERVICE_NODE_VERSION,
    STAKING_PORTIONS, STAKING_REQUIREMENT_LOCK_BLOCKS_EXCESS,
};
use crate::error::{MinerTxError, RegistryError, StakingError};
use crate::keys::deterministic_keypair;
use crate::reward::{get_portion_of_reward, BlockRewardParts};
use crate::service_nodes::info::{Contribution, ServiceNodeInfo, ServiceNodePubkeyInfo};
use crate::service_nodes::quorum::{derive_quorum_state, QuorumState};
use crate::service_nodes::rollback::RollbackEvent;
use crate::service_nodes::rules::{
    check_service_node_portions_default, get_registration_hash, get_staking_requirement,
    mul128_div64, portions_to_amount, DEREGISTER_LIFETIME_BY_HEIGHT,
    DEREGISTER_LIFETIME_BY_HEIGHT_V2, UNASSIGNED_SWARM_ID,
};
use crate::service_nodes::swarm::{calc_swarm_changes, SwarmBuckets};
use crate::tx::{Transaction, TxOutTarget, TxType};
use crate::tx_extra;
use crate::types::{Address, Block, ForkVersion, Height};

const ROLLBACK_EVENT_EXPIRATION_BLOCKS: u64 = 30;

#[derive(Default, Serialize, Deserialize)]
struct ListState {
    infos: BTreeMap<PublicKey, ServiceNodeInfo>,
    rollback_events: VecDeque<RollbackEvent>,
    quorum_states: BTreeMap<Height, QuorumState>,
    height: Height,
}

pub struct ServiceNodeList<B: Blockchain, D: NodeDb> {
    blockchain: Arc<B>,
    db: Arc<D>,
    my_pubkey: Mutex<Option<PublicKey>>,
    state: Mutex<ListState>,
}

/// Swap memo body, checked against the decrypted transfer amount.
#[derive(Deserialize)]
struct SwapMemo {
    #[allow(dead_code)]
    network: String,
    #[allow(dead_code)]
    address: String,
    amount: String,
}

impl<B: Blockchain, D: NodeDb> ServiceNodeList<B, D> {
    pub fn new(blockchain: Arc<B>, db: Arc<D>) -> Self {
        ServiceNodeList {
            blockchain,
            db,
            my_pubkey: Mutex::new(None),
            state: Mutex::new(ListState::default()),
        }
    }

    pub fn set_my_service_node_key(&self, key: Option<PublicKey>) {
        *self.my_pubkey.lock() = key;
    }

    // ---- public mutators -------------------------------------------------

    pub fn block_added(&self, block: &Block, txs: &[Transaction]) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        self.process_block(&mut state, block, txs)?;
        self.store_locked(&state)
    }

    pub fn blockchain_detached(&self, height: Height) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        loop {
            let Some(event_height) = state.rollback_events.back().map(|e| e.block_height())
            else {
                break;
            };
            if event_height < height {
                break;
            }
            let event = state.rollback_events.back().cloned().expect("nonempty");
            if !event.apply(&mut state.infos) {
                // barrier (or inconsistent log): rebuild from scratch
                self.init_locked(&mut state)?;
                break;
            }
            state.rollback_events.pop_back();
        }

        let stale: Vec<Height> = state
            .quorum_states
            .range(height..)
            .map(|(h, _)| *h)
            .collect();
        for h in stale {
            state.quorum_states.remove(&h);
        }

        state.height = height;
        self.store_locked(&state)
    }

    /// Load persisted state and replay the chain up to the current height.
    /// Idempotent; safe to call again after interruption.
    pub fn init(&self) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        self.init_locked(&mut state)
    }

    pub fn store(&self) -> Result<(), RegistryError> {
        let state = self.state.lock();
        self.store_locked(&state)
    }

    /// Restore persisted state, replacing whatever is in memory. Returns
    /// false (with a cleared state at the staking-fork height) when nothing
    /// usable is stored.
    pub fn load(&self) -> bool {
        let mut state = self.state.lock();
        self.load_locked(&mut state)
    }

    // ---- public queries --------------------------------------------------

    pub fn is_service_node(&self, pubkey: &PublicKey) -> bool {
        let state = self.state.lock();
        let hf = self.blockchain.get_hard_fork_version(state.height);
        state.infos.get(pubkey).is_some_and(|info| {
            (hf > 9 && info.is_valid()) || info.is_fully_funded()
        })
    }

    /// Eligible keys, sorted bytewise. Input to the quorum shuffle.
    pub fn get_service_nodes_pubkeys(&self) -> Vec<PublicKey> {
        let state = self.state.lock();
        self.eligible_pubkeys(&state)
    }

    pub fn get_quorum_state(&self, height: Height) -> Option<QuorumState> {
        let state = self.state.lock();
        state.quorum_states.get(&height).cloned()
    }

    /// All entries, or the subset with the given keys (missing keys skipped).
    pub fn get_service_node_list_state(
        &self,
        service_node_pubkeys: &[PublicKey],
    ) -> Vec<ServiceNodePubkeyInfo> {
        let state = self.state.lock();
        if service_node_pubkeys.is_empty() {
            state
                .infos
                .iter()
                .map(|(pubkey, info)| ServiceNodePubkeyInfo {
                    pubkey: *pubkey,
                    info: info.clone(),
                })
                .collect()
        } else {
            service_node_pubkeys
                .iter()
                .filter_map(|key| {
                    state.infos.get(key).map(|info| ServiceNodePubkeyInfo {
                        pubkey: *key,
                        info: info.clone(),
                    })
                })
                .collect()
        }
    }

    /// The node that has waited longest for a reward, or the null key.
    pub fn select_winner(&self) -> PublicKey {
        let state = self.state.lock();
        self.select_winner_locked(&state)
    }

    pub fn get_winner_addresses_and_portions(&self) -> Vec<(Address, u64)> {
        let state = self.state.lock();
        self.winner_addresses_and_portions_locked(&state)
    }

    fn winner_addresses_and_portions_locked(&self, state: &ListState) -> Vec<(Address, u64)> {
        let key = self.select_winner_locked(state);
        if key.is_null() {
            return vec![(Address::NULL, STAKING_PORTIONS)];
        }

        let info = &state.infos[&key];
        let hf = self.blockchain.get_current_hard_fork_version();
        let operator_portions = info.portions_for_operator;

        let mut winners = Vec::with_capacity(info.contributors.len());
        for contributor in &info.contributors {
            let portion = if hf < 12 {
                let remaining_portions = STAKING_PORTIONS - operator_portions;
                let mut p = mul128_div64(
                    contributor.amount,
                    remaining_portions,
                    info.staking_requirement,
                );
                if contributor.address == info.operator_address {
                    p += operator_portions;
                }
                p
            } else if hf < 17 {
                let denom = if contributor.address == info.operator_address {
                    MAX_OPERATOR_V12 * COIN
                } else {
                    MAX_POOL_STAKERS_V12 * COIN
                };
                mul128_div64(contributor.amount, STAKING_PORTIONS, denom)
            } else {
                mul128_div64(
                    contributor.amount,
                    STAKING_PORTIONS,
                    info.staking_requirement,
                )
            };
            winners.push((contributor.address, portion));
        }
        winners
    }

    /// Re-derive the expected service node rows of a coinbase and compare
    /// byte for byte. Any deviation fails the block.
    pub fn validate_miner_tx(
        &self,
        _prev_id: &Hash,
        miner_tx: &Transaction,
        height: Height,
        hard_fork_version: ForkVersion,
        reward_parts: &BlockRewardParts,
    ) -> Result<(), MinerTxError> {
        if hard_fork_version < SERVICE_NODE_VERSION {
            return Ok(());
        }
        let state = self.state.lock();

        let total_service_node_reward = crate::reward::service_node_reward_formula(
            reward_parts.adjusted_base_reward,
            hard_fork_version,
        );
        let winner = self.select_winner_locked(&state);
        let winner_in_extra =
            tx_extra::get_service_node_winner(&miner_tx.extra).unwrap_or(PublicKey::NULL);
        if winner_in_extra != winner {
            error!(
                "service node reward winner is incorrect! expected: {}, block has: {}",
                winner, winner_in_extra
            );
            return Err(MinerTxError::WrongWinner);
        }

        let addresses_and_portions = self.winner_addresses_and_portions_locked(&state);

        if miner_tx.vout.len().saturating_sub(1) < addresses_and_portions.len() {
            error!("miner tx outputs smaller than addresses and portions");
            return Err(MinerTxError::MissingOutputs);
        }

        let sn_key = deterministic_keypair(height);
        for (i, (address, portions)) in addresses_and_portions.iter().enumerate() {
            let vout_index = i + 1;
            let reward = if hard_fork_version >= 17 {
                get_portion_of_reward(*portions, total_service_node_reward)
            } else if hard_fork_version >= 12 {
                let part = if i == 0 {
                    reward_parts.operator_reward
                } else {
                    reward_parts.staker_reward
                };
                get_portion_of_reward(*portions, part)
            } else {
                get_portion_of_reward(*portions, total_service_node_reward)
            };

            let out = &miner_tx.vout[vout_index];
            if out.amount != reward {
                error!(
                    "service node reward amount incorrect. should be {}, is: {}",
                    reward, out.amount
                );
                return Err(MinerTxError::WrongAmount(vout_index));
            }

            let TxOutTarget::ToKey { key: out_key } = &out.target;

            let derivation =
                generate_key_derivation(&address.view_public_key, &sn_key.secret)
                    .map_err(|_| MinerTxError::Derivation)?;
            let expected_key =
                derive_public_key(&derivation, vout_index as u64, &address.spend_public_key)
                    .map_err(|_| MinerTxError::Derivation)?;

            if *out_key != expected_key {
                error!("invalid service node reward output");
                return Err(MinerTxError::InvalidRewardOutput);
            }
        }
        Ok(())
    }

    // ---- block processing ------------------------------------------------

    fn process_block(
        &self,
        state: &mut ListState,
        block: &Block,
        txs: &[Transaction],
    ) -> Result<(), RegistryError> {
        let block_height = block.height();
        let hard_fork_version = self.blockchain.get_hard_fork_version(block_height);
        if hard_fork_version < SERVICE_NODE_VERSION {
            return Ok(());
        }

        assert_eq!(
            state.height, block_height,
            "registry height desynchronized from chain"
        );
        state.height += 1;

        let cull_height = block_height.saturating_sub(ROLLBACK_EVENT_EXPIRATION_BLOCKS);
        while let Some(front) = state.rollback_events.front() {
            if front.block_height() < cull_height {
                state.rollback_events.pop_front();
            } else {
                break;
            }
        }
        state
            .rollback_events
            .push_front(RollbackEvent::Barrier {
                block_height: cull_height,
            });

        let mut expired_count = 0usize;
        for pubkey in self.get_expired_nodes(state, block_height) {
            if let Some(info) = state.infos.remove(&pubkey) {
                if self.is_mine(&pubkey) {
                    info!(
                        "service node expired (yours): {} at block height: {}",
                        pubkey, block_height
                    );
                } else {
                    debug!(
                        "service node expired: {} at block height: {}",
                        pubkey, block_height
                    );
                }
                state.rollback_events.push_back(RollbackEvent::Change {
                    block_height,
                    key: pubkey,
                    info,
                });
                expired_count += 1;
            }
            // Nodes can expire early after an accidental double stake, so
            // expiry does not imply presence in the list.
        }

        let winner_pubkey =
            tx_extra::get_service_node_winner(&block.miner_tx.extra).unwrap_or(PublicKey::NULL);
        if let Some(info) = state.infos.get(&winner_pubkey).cloned() {
            state.rollback_events.push_back(RollbackEvent::Change {
                block_height,
                key: winner_pubkey,
                info,
            });
            // the winner re-queues as though it registered at index u32::MAX
            let entry = state.infos.get_mut(&winner_pubkey).expect("present");
            entry.last_reward_block_height = block_height;
            entry.last_reward_transaction_index = u32::MAX;
        }

        let mut registrations = 0usize;
        let mut deregistrations = 0usize;
        for (index, tx) in txs.iter().enumerate() {
            let index = index as u32;
            let staking_tx = (hard_fork_version >= 18 && tx.tx_type == TxType::Stake)
                || (hard_fork_version <= 17 && tx.tx_type == TxType::Standard);
            let swap_tx = (hard_fork_version >= 18 && tx.tx_type == TxType::Swap)
                || (hard_fork_version <= 17 && tx.tx_type == TxType::Standard);

            if staking_tx {
                if self.process_registration_tx(state, tx, block.timestamp, block_height, index) {
                    registrations += 1;
                }
                self.process_contribution_tx(state, tx, block_height, index);
            } else if swap_tx {
                if let Err(e) = self.process_swap_tx(tx, block_height) {
                    debug!("swap tx ignored: {}", e);
                }
            } else if tx.tx_type == TxType::Deregister {
                match self.process_deregistration_tx(state, tx, block_height) {
                    Ok(()) => deregistrations += 1,
                    Err(e) => debug!("deregister tx ignored: {}", e),
                }
            }
        }

        if registrations > 0 || deregistrations > 0 || expired_count > 0 {
            self.update_swarms(state, block_height);
        }

        let deregister_lifetime = if hard_fork_version >= 8 {
            DEREGISTER_LIFETIME_BY_HEIGHT_V2
        } else {
            DEREGISTER_LIFETIME_BY_HEIGHT
        };
        let quorum_lifetime = 6 * deregister_lifetime;
        let cache_state_from_height = block_height.saturating_sub(quorum_lifetime);
        self.store_quorum_state(state, block_height);
        let stale: Vec<Height> = state
            .quorum_states
            .range(..cache_state_from_height)
            .map(|(h, _)| *h)
            .collect();
        for h in stale {
            state.quorum_states.remove(&h);
        }

        #[cfg(feature = "metrics")]
        {
            crate::metrics::SERVICE_NODE_COUNT.set(state.infos.len() as i64);
            crate::metrics::BLOCKS_PROCESSED_TOTAL.inc();
        }

        Ok(())
    }

    fn is_mine(&self, pubkey: &PublicKey) -> bool {
        self.my_pubkey.lock().map_or(false, |mine| mine == *pubkey)
    }

    fn eligible_pubkeys(&self, state: &ListState) -> Vec<PublicKey> {
        let hf = self.blockchain.get_hard_fork_version(state.height);
        let mut result: Vec<PublicKey> = state
            .infos
            .iter()
            .filter(|(_, info)| (info.is_valid() && hf > 9) || info.is_fully_funded())
            .map(|(key, _)| *key)
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    fn select_winner_locked(&self, state: &ListState) -> PublicKey {
        let hard_fork_version = self.blockchain.get_hard_fork_version(state.height);
        let mut oldest_waiting = (u64::MAX, u32::MAX);
        let mut key = PublicKey::NULL;
        // sticky across iterations at v12, as consensus defined it
        let mut over_portioned = false;
        for (pubkey, info) in &state.infos {
            if hard_fork_version == 12 {
                let operator_needs =
                    portions_to_amount(info.portions_for_operator, info.staking_requirement);
                if info.total_contributed < operator_needs {
                    over_portioned = true;
                }
            }

            if (info.is_valid() && hard_fork_version > 9)
                || (info.is_fully_funded() && !over_portioned)
            {
                let waiting_since =
                    (info.last_reward_block_height, info.last_reward_transaction_index);
                if waiting_since < oldest_waiting {
                    oldest_waiting = waiting_since;
                    key = *pubkey;
                }
            }
        }
        key
    }

    // ---- staking transaction paths ---------------------------------------

    fn contribution_output_has_correct_unlock_time(
        &self,
        tx: &Transaction,
        i: usize,
        block_height: Height,
    ) -> bool {
        let unlock_time = tx.output_unlock_time(i);
        unlock_time < CRYPTONOTE_MAX_BLOCK_NUMBER
            && unlock_time >= block_height + self.blockchain.nettype().staking_lock_blocks()
    }

    fn staking_output_contribution(
        &self,
        tx: &Transaction,
        i: usize,
        derivation: &KeyDerivation,
    ) -> u64 {
        match &tx.vout[i].target {
            TxOutTarget::ToKey { .. } => {
                xeq_crypto::decode_rct_amount(&tx.rct_signatures, i, derivation).unwrap_or_else(
                    || {
                        debug!("failed to decode output {}", i);
                        0
                    },
                )
            }
        }
    }

    /// Sum the decodable outputs addressed to the contributor recorded in
    /// extra, honoring the staking unlock window at `block_height`.
    fn get_contribution(
        &self,
        tx: &Transaction,
        block_height: Height,
    ) -> Option<(Address, u64)> {
        let address = tx_extra::get_service_node_contributor(&tx.extra)?;
        let tx_key = tx_extra::get_tx_secret_key(&tx.extra)?;
        let derivation = generate_key_derivation(&address.view_public_key, &tx_key).ok()?;

        let mut transferred = 0u64;
        for i in 0..tx.vout.len() {
            if self.contribution_output_has_correct_unlock_time(tx, i, block_height) {
                transferred += self.staking_output_contribution(tx, i, &derivation);
            }
        }
        Some((address, transferred))
    }

    fn is_registration_tx(
        &self,
        tx: &Transaction,
        block_timestamp: u64,
        block_height: Height,
        index: u32,
    ) -> Result<(PublicKey, ServiceNodeInfo), StakingError> {
        let registration =
            tx_extra::get_service_node_register(&tx.extra).ok_or(StakingError::ParseError)?;
        let service_node_key =
            tx_extra::get_service_node_pubkey(&tx.extra).ok_or(StakingError::ParseError)?;

        let hf_version = self.blockchain.get_hard_fork_version(block_height);

        let addresses: Vec<Address> = registration
            .public_spend_keys
            .iter()
            .zip(registration.public_view_keys.iter())
            .map(|(spend, view)| Address {
                spend_public_key: *spend,
                view_public_key: *view,
                is_subaddress: false,
            })
            .collect();
        let portions = &registration.portions;

        if portions.len() != addresses.len() || portions.is_empty() {
            return Err(StakingError::PortionInvalid);
        }
        if !check_service_node_portions_default(portions) {
            return Err(StakingError::PortionInvalid);
        }
        if registration.portions_for_operator > STAKING_PORTIONS {
            return Err(StakingError::PortionInvalid);
        }

        let hash = get_registration_hash(
            &addresses,
            registration.portions_for_operator,
            portions,
            registration.expiration_timestamp,
        );
        if !check_key(&service_node_key)
            || !check_signature(&hash, &service_node_key, &registration.service_node_signature)
        {
            return Err(StakingError::SignatureInvalid);
        }
        if registration.expiration_timestamp < block_timestamp {
            return Err(StakingError::AuthorizationExpired);
        }

        let staking_requirement =
            get_staking_requirement(self.blockchain.nettype(), block_height);
        let max_contribs = MAX_NUMBER_OF_CONTRIBUTORS;

        let (address, transferred) = self
            .get_contribution(tx, block_height)
            .ok_or(StakingError::ParseError)?;
        let is_new_address = u64::from(!addresses.contains(&address));
        if addresses.len() as u64 + is_new_address > max_contribs {
            return Err(StakingError::CapacityExceeded);
        }

        if hf_version < 12 && transferred < staking_requirement / max_contribs {
            return Err(StakingError::StakeTooSmall);
        }

        if hf_version >= 12 {
            let burned_amount = tx_extra::get_burned_amount(&tx.extra).unwrap_or(0);
            let total_fee = tx.total_fee();
            let miner_fee = tx.miner_fee(hf_version).unwrap_or(total_fee);
            let burn_fee = total_fee - miner_fee;

            if burned_amount < burn_fee {
                return Err(StakingError::BurnInsufficient);
            }
            if transferred < MIN_OPERATOR_V12 * COIN {
                return Err(StakingError::StakeTooSmall);
            }
        }

        if (12..17).contains(&hf_version) && transferred > MAX_OPERATOR_V12 * COIN {
            return Err(StakingError::StakeTooLarge);
        }

        // the contribution itself is processed when we fall through later

        let mut info = ServiceNodeInfo {
            operator_address: addresses[0],
            portions_for_operator: registration.portions_for_operator,
            registration_height: block_height,
            last_reward_block_height: block_height,
            last_reward_transaction_index: index,
            staking_requirement,
            total_contributed: 0,
            total_reserved: 0,
            swarm_id: UNASSIGNED_SWARM_ID,
            ..Default::default()
        };

        for (i, address) in addresses.iter().enumerate() {
            if addresses[..i].contains(address) {
                return Err(StakingError::DuplicateContributor);
            }
            let reserve_denom = if hf_version < 12 {
                info.staking_requirement
            } else if hf_version < 17 {
                MAX_OPERATOR_V12 * COIN
            } else {
                info.staking_requirement
            };
            let reserved = mul128_div64(reserve_denom, portions[i], STAKING_PORTIONS);
            info.contributors.push(Contribution::new(reserved, *address));
            info.total_reserved += reserved;
        }

        Ok((service_node_key, info))
    }

    fn process_registration_tx(
        &self,
        state: &mut ListState,
        tx: &Transaction,
        block_timestamp: u64,
        block_height: Height,
        index: u32,
    ) -> bool {
        let (key, mut info) =
            match self.is_registration_tx(tx, block_timestamp, block_height, index) {
                Ok(parsed) => parsed,
                Err(StakingError::ParseError) => return false,
                Err(e) => {
                    debug!("registration tx rejected: {}", e);
                    return false;
                }
            };

        // A node does not expire until registration + lock + excess, so a
        // re-registration can race its own grace period.
        let mut registered_during_grace_period = false;
        if let Some(old_info) = state.infos.get(&key) {
            let hf = self.blockchain.get_hard_fork_version(block_height);
            if hf >= SERVICE_NODE_VERSION {
                let expiry_height = old_info.registration_height
                    + self.blockchain.nettype().staking_lock_blocks();
                if block_height < expiry_height {
                    debug!("registration tx rejected: {}", StakingError::StillLocked);
                    return false;
                }
                // keeps its spot in the reward queue when re-registering in grace
                registered_during_grace_period = true;
                info.last_reward_block_height = old_info.last_reward_block_height;
                info.last_reward_transaction_index = old_info.last_reward_transaction_index;
            } else {
                return false;
            }
        }

        if self.is_mine(&key) {
            if registered_during_grace_period {
                info!(
                    "service node re-registered (yours): {} at block height: {}",
                    key, block_height
                );
            } else {
                info!(
                    "service node registered (yours): {} at block height: {}",
                    key, block_height
                );
            }
        } else {
            debug!("new service node registered: {} at block height: {}", key, block_height);
        }

        state
            .rollback_events
            .push_back(RollbackEvent::New { block_height, key });
        state.infos.insert(key, info);
        true
    }

    fn process_contribution_tx(
        &self,
        state: &mut ListState,
        tx: &Transaction,
        block_height: Height,
        index: u32,
    ) {
        let Some(pubkey) = tx_extra::get_service_node_pubkey(&tx.extra) else {
            return;
        };
        let Some(info) = state.infos.get(&pubkey) else {
            return;
        };

        let hf_version = self.blockchain.get_hard_fork_version(block_height);
        let block_for_unlock = if hf_version >= 12 {
            info.registration_height
        } else {
            block_height
        };

        let Some((address, mut transferred)) = self.get_contribution(tx, block_for_unlock) else {
            return;
        };

        if info.is_fully_funded() {
            return;
        }

        if hf_version >= 12 {
            let burned_amount = tx_extra::get_burned_amount(&tx.extra).unwrap_or(0);
            let total_fee = tx.total_fee();
            let miner_fee = tx.miner_fee(hf_version).unwrap_or(total_fee);
            let burn_fee = total_fee - miner_fee;
            let b_fee = if hf_version < 16 { transferred / 1000 } else { 1 };

            if burn_fee < b_fee {
                return;
            }
            if burned_amount < total_fee - miner_fee {
                return;
            }
            if transferred < MIN_POOL_STAKERS_V12 * COIN {
                return;
            }
        }

        if (12..17).contains(&hf_version) && transferred > MAX_POOL_STAKERS_V12 * COIN {
            return;
        }

        let max_contribs = if hf_version > 11 {
            MAX_NUMBER_OF_CONTRIBUTORS_V3
        } else if hf_version > 9 {
            MAX_NUMBER_OF_CONTRIBUTORS_V2
        } else {
            MAX_NUMBER_OF_CONTRIBUTORS
        };

        let is_existing_contributor =
            info.contributors.iter().any(|c| c.address == address);
        if !is_existing_contributor
            && (info.contributors.len() as u64 >= max_contribs
                || transferred < info.min_contribution(hf_version))
        {
            return;
        }

        state.rollback_events.push_back(RollbackEvent::Change {
            block_height,
            key: pubkey,
            info: info.clone(),
        });

        let info = state.infos.get_mut(&pubkey).expect("checked above");
        if !is_existing_contributor {
            info.contributors.push(Contribution::new(0, address));
        }
        let contributor_idx = info
            .contributors
            .iter()
            .position(|c| c.address == address)
            .expect("just ensured");

        let staking_req = if hf_version < 12 {
            info.staking_requirement
        } else if hf_version < 17 {
            MAX_POOL_STAKERS_V12 * COIN
        } else {
            info.staking_requirement
        };

        // cannot raise total_reserved past the staking requirement
        let contributor = &info.contributors[contributor_idx];
        let can_increase_reserved_by = staking_req.saturating_sub(info.total_reserved);
        let max_amount = contributor.reserved + can_increase_reserved_by;
        transferred = transferred.min(max_amount - contributor.amount);

        let contributor = &mut info.contributors[contributor_idx];
        contributor.amount += transferred;
        info.total_contributed += transferred;

        let contributor = &mut info.contributors[contributor_idx];
        if contributor.amount > contributor.reserved {
            info.total_reserved += contributor.amount - contributor.reserved;
            contributor.reserved = contributor.amount;
        }

        info.last_reward_block_height = block_height;
        info.last_reward_transaction_index = index;

        debug!("contribution of {} received for service node {}", transferred, pubkey);
    }

    fn process_swap_tx(&self, tx: &Transaction, block_height: Height) -> Result<(), StakingError> {
        let memo = tx_extra::get_memo(&tx.extra).ok_or(StakingError::ParseError)?;
        let tx_key = tx_extra::get_tx_secret_key(&tx.extra).ok_or(StakingError::ParseError)?;

        // The contributor field is never consulted on this path, so the
        // derivation runs against the null address; decodes yield zero and
        // the memo comparison does the real gating.
        let address = Address::NULL;
        let derivation = generate_key_derivation(&address.view_public_key, &tx_key)
            .map_err(|_| StakingError::ParseError)?;

        let mut transferred = 0u64;
        for i in 0..tx.vout.len() {
            if self.contribution_output_has_correct_unlock_time(tx, i, block_height) {
                transferred += self.staking_output_contribution(tx, i, &derivation);
            }
        }

        let memo =
            serde_json::from_slice::<SwapMemo>(&memo).map_err(|_| StakingError::ParseError)?;

        if transferred.to_string() != memo.amount {
            return Err(StakingError::SwapMismatch);
        }
        Ok(())
    }

    fn process_deregistration_tx(
        &self,
        state: &mut ListState,
        tx: &Transaction,
        block_height: Height,
    ) -> Result<(), StakingError> {
        if tx.tx_type != TxType::Deregister {
            return Err(StakingError::ParseError);
        }

        let Some(deregister) = tx_extra::get_service_node_deregister(&tx.extra) else {
            error!("deregister tx did not have deregister data in tx extra, possibly corrupt tx in blockchain");
            return Err(StakingError::ParseError);
        };

        let Some(quorum) = state.quorum_states.get(&deregister.block_height) else {
            error!(
                "quorum state for height: {}, was not stored by the daemon",
                deregister.block_height
            );
            return Err(StakingError::QuorumMissing(deregister.block_height));
        };

        let Some(key) = quorum
            .nodes_to_test
            .get(deregister.service_node_index as usize)
            .copied()
        else {
            error!("service node index to vote off has become invalid, quorum rules have changed without a hardfork");
            return Err(StakingError::QuorumMissing(deregister.block_height));
        };

        let Some(info) = state.infos.remove(&key) else {
            return Err(StakingError::RegistryMissingKey);
        };

        if self.is_mine(&key) {
            warn!("deregistration for service node (yours): {}", key);
        } else {
            debug!("deregistration for service node: {}", key);
        }

        state.rollback_events.push_back(RollbackEvent::Change {
            block_height,
            key,
            info,
        });
        Ok(())
    }

    fn update_swarms(&self, state: &mut ListState, height: Height) {
        let seed = self.blockchain.get_block_id_by_height(height).seed_u64();

        let mut buckets = SwarmBuckets::new();
        for (pubkey, info) in &state.infos {
            buckets.entry(info.swarm_id).or_default().push(*pubkey);
        }

        calc_swarm_changes(&mut buckets, seed);

        for (swarm_id, nodes) in &buckets {
            for node in nodes {
                let Some(info) = state.infos.get(node) else {
                    continue;
                };
                if info.swarm_id == *swarm_id {
                    continue;
                }
                state.rollback_events.push_back(RollbackEvent::Change {
                    block_height: height,
                    key: *node,
                    info: info.clone(),
                });
                state.infos.get_mut(node).expect("present").swarm_id = *swarm_id;
            }
        }
    }

    fn get_expired_nodes(&self, state: &ListState, block_height: Height) -> Vec<PublicKey> {
        let mut expired_nodes = Vec::new();
        let hard_fork_version = self.blockchain.get_hard_fork_version(block_height);

        let mut lock_blocks = self.blockchain.nettype().staking_lock_blocks();
        if hard_fork_version >= SERVICE_NODE_VERSION {
            lock_blocks += STAKING_REQUIREMENT_LOCK_BLOCKS_EXCESS;
        }

        if block_height < lock_blocks {
            return expired_nodes;
        }

        if hard_fork_version >= SERVICE_NODE_VERSION {
            for (pubkey, info) in &state.infos {
                let node_expiry_height = info.registration_height + lock_blocks;
                if block_height > node_expiry_height {
                    expired_nodes.push(*pubkey);
                }
            }
        } else {
            // pre-excess rule: whatever registered exactly lock_blocks ago lapses
            let expired_nodes_block_height = block_height - lock_blocks;
            let blocks = match self.blockchain.get_blocks(expired_nodes_block_height, 1) {
                Ok(blocks) if !blocks.is_empty() => blocks,
                _ => {
                    error!("unable to get historical blocks");
                    return expired_nodes;
                }
            };
            let block = &blocks[0];
            let (txs, _missed) = self.blockchain.get_transactions(&block.tx_hashes);
            for (index, tx) in txs.iter().enumerate() {
                if let Ok((key, _)) = self.is_registration_tx(
                    tx,
                    block.timestamp,
                    expired_nodes_block_height,
                    index as u32,
                ) {
                    expired_nodes.push(key);
                }
            }
        }

        expired_nodes
    }

    fn store_quorum_state(&self, state: &mut ListState, height: Height) {
        let block_hash = self.blockchain.get_block_id_by_height(height);
        if block_hash.is_zero() {
            error!("block height: {} returned null hash", height);
            return;
        }

        let full_node_list = self.eligible_pubkeys(state);
        let quorum = derive_quorum_state(&full_node_list, block_hash.seed_u64());
        state.quorum_states.insert(height, quorum);
    }

    // ---- persistence -----------------------------------------------------

    fn store_locked(&self, state: &ListState) -> Result<(), RegistryError> {
        if self.blockchain.get_current_hard_fork_version() < SERVICE_NODE_VERSION {
            return Ok(());
        }

        let blob = bincode::serialize(state)
            .map_err(|e| RegistryError::Store(e.to_string()))?;

        let txn = self
            .db
            .begin_write()
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        self.db
            .set_service_node_data(&blob)
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        txn.commit().map_err(|e| RegistryError::Store(e.to_string()))
    }

    fn load_locked(&self, state: &mut ListState) -> bool {
        debug!("service node list: load()");
        self.clear_locked(state, false);

        let blob = match self.db.get_service_node_data() {
            Ok(Some(blob)) => blob,
            Ok(None) => return false,
            Err(e) => {
                error!("failed to read service node data: {}", e);
                return false;
            }
        };

        let loaded: ListState = match bincode::deserialize(&blob) {
            Ok(loaded) => loaded,
            Err(_) => {
                error!("failed to parse service node data from blob");
                return false;
            }
        };

        *state = loaded;
        info!(
            "service node data loaded successfully, height: {}; {} nodes and {} rollback events",
            state.height,
            state.infos.len(),
            state.rollback_events.len()
        );
        true
    }

    fn clear_locked(&self, state: &mut ListState, delete_db_entry: bool) {
        state.infos.clear();
        state.rollback_events.clear();
        state.quorum_states.clear();

        if delete_db_entry {
            let cleared = self
                .db
                .begin_write()
                .and_then(|txn| self.db.clear_service_node_data().and_then(|_| txn.commit()));
            if let Err(e) = cleared {
                error!("failed to clear service node data: {}", e);
            }
        }

        state.height =
            crate::config::fork_activation_height(self.blockchain.nettype(), SERVICE_NODE_VERSION)
                .unwrap_or(0);
    }

    fn init_locked(&self, state: &mut ListState) -> Result<(), RegistryError> {
        if self.blockchain.get_current_hard_fork_version() < SERVICE_NODE_VERSION {
            self.clear_locked(state, true);
            return Ok(());
        }

        let current_height = self.blockchain.get_current_blockchain_height();
        let loaded = self.load_locked(state);
        if loaded && state.height == current_height {
            return Ok(());
        }
        if !loaded || state.height > current_height {
            self.clear_locked(state, true);
        }

        info!(
            "recalculating service node list, scanning blockchain from height {} to: {}",
            state.height, current_height
        );

        while state.height < current_height {
            let blocks = self
                .blockchain
                .get_blocks(state.height, 1000)
                .map_err(|e| RegistryError::Chain(e.to_string()))?;
            if blocks.is_empty() {
                error!("unable to initialize service nodes list");
                return Err(RegistryError::Chain("no blocks returned".into()));
            }
            for block in &blocks {
                let (txs, missed) = self.blockchain.get_transactions(&block.tx_hashes);
                if !missed.is_empty() {
                    error!("unable to get transactions for block {}", block.hash());
                    return Err(RegistryError::Chain("missing transactions".into()));
                }
                self.process_block(state, block, &txs)?;
            }
        }
        Ok(())
    }
}
