//! Transaction memory pool.
//!
//! The pool keeps six mutually-dependent views of the pending set: the
//! blob+meta store (in the daemon database), the fee-priority order, the
//! key-image index, the timed-out memo, and the parsed/input caches that
//! only live while attached to a block. Every insert and remove goes
//! through this module so the views cannot drift apart.

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use xeq_crypto::{Hash, KeyImage};

use crate::api::{Blockchain, NodeDb, RelayMethod, TxPoolMeta, TxVerificationContext};
use crate::config::{
    Network, CRYPTONOTE_COINBASE_BLOB_RESERVED_SIZE, CRYPTONOTE_DANDELIONPP_EMBARGO_AVERAGE,
    CRYPTONOTE_MEMPOOL_TX_FROM_ALT_BLOCK_LIVETIME, CRYPTONOTE_MEMPOOL_TX_LIVETIME,
    DEFAULT_TXPOOL_MAX_WEIGHT, HF_VERSION_PER_BYTE_FEE, MEMPOOL_PRUNE_DEREGISTER_LIFETIME,
    SERVICE_NODE_VERSION,
};
use crate::error::PoolError;
use crate::reward::{block_reward_parts, get_min_block_weight, RewardContext};
use crate::service_nodes::rules::{
    DEREGISTER_LIFETIME_BY_HEIGHT, DEREGISTER_LIFETIME_BY_HEIGHT_V2,
};
use crate::tx::{Transaction, TxIn, TxVersion};
use crate::tx_extra;
use crate::types::{ForkVersion, Height};

/// Only start re-relaying after this many seconds.
const MIN_RELAY_TIME: u64 = 60 * 5;
/// At most this many seconds between resends.
const MAX_RELAY_TIME: u64 = 60 * 60 * 4;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Increasing resend backoff within min/max bounds.
fn get_relay_delay(now: u64, received: u64) -> u64 {
    let d = (now.saturating_sub(received) + MIN_RELAY_TIME) / MIN_RELAY_TIME * MIN_RELAY_TIME;
    d.min(MAX_RELAY_TIME)
}

/// Exponentially distributed Dandelion++ embargo, mean
/// `CRYPTONOTE_DANDELIONPP_EMBARGO_AVERAGE` seconds.
fn sample_embargo_seconds() -> u64 {
    let u: f64 = rand::random::<f64>().clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON);
    (-(1.0 - u).ln() * CRYPTONOTE_DANDELIONPP_EMBARGO_AVERAGE as f64) as u64
}

fn get_transaction_weight_limit(version: ForkVersion) -> u64 {
    // from v8, limit a tx to 50% of the minimum block weight
    if version >= 8 {
        get_min_block_weight(version) / 2 - CRYPTONOTE_COINBASE_BLOB_RESERVED_SIZE
    } else {
        get_min_block_weight(version) - CRYPTONOTE_COINBASE_BLOB_RESERVED_SIZE
    }
}

/// Priority-set key: deregisters first, then higher fee per byte, then
/// earlier arrival. The hash breaks the last ties so the set stays a set.
#[derive(Clone, Debug)]
struct PriorityEntry {
    is_deregister: bool,
    fee_per_byte: f64,
    receive_time: u64,
    id: Hash,
}

impl PartialEq for PriorityEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl Eq for PriorityEntry {}

impl PartialOrd for PriorityEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .is_deregister
            .cmp(&self.is_deregister)
            .then(other.fee_per_byte.total_cmp(&self.fee_per_byte))
            .then(self.receive_time.cmp(&other.receive_time))
            .then(self.id.cmp(&other.id))
    }
}

impl PriorityEntry {
    fn new(is_deregister: bool, fee: u64, weight: u64, receive_time: u64, id: Hash) -> Self {
        PriorityEntry {
            is_deregister,
            fee_per_byte: fee as f64 / weight.max(1) as f64,
            receive_time,
            id,
        }
    }
}

#[derive(Default)]
struct PoolInner {
    spent_key_images: HashMap<KeyImage, HashSet<Hash>>,
    txs_by_fee_and_receive_time: BTreeSet<PriorityEntry>,
    timed_out_transactions: HashSet<Hash>,
    /// Only populated while attached to a block.
    parsed_tx_cache: HashMap<Hash, Transaction>,
    input_cache: HashMap<Hash, (bool, TxVerificationContext, Height, Hash)>,
    txpool_weight: u64,
    txpool_max_weight: u64,
    mine_stem_txes: bool,
    cookie: u64,
}

/// A transaction removed from the pool for inclusion in a block.
#[derive(Clone, Debug)]
pub struct TakenTx {
    pub tx: Transaction,
    pub blob: Vec<u8>,
    pub weight: u64,
    pub fee: u64,
    pub relayed: bool,
    pub do_not_relay: bool,
    pub double_spend_seen: bool,
    pub pruned: bool,
}

/// RPC-facing view of one pool entry.
#[derive(Clone, Debug)]
pub struct TxDetails {
    pub tx: Transaction,
    pub blob_size: usize,
    pub weight: u64,
    pub fee: u64,
    pub max_used_block_id: Hash,
    pub max_used_block_height: Height,
    pub kept_by_block: bool,
    pub last_failed_height: Height,
    pub last_failed_id: Hash,
    pub receive_time: u64,
    pub last_relayed_time: u64,
    pub relayed: bool,
    pub do_not_relay: bool,
    pub double_spend_seen: bool,
}

/// Result of filling a block template from the pool.
#[derive(Clone, Debug, Default)]
pub struct BlockTemplateFill {
    pub tx_hashes: Vec<Hash>,
    pub total_weight: u64,
    pub fee: u64,
    pub expected_reward: u64,
}

pub struct TxMemoryPool<B: Blockchain, D: NodeDb> {
    blockchain: Arc<B>,
    db: Arc<D>,
    inner: Mutex<PoolInner>,
}

impl<B: Blockchain, D: NodeDb> TxMemoryPool<B, D> {
    pub fn new(blockchain: Arc<B>, db: Arc<D>) -> Self {
        TxMemoryPool {
            blockchain,
            db,
            inner: Mutex::new(PoolInner {
                txpool_max_weight: DEFAULT_TXPOOL_MAX_WEIGHT,
                ..Default::default()
            }),
        }
    }

    /// Rebuild in-memory indices from the persisted pool. Non-kept entries
    /// load first so a key-image collision evicts the alt-chain copy.
    pub fn init(&self, max_txpool_weight: u64, mine_stem_txes: bool) -> Result<(), PoolError> {
        let mut inner = self.inner.lock();
        inner.txpool_max_weight = if max_txpool_weight != 0 {
            max_txpool_weight
        } else {
            DEFAULT_TXPOOL_MAX_WEIGHT
        };
        inner.txs_by_fee_and_receive_time.clear();
        inner.spent_key_images.clear();
        inner.txpool_weight = 0;

        let mut remove = Vec::new();
        for pass in 0..2 {
            let kept = pass == 1;
            let mut broken = Ok(());
            let mut parsed: Vec<(Hash, TxPoolMeta, Transaction)> = Vec::new();
            self.db
                .for_all_txpool_txes(true, &mut |txid, meta, blob| {
                    if kept != meta.kept_by_block {
                        return true;
                    }
                    let Some(blob) = blob else { return true };
                    match bincode::deserialize::<Transaction>(blob) {
                        Ok(tx) => parsed.push((*txid, meta.clone(), tx)),
                        Err(_) => {
                            warn!("failed to parse tx from txpool, removing");
                            remove.push(*txid);
                        }
                    }
                    true
                })
                .map_err(|e| PoolError::Store(e.to_string()))?;

            for (txid, meta, tx) in parsed {
                if let Err(e) = Self::insert_key_images(&mut inner, &tx, &txid, meta.relay_method)
                {
                    error!("failed to insert key images from txpool tx: {}", e);
                    broken = Err(e);
                    break;
                }
                inner.txs_by_fee_and_receive_time.insert(PriorityEntry::new(
                    tx.is_deregister(),
                    meta.fee,
                    meta.weight,
                    meta.receive_time,
                    txid,
                ));
                inner.txpool_weight += meta.weight;
            }
            broken?;
        }

        if !remove.is_empty() {
            let txn = self
                .db
                .begin_write()
                .map_err(|e| PoolError::Store(e.to_string()))?;
            for txid in &remove {
                if let Err(e) = self.db.remove_txpool_tx(txid) {
                    warn!("failed to remove corrupt transaction {}: {}", txid, e);
                }
            }
            txn.commit().map_err(|e| PoolError::Store(e.to_string()))?;
        }

        inner.mine_stem_txes = mine_stem_txes;
        inner.cookie = 0;
        self.update_gauges(&inner);
        Ok(())
    }

    pub fn deinit(&self) -> Result<(), PoolError> {
        Ok(())
    }

    // ---- admission -------------------------------------------------------

    /// Admit a transaction. `Ok(true)` means it is in the pool; `Ok(false)`
    /// means it was rejected and `tvc` says why.
    #[allow(clippy::too_many_arguments)]
    pub fn add_tx(
        &self,
        tx: &Transaction,
        id: &Hash,
        blob: &[u8],
        tx_weight: u64,
        tvc: &mut TxVerificationContext,
        tx_relay: RelayMethod,
        relayed: bool,
        version: ForkVersion,
    ) -> Result<bool, PoolError> {
        let kept_by_block = tx_relay == RelayMethod::Block;
        let mut inner = self.inner.lock();

        if tx.version == TxVersion::V0 {
            // v0 never accepted
            debug!("transaction version 0 is invalid");
            tvc.verification_failed = true;
            tvc.invalid_version = true;
            return Ok(false);
        }

        // txs that already timed out only return via a popped block
        if !kept_by_block && inner.timed_out_transactions.contains(id) {
            tvc.verification_failed = true;
            return Ok(false);
        }

        if !Self::check_inputs_types_supported(tx) {
            tvc.verification_failed = true;
            tvc.invalid_input = true;
            return Ok(false);
        }

        let fee = match tx.miner_fee(version) {
            Some(fee) => fee,
            None => {
                tvc.verification_failed = true;
                tvc.fee_too_low = true;
                0
            }
        };

        if !kept_by_block && tx.is_transfer() && !self.blockchain.check_fee(tx_weight, fee) {
            tvc.verification_failed = true;
            tvc.fee_too_low = true;
            return Ok(false);
        }

        let tx_weight_limit = get_transaction_weight_limit(version);
        if (!kept_by_block || version >= HF_VERSION_PER_BYTE_FEE) && tx_weight > tx_weight_limit {
            debug!(
                "transaction is too heavy: {} bytes, maximum weight: {}",
                tx_weight, tx_weight_limit
            );
            tvc.verification_failed = true;
            tvc.too_big = true;
            return Ok(false);
        }

        // a tx from a popped block may legitimately reuse its own images
        if !kept_by_block {
            if self.have_tx_keyimges_as_spent_locked(&inner, tx, id) {
                self.mark_double_spend_locked(&mut inner, tx)?;
                debug!("transaction with id={} used already spent key images", id);
                tvc.verification_failed = true;
                tvc.double_spend = true;
                return Ok(false);
            }
            if self.have_deregister_tx_already_locked(tx)? {
                self.mark_double_spend_locked(&mut inner, tx)?;
                debug!("transaction with id={} already has a duplicate deregister for height", id);
                tvc.verification_failed = true;
                tvc.double_spend = true;
                return Ok(false);
            }
        }

        if !self.blockchain.check_tx_outputs(tx, tvc) {
            debug!("transaction with id={} has at least one invalid output", id);
            tvc.verification_failed = true;
            tvc.invalid_output = true;
            return Ok(false);
        }

        // assume failure until success is certain
        tvc.verification_failed = true;

        let receive_time = unix_now();
        let (inputs_ok, max_used_block_height, max_used_block_id) =
            self.check_tx_inputs_cached(&mut inner, tx, id, tvc, kept_by_block);

        let mut meta = TxPoolMeta::default();
        if !inputs_ok {
            if !kept_by_block {
                debug!("tx used wrong inputs, rejected");
                tvc.verification_failed = true;
                tvc.invalid_input = true;
                return Ok(false);
            }
            // valid in its alt block; keep it around with cleared
            // max_used_block_id so the check reruns later
            meta.weight = tx_weight;
            meta.fee = fee;
            meta.receive_time = receive_time;
            meta.last_relayed_time = unix_now();
            meta.relayed = relayed;
            meta.relay_method = tx_relay;
            meta.kept_by_block = true;
            meta.double_spend_seen = self.have_tx_keyimges_as_spent_locked(&inner, tx, id)
                || self.have_deregister_tx_already_locked(tx)?;
            meta.is_deregister = tx.is_deregister();

            inner.parsed_tx_cache.insert(*id, tx.clone());
            let txn = self
                .db
                .begin_write()
                .map_err(|e| PoolError::Store(e.to_string()))?;
            Self::insert_key_images(&mut inner, tx, id, tx_relay)?;
            self.db
                .add_txpool_tx(id, blob, &meta)
                .map_err(|e| PoolError::Store(e.to_string()))?;
            inner.txs_by_fee_and_receive_time.insert(PriorityEntry::new(
                tx.is_deregister(),
                fee,
                tx_weight,
                receive_time,
                *id,
            ));
            txn.commit().map_err(|e| PoolError::Store(e.to_string()))?;

            tvc.verification_impossible = true;
            tvc.added_to_pool = true;
        } else {
            if kept_by_block {
                inner.parsed_tx_cache.insert(*id, tx.clone());
            }
            let txn = self
                .db
                .begin_write()
                .map_err(|e| PoolError::Store(e.to_string()))?;

            let existing = self
                .db
                .get_txpool_tx_meta(id)
                .map_err(|e| PoolError::Store(e.to_string()))?;
            let mut tx_relay = tx_relay;
            if let Some(existing_meta) = &existing {
                meta = existing_meta.clone();
                // Dandelion++ loop: a stem tx seen again in stem state has
                // looped back to us, so flip it to fluff. `local` does not
                // count, it should still route out over the public stem.
                if tx_relay == RelayMethod::Stem && meta.dandelionpp_stem() {
                    tx_relay = RelayMethod::Fluff;
                }
            } else {
                meta.relay_method = RelayMethod::None;
            }

            if meta.relay_method.upgrade(tx_relay) || existing.is_none() {
                meta.last_relayed_time = u64::MAX;
                meta.receive_time = receive_time;
                meta.weight = tx_weight;
                meta.fee = fee;
                meta.max_used_block_id = max_used_block_id;
                meta.max_used_block_height = max_used_block_height;
                meta.last_failed_height = 0;
                meta.last_failed_id = Hash::ZERO;
                meta.relayed = relayed;
                meta.double_spend_seen = false;
                meta.pruned = false;
                meta.kept_by_block = kept_by_block;
                meta.is_deregister = tx.is_deregister();

                Self::insert_key_images(&mut inner, tx, id, tx_relay)?;
                self.db
                    .remove_txpool_tx(id)
                    .map_err(|e| PoolError::Store(e.to_string()))?;
                self.db
                    .add_txpool_tx(id, blob, &meta)
                    .map_err(|e| PoolError::Store(e.to_string()))?;
                inner.txs_by_fee_and_receive_time.insert(PriorityEntry::new(
                    tx.is_deregister(),
                    fee,
                    tx_weight,
                    receive_time,
                    *id,
                ));
            }
            txn.commit().map_err(|e| PoolError::Store(e.to_string()))?;
            tvc.added_to_pool = true;

            if meta.fee > 0 || tx.is_deregister() {
                tvc.relay = tx_relay;
            }
        }

        tvc.verification_failed = false;
        inner.txpool_weight += tx_weight;
        inner.cookie += 1;

        info!(
            "transaction added to pool: txid {} weight: {} fee/byte: {:.3}",
            id,
            tx_weight,
            fee as f64 / tx_weight.max(1) as f64
        );

        let max = inner.txpool_max_weight;
        self.prune_locked(&mut inner, max)?;
        self.update_gauges(&inner);
        Ok(true)
    }

    fn check_inputs_types_supported(tx: &Transaction) -> bool {
        tx.vin.iter().all(|i| matches!(i, TxIn::ToKey { .. }))
    }

    fn check_tx_inputs_cached(
        &self,
        inner: &mut PoolInner,
        tx: &Transaction,
        id: &Hash,
        tvc: &mut TxVerificationContext,
        kept_by_block: bool,
    ) -> (bool, Height, Hash) {
        if !kept_by_block {
            if let Some((ok, cached_tvc, height, block_id)) = inner.input_cache.get(id) {
                *tvc = *cached_tvc;
                return (*ok, *height, *block_id);
            }
        }
        let (ok, height, block_id) = self.blockchain.check_tx_inputs(tx, tvc, kept_by_block);
        if !kept_by_block {
            inner.input_cache.insert(*id, (ok, *tvc, height, block_id));
        }
        (ok, height, block_id)
    }

    fn insert_key_images(
        inner: &mut PoolInner,
        tx: &Transaction,
        id: &Hash,
        tx_relay: RelayMethod,
    ) -> Result<(), PoolError> {
        for k_image in tx.key_images() {
            let set = inner.spent_key_images.entry(*k_image).or_default();
            // only kept-by-block may share a key image with another pool tx
            if tx_relay != RelayMethod::Block {
                let one_txid = set.is_empty() || (set.len() == 1 && set.contains(id));
                if !one_txid {
                    return Err(PoolError::IndexBroken(
                        "multiple txs share a key image outside kept-by-block",
                    ));
                }
            }
            set.insert(*id);
        }
        inner.cookie += 1;
        Ok(())
    }

    fn remove_transaction_keyimages(
        inner: &mut PoolInner,
        tx: &Transaction,
        id: &Hash,
    ) -> Result<(), PoolError> {
        for k_image in tx.key_images() {
            let Some(set) = inner.spent_key_images.get_mut(k_image) else {
                error!("failed to find transaction input in key images, tx id={}", id);
                return Err(PoolError::IndexBroken("key image missing on removal"));
            };
            if !set.remove(id) {
                error!("transaction id not found in key image set, tx id={}", id);
                return Err(PoolError::IndexBroken("tx id missing from key image set"));
            }
            if set.is_empty() {
                inner.spent_key_images.remove(k_image);
            }
        }
        inner.cookie += 1;
        Ok(())
    }

    // ---- removal ---------------------------------------------------------

    /// Remove a transaction for inclusion in a block.
    pub fn take_tx(&self, id: &Hash) -> Result<Option<TakenTx>, PoolError> {
        let mut inner = self.inner.lock();

        let txn = self
            .db
            .begin_write()
            .map_err(|e| PoolError::Store(e.to_string()))?;
        let Some(meta) = self
            .db
            .get_txpool_tx_meta(id)
            .map_err(|e| PoolError::Store(e.to_string()))?
        else {
            error!("failed to find tx meta in txpool");
            return Ok(None);
        };
        let Some(blob) = self
            .db
            .get_txpool_tx_blob(id)
            .map_err(|e| PoolError::Store(e.to_string()))?
        else {
            error!("failed to find tx blob in txpool");
            return Ok(None);
        };

        let tx = if let Some(tx) = inner.parsed_tx_cache.get(id) {
            tx.clone()
        } else {
            bincode::deserialize::<Transaction>(&blob).map_err(|_| PoolError::CorruptBlob)?
        };

        // remove from the db first so key images survive a failure here
        self.db
            .remove_txpool_tx(id)
            .map_err(|e| PoolError::Store(e.to_string()))?;
        inner.txpool_weight = inner.txpool_weight.saturating_sub(meta.weight);
        Self::remove_transaction_keyimages(&mut inner, &tx, id)?;
        txn.commit().map_err(|e| PoolError::Store(e.to_string()))?;

        if let Some(entry) = Self::find_sorted_entry(&inner, id) {
            inner.txs_by_fee_and_receive_time.remove(&entry);
        }
        inner.cookie += 1;
        self.update_gauges(&inner);

        Ok(Some(TakenTx {
            tx,
            blob,
            weight: meta.weight,
            fee: meta.fee,
            relayed: meta.relayed,
            do_not_relay: meta.do_not_relay,
            double_spend_seen: meta.double_spend_seen,
            pruned: meta.pruned,
        }))
    }

    fn find_sorted_entry(inner: &PoolInner, id: &Hash) -> Option<PriorityEntry> {
        inner
            .txs_by_fee_and_receive_time
            .iter()
            .find(|e| e.id == *id)
            .cloned()
    }

    /// Evict stale deregisters from the low-priority end until the pool
    /// fits in `bytes`. Standard transactions and young deregisters stop
    /// the sweep; kept-by-block entries are skipped.
    pub fn prune(&self, bytes: u64) -> Result<(), PoolError> {
        let mut inner = self.inner.lock();
        let bytes = if bytes == 0 { inner.txpool_max_weight } else { bytes };
        self.prune_locked(&mut inner, bytes)?;
        self.update_gauges(&inner);
        Ok(())
    }

    fn prune_locked(&self, inner: &mut PoolInner, bytes: u64) -> Result<(), PoolError> {
        let now = unix_now();
        let mut changed = false;
        let mut skip = 0usize;

        let txn = self
            .db
            .begin_write()
            .map_err(|e| PoolError::Store(e.to_string()))?;
        loop {
            let Some(entry) = inner
                .txs_by_fee_and_receive_time
                .iter()
                .rev()
                .nth(skip)
                .cloned()
            else {
                break;
            };

            let is_standard_tx = !entry.is_deregister;
            if is_standard_tx
                || entry.receive_time >= now.saturating_sub(MEMPOOL_PRUNE_DEREGISTER_LIFETIME)
            {
                break;
            }
            if inner.txpool_weight <= bytes {
                break;
            }

            let Some(meta) = self
                .db
                .get_txpool_tx_meta(&entry.id)
                .map_err(|e| PoolError::Store(e.to_string()))?
            else {
                error!("failed to find tx meta in txpool");
                break;
            };
            // kept-by-block entries are likely mid-reorg, leave them alone
            if meta.kept_by_block {
                skip += 1;
                continue;
            }

            let Some(blob) = self
                .db
                .get_txpool_tx_blob(&entry.id)
                .map_err(|e| PoolError::Store(e.to_string()))?
            else {
                error!("failed to find tx blob in txpool");
                break;
            };
            let tx = bincode::deserialize::<Transaction>(&blob)
                .map_err(|_| PoolError::CorruptBlob)?;

            debug!(
                "pruning tx {} from txpool: weight: {}, fee/byte: {:.3}",
                entry.id, meta.weight, entry.fee_per_byte
            );
            self.db
                .remove_txpool_tx(&entry.id)
                .map_err(|e| PoolError::Store(e.to_string()))?;
            inner.txpool_weight = inner.txpool_weight.saturating_sub(meta.weight);
            Self::remove_transaction_keyimages(inner, &tx, &entry.id)?;
            inner.txs_by_fee_and_receive_time.remove(&entry);
            changed = true;
        }
        txn.commit().map_err(|e| PoolError::Store(e.to_string()))?;

        if changed {
            inner.cookie += 1;
        }
        if inner.txpool_weight > bytes {
            info!(
                "pool weight after pruning is larger than limit: {}/{}",
                inner.txpool_weight, bytes
            );
        }
        Ok(())
    }

    /// Drop transactions that sat unmined past their lifetime. Their ids go
    /// to the timed-out memo so they are not re-admitted by relay.
    pub fn remove_stuck_transactions(&self) -> Result<usize, PoolError> {
        let mut inner = self.inner.lock();
        let now = unix_now();

        let mut remove: Vec<(Hash, u64)> = Vec::new();
        self.db
            .for_all_txpool_txes(false, &mut |txid, meta, _| {
                let tx_age = now.saturating_sub(meta.receive_time);
                if (tx_age > CRYPTONOTE_MEMPOOL_TX_LIVETIME && !meta.kept_by_block)
                    || (tx_age > CRYPTONOTE_MEMPOOL_TX_FROM_ALT_BLOCK_LIVETIME
                        && meta.kept_by_block)
                    || (meta.is_deregister && tx_age > MEMPOOL_PRUNE_DEREGISTER_LIFETIME)
                {
                    debug!("tx {} removed from tx pool, outdated, age: {}", txid, tx_age);
                    remove.push((*txid, meta.weight));
                }
                true
            })
            .map_err(|e| PoolError::Store(e.to_string()))?;

        if remove.is_empty() {
            return Ok(0);
        }

        for (txid, _) in &remove {
            match Self::find_sorted_entry(&inner, txid) {
                Some(entry) => {
                    inner.txs_by_fee_and_receive_time.remove(&entry);
                }
                None => {
                    warn!(
                        "removing tx {} from pool, but it was not in the sorted container",
                        txid
                    );
                }
            }
            inner.timed_out_transactions.insert(*txid);
        }

        let txn = self
            .db
            .begin_write()
            .map_err(|e| PoolError::Store(e.to_string()))?;
        for (txid, weight) in &remove {
            let blob = self
                .db
                .get_txpool_tx_blob(txid)
                .map_err(|e| PoolError::Store(e.to_string()))?;
            match blob.and_then(|b| bincode::deserialize::<Transaction>(&b).ok()) {
                Some(tx) => {
                    self.db
                        .remove_txpool_tx(txid)
                        .map_err(|e| PoolError::Store(e.to_string()))?;
                    inner.txpool_weight = inner.txpool_weight.saturating_sub(*weight);
                    let _ = Self::remove_transaction_keyimages(&mut inner, &tx, txid);
                }
                None => {
                    error!("failed to parse tx from txpool");
                }
            }
        }
        txn.commit().map_err(|e| PoolError::Store(e.to_string()))?;
        inner.cookie += 1;
        self.update_gauges(&inner);
        Ok(remove.len())
    }

    // ---- relay -----------------------------------------------------------

    /// Transactions due for (re)broadcast.
    pub fn get_relayable_transactions(
        &self,
    ) -> Result<Vec<(Hash, Vec<u8>, RelayMethod)>, PoolError> {
        let _inner = self.inner.lock();
        let now = unix_now();
        let mut txs = Vec::new();

        self.db
            .for_all_txpool_txes(true, &mut |txid, meta, blob| {
                // 0-fee and deregister txs are never relayed from here
                if meta.pruned || meta.fee == 0 || meta.do_not_relay || meta.is_deregister {
                    return true;
                }
                if !meta.dandelionpp_stem()
                    && now.saturating_sub(meta.last_relayed_time)
                        <= get_relay_delay(now, meta.receive_time)
                {
                    return true;
                }
                // stem txs carry their embargo deadline in last_relayed_time
                if meta.dandelionpp_stem() && meta.last_relayed_time > now {
                    return true;
                }

                // past half the lifetime we stop re-relaying so flushed txs
                // do not bounce between nodes with skewed flush times
                let max_age = if meta.kept_by_block {
                    CRYPTONOTE_MEMPOOL_TX_FROM_ALT_BLOCK_LIVETIME
                } else {
                    CRYPTONOTE_MEMPOOL_TX_LIVETIME
                };
                if now.saturating_sub(meta.receive_time) <= max_age / 2 {
                    if let Some(blob) = blob {
                        txs.push((*txid, blob.to_vec(), meta.relay_method));
                    }
                }
                true
            })
            .map_err(|e| PoolError::Store(e.to_string()))?;
        Ok(txs)
    }

    /// Record a broadcast; stem txs get a fresh embargo deadline.
    pub fn set_relayed(&self, hashes: &[Hash], method: RelayMethod) -> Result<(), PoolError> {
        let _inner = self.inner.lock();
        let now = unix_now();

        let txn = self
            .db
            .begin_write()
            .map_err(|e| PoolError::Store(e.to_string()))?;
        for hash in hashes {
            match self.db.get_txpool_tx_meta(hash) {
                Ok(Some(mut meta)) => {
                    meta.relay_method.upgrade(method);
                    meta.relayed = true;
                    meta.last_relayed_time = if meta.dandelionpp_stem() {
                        now + sample_embargo_seconds()
                    } else {
                        now
                    };
                    if let Err(e) = self.db.update_txpool_tx(hash, &meta) {
                        error!("failed to update txpool transaction metadata: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => error!("failed to read txpool transaction metadata: {}", e),
            }
        }
        txn.commit().map_err(|e| PoolError::Store(e.to_string()))
    }

    // ---- queries ---------------------------------------------------------

    pub fn have_tx(&self, id: &Hash) -> bool {
        let _inner = self.inner.lock();
        self.db.txpool_has_tx(id)
    }

    pub fn have_tx_keyimg_as_spent(&self, key_image: &KeyImage, txid: &Hash) -> bool {
        let inner = self.inner.lock();
        Self::have_keyimg_as_spent_locked(&inner, self.db.as_ref(), key_image, txid)
    }

    fn have_keyimg_as_spent_locked(
        inner: &PoolInner,
        db: &D,
        key_image: &KeyImage,
        txid: &Hash,
    ) -> bool {
        let Some(set) = inner.spent_key_images.get(key_image) else {
            return false;
        };
        if set.is_empty() {
            return false;
        }
        // another tx using the image always counts as spent
        if set.len() > 1 || !set.contains(txid) {
            return true;
        }
        db.get_txpool_tx_meta(txid)
            .ok()
            .flatten()
            .is_some_and(|meta| meta.matches_legacy())
    }

    fn have_tx_keyimges_as_spent_locked(
        &self,
        inner: &PoolInner,
        tx: &Transaction,
        txid: &Hash,
    ) -> bool {
        tx.key_images()
            .any(|k| Self::have_keyimg_as_spent_locked(inner, self.db.as_ref(), k, txid))
    }

    pub fn get_txpool_weight(&self) -> u64 {
        self.inner.lock().txpool_weight
    }

    pub fn set_txpool_max_weight(&self, bytes: u64) {
        self.inner.lock().txpool_max_weight = bytes;
    }

    pub fn get_transactions_count(&self) -> usize {
        let _inner = self.inner.lock();
        self.db.txpool_tx_count()
    }

    pub fn get_transactions(&self) -> Result<Vec<Transaction>, PoolError> {
        let _inner = self.inner.lock();
        let mut txs = Vec::new();
        self.db
            .for_all_txpool_txes(true, &mut |_txid, _meta, blob| {
                if let Some(blob) = blob {
                    match bincode::deserialize::<Transaction>(blob) {
                        Ok(tx) => txs.push(tx),
                        Err(_) => error!("failed to parse tx from txpool"),
                    }
                }
                true
            })
            .map_err(|e| PoolError::Store(e.to_string()))?;
        Ok(txs)
    }

    pub fn get_transaction_hashes(&self) -> Result<Vec<Hash>, PoolError> {
        let _inner = self.inner.lock();
        let mut out = Vec::new();
        self.db
            .for_all_txpool_txes(false, &mut |txid, _meta, _| {
                out.push(*txid);
                true
            })
            .map_err(|e| PoolError::Store(e.to_string()))?;
        Ok(out)
    }

    pub fn get_transaction(&self, id: &Hash) -> Result<Option<Vec<u8>>, PoolError> {
        let _inner = self.inner.lock();
        self.db
            .get_txpool_tx_blob(id)
            .map_err(|e| PoolError::Store(e.to_string()))
    }

    pub fn get_transaction_info(&self, txid: &Hash) -> Result<Option<TxDetails>, PoolError> {
        let inner = self.inner.lock();
        let Some(meta) = self
            .db
            .get_txpool_tx_meta(txid)
            .map_err(|e| PoolError::Store(e.to_string()))?
        else {
            return Ok(None);
        };
        let Some(blob) = self
            .db
            .get_txpool_tx_blob(txid)
            .map_err(|e| PoolError::Store(e.to_string()))?
        else {
            return Ok(None);
        };
        let tx = if let Some(tx) = inner.parsed_tx_cache.get(txid) {
            tx.clone()
        } else {
            bincode::deserialize::<Transaction>(&blob).map_err(|_| PoolError::CorruptBlob)?
        };
        Ok(Some(TxDetails {
            tx,
            blob_size: blob.len(),
            weight: meta.weight,
            fee: meta.fee,
            max_used_block_id: meta.max_used_block_id,
            max_used_block_height: meta.max_used_block_height,
            kept_by_block: meta.kept_by_block,
            last_failed_height: meta.last_failed_height,
            last_failed_id: meta.last_failed_id,
            receive_time: meta.receive_time,
            last_relayed_time: if meta.dandelionpp_stem() {
                0
            } else {
                meta.last_relayed_time
            },
            relayed: meta.relayed,
            do_not_relay: meta.do_not_relay,
            double_spend_seen: meta.double_spend_seen,
        }))
    }

    /// Broadcast-visible pool blobs whose hashes are not in `hashes`.
    pub fn get_complement(&self, hashes: &[Hash]) -> Result<Vec<Vec<u8>>, PoolError> {
        let _inner = self.inner.lock();
        let mut out = Vec::new();
        self.db
            .for_all_txpool_txes(true, &mut |txid, meta, blob| {
                if !matches!(meta.relay_method, RelayMethod::Block | RelayMethod::Fluff) {
                    return true;
                }
                if hashes.contains(txid) {
                    return true;
                }
                if let Some(blob) = blob {
                    out.push(blob.to_vec());
                }
                true
            })
            .map_err(|e| PoolError::Store(e.to_string()))?;
        Ok(out)
    }

    pub fn check_for_key_images(&self, key_images: &[KeyImage]) -> Vec<bool> {
        let inner = self.inner.lock();
        key_images
            .iter()
            .map(|image| {
                inner
                    .spent_key_images
                    .get(image)
                    .is_some_and(|set| !set.is_empty())
            })
            .collect()
    }

    // ---- block lifecycle -------------------------------------------------

    pub fn on_blockchain_inc(&self, _new_height: Height, _top_block_id: &Hash) {
        let mut inner = self.inner.lock();
        inner.input_cache.clear();
        inner.parsed_tx_cache.clear();
    }

    pub fn on_blockchain_dec(&self, _new_height: Height, _top_block_id: &Hash) {
        let mut inner = self.inner.lock();
        inner.input_cache.clear();
        inner.parsed_tx_cache.clear();
    }

    /// Recount the pool and drop entries now over the weight limit or
    /// already mined. Returns the number removed.
    pub fn validate(&self, version: ForkVersion) -> Result<usize, PoolError> {
        let mut inner = self.inner.lock();
        let tx_weight_limit = get_transaction_weight_limit(version);
        let mut remove = Vec::new();

        inner.txpool_weight = 0;
        let mut total: u64 = 0;
        self.db
            .for_all_txpool_txes(false, &mut |txid, meta, _| {
                total += meta.weight;
                if meta.weight > tx_weight_limit {
                    debug!("transaction {} is too big ({} bytes), removing it from pool", txid, meta.weight);
                    remove.push(*txid);
                } else if self.blockchain.have_tx(txid) {
                    debug!("transaction {} is in the blockchain, removing it from pool", txid);
                    remove.push(*txid);
                }
                true
            })
            .map_err(|e| PoolError::Store(e.to_string()))?;
        inner.txpool_weight = total;

        if remove.is_empty() {
            return Ok(0);
        }

        let mut n_removed = 0;
        let txn = self
            .db
            .begin_write()
            .map_err(|e| PoolError::Store(e.to_string()))?;
        for txid in &remove {
            let Ok(Some(blob)) = self.db.get_txpool_tx_blob(txid) else {
                error!("failed to fetch tx blob for removal");
                continue;
            };
            let Ok(tx) = bincode::deserialize::<Transaction>(&blob) else {
                error!("failed to parse tx from txpool");
                continue;
            };
            self.db
                .remove_txpool_tx(txid)
                .map_err(|e| PoolError::Store(e.to_string()))?;
            inner.txpool_weight = inner.txpool_weight.saturating_sub(tx.weight());
            let _ = Self::remove_transaction_keyimages(&mut inner, &tx, txid);
            match Self::find_sorted_entry(&inner, txid) {
                Some(entry) => {
                    inner.txs_by_fee_and_receive_time.remove(&entry);
                }
                None => warn!(
                    "removing tx {} from pool, but it was not in the sorted container",
                    txid
                ),
            }
            n_removed += 1;
        }
        txn.commit().map_err(|e| PoolError::Store(e.to_string()))?;

        if n_removed > 0 {
            inner.cookie += 1;
        }
        self.update_gauges(&inner);
        Ok(n_removed)
    }

    // ---- template fill ---------------------------------------------------

    /// Pick transactions for a block template in priority order. From the
    /// service-node fork on, a tx is accepted only if it does not shrink
    /// the expected coinbase.
    pub fn fill_block_template(
        &self,
        median_weight: u64,
        already_generated_coins: u64,
        version: ForkVersion,
    ) -> Result<BlockTemplateFill, PoolError> {
        let mut inner = self.inner.lock();

        let height = self.blockchain.get_current_blockchain_height();
        let reward_context = RewardContext {
            fee: 0,
            height,
            winner_info: Vec::new(),
        };

        let mut fill = BlockTemplateFill::default();
        let mut best_coinbase = 0u64;
        let mut coinbase = 0u64;

        // baseline: the empty block
        match block_reward_parts(
            median_weight,
            fill.total_weight,
            already_generated_coins,
            version,
            &reward_context,
            Network::Mainnet,
        ) {
            Ok(parts) => best_coinbase = parts.base_miner,
            Err(e) => {
                error!("failed to get block reward for empty block: {}", e);
                return Ok(fill);
            }
        }

        let max_total_weight_pre_v5 =
            (130 * median_weight) / 100 - CRYPTONOTE_COINBASE_BLOB_RESERVED_SIZE;
        let max_total_weight_v5 = 2 * median_weight - CRYPTONOTE_COINBASE_BLOB_RESERVED_SIZE;
        let max_total_weight = if version >= 5 {
            max_total_weight_v5
        } else {
            max_total_weight_pre_v5
        };

        let mut k_images: HashSet<KeyImage> = HashSet::new();
        let entries: Vec<PriorityEntry> =
            inner.txs_by_fee_and_receive_time.iter().cloned().collect();
        debug!(
            "filling block template, median weight {}, {} txs in the pool",
            median_weight,
            entries.len()
        );

        let txn = self
            .db
            .begin_write()
            .map_err(|e| PoolError::Store(e.to_string()))?;
        for entry in entries {
            let Ok(Some(meta)) = self.db.get_txpool_tx_meta(&entry.id) else {
                error!("  failed to find tx meta");
                continue;
            };

            let mine_stem = inner.mine_stem_txes && meta.relay_method == RelayMethod::Stem;
            if !meta.matches_legacy() && !mine_stem {
                continue;
            }
            if meta.pruned {
                continue;
            }
            if max_total_weight < fill.total_weight + meta.weight {
                continue;
            }

            if version >= SERVICE_NODE_VERSION {
                let parts = match block_reward_parts(
                    median_weight,
                    fill.total_weight + meta.weight,
                    already_generated_coins,
                    version,
                    &reward_context,
                    Network::Mainnet,
                ) {
                    Ok(parts) => parts,
                    Err(_) => continue,
                };
                coinbase = parts.base_miner + fill.fee + meta.fee;
                if coinbase < best_coinbase {
                    debug!("  would decrease coinbase to {}", coinbase);
                    continue;
                }
            } else if fill.total_weight > median_weight {
                // past the penalty-free zone, stop including more txs
                break;
            }

            let Ok(Some(blob)) = self.db.get_txpool_tx_blob(&entry.id) else {
                continue;
            };

            let original_meta = meta.clone();
            let mut meta = meta;
            let mut tx: Option<Transaction> = None;
            let ready = self
                .is_transaction_ready_to_go(&mut inner, &mut meta, &entry.id, &blob, &mut tx)
                .unwrap_or_else(|e| {
                    error!("failed to check transaction readiness: {}", e);
                    false
                });
            if meta != original_meta {
                if let Err(e) = self.db.update_txpool_tx(&entry.id, &meta) {
                    error!("failed to update tx meta: {}", e);
                }
            }
            if !ready {
                continue;
            }

            let Some(tx) = tx else { continue };
            if tx.key_images().any(|k| k_images.contains(k)) {
                continue;
            }

            fill.tx_hashes.push(entry.id);
            fill.total_weight += meta.weight;
            fill.fee += meta.fee;
            best_coinbase = coinbase;
            for k in tx.key_images() {
                k_images.insert(*k);
            }
        }
        txn.commit().map_err(|e| PoolError::Store(e.to_string()))?;

        fill.expected_reward = best_coinbase;
        debug!(
            "block template filled with {} txs, weight {}/{}, coinbase {} (including {} in fees)",
            fill.tx_hashes.len(),
            fill.total_weight,
            max_total_weight,
            best_coinbase,
            fill.fee
        );
        Ok(fill)
    }

    fn is_transaction_ready_to_go(
        &self,
        inner: &mut PoolInner,
        meta: &mut TxPoolMeta,
        txid: &Hash,
        blob: &[u8],
        tx_out: &mut Option<Transaction>,
    ) -> Result<bool, PoolError> {
        let tx = match bincode::deserialize::<Transaction>(blob) {
            Ok(tx) => tx,
            Err(_) => return Err(PoolError::CorruptBlob),
        };

        if meta.max_used_block_id == Hash::ZERO {
            // inputs never validated against a block yet
            if meta.last_failed_id != Hash::ZERO
                && self.blockchain.get_current_blockchain_height() > meta.last_failed_height
                && meta.last_failed_id
                    == self.blockchain.get_block_id_by_height(meta.last_failed_height)
            {
                // already known broken at this height
                *tx_out = Some(tx);
                return Ok(false);
            }
            let mut tvc = TxVerificationContext::default();
            let (ok, max_height, max_id) =
                self.check_tx_inputs_cached(inner, &tx, txid, &mut tvc, false);
            if !ok {
                meta.last_failed_height =
                    self.blockchain.get_current_blockchain_height().saturating_sub(1);
                meta.last_failed_id =
                    self.blockchain.get_block_id_by_height(meta.last_failed_height);
                *tx_out = Some(tx);
                return Ok(false);
            }
            meta.max_used_block_height = max_height;
            meta.max_used_block_id = max_id;
        } else {
            if meta.max_used_block_height >= self.blockchain.get_current_blockchain_height() {
                *tx_out = Some(tx);
                return Ok(false);
            }
            if meta.last_failed_id
                == self.blockchain.get_block_id_by_height(meta.last_failed_height)
            {
                // already failed at this exact chain state
                *tx_out = Some(tx);
                return Ok(false);
            }
            // small chance it became valid again, recheck
            let mut tvc = TxVerificationContext::default();
            let (ok, max_height, max_id) =
                self.check_tx_inputs_cached(inner, &tx, txid, &mut tvc, false);
            if !ok {
                meta.last_failed_height =
                    self.blockchain.get_current_blockchain_height().saturating_sub(1);
                meta.last_failed_id =
                    self.blockchain.get_block_id_by_height(meta.last_failed_height);
                *tx_out = Some(tx);
                return Ok(false);
            }
            meta.max_used_block_height = max_height;
            meta.max_used_block_id = max_id;
        }

        // the chain may have spent one of our images under us
        if self.blockchain.have_tx_keyimges_as_spent(&tx) {
            meta.double_spend_seen = true;
            *tx_out = Some(tx);
            return Ok(false);
        }

        // a deregister too old for its vote window cannot enter a block,
        // but stays pooled in case a reorg revives it
        if tx.is_deregister() {
            let curr_height = self.blockchain.get_current_blockchain_height();
            let mut failed_ready_check = true;

            if let Some(deregister) = tx_extra::get_service_node_deregister(&tx.extra) {
                let delta_height = curr_height.saturating_sub(deregister.block_height);
                let hf = self.blockchain.get_hard_fork_version(curr_height);
                let deregister_lifetime = if hf >= 9 {
                    DEREGISTER_LIFETIME_BY_HEIGHT_V2
                } else {
                    DEREGISTER_LIFETIME_BY_HEIGHT
                };
                if delta_height <= deregister_lifetime {
                    failed_ready_check = false;
                }
            }

            if failed_ready_check {
                meta.last_failed_height = curr_height.saturating_sub(1);
                meta.last_failed_id =
                    self.blockchain.get_block_id_by_height(meta.last_failed_height);
                meta.max_used_block_height = meta.last_failed_height;
                meta.max_used_block_id = meta.last_failed_id;
                *tx_out = Some(tx);
                return Ok(false);
            }
        }

        *tx_out = Some(tx);
        Ok(true)
    }

    // ---- double-spend bookkeeping ----------------------------------------

    fn have_deregister_tx_already_locked(&self, tx: &Transaction) -> Result<bool, PoolError> {
        if tx.is_transfer() {
            return Ok(false);
        }
        let Some(deregister) = tx_extra::get_service_node_deregister(&tx.extra) else {
            error!("could not get service node deregister from tx extra, possibly corrupt tx");
            return Ok(false);
        };

        let mut found = false;
        self.db
            .for_all_txpool_txes(true, &mut |_txid, meta, blob| {
                if !meta.is_deregister {
                    return true;
                }
                let Some(blob) = blob else { return true };
                let Ok(pool_tx) = bincode::deserialize::<Transaction>(blob) else {
                    error!("could not parse pooled deregister tx, possibly corrupt tx");
                    return true;
                };
                if let Some(pool_deregister) = tx_extra::get_service_node_deregister(&pool_tx.extra)
                {
                    if pool_deregister.block_height == deregister.block_height
                        && pool_deregister.service_node_index == deregister.service_node_index
                    {
                        found = true;
                        return false;
                    }
                }
                true
            })
            .map_err(|e| PoolError::Store(e.to_string()))?;
        Ok(found)
    }

    fn mark_double_spend_locked(
        &self,
        inner: &mut PoolInner,
        tx: &Transaction,
    ) -> Result<(), PoolError> {
        let mut changed = false;
        let txn = self
            .db
            .begin_write()
            .map_err(|e| PoolError::Store(e.to_string()))?;
        for k_image in tx.key_images() {
            let Some(txids) = inner.spent_key_images.get(k_image) else {
                continue;
            };
            for txid in txids {
                match self.db.get_txpool_tx_meta(txid) {
                    Ok(Some(mut meta)) => {
                        if !meta.double_spend_seen {
                            debug!("marking {} as double spending {:?}", txid, k_image);
                            meta.double_spend_seen = true;
                            changed = true;
                            if let Err(e) = self.db.update_txpool_tx(txid, &meta) {
                                error!("failed to update tx meta: {}", e);
                            }
                        }
                    }
                    Ok(None) => error!("failed to find tx meta in txpool"),
                    Err(e) => error!("failed to read tx meta: {}", e),
                }
            }
        }
        txn.commit().map_err(|e| PoolError::Store(e.to_string()))?;
        if changed {
            inner.cookie += 1;
        }
        Ok(())
    }

    fn update_gauges(&self, _inner: &PoolInner) {
        #[cfg(feature = "metrics")]
        {
            crate::metrics::TXPOOL_WEIGHT.set(_inner.txpool_weight as i64);
            crate::metrics::TXPOOL_TXS.set(self.db.txpool_tx_count() as i64);
        }
    }
}
