#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use xeq_core::api::{
    Blockchain, ChainError, DbError, DbWriteTxn, NodeDb, TxPoolMeta, TxVerificationContext,
};
use xeq_core::config::Network;
use xeq_core::tx_extra::{self, ServiceNodeRegister, TxExtraField};
use xeq_core::{Address, Block, ForkVersion, Height, Transaction, TxIn, TxOut, TxOutTarget, TxType, TxVersion};
use xeq_crypto::{
    derivation_to_scalar, encode_rct_amount, generate_key_derivation, generate_signature,
    random_keypair, Hash, KeyImage, Keypair, PublicKey, RctPayload, RctType,
};

// ---------------------------------------------------------------------------
// mock blockchain
// ---------------------------------------------------------------------------

pub struct MockChain {
    nettype: Network,
    fork_version: AtomicU8,
    current_height: AtomicU64,
    blocks: Mutex<BTreeMap<Height, Block>>,
    txs: Mutex<HashMap<Hash, Transaction>>,
    spent_in_chain: Mutex<HashSet<KeyImage>>,
    chain_txs: Mutex<HashSet<Hash>>,
    pub fee_ok: AtomicBool,
    pub inputs_ok: AtomicBool,
}

impl MockChain {
    pub fn new(nettype: Network, fork_version: ForkVersion, start_height: Height) -> Self {
        MockChain {
            nettype,
            fork_version: AtomicU8::new(fork_version),
            current_height: AtomicU64::new(start_height),
            blocks: Mutex::new(BTreeMap::new()),
            txs: Mutex::new(HashMap::new()),
            spent_in_chain: Mutex::new(HashSet::new()),
            chain_txs: Mutex::new(HashSet::new()),
            fee_ok: AtomicBool::new(true),
            inputs_ok: AtomicBool::new(true),
        }
    }

    pub fn set_fork_version(&self, v: ForkVersion) {
        self.fork_version.store(v, Ordering::SeqCst);
    }

    /// Record a block and its transactions; the chain tip moves past it.
    pub fn add_block(&self, block: Block, txs: Vec<Transaction>) {
        let height = block.height();
        {
            let mut map = self.txs.lock().unwrap();
            for tx in txs {
                map.insert(tx.hash(), tx);
            }
        }
        self.blocks.lock().unwrap().insert(height, block);
        self.current_height.store(height + 1, Ordering::SeqCst);
    }

    /// Drop blocks at `height` and above, as a chain pop would.
    pub fn truncate(&self, height: Height) {
        let mut blocks = self.blocks.lock().unwrap();
        let stale: Vec<Height> = blocks.range(height..).map(|(h, _)| *h).collect();
        for h in stale {
            blocks.remove(&h);
        }
        self.current_height.store(height, Ordering::SeqCst);
    }

    pub fn mark_spent(&self, image: KeyImage) {
        self.spent_in_chain.lock().unwrap().insert(image);
    }

    pub fn mark_tx_in_chain(&self, id: Hash) {
        self.chain_txs.lock().unwrap().insert(id);
    }
}

impl Blockchain for MockChain {
    fn nettype(&self) -> Network {
        self.nettype
    }

    fn get_hard_fork_version(&self, _height: Height) -> ForkVersion {
        self.fork_version.load(Ordering::SeqCst)
    }

    fn get_current_hard_fork_version(&self) -> ForkVersion {
        self.fork_version.load(Ordering::SeqCst)
    }

    fn get_current_blockchain_height(&self) -> Height {
        self.current_height.load(Ordering::SeqCst)
    }

    fn get_block_id_by_height(&self, height: Height) -> Hash {
        self.blocks
            .lock()
            .unwrap()
            .get(&height)
            .map(|b| b.hash())
            .unwrap_or(Hash::ZERO)
    }

    fn get_blocks(&self, start_height: Height, count: u64) -> Result<Vec<Block>, ChainError> {
        let blocks = self.blocks.lock().unwrap();
        Ok(blocks
            .range(start_height..start_height + count)
            .map(|(_, b)| b.clone())
            .collect())
    }

    fn get_transactions(&self, hashes: &[Hash]) -> (Vec<Transaction>, Vec<Hash>) {
        let map = self.txs.lock().unwrap();
        let mut found = Vec::new();
        let mut missed = Vec::new();
        for h in hashes {
            match map.get(h) {
                Some(tx) => found.push(tx.clone()),
                None => missed.push(*h),
            }
        }
        (found, missed)
    }

    fn check_fee(&self, _tx_weight: u64, _fee: u64) -> bool {
        self.fee_ok.load(Ordering::SeqCst)
    }

    fn check_tx_outputs(&self, _tx: &Transaction, _tvc: &mut TxVerificationContext) -> bool {
        true
    }

    fn check_tx_inputs(
        &self,
        _tx: &Transaction,
        _tvc: &mut TxVerificationContext,
        _kept_by_block: bool,
    ) -> (bool, Height, Hash) {
        let ok = self.inputs_ok.load(Ordering::SeqCst);
        let tip = self.get_current_blockchain_height().saturating_sub(1);
        (ok, tip, self.get_block_id_by_height(tip))
    }

    fn have_tx(&self, id: &Hash) -> bool {
        self.chain_txs.lock().unwrap().contains(id)
    }

    fn have_tx_keyimges_as_spent(&self, tx: &Transaction) -> bool {
        let spent = self.spent_in_chain.lock().unwrap();
        tx.key_images().any(|k| spent.contains(k))
    }
}

// ---------------------------------------------------------------------------
// mock database
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockDb {
    sn_blob: Mutex<Option<Vec<u8>>>,
    txpool: Mutex<BTreeMap<Hash, (Vec<u8>, TxPoolMeta)>>,
}

struct NoopTxn;

impl DbWriteTxn for NoopTxn {
    fn commit(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}

impl NodeDb for MockDb {
    fn begin_write<'a>(&'a self) -> Result<Box<dyn DbWriteTxn + 'a>, DbError> {
        Ok(Box::new(NoopTxn))
    }

    fn set_service_node_data(&self, blob: &[u8]) -> Result<(), DbError> {
        *self.sn_blob.lock().unwrap() = Some(blob.to_vec());
        Ok(())
    }

    fn get_service_node_data(&self) -> Result<Option<Vec<u8>>, DbError> {
        Ok(self.sn_blob.lock().unwrap().clone())
    }

    fn clear_service_node_data(&self) -> Result<(), DbError> {
        *self.sn_blob.lock().unwrap() = None;
        Ok(())
    }

    fn add_txpool_tx(&self, id: &Hash, blob: &[u8], meta: &TxPoolMeta) -> Result<(), DbError> {
        self.txpool
            .lock()
            .unwrap()
            .insert(*id, (blob.to_vec(), meta.clone()));
        Ok(())
    }

    fn update_txpool_tx(&self, id: &Hash, meta: &TxPoolMeta) -> Result<(), DbError> {
        let mut pool = self.txpool.lock().unwrap();
        match pool.get_mut(id) {
            Some(entry) => {
                entry.1 = meta.clone();
                Ok(())
            }
            None => Err(DbError::Failure("no such txpool tx".into())),
        }
    }

    fn remove_txpool_tx(&self, id: &Hash) -> Result<(), DbError> {
        self.txpool.lock().unwrap().remove(id);
        Ok(())
    }

    fn get_txpool_tx_meta(&self, id: &Hash) -> Result<Option<TxPoolMeta>, DbError> {
        Ok(self.txpool.lock().unwrap().get(id).map(|e| e.1.clone()))
    }

    fn get_txpool_tx_blob(&self, id: &Hash) -> Result<Option<Vec<u8>>, DbError> {
        Ok(self.txpool.lock().unwrap().get(id).map(|e| e.0.clone()))
    }

    fn txpool_has_tx(&self, id: &Hash) -> bool {
        self.txpool.lock().unwrap().contains_key(id)
    }

    fn txpool_tx_count(&self) -> usize {
        self.txpool.lock().unwrap().len()
    }

    fn for_all_txpool_txes(
        &self,
        include_blob: bool,
        f: &mut dyn FnMut(&Hash, &TxPoolMeta, Option<&[u8]>) -> bool,
    ) -> Result<(), DbError> {
        // snapshot so callbacks can hit the db without deadlocking
        let snapshot: Vec<(Hash, Vec<u8>, TxPoolMeta)> = self
            .txpool
            .lock()
            .unwrap()
            .iter()
            .map(|(id, (blob, meta))| (*id, blob.clone(), meta.clone()))
            .collect();
        for (id, blob, meta) in &snapshot {
            let blob = include_blob.then_some(blob.as_slice());
            if !f(id, meta, blob) {
                break;
            }
        }
        Ok(())
    }
}

impl MockDb {
    /// Test hook: rewrite a stored meta directly (e.g. to age a tx).
    pub fn tweak_meta(&self, id: &Hash, f: impl FnOnce(&mut TxPoolMeta)) {
        let mut pool = self.txpool.lock().unwrap();
        if let Some(entry) = pool.get_mut(id) {
            f(&mut entry.1);
        }
    }
}

// ---------------------------------------------------------------------------
// wallets and transaction builders
// ---------------------------------------------------------------------------

/// A wallet the tests can receive staking outputs with.
pub struct TestWallet {
    pub spend: Keypair,
    pub view: Keypair,
}

impl TestWallet {
    pub fn generate() -> Self {
        TestWallet {
            spend: random_keypair(),
            view: random_keypair(),
        }
    }

    pub fn address(&self) -> Address {
        Address {
            spend_public_key: self.spend.public,
            view_public_key: self.view.public,
            is_subaddress: false,
        }
    }
}

/// Stake `amount` atomic units to `recipient` in a single output whose
/// unlock window is valid for a stake landing at `unlock_base_height`.
pub fn staking_tx(
    tx_type: TxType,
    recipient: &TestWallet,
    amount: u64,
    unlock_base_height: Height,
    lock_blocks: u64,
    txn_fee: u64,
    burned: u64,
    extra_fields: Vec<TxExtraField>,
) -> Transaction {
    let tx_key = random_keypair();
    let derivation = generate_key_derivation(&recipient.view.public, &tx_key.secret)
        .expect("valid view key");

    let out_key = random_keypair().public; // one-time key; registry checks type only
    let rct = RctPayload {
        rct_type: RctType::Bulletproof2,
        txn_fee,
        ecdh_amounts: vec![encode_rct_amount(
            amount,
            &derivation_to_scalar(&derivation, 0),
        )],
    };

    let mut fields = vec![
        TxExtraField::PubKey(tx_key.public),
        TxExtraField::TxSecretKey(tx_key.secret.clone()),
        TxExtraField::ServiceNodeContributor(recipient.address()),
    ];
    if burned > 0 {
        fields.push(TxExtraField::BurnedAmount(burned));
    }
    fields.extend(extra_fields);

    Transaction {
        version: TxVersion::V4,
        tx_type,
        unlock_time: 0,
        output_unlock_times: vec![unlock_base_height + lock_blocks],
        vin: vec![],
        vout: vec![TxOut {
            amount: 0,
            target: TxOutTarget::ToKey { key: out_key },
        }],
        extra: tx_extra::encode(&fields),
        rct_signatures: rct,
        signatures: vec![],
    }
}

/// A full registration transaction for a single-operator node.
pub fn registration_tx(
    sn_key: &Keypair,
    operator: &TestWallet,
    portions: &[u64],
    portions_for_operator: u64,
    amount: u64,
    block_height: Height,
    lock_blocks: u64,
    block_timestamp: u64,
) -> Transaction {
    let addresses = [operator.address()];
    let expiration_timestamp = block_timestamp + 3600;
    let hash = xeq_core::service_nodes::rules::get_registration_hash(
        &addresses,
        portions_for_operator,
        portions,
        expiration_timestamp,
    );
    let signature = generate_signature(&hash, &sn_key.public, &sn_key.secret);

    let register = ServiceNodeRegister {
        public_spend_keys: vec![operator.spend.public],
        public_view_keys: vec![operator.view.public],
        portions_for_operator,
        portions: portions.to_vec(),
        expiration_timestamp,
        service_node_signature: signature,
    };

    staking_tx(
        TxType::Stake,
        operator,
        amount,
        block_height,
        lock_blocks,
        100,
        50,
        vec![
            TxExtraField::ServiceNodeRegister(register),
            TxExtraField::ServiceNodePubkey(sn_key.public),
        ],
    )
}

/// Simple transfer carrying `n_images` fresh key images (for pool tests).
pub fn transfer_tx(fee: u64, n_images: usize, salt: u64) -> Transaction {
    let mut vin = Vec::new();
    for i in 0..n_images {
        let mut image = [0u8; 32];
        image[..8].copy_from_slice(&salt.to_le_bytes());
        image[8] = i as u8;
        image[9] = 0x5a;
        vin.push(TxIn::ToKey {
            amount: 0,
            key_offsets: vec![1, 2, 3],
            k_image: KeyImage(image),
        });
    }
    let mut tx = Transaction {
        version: TxVersion::V4,
        tx_type: TxType::Standard,
        vin,
        vout: vec![],
        ..Default::default()
    };
    tx.rct_signatures.txn_fee = fee;
    // salt the extra so equal-fee txs hash differently
    tx.extra = tx_extra::encode(&[TxExtraField::Nonce(salt.to_le_bytes().to_vec())]);
    tx
}

/// Deregister transaction pointing at `(block_height, index)`; `salt` keeps
/// otherwise-identical deregisters distinct.
pub fn deregister_tx(block_height: Height, service_node_index: u32, salt: u64) -> Transaction {
    Transaction {
        version: TxVersion::V4,
        tx_type: TxType::Deregister,
        extra: tx_extra::encode(&[
            TxExtraField::ServiceNodeDeregister(tx_extra::ServiceNodeDeregister {
                block_height,
                service_node_index,
            }),
            TxExtraField::Nonce(salt.to_le_bytes().to_vec()),
        ]),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// registry fixtures
// ---------------------------------------------------------------------------

use std::sync::Arc;
use xeq_core::service_nodes::ServiceNodeList;

/// Fork-5 activation height on the mainnet fork table (fakechain shares it).
pub const FORK5_HEIGHT: Height = 106_950;

pub type TestList = ServiceNodeList<MockChain, MockDb>;

/// Fresh registry on an empty fakechain whose tip sits at fork-5 activation.
pub fn registry_setup(fork: ForkVersion) -> (Arc<MockChain>, Arc<MockDb>, TestList) {
    let chain = Arc::new(MockChain::new(Network::Fakechain, fork, FORK5_HEIGHT));
    let db = Arc::new(MockDb::default());
    let list = ServiceNodeList::new(chain.clone(), db.clone());
    list.init().expect("init on empty chain");
    (chain, db, list)
}

/// Build the next block, feed it to the chain and the registry.
pub fn advance_block(
    chain: &MockChain,
    list: &TestList,
    height: Height,
    winner: PublicKey,
    txs: Vec<Transaction>,
) -> Block {
    let hashes = txs.iter().map(|t| t.hash()).collect();
    let prev = chain.get_block_id_by_height(height.saturating_sub(1));
    let block = make_block(height, prev, winner, hashes);
    chain.add_block(block.clone(), txs.clone());
    list.block_added(&block, &txs).expect("block_added");
    block
}

/// Block carrying `tx_hashes`, with the winner key in the coinbase extra.
pub fn make_block(height: Height, prev_id: Hash, winner: PublicKey, tx_hashes: Vec<Hash>) -> Block {
    let mut miner_tx = Transaction {
        version: TxVersion::V4,
        tx_type: TxType::Standard,
        vin: vec![TxIn::Gen { height }],
        ..Default::default()
    };
    miner_tx.extra = tx_extra::encode(&[TxExtraField::ServiceNodeWinner(winner)]);

    Block {
        major_version: 1,
        minor_version: 0,
        prev_id,
        timestamp: 1_700_000_000 + height,
        nonce: 0,
        miner_tx,
        tx_hashes,
    }
}
