mod support;

use std::sync::Arc;

use support::*;
use xeq_core::api::{Blockchain, RelayMethod, TxVerificationContext};
use xeq_core::config::{Network, CRYPTONOTE_MEMPOOL_TX_LIVETIME};
use xeq_core::mempool::TxMemoryPool;
use xeq_crypto::{Hash, KeyImage, PublicKey};

type TestPool = TxMemoryPool<MockChain, MockDb>;

fn pool_setup() -> (Arc<MockChain>, Arc<MockDb>, TestPool) {
    let chain = Arc::new(MockChain::new(Network::Mainnet, 18, 0));
    let genesis = make_block(0, Hash::ZERO, PublicKey::NULL, vec![]);
    chain.add_block(genesis, vec![]);

    let db = Arc::new(MockDb::default());
    let pool = TxMemoryPool::new(chain.clone(), db.clone());
    pool.init(0, false).unwrap();
    (chain, db, pool)
}

fn admit(pool: &TestPool, tx: &xeq_core::Transaction) -> bool {
    let mut tvc = TxVerificationContext::default();
    let blob = tx.to_bytes();
    pool.add_tx(tx, &tx.hash(), &blob, tx.weight(), &mut tvc, RelayMethod::Fluff, false, 18)
        .unwrap()
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[test]
fn take_tx_clears_every_index() {
    let (_chain, _db, pool) = pool_setup();

    let tx = transfer_tx(3_000, 2, 1);
    assert!(admit(&pool, &tx));
    let weight = tx.weight();
    assert_eq!(pool.get_txpool_weight(), weight);

    let taken = pool.take_tx(&tx.hash()).unwrap().expect("tx present");
    assert_eq!(taken.fee, 3_000);
    assert_eq!(taken.weight, weight);
    assert_eq!(taken.tx.hash(), tx.hash());

    assert!(!pool.have_tx(&tx.hash()));
    assert_eq!(pool.get_txpool_weight(), 0);
    for image in tx.key_images() {
        assert!(!pool.have_tx_keyimg_as_spent(image, &tx.hash()));
    }
    // its key images are free again
    let again = transfer_tx(4_000, 2, 1);
    assert!(admit(&pool, &again));
}

#[test]
fn stuck_sweep_times_out_old_transactions() {
    let (_chain, db, pool) = pool_setup();

    let fresh = transfer_tx(1_000, 1, 10);
    let old = transfer_tx(1_000, 1, 11);
    assert!(admit(&pool, &fresh));
    assert!(admit(&pool, &old));

    db.tweak_meta(&old.hash(), |meta| {
        meta.receive_time = now() - CRYPTONOTE_MEMPOOL_TX_LIVETIME - 100;
    });

    assert_eq!(pool.remove_stuck_transactions().unwrap(), 1);
    assert!(pool.have_tx(&fresh.hash()));
    assert!(!pool.have_tx(&old.hash()));
    assert_eq!(pool.get_txpool_weight(), fresh.weight());

    // timed-out txs may not come back through normal relay
    assert!(!admit(&pool, &old));
}

#[test]
fn stale_deregisters_age_out_faster() {
    let (_chain, db, pool) = pool_setup();

    let d = deregister_tx(0, 1, 20);
    assert!(admit(&pool, &d));
    db.tweak_meta(&d.hash(), |meta| {
        meta.receive_time = now() - xeq_core::config::MEMPOOL_PRUNE_DEREGISTER_LIFETIME - 10;
    });
    assert_eq!(pool.remove_stuck_transactions().unwrap(), 1);
    assert!(!pool.have_tx(&d.hash()));
}

#[test]
fn relay_backoff_and_eligibility() {
    let (_chain, db, pool) = pool_setup();

    let tx = transfer_tx(2_000, 1, 30);
    assert!(admit(&pool, &tx));

    // fresh txs wait out the initial backoff
    assert!(pool.get_relayable_transactions().unwrap().is_empty());

    db.tweak_meta(&tx.hash(), |meta| {
        meta.receive_time = now() - 1_000;
        meta.last_relayed_time = now() - 1_300;
    });
    let relayable = pool.get_relayable_transactions().unwrap();
    assert_eq!(relayable.len(), 1);
    assert_eq!(relayable[0].0, tx.hash());

    // re-relay is suppressed past half the pool lifetime
    db.tweak_meta(&tx.hash(), |meta| {
        meta.receive_time = now() - CRYPTONOTE_MEMPOOL_TX_LIVETIME / 2 - 10;
        meta.last_relayed_time = now() - CRYPTONOTE_MEMPOOL_TX_LIVETIME / 2 - 10;
    });
    assert!(pool.get_relayable_transactions().unwrap().is_empty());
}

#[test]
fn set_relayed_stamps_and_embargoes() {
    let (_chain, _db, pool) = pool_setup();

    let fluffed = transfer_tx(2_000, 1, 40);
    assert!(admit(&pool, &fluffed));
    pool.set_relayed(&[fluffed.hash()], RelayMethod::Fluff).unwrap();
    let info = pool.get_transaction_info(&fluffed.hash()).unwrap().unwrap();
    assert!(info.relayed);
    assert!(info.last_relayed_time <= now() + 1);
}

#[test]
fn validate_drops_mined_transactions() {
    let (chain, _db, pool) = pool_setup();

    let stays = transfer_tx(1_000, 1, 50);
    let mined = transfer_tx(1_000, 1, 51);
    assert!(admit(&pool, &stays));
    assert!(admit(&pool, &mined));

    chain.mark_tx_in_chain(mined.hash());
    assert_eq!(pool.validate(18).unwrap(), 1);
    assert!(pool.have_tx(&stays.hash()));
    assert!(!pool.have_tx(&mined.hash()));
    assert_eq!(pool.get_txpool_weight(), stays.weight());
}

#[test]
fn init_rebuilds_indices_from_store() {
    let (chain, db, pool) = pool_setup();

    let a = transfer_tx(1_000, 1, 60);
    let b = transfer_tx(50_000, 1, 61);
    assert!(admit(&pool, &a));
    assert!(admit(&pool, &b));
    let total = pool.get_txpool_weight();

    let reopened = TxMemoryPool::new(chain.clone(), db.clone());
    reopened.init(0, false).unwrap();
    assert_eq!(reopened.get_txpool_weight(), total);
    assert_eq!(reopened.get_transactions_count(), 2);

    // priority order survives the reload
    let fill = reopened
        .fill_block_template(1_000_000, 1_000_000_000, 18)
        .unwrap();
    assert_eq!(fill.tx_hashes, vec![b.hash(), a.hash()]);

    // and so does key-image occupancy
    let image = a.key_images().next().unwrap();
    assert_eq!(reopened.check_for_key_images(&[*image]), vec![true]);
    assert_eq!(
        reopened.check_for_key_images(&[KeyImage([0xee; 32])]),
        vec![false]
    );
}

#[test]
fn double_spent_in_chain_blocks_readiness() {
    let (chain, _db, pool) = pool_setup();

    let tx = transfer_tx(9_000, 1, 70);
    assert!(admit(&pool, &tx));

    // the chain spends one of our images from under us
    chain.mark_spent(*tx.key_images().next().unwrap());
    let fill = pool.fill_block_template(1_000_000, 1_000_000_000, 18).unwrap();
    assert!(fill.tx_hashes.is_empty());

    let info = pool.get_transaction_info(&tx.hash()).unwrap().unwrap();
    assert!(info.double_spend_seen);
}

#[test]
fn blockchain_attach_detach_clears_caches() {
    let (chain, _db, pool) = pool_setup();
    let tx = transfer_tx(1_000, 1, 80);
    assert!(admit(&pool, &tx));

    // purely a smoke check: both notifications must be accepted at any time
    pool.on_blockchain_inc(2, &chain.get_block_id_by_height(0));
    pool.on_blockchain_dec(1, &chain.get_block_id_by_height(0));
    assert!(pool.have_tx(&tx.hash()));
}

#[test]
fn get_complement_returns_unknown_blobs() {
    let (_chain, _db, pool) = pool_setup();

    let a = transfer_tx(1_000, 1, 90);
    let b = transfer_tx(2_000, 1, 91);
    assert!(admit(&pool, &a));
    assert!(admit(&pool, &b));

    let complement = pool.get_complement(&[a.hash()]).unwrap();
    assert_eq!(complement.len(), 1);
    assert_eq!(complement[0], b.to_bytes());
}
