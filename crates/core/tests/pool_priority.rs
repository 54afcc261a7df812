mod support;

use std::sync::Arc;

use support::*;
use xeq_core::api::{RelayMethod, TxVerificationContext};
use xeq_core::config::Network;
use xeq_core::mempool::TxMemoryPool;
use xeq_crypto::{Hash, PublicKey};

type TestPool = TxMemoryPool<MockChain, MockDb>;

fn pool_setup() -> (Arc<MockChain>, Arc<MockDb>, TestPool) {
    let chain = Arc::new(MockChain::new(Network::Mainnet, 18, 0));
    // one block on the chain so readiness checks have a tip to look at
    let genesis = make_block(0, Hash::ZERO, PublicKey::NULL, vec![]);
    chain.add_block(genesis, vec![]);

    let db = Arc::new(MockDb::default());
    let pool = TxMemoryPool::new(chain.clone(), db.clone());
    pool.init(0, false).unwrap();
    (chain, db, pool)
}

fn admit(
    pool: &TestPool,
    tx: &xeq_core::Transaction,
    relay: RelayMethod,
) -> (bool, TxVerificationContext) {
    let mut tvc = TxVerificationContext::default();
    let blob = tx.to_bytes();
    let added = pool
        .add_tx(tx, &tx.hash(), &blob, tx.weight(), &mut tvc, relay, false, 18)
        .unwrap();
    (added, tvc)
}

#[test]
fn template_orders_deregister_then_fee() {
    let (_chain, _db, pool) = pool_setup();

    let tx_a = transfer_tx(10_000, 1, 1); // low fee per byte
    let tx_b = deregister_tx(0, 0, 2);
    let tx_c = transfer_tx(1_000_000, 1, 3); // high fee per byte

    // admission order deliberately scrambled
    assert!(admit(&pool, &tx_a, RelayMethod::Fluff).0);
    assert!(admit(&pool, &tx_c, RelayMethod::Fluff).0);
    assert!(admit(&pool, &tx_b, RelayMethod::Fluff).0);

    let fill = pool
        .fill_block_template(1_000_000, 1_000_000_000, 18)
        .unwrap();
    assert_eq!(
        fill.tx_hashes,
        vec![tx_b.hash(), tx_c.hash(), tx_a.hash()]
    );
    assert_eq!(fill.fee, 10_000 + 1_000_000);
}

#[test]
fn double_spend_is_rejected_and_marked() {
    let (_chain, _db, pool) = pool_setup();

    let tx_1 = transfer_tx(5_000, 1, 7);
    let tx_2 = transfer_tx(9_000, 1, 7); // same salt, same key image

    assert!(admit(&pool, &tx_1, RelayMethod::Fluff).0);
    let (added, tvc) = admit(&pool, &tx_2, RelayMethod::Fluff);
    assert!(!added);
    assert!(tvc.double_spend);
    assert!(tvc.verification_failed);

    // the earlier tx is flagged as contested
    let info = pool.get_transaction_info(&tx_1.hash()).unwrap().unwrap();
    assert!(info.double_spend_seen);
}

#[test]
fn duplicate_deregister_pair_is_rejected() {
    let (_chain, _db, pool) = pool_setup();

    let d1 = deregister_tx(0, 3, 10);
    let d2 = deregister_tx(0, 3, 11); // distinct tx, same (height, index)
    let d3 = deregister_tx(0, 4, 12);

    assert!(admit(&pool, &d1, RelayMethod::Fluff).0);
    let (added, tvc) = admit(&pool, &d2, RelayMethod::Fluff);
    assert!(!added);
    assert!(tvc.double_spend);

    assert!(admit(&pool, &d3, RelayMethod::Fluff).0);
}

#[test]
fn version_zero_and_oversize_rejected() {
    let (_chain, _db, pool) = pool_setup();

    let mut v0 = transfer_tx(1_000, 1, 20);
    v0.version = xeq_core::TxVersion::V0;
    let (added, tvc) = admit(&pool, &v0, RelayMethod::Fluff);
    assert!(!added);
    assert!(tvc.verification_failed);

    let mut fat = transfer_tx(1_000, 1, 21);
    fat.extra = vec![0u8; 600_000]; // beyond the v8+ tx weight limit
    let mut tvc = TxVerificationContext::default();
    let blob = fat.to_bytes();
    let added = pool
        .add_tx(&fat, &fat.hash(), &blob, blob.len() as u64, &mut tvc, RelayMethod::Fluff, false, 18)
        .unwrap();
    assert!(!added);
    assert!(tvc.too_big);
}

#[test]
fn fee_gate_respects_chain_policy() {
    let (chain, _db, pool) = pool_setup();
    chain.fee_ok.store(false, std::sync::atomic::Ordering::SeqCst);

    let tx = transfer_tx(1, 1, 30);
    let (added, tvc) = admit(&pool, &tx, RelayMethod::Fluff);
    assert!(!added);
    assert!(tvc.fee_too_low);

    // deregisters are exempt from the fee market
    let d = deregister_tx(0, 9, 31);
    assert!(admit(&pool, &d, RelayMethod::Fluff).0);
}

#[test]
fn stem_loopback_promotes_to_fluff() {
    let (_chain, _db, pool) = pool_setup();

    let tx = transfer_tx(4_000, 1, 40);
    let (added, tvc) = admit(&pool, &tx, RelayMethod::Stem);
    assert!(added);
    assert_eq!(tvc.relay, RelayMethod::Stem);

    // seeing our own stem tx again means the stem looped back to us
    let (added_again, tvc2) = admit(&pool, &tx, RelayMethod::Stem);
    assert!(added_again);
    assert_eq!(tvc2.relay, RelayMethod::Fluff);

    let info = pool.get_transaction_info(&tx.hash()).unwrap().unwrap();
    assert!(info.relayed || info.last_relayed_time == u64::MAX);
}

#[test]
fn kept_by_block_survives_failed_input_check() {
    let (chain, _db, pool) = pool_setup();
    chain
        .inputs_ok
        .store(false, std::sync::atomic::Ordering::SeqCst);

    let tx = transfer_tx(2_000, 1, 50);
    let mut tvc = TxVerificationContext::default();
    let blob = tx.to_bytes();
    let added = pool
        .add_tx(&tx, &tx.hash(), &blob, tx.weight(), &mut tvc, RelayMethod::Block, true, 18)
        .unwrap();
    assert!(added);
    assert!(tvc.verification_impossible);
    assert!(tvc.added_to_pool);
    assert!(pool.have_tx(&tx.hash()));

    // same failure without kept-by-block is a plain rejection
    let other = transfer_tx(2_000, 1, 51);
    let (added, tvc) = admit(&pool, &other, RelayMethod::Fluff);
    assert!(!added);
    assert!(tvc.invalid_input);
}
