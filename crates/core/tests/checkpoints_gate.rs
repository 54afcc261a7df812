use std::io::Write;

use xeq_core::checkpoints::Checkpoints;
use xeq_core::config::Network;
use xeq_crypto::Hash;

const GENESIS_HASH: &str = "85bb9128c170896673aa1b47f2c7d238f77b6c6f06cd7f25b399747d5015577e";

fn mainnet_checkpoints() -> Checkpoints {
    let mut cp = Checkpoints::new();
    cp.init_default_checkpoints(Network::Mainnet).unwrap();
    cp
}

#[test]
fn genesis_checkpoint_gate() {
    let cp = mainnet_checkpoints();

    let genesis = Hash::from_hex(GENESIS_HASH).unwrap();
    assert_eq!(cp.check_block(0, &genesis), (true, true));
    assert_eq!(cp.check_block(0, &Hash::ZERO), (false, true));

    // heights without a checkpoint always pass, and don't claim to be one
    assert_eq!(cp.check_block(2, &Hash::ZERO), (true, false));
}

#[test]
fn checkpoint_zone_is_max_inclusive() {
    let cp = mainnet_checkpoints();
    assert_eq!(cp.max_height(), Some(181_056));
    assert!(cp.is_in_checkpoint_zone(0));
    assert!(cp.is_in_checkpoint_zone(181_056));
    assert!(!cp.is_in_checkpoint_zone(181_057));
}

#[test]
fn alternative_blocks_past_last_checkpoint() {
    let cp = mainnet_checkpoints();
    // past the last checkpoint, alternatives are fine
    assert!(cp.is_alternative_block_allowed(181_056, 200_000));
    // at or below a checkpoint, they are not
    assert!(!cp.is_alternative_block_allowed(181_056, 181_056));
    assert!(!cp.is_alternative_block_allowed(200_000, 100));
    // height zero is never replaceable
    assert!(!cp.is_alternative_block_allowed(200_000, 0));
    // a chain before the first checkpoint has nothing to conflict with
    let empty = Checkpoints::new();
    assert!(empty.is_alternative_block_allowed(10, 5));
}

#[test]
fn json_load_appends_above_max_only() {
    let mut cp = mainnet_checkpoints();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"hashlines": [
            {{"height": 5, "hash": "ed1dd5a452b32bdc13cd11aee5e2485ca69d2a2ae8beb1e28e7da2d30959c799"}},
            {{"height": 200000, "hash": "not-a-hash"}},
            {{"height": 250000, "hash": "a46c1f2818fe83cb65b6a83dc9c4c50eb7eaa00e6a8acf3716549c220f5815cc"}}
        ]}}"#
    )
    .unwrap();

    cp.load_checkpoints_from_json(file.path()).unwrap();
    // height 5 ignored (below max), bad record skipped, 250000 added
    assert_eq!(cp.max_height(), Some(250_000));
    assert!(cp.points().get(&5).is_none());
    assert!(cp.points().get(&200_000).is_none());

    // missing file is not an error
    cp.load_checkpoints_from_json("/definitely/not/here.json").unwrap();
}

#[test]
fn conflict_detection() {
    let cp = mainnet_checkpoints();
    let mut other = Checkpoints::new();
    other.add_checkpoint(0, GENESIS_HASH).unwrap();
    assert!(cp.check_for_conflicts(&other));

    let mut bad = Checkpoints::new();
    bad.add_checkpoint(0, "ed1dd5a452b32bdc13cd11aee5e2485ca69d2a2ae8beb1e28e7da2d30959c799")
        .unwrap();
    assert!(!cp.check_for_conflicts(&bad));
}

#[test]
fn testnet_ships_without_checkpoints() {
    let mut cp = Checkpoints::new();
    cp.init_default_checkpoints(Network::Testnet).unwrap();
    assert_eq!(cp.max_height(), None);
    assert!(!cp.is_in_checkpoint_zone(0));
}
