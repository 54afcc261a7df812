use serde::{Deserialize, Serialize};
use xeq_crypto::PublicKey;

use crate::service_nodes::rules::{
    xeq_shuffle, MIN_NODES_TO_TEST, NTH_OF_THE_NETWORK_TO_TEST, QUORUM_SIZE,
};

/// Per-height committee: voters first, then the nodes they test.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumState {
    pub quorum_nodes: Vec<PublicKey>,
    pub nodes_to_test: Vec<PublicKey>,
}

/// Derive the quorum for a block from the eligible keys (already sorted
/// bytewise) and the block-hash seed. Pure: same inputs, same committee.
pub fn derive_quorum_state(eligible_keys: &[PublicKey], seed: u64) -> QuorumState {
    let mut indexes: Vec<usize> = (0..eligible_keys.len()).collect();
    xeq_shuffle(&mut indexes, seed);

    let quorum_len = eligible_keys.len().min(QUORUM_SIZE);
    let quorum_nodes: Vec<PublicKey> = indexes[..quorum_len]
        .iter()
        .map(|&i| eligible_keys[i])
        .collect();

    let num_remaining = indexes.len() - quorum_len;
    let num_to_test = (num_remaining / NTH_OF_THE_NETWORK_TO_TEST)
        .max(MIN_NODES_TO_TEST.min(num_remaining));
    let nodes_to_test: Vec<PublicKey> = indexes[quorum_len..quorum_len + num_to_test]
        .iter()
        .map(|&i| eligible_keys[i])
        .collect();

    QuorumState {
        quorum_nodes,
        nodes_to_test,
    }
}
