//! Swarm membership rebalancing.
//!
//! The registry only maintains the swarm-id mapping; what swarms are used
//! for is another subsystem's business. Rebalancing is deterministic in the
//! block-hash seed so every node computes the same assignment.

use std::collections::BTreeMap;
use xeq_crypto::PublicKey;

use crate::service_nodes::rules::{
    uniform_distribution_portable, xeq_shuffle, SwarmId, MIN_SWARM_SIZE, NEW_SWARM_SIZE,
    QUEUE_SWARM_ID, UNASSIGNED_SWARM_ID,
};
use rand_mt::Mt19937GenRand64;

pub type SwarmBuckets = BTreeMap<SwarmId, Vec<PublicKey>>;

/// Rework `buckets` in place: fill understaffed swarms from the queue, then
/// spin up new swarms while enough queued nodes remain. Queued-but-unplaced
/// nodes end up in the queue bucket.
pub fn calc_swarm_changes(buckets: &mut SwarmBuckets, seed: u64) {
    let mut queue: Vec<PublicKey> = Vec::new();
    for id in [UNASSIGNED_SWARM_ID, QUEUE_SWARM_ID] {
        if let Some(nodes) = buckets.remove(&id) {
            queue.extend(nodes);
        }
    }
    buckets.retain(|_, nodes| !nodes.is_empty());

    queue.sort();
    xeq_shuffle(&mut queue, seed);

    // top up swarms below the minimum, smallest id first
    let ids: Vec<SwarmId> = buckets.keys().copied().collect();
    for id in ids {
        while buckets.get(&id).map_or(0, |n| n.len()) < MIN_SWARM_SIZE {
            match queue.pop() {
                Some(node) => {
                    if let Some(nodes) = buckets.get_mut(&id) {
                        nodes.push(node);
                    }
                }
                None => return, // queue exhausted, nothing left to place
            }
        }
    }

    // form new swarms from what is left
    let mut rng = Mt19937GenRand64::new(seed);
    while queue.len() >= NEW_SWARM_SIZE {
        let mut id = uniform_distribution_portable(&mut rng, u64::MAX - 1) + 1;
        while buckets.contains_key(&id) || id == UNASSIGNED_SWARM_ID {
            id = uniform_distribution_portable(&mut rng, u64::MAX - 1) + 1;
        }
        let members: Vec<PublicKey> = queue.drain(queue.len() - NEW_SWARM_SIZE..).collect();
        buckets.insert(id, members);
    }

    return_queue(buckets, queue);
}

fn return_queue(buckets: &mut SwarmBuckets, queue: Vec<PublicKey>) {
    if !queue.is_empty() {
        buckets.entry(QUEUE_SWARM_ID).or_default().extend(queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(range: std::ops::Range<u8>) -> Vec<PublicKey> {
        range.map(|i| PublicKey([i; 32])).collect()
    }

    #[test]
    fn queue_forms_new_swarms() {
        let mut buckets = SwarmBuckets::new();
        buckets.insert(UNASSIGNED_SWARM_ID, keys(0..14));
        calc_swarm_changes(&mut buckets, 99);

        let total: usize = buckets.values().map(|v| v.len()).sum();
        assert_eq!(total, 14);
        // 14 queued: two new swarms of 7, nothing left queued
        assert!(!buckets.contains_key(&QUEUE_SWARM_ID));
        assert_eq!(buckets.len(), 2);
        for nodes in buckets.values() {
            assert_eq!(nodes.len(), NEW_SWARM_SIZE);
        }
    }

    #[test]
    fn understaffed_swarm_is_topped_up() {
        let mut buckets = SwarmBuckets::new();
        buckets.insert(3, keys(0..3));
        buckets.insert(UNASSIGNED_SWARM_ID, keys(10..14));
        calc_swarm_changes(&mut buckets, 7);

        assert_eq!(buckets.get(&3).map(|v| v.len()), Some(MIN_SWARM_SIZE));
        // leftover queued nodes stay in the queue bucket
        let queued = buckets.get(&QUEUE_SWARM_ID).map(|v| v.len()).unwrap_or(0);
        assert_eq!(queued, 2);
    }

    #[test]
    fn rebalance_is_deterministic() {
        let mut a = SwarmBuckets::new();
        a.insert(UNASSIGNED_SWARM_ID, keys(0..20));
        let mut b = a.clone();
        calc_swarm_changes(&mut a, 1234);
        calc_swarm_changes(&mut b, 1234);
        assert_eq!(a, b);
    }
}
