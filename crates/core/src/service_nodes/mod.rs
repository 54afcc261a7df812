pub mod info;
pub mod list;
pub mod quorum;
pub mod rollback;
pub mod rules;
pub mod swarm;

pub use info::{Contribution, ServiceNodeInfo, ServiceNodePubkeyInfo};
pub use list::ServiceNodeList;
pub use quorum::{derive_quorum_state, QuorumState};
pub use rollback::RollbackEvent;
pub use rules::{
    check_service_node_portions, get_portions_to_make_amount, get_staking_requirement,
    portions_to_amount, uniform_distribution_portable, xeq_shuffle, SwarmId,
    DEREGISTER_LIFETIME_BY_HEIGHT, DEREGISTER_LIFETIME_BY_HEIGHT_V2, MIN_NODES_TO_TEST,
    NTH_OF_THE_NETWORK_TO_TEST, QUEUE_SWARM_ID, QUORUM_SIZE, UNASSIGNED_SWARM_ID,
};
pub use swarm::{calc_swarm_changes, SwarmBuckets};
