//! Consensus core of the XEQ daemon: the service-node registry, the
//! versioned reward schedule, the coinbase builder/validator, the tx memory
//! pool and the checkpoint gate. RPC, p2p, storage and PoW live elsewhere
//! and reach this crate through the traits in [`api`].

pub mod api;
pub mod checkpoints;
pub mod config;
pub mod error;
pub mod keys;
pub mod mempool;
pub mod miner_tx;
pub mod reward;
pub mod service_nodes;
pub mod tx;
pub mod tx_extra;
pub mod types;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use api::{
    Blockchain, BlockVerificationContext, ChainError, DbError, DbWriteTxn, NodeDb, RelayMethod,
    TxPoolMeta, TxVerificationContext, VoteVerificationContext,
};
pub use checkpoints::Checkpoints;
pub use config::{GovernanceWallets, Network};
pub use error::{
    CheckpointError, MinerTxError, PoolError, RegistryError, RewardError, StakingError,
};
pub use keys::deterministic_keypair;
pub use mempool::{BlockTemplateFill, TakenTx, TxDetails, TxMemoryPool};
pub use miner_tx::{
    construct_miner_tx, get_deterministic_output_key, validate_dev_fund_reward_key,
    validate_governance_reward_key, MinerTxContext,
};
pub use reward::{
    block_reward_parts, get_base_block_reward, get_portion_of_reward, BlockRewardParts,
    RewardContext,
};
pub use service_nodes::{QuorumState, RollbackEvent, ServiceNodeInfo, ServiceNodeList};
pub use tx::{Transaction, TxIn, TxOut, TxOutTarget, TxType, TxVersion};
pub use types::{Address, Block, ForkVersion, Height};
