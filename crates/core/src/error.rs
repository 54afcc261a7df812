use crate::types::Height;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("failed to parse checkpoint hash: {0}")]
    BadHash(String),
    #[error("checkpoint at height {height} already exists with a different hash")]
    Conflict { height: Height },
    #[error("checkpoint file i/o: {0}")]
    Io(String),
    #[error("checkpoint file parse: {0}")]
    Parse(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RewardError {
    #[error("block weight {weight} exceeds twice the median {median}")]
    WeightTooBig { weight: u64, median: u64 },
    #[error("unexpected base reward of 0")]
    ZeroBaseReward,
}

/// Why a staking-path transaction was ignored. These are tx-local: the
/// block carrying the transaction is still processed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StakingError {
    #[error("malformed extra field")]
    ParseError,
    #[error("registration signature invalid")]
    SignatureInvalid,
    #[error("portions are invalid")]
    PortionInvalid,
    #[error("stake amount below the fork minimum")]
    StakeTooSmall,
    #[error("stake amount above the fork maximum")]
    StakeTooLarge,
    #[error("burned amount below the required fee burn")]
    BurnInsufficient,
    #[error("output unlock time outside the staking window")]
    UnlockWindowWrong,
    #[error("duplicate contributor address")]
    DuplicateContributor,
    #[error("contributor slots exhausted")]
    CapacityExceeded,
    #[error("registration expired before the block timestamp")]
    AuthorizationExpired,
    #[error("no quorum snapshot stored for height {0}")]
    QuorumMissing(Height),
    #[error("service node key not present in the registry")]
    RegistryMissingKey,
    #[error("node still inside its stake lock window")]
    StillLocked,
    #[error("swap memo does not match the transferred amount")]
    SwapMismatch,
}

/// Registry-level failures that are not tx-local.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("rollback hit a barrier; full rescan required")]
    CannotRollback,
    #[error("key-value store failure: {0}")]
    Store(String),
    #[error("persisted registry blob is malformed")]
    CorruptState,
    #[error("chain access failed: {0}")]
    Chain(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("key-value store failure: {0}")]
    Store(String),
    #[error("transaction blob in the pool store is malformed")]
    CorruptBlob,
    #[error("pool index inconsistency: {0}")]
    IndexBroken(&'static str),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MinerTxError {
    #[error("reward computation failed: {0}")]
    Reward(#[from] RewardError),
    #[error("output key derivation failed")]
    Derivation,
    #[error("coinbase outputs do not sum to the expected reward (got {got}, expected {expected})")]
    Conservation { got: u64, expected: u64 },
    #[error("service node winner in extra is incorrect")]
    WrongWinner,
    #[error("miner tx outputs smaller than winner payout rows")]
    MissingOutputs,
    #[error("service node reward amount incorrect at output {0}")]
    WrongAmount(usize),
    #[error("service node output target type should be a key output")]
    WrongTarget(usize),
    #[error("invalid service node reward output")]
    InvalidRewardOutput,
    #[error("invalid governance reward output")]
    InvalidGovernanceOutput,
    #[error("invalid dev fund reward output")]
    InvalidDevFundOutput,
}
