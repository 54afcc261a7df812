use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xeq_crypto::PublicKey;

use crate::service_nodes::info::ServiceNodeInfo;
use crate::types::Height;

/// Undo log entry. `Change` restores a prior value, `New` erases an entry
/// installed at that height, `Barrier` marks the edge of the rolling window
/// past which the log cannot unwind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackEvent {
    Change {
        block_height: Height,
        key: PublicKey,
        info: ServiceNodeInfo,
    },
    New {
        block_height: Height,
        key: PublicKey,
    },
    Barrier {
        block_height: Height,
    },
}

impl RollbackEvent {
    pub fn block_height(&self) -> Height {
        match self {
            RollbackEvent::Change { block_height, .. }
            | RollbackEvent::New { block_height, .. }
            | RollbackEvent::Barrier { block_height } => *block_height,
        }
    }

    /// Apply the undo against `infos`. Returns false when the unwind must
    /// stop (barrier hit, or a `New` whose key has already vanished).
    pub fn apply(&self, infos: &mut BTreeMap<PublicKey, ServiceNodeInfo>) -> bool {
        match self {
            RollbackEvent::Change { key, info, .. } => {
                infos.insert(*key, info.clone());
                true
            }
            RollbackEvent::New { key, .. } => {
                if infos.remove(key).is_none() {
                    log::error!("could not find service node pubkey in rollback new");
                    return false;
                }
                true
            }
            RollbackEvent::Barrier { .. } => {
                log::error!("unable to rollback any further!");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_erases_and_change_restores() {
        let key = PublicKey([1u8; 32]);
        let mut infos = BTreeMap::new();
        infos.insert(key, ServiceNodeInfo::default());

        assert!(RollbackEvent::New {
            block_height: 5,
            key
        }
        .apply(&mut infos));
        assert!(infos.is_empty());

        let prior = ServiceNodeInfo {
            registration_height: 3,
            ..Default::default()
        };
        assert!(RollbackEvent::Change {
            block_height: 5,
            key,
            info: prior.clone()
        }
        .apply(&mut infos));
        assert_eq!(infos.get(&key), Some(&prior));

        assert!(!RollbackEvent::Barrier { block_height: 5 }.apply(&mut infos));
    }
}
