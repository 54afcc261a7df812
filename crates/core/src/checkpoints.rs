//! Height-to-hash checkpoints gating block acceptance.
//!
//! Hard-coded points ship with the daemon; further points can be appended
//! from a JSON file or DNS TXT records, but only above the current maximum.

use log::{info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::Network;
use crate::error::CheckpointError;
use crate::types::Height;
use xeq_crypto::Hash;

#[derive(Debug, Default, Clone)]
pub struct Checkpoints {
    points: BTreeMap<Height, Hash>,
}

/// One record of the JSON checkpoint file.
#[derive(Debug, Deserialize)]
struct HashLine {
    height: Height,
    hash: String,
}

#[derive(Debug, Deserialize)]
struct HashFile {
    hashlines: Vec<HashLine>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `hash` at `height`. Re-adding the identical hash is a no-op;
    /// a conflicting hash at a recorded height is rejected.
    pub fn add_checkpoint(&mut self, height: Height, hash_str: &str) -> Result<(), CheckpointError> {
        let hash = Hash::from_hex(hash_str)
            .map_err(|_| CheckpointError::BadHash(hash_str.to_string()))?;
        if let Some(existing) = self.points.get(&height) {
            if *existing != hash {
                return Err(CheckpointError::Conflict { height });
            }
        }
        self.points.insert(height, hash);
        Ok(())
    }

    pub fn is_in_checkpoint_zone(&self, height: Height) -> bool {
        self.max_height().map_or(false, |max| height <= max)
    }

    /// Returns `(passes, is_a_checkpoint)`. A height with no checkpoint
    /// always passes.
    pub fn check_block(&self, height: Height, hash: &Hash) -> (bool, bool) {
        match self.points.get(&height) {
            None => (true, false),
            Some(expected) if expected == hash => {
                info!("checkpoint passed for height {} {}", height, hash);
                (true, true)
            }
            Some(expected) => {
                warn!(
                    "checkpoint failed for height {}: expected {}, got {}",
                    height, expected, hash
                );
                (false, true)
            }
        }
    }

    /// An alternative block is allowed only above the last checkpoint at or
    /// below the current chain height. Height 0 is never replaceable.
    pub fn is_alternative_block_allowed(&self, blockchain_height: Height, block_height: Height) -> bool {
        if block_height == 0 {
            return false;
        }
        match self.points.range(..=blockchain_height).next_back() {
            None => true,
            Some((&checkpoint_height, _)) => checkpoint_height < block_height,
        }
    }

    pub fn max_height(&self) -> Option<Height> {
        self.points.keys().next_back().copied()
    }

    pub fn points(&self) -> &BTreeMap<Height, Hash> {
        &self.points
    }

    /// Pairwise hash equality over heights both stores know.
    pub fn check_for_conflicts(&self, other: &Checkpoints) -> bool {
        other.points.iter().all(|(height, hash)| {
            self.points.get(height).map_or(true, |ours| ours == hash)
        })
    }

    /// Ship-time checkpoints. Testnet and stagenet start empty.
    pub fn init_default_checkpoints(&mut self, nettype: Network) -> Result<(), CheckpointError> {
        if matches!(nettype, Network::Testnet | Network::Stagenet) {
            return Ok(());
        }
        self.add_checkpoint(0, "85bb9128c170896673aa1b47f2c7d238f77b6c6f06cd7f25b399747d5015577e")?;
        self.add_checkpoint(1, "ed1dd5a452b32bdc13cd11aee5e2485ca69d2a2ae8beb1e28e7da2d30959c799")?;
        // hf v2
        self.add_checkpoint(8, "5311cf4bd7a02cb267f89bf9e727aeaf27f669468979876fbd42c3f6a2ed0808")?;
        // hf v3
        self.add_checkpoint(100, "a46c1f2818fe83cb65b6a83dc9c4c50eb7eaa00e6a8acf3716549c220f5815cc")?;
        // hf v4
        self.add_checkpoint(45000, "e632e631eeb62c94c40c19c9eb5f04d11f634477e9293cde889a4478c85ef16f")?;
        // hf v5
        self.add_checkpoint(106950, "c00fa5ecd7c2e08f6b88f39a3fd3acc31e9ee5ef2872e0543324d2c58ad2c57c")?;
        // hf v6
        self.add_checkpoint(181056, "180d0ac84048d1dd57126c38b53c353df90fa73aeb60def9359e21e55b4b2946")?;
        Ok(())
    }

    /// Append checkpoints from a JSON file of `{hashlines: [{height, hash}]}`.
    /// A missing file is fine; records at or below the current max are
    /// ignored, and individually malformed records are skipped.
    pub fn load_checkpoints_from_json<P: AsRef<Path>>(&mut self, path: P) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("blockchain checkpoints file not found");
            return Ok(());
        }

        let prev_max_height = self.max_height().unwrap_or(0);
        info!("hard-coded max checkpoint height is {}", prev_max_height);

        let raw = std::fs::read_to_string(path)
            .map_err(|e| CheckpointError::Io(e.to_string()))?;
        let file: HashFile = serde_json::from_str(&raw)
            .map_err(|e| CheckpointError::Parse(e.to_string()))?;

        for line in file.hashlines {
            if line.height <= prev_max_height {
                info!("ignoring checkpoint height {}", line.height);
                continue;
            }
            if let Err(e) = self.add_checkpoint(line.height, &line.hash) {
                warn!("skipping checkpoint at {}: {}", line.height, e);
            }
        }
        Ok(())
    }

    /// Parse DNS TXT records of the form `"<decimal height>:<hex hash>"`.
    /// Malformed records are skipped; transport is the caller's concern.
    pub fn load_checkpoints_from_dns_records<I, S>(&mut self, records: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for record in records {
            let record = record.as_ref();
            let Some((height_str, hash_str)) = record.split_once(':') else {
                continue;
            };
            let Ok(height) = height_str.trim().parse::<Height>() else {
                continue;
            };
            if Hash::from_hex(hash_str).is_err() {
                continue;
            }
            if let Err(e) = self.add_checkpoint(height, hash_str.trim()) {
                warn!("skipping DNS checkpoint at {}: {}", height, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent_and_conflict_safe() {
        let mut cp = Checkpoints::new();
        let h = "85bb9128c170896673aa1b47f2c7d238f77b6c6f06cd7f25b399747d5015577e";
        cp.add_checkpoint(10, h).unwrap();
        cp.add_checkpoint(10, h).unwrap();
        let other = "ed1dd5a452b32bdc13cd11aee5e2485ca69d2a2ae8beb1e28e7da2d30959c799";
        assert!(matches!(
            cp.add_checkpoint(10, other),
            Err(CheckpointError::Conflict { height: 10 })
        ));
    }

    #[test]
    fn dns_records_tolerant() {
        let mut cp = Checkpoints::new();
        cp.load_checkpoints_from_dns_records([
            "nonsense",
            "12:not-hex",
            "15:ed1dd5a452b32bdc13cd11aee5e2485ca69d2a2ae8beb1e28e7da2d30959c799",
        ]);
        assert_eq!(cp.max_height(), Some(15));
        assert_eq!(cp.points().len(), 1);
    }
}
