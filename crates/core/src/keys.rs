use xeq_crypto::{generate_keys, Keypair};

use crate::types::Height;

/// Keypair every node derives identically for a given height: the secret
/// seed is `LE64(height)` zero-padded to 32 bytes, reduced mod the group
/// order. Governance, dev-fund and service-node reward outputs are
/// addressed with it so recipients can detect payments without a shared
/// secret.
pub fn deterministic_keypair(height: Height) -> Keypair {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&height.to_le_bytes());
    generate_keys(&seed)
}
