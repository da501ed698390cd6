//! Proof of stake: stake-weighted proposer selection.
//!
//! The seed for height `h` is derived from the hash of block `h - 1`, which
//! is fixed before anyone can propose at `h`, so a validator cannot grind
//! its own selection.

use hodl_core::{hash_concat, Address, Hash};

/// Selection seed for the block at `index` on top of `previous_hash`.
pub fn selection_seed(previous_hash: &Hash, index: u64) -> Hash {
    hash_concat(&[
        b"hodl-pos".as_slice(),
        previous_hash.as_ref(),
        index.to_le_bytes().as_slice(),
    ])
}

/// Pick the proposer for `index` among `stakers`, weighted by stake.
///
/// `stakers` must be ordered by address (as the store returns them) so
/// every node walks the same cumulative ranges. Entries with zero stake
/// are never selected. Returns `None` when nobody is staking.
pub fn select_validator(stakers: &[(Address, u64)], previous_hash: &Hash, index: u64) -> Option<Address> {
    let total: u128 = stakers.iter().map(|(_, stake)| *stake as u128).sum();
    if total == 0 {
        return None;
    }
    let point = selection_seed(previous_hash, index).prefix_u64() as u128 % total;

    let mut cumulative = 0u128;
    for (address, stake) in stakers {
        cumulative += *stake as u128;
        if point < cumulative {
            return Some(*address);
        }
    }
    None
}

/// Committed stake of `address` in a staker list.
pub fn stake_of(stakers: &[(Address, u64)], address: &Address) -> u64 {
    stakers
        .iter()
        .find(|(staker, _)| staker == address)
        .map_or(0, |(_, stake)| *stake)
}
