//! Binary merkle root over ordered hashes.

use crate::hash::{hash_concat, Hash};

const ODD_NODE_TAG: &[u8] = b"hodl:merkle:odd";

/// Compute the merkle root of a list of hashes.
///
/// Returns the zero hash for an empty list. An odd node at any level is
/// hashed alone under a separate tag, so a list and the same list with its
/// last entry repeated have different roots.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    match hashes {
        [] => Hash::ZERO,
        [single] => *single,
        _ => {
            let mut level: Vec<Hash> = hashes.to_vec();
            while level.len() > 1 {
                level = level
                    .chunks(2)
                    .map(|pair| match pair {
                        [left, right] => hash_concat(&[left.as_ref(), right.as_ref()]),
                        _ => hash_concat(&[ODD_NODE_TAG, pair[0].as_ref()]),
                    })
                    .collect();
            }
            level[0]
        }
    }
}
