//! Heaviest-chain fork choice.

use hodl_core::Hash;
use std::collections::HashMap;
use tracing::debug;

/// The head of a chain branch seen by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tip {
    pub hash: Hash,
    pub height: u64,
    /// Sum of block weights from genesis through this tip.
    pub cumulative_weight: u128,
    /// Arrival order; lower was seen first.
    pub seen: u64,
}

impl Tip {
    /// Whether `self` should be preferred over `other`.
    pub fn beats(&self, other: &Tip) -> bool {
        self.cumulative_weight > other.cumulative_weight
            || (self.cumulative_weight == other.cumulative_weight && self.seen < other.seen)
    }
}

/// Tracks competing tips and picks the canonical one: greatest cumulative
/// weight, earliest-seen on ties.
#[derive(Debug, Default)]
pub struct ForkChoice {
    tips: HashMap<Hash, Tip>,
    next_seen: u64,
}

impl ForkChoice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a valid block as a tip. Re-observing a known hash keeps its
    /// original arrival order. Returns true if it is now the best tip.
    pub fn observe(&mut self, hash: Hash, height: u64, cumulative_weight: u128) -> bool {
        let seen = self.next_seen;
        let tip = *self.tips.entry(hash).or_insert_with(|| Tip {
            hash,
            height,
            cumulative_weight,
            seen,
        });
        if tip.seen == seen {
            self.next_seen += 1;
        }
        let is_best = self.best().map(|best| best.hash) == Some(hash);
        debug!(%hash, height, cumulative_weight, is_best, "tip observed");
        is_best
    }

    /// The canonical tip, if any has been observed.
    pub fn best(&self) -> Option<Tip> {
        self.tips
            .values()
            .copied()
            .reduce(|best, tip| if tip.beats(&best) { tip } else { best })
    }

    /// Forget tips below `height`; they can no longer win.
    pub fn prune_below(&mut self, height: u64) {
        self.tips.retain(|_, tip| tip.height >= height);
    }

    pub fn len(&self) -> usize {
        self.tips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tips.is_empty()
    }
}
