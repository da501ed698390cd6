//! Proof of work: parallel nonce search and difficulty retargeting.
//!
//! Difficulty is a count of leading zero bits a header hash must carry, so
//! each extra bit doubles the expected work.

use hodl_core::{BlockHeader, Seal};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// Lowest difficulty a retarget may produce.
pub const MIN_DIFFICULTY: u32 = 1;

/// Highest difficulty a retarget may produce.
pub const MAX_DIFFICULTY: u32 = 255;

/// Shared stop signal for a nonce search.
///
/// Clones observe the same flag. Cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Parallel PoW search over a header template.
pub struct Miner;

impl Miner {
    /// Search for a nonce that makes `template` meet its own difficulty.
    ///
    /// Worker `i` of `n` tries nonces `i, i + n, i + 2n, ...`. Returns the
    /// sealed header, or `None` if `cancel` fired first. Nothing outside
    /// the returned value is touched, so a cancelled search leaves no trace.
    pub fn mine(template: BlockHeader, workers: usize, cancel: &CancelToken) -> Option<BlockHeader> {
        let workers = workers.max(1) as u64;
        let difficulty = template.difficulty;
        let found = AtomicBool::new(false);
        let solution: Mutex<Option<BlockHeader>> = Mutex::new(None);

        debug!(index = template.index, difficulty, workers, "starting nonce search");

        thread::scope(|scope| {
            for worker in 0..workers {
                let mut header = template.clone();
                let found = &found;
                let solution = &solution;
                scope.spawn(move || {
                    let mut nonce = worker;
                    loop {
                        if found.load(Ordering::Relaxed) || cancel.is_cancelled() {
                            return;
                        }
                        header.seal = Seal::Work { nonce };
                        if header.hash().meets_difficulty(difficulty) {
                            let mut slot = solution.lock();
                            if slot.is_none() {
                                *slot = Some(header);
                            }
                            found.store(true, Ordering::Relaxed);
                            return;
                        }
                        nonce = match nonce.checked_add(workers) {
                            Some(next) => next,
                            None => return,
                        };
                    }
                });
            }
        });

        let solution = solution.into_inner();
        match &solution {
            Some(header) => info!(
                index = header.index,
                hash = %header.hash(),
                difficulty,
                "found proof of work"
            ),
            None => debug!(index = template.index, "nonce search cancelled"),
        }
        solution
    }

    /// Check a header's proof of work against its own difficulty.
    pub fn verify(header: &BlockHeader) -> bool {
        matches!(header.seal, Seal::Work { .. }) && header.hash().meets_difficulty(header.difficulty)
    }
}

/// Difficulty retargeting parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retarget {
    /// Blocks per difficulty epoch.
    pub interval: u64,
    /// Desired mean seconds between blocks.
    pub target_block_time: u64,
}

impl Default for Retarget {
    fn default() -> Self {
        Self {
            interval: 10,
            target_block_time: 30,
        }
    }
}

impl Retarget {
    /// Whether the block after `parent_index` starts a new epoch.
    pub fn is_boundary(&self, parent_index: u64) -> bool {
        self.interval > 0 && parent_index > 0 && parent_index % self.interval == 0
    }

    /// Index of the block opening the epoch that `parent_index` closes.
    pub fn epoch_start(&self, parent_index: u64) -> u64 {
        parent_index.saturating_sub(self.interval)
    }

    /// Difficulty for the block after a parent with `current` difficulty.
    ///
    /// `epoch_span` is the parent's timestamp minus the timestamp of block
    /// [`Retarget::epoch_start`]; it is only consulted on epoch boundaries.
    /// Each halving (doubling) of the observed interval relative to the
    /// target adds (removes) one bit, at most two bits per epoch.
    pub fn next_difficulty(&self, current: u32, parent_index: u64, epoch_span: u64) -> u32 {
        if !self.is_boundary(parent_index) {
            return current;
        }
        let expected = self.interval.saturating_mul(self.target_block_time).max(1);
        let actual = epoch_span.max(1);

        let next = if actual.saturating_mul(4) <= expected {
            current.saturating_add(2)
        } else if actual.saturating_mul(2) <= expected {
            current.saturating_add(1)
        } else if actual >= expected.saturating_mul(4) {
            current.saturating_sub(2)
        } else if actual >= expected.saturating_mul(2) {
            current.saturating_sub(1)
        } else {
            current
        };
        let next = next.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
        if next != current {
            info!(from = current, to = next, actual, expected, "difficulty retargeted");
        }
        next
    }
}
