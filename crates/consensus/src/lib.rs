//! Hybrid proof-of-work / proof-of-stake consensus for hodl.
//!
//! This crate provides the consensus rules the chain layer applies:
//! - Parallel, cancellable PoW nonce search and difficulty retargeting
//! - Stake-weighted PoS proposer selection seeded by the parent hash
//! - The hybrid schedule deciding which proof kinds may extend a height
//! - Heaviest-chain fork choice over cumulative weight
//! - Stateless block validation (hash, linkage, timestamp, seal, transactions)
//!
//! # Example
//!
//! ```rust,no_run
//! use hodl_consensus::{BlockValidator, CancelToken, ConsensusPolicy, Miner, ValidationContext};
//! use hodl_core::{Address, Block, BlockHeader, Hash, Seal};
//!
//! let genesis = Block::genesis(0, Hash::ZERO, 4);
//! let template = BlockHeader {
//!     index: 1,
//!     timestamp: 10,
//!     previous_hash: genesis.hash,
//!     transactions_root: Hash::ZERO,
//!     state_root: Hash::ZERO,
//!     difficulty: 4,
//!     beneficiary: Address::ZERO,
//!     seal: Seal::Work { nonce: 0 },
//! };
//!
//! let header = Miner::mine(template, 4, &CancelToken::new()).unwrap();
//! let block = Block::from_parts(header, vec![], None);
//!
//! let ctx = ValidationContext {
//!     parent: &genesis,
//!     expected_difficulty: 4,
//!     stakers: &[],
//!     policy: ConsensusPolicy::PowOnly,
//!     now: 20,
//!     max_clock_drift: 30,
//! };
//! BlockValidator::validate_full(&block, &ctx).unwrap();
//! ```

pub mod error;
pub mod fork_choice;
pub mod pos;
pub mod pow;
pub mod schedule;
pub mod validator;

// Re-export commonly used types
pub use error::{ConsensusError, ConsensusViolation, Result};
pub use fork_choice::{ForkChoice, Tip};
pub use pos::{select_validator, selection_seed, stake_of};
pub use pow::{CancelToken, Miner, Retarget, MAX_DIFFICULTY, MIN_DIFFICULTY};
pub use schedule::{ConsensusPolicy, Phase};
pub use validator::{proposer_of, BlockValidator, Forfeits, TransactionValidator, ValidationContext};
