//! Consensus errors.

use hodl_core::{Address, Hash, ProposerKind};
use thiserror::Error;

/// A rule a candidate block breaks. The candidate is discarded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusViolation {
    #[error("block hash does not match its header")]
    HashMismatch,

    #[error("previous hash {got} does not link to parent {expected}")]
    BadLinkage { expected: Hash, got: Hash },

    #[error("block height mismatch (expected {expected}, got {got})")]
    HeightMismatch { expected: u64, got: u64 },

    #[error("block timestamp {timestamp} is not after parent timestamp {parent}")]
    TimestampTooEarly { timestamp: u64, parent: u64 },

    #[error("block timestamp {timestamp} is too far in the future (now {now})")]
    TimestampTooFuture { timestamp: u64, now: u64 },

    #[error("seal and validator signature disagree")]
    MalformedSeal,

    #[error("{kind} blocks are not eligible at height {height}")]
    KindNotEligible { kind: ProposerKind, height: u64 },

    #[error("block hash does not meet difficulty {difficulty}")]
    InsufficientWork { difficulty: u32 },

    #[error("wrong difficulty (expected {expected}, got {got})")]
    WrongDifficulty { expected: u32, got: u32 },

    #[error("invalid validator signature")]
    BadValidatorSignature,

    #[error("validator {0} holds no stake")]
    ZeroStake(Address),

    #[error("stake claim {claimed} does not match committed stake {actual}")]
    WrongStakeClaim { claimed: u64, actual: u64 },

    #[error("beneficiary must be the validator address {0}")]
    BeneficiaryMismatch(Address),

    #[error("validator {got} was not selected (expected {expected})")]
    WrongProposer { expected: Address, got: Address },

    #[error("proposer {proposer} forfeited height {height}")]
    ForfeitedProposer { proposer: Address, height: u64 },

    #[error("transactions root mismatch")]
    TransactionsRootMismatch,

    #[error("state root mismatch (header {claimed}, computed {computed})")]
    StateRootMismatch { claimed: Hash, computed: Hash },

    #[error("duplicate transaction {0}")]
    DuplicateTransaction(Hash),

    #[error("invalid transaction {id}: {reason}")]
    InvalidTransaction { id: Hash, reason: String },
}

/// Errors from block production.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error(transparent)]
    Violation(#[from] ConsensusViolation),

    #[error("no eligible proposer at height {height}")]
    NoEligibleProposer { height: u64 },

    #[error("{kind} blocks are not eligible at height {height}")]
    NotEligible { kind: ProposerKind, height: u64 },

    #[error("validator {got} is not the selected proposer (expected {expected})")]
    NotSelected { expected: Address, got: Address },
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
