//! Chain-level errors.

use hodl_consensus::{ConsensusError, ConsensusViolation};
use hodl_core::{Address, Hash};
use hodl_storage::{AppendError, StoreError};
use std::convert::Infallible;
use thiserror::Error;

/// Why a transaction is refused by the mempool or the executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidTxReason {
    #[error("bad signature")]
    BadSignature,

    #[error("sender address does not match the sender key")]
    SenderKeyMismatch,

    #[error("bad nonce (expected {expected}, got {got})")]
    BadNonce { expected: u64, got: u64 },

    #[error("insufficient balance (required {required}, available {available})")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("gas limit {got} exceeds the per-transaction cap {max}")]
    GasLimitTooHigh { max: u64, got: u64 },

    #[error("deployment carries no code")]
    EmptyDeployCode,

    #[error("paying the fee would overflow the balance of {0}")]
    FeeOverflow(Address),
}

/// Errors from the transaction pool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] InvalidTxReason),

    #[error("transaction {0} already pooled")]
    Duplicate(Hash),

    #[error("mempool is full (capacity: {0})")]
    Full(usize),
}

/// Errors that can occur during blockchain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("append failed: {0}")]
    Append(#[from] AppendError),

    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("block rejected: {0}")]
    Rejected(#[from] ConsensusViolation),

    #[error("mempool error: {0}")]
    Pool(#[from] PoolError),

    #[error("config {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("stored genesis {stored} does not match the configured genesis {configured}")]
    GenesisMismatch { stored: Hash, configured: Hash },

    #[error("parent {0} is not the head or its predecessor")]
    UnknownParent(Hash),

    #[error("block production cancelled")]
    Cancelled,

    #[error("head kept moving; gave up after {attempts} attempts")]
    HeadContention { attempts: usize },
}

impl From<Infallible> for ChainError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
