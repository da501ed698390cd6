//! Sandbox errors.

use thiserror::Error;

/// Why a contract transaction produced no state delta.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Out of resources: gas limit {limit} exhausted")]
    OutOfResources { limit: u64 },

    #[error("Invalid program: {0}")]
    InvalidProgram(String),

    #[error("Invalid jump destination: {0}")]
    InvalidJump(u32),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Execution reverted")]
    Reverted,

    #[error("No contract deployed at {0}")]
    ContractNotFound(String),

    #[error("Contract storage limit of {0} entries exceeded")]
    StorageLimit(usize),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
