//! Deterministic contract sandbox for hodl.
//!
//! Bytecode is decoded once into a fixed instruction set and run by a
//! register machine with a gas budget. Execution sees only the contract's
//! storage snapshot and the calling transaction.

pub mod error;
pub mod executor;
pub mod gas;
pub mod opcodes;
pub mod registers;
pub mod sandbox;

pub use error::{ExecutionError, Result};
pub use executor::{CallContext, ExecutionResult, Vm};
pub use gas::{GasCosts, GasMeter};
pub use opcodes::{decode, encode, Instruction, Opcode};
pub use sandbox::{execute, Sandbox, StateDelta};
