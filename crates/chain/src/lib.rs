//! Blockchain orchestration for hodl.
//!
//! This crate brings together all components to create a working ledger node:
//! - **Consensus**: hybrid PoW/PoS block production and validation
//! - **Mempool**: Transaction pool for pending transactions
//! - **Executor**: Block execution engine
//! - **Storage**: Persistent chain and state snapshot
//!
//! # Example
//!
//! ```rust,no_run
//! use hodl_chain::{Blockchain, ChainConfig, GenesisAllocation, Proposer};
//! use hodl_consensus::{CancelToken, ConsensusPolicy};
//! use hodl_core::{Transaction, Wallet};
//! use hodl_storage::{AccessMode, Store};
//!
//! let alice = Wallet::generate();
//! let bob = Wallet::generate();
//!
//! let mut config = ChainConfig::default();
//! config.consensus.policy = ConsensusPolicy::PowOnly;
//! config.genesis.allocations.push(GenesisAllocation {
//!     address: alice.address(),
//!     balance: 100,
//!     stake: 0,
//! });
//!
//! let store = Store::open("./hodl_data", AccessMode::ReadWrite).unwrap();
//! let chain = Blockchain::initialize(store, config).unwrap();
//!
//! chain
//!     .submit_transaction(Transaction::transfer(&alice, bob.address(), 10, 0, 1).signed(&alice))
//!     .unwrap();
//! let block = chain
//!     .produce_block(Proposer::Miner { beneficiary: alice.address() }, &CancelToken::new())
//!     .unwrap();
//! assert_eq!(block.tx_count(), 1);
//! ```

pub mod blockchain;
pub mod config;
pub mod error;
pub mod executor;
pub mod mempool;

// Re-export commonly used types
pub use blockchain::{AppendOutcome, Blockchain, ChainInfo, ChainStats, Proposer, MAX_ASSEMBLY_ATTEMPTS};
pub use config::{
    BlockConfig, ChainConfig, ConsensusConfig, ExecutionConfig, GenesisAllocation, GenesisConfig,
    MempoolConfig, CONFIG_FILE,
};
pub use error::{ChainError, InvalidTxReason, PoolError, Result};
pub use executor::{check_admission, BlockExecutionResult, Executor, TransactionReceipt};
pub use mempool::{Mempool, MempoolStats};
