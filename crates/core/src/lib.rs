//! Core ledger primitives for hodl.
//!
//! This crate provides the fundamental types shared by every other crate:
//! - Hashing, keys, signatures and addresses
//! - Accounts and contract records
//! - Transactions and blocks
//! - State access and the state root

pub mod account;
pub mod block;
pub mod crypto;
pub mod hash;
pub mod merkle;
pub mod state;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use account::{Account, ContractState};
pub use block::{Block, BlockHeader, ProposerKind, Seal};
pub use crypto::{
    derive_address, generate_keypair, sign, verify, Address, CryptoError, PrivateKey, PublicKey,
    Signature, Wallet,
};
pub use hash::{hash, hash_concat, Hash, H256};
pub use merkle::merkle_root;
pub use state::{state_root, MemoryState, Overlay, StateChanges, StateReader};
pub use transaction::{Payload, Transaction, TransactionError};
