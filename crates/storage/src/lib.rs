//! Persistent storage layer for hodl.
//!
//! This crate provides the storage backend for the ledger:
//! - Block storage (by hash, with a canonical height index) and head tracking
//! - Undo records, so the head can be replaced by a heavier sibling
//! - The materialized account and contract state snapshot
//! - Single-writer append, read-only handles and a corruption latch
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Chain / Consensus Layer                  │
//! └──────────────┬──────────────────────────┬───────────────┘
//!                │ writer().append()        │ reads
//! ┌──────────────▼──────────────────────────▼───────────────┐
//! │                        Store                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────┐  │
//! │  │ StoreWriter  │  │ Blocks/Head  │  │ State snapshot│  │
//! │  │ (one at a    │  │  - by height │  │  - accounts   │  │
//! │  │  time)       │  │  - by hash   │  │  - contracts  │  │
//! │  └──────────────┘  └──────────────┘  └───────────────┘  │
//! └────────────────────────┬────────────────────────────────┘
//!                          │ atomic batches
//! ┌────────────────────────▼────────────────────────────────┐
//! │                    sled Database                         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use hodl_core::{Block, Hash, StateChanges};
//! use hodl_storage::{AccessMode, Store};
//!
//! let store = Store::open("./hodl_data", AccessMode::ReadWrite).unwrap();
//! store
//!     .writer()
//!     .unwrap()
//!     .initialize(&Block::genesis(0, Hash::ZERO, 8), &StateChanges::default())
//!     .unwrap();
//!
//! let reader = store.reader();
//! assert_eq!(reader.height().unwrap(), 0);
//! ```

pub mod chain;
pub mod db;
pub mod error;
pub mod state;
pub mod store;

// Re-export commonly used types
pub use chain::StoreStats;
pub use db::{Database, WriteBatch};
pub use error::{AppendError, Result, StoreError};
pub use state::{ParentState, StateUndo};
pub use store::{AccessMode, Store, StoreWriter};
