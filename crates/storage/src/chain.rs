//! Block storage, chain head tracking and the append path.
//!
//! Blocks live under their hash and are never removed. The canonical chain
//! is the height index plus a single head record, so a reader gets the
//! head pointer and its totals from one key.

use crate::db::{Database, WriteBatch};
use crate::error::{AppendError, Result, StoreError};
use crate::state::{ParentState, StateUndo};
use crate::store::{Store, StoreWriter};
use hodl_core::{Block, Hash, StateChanges};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const CHAIN_HEAD_KEY: &[u8] = b"chain:head";
pub(crate) const STATE_HEIGHT_KEY: &[u8] = b"state:height";
pub(crate) const GENESIS_ALLOC_KEY: &[u8] = b"genesis:alloc";

/// The head pointer and the totals that move with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct HeadRecord {
    hash: Hash,
    height: u64,
    cumulative_weight: u128,
    total_transactions: u64,
}

/// Totals kept alongside the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub height: u64,
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub total_contracts: u64,
    pub head_hash: Hash,
    pub cumulative_weight: u128,
}

impl Store {
    /// Check if the chain has a genesis block.
    pub fn is_initialized(&self) -> Result<bool> {
        self.check()?;
        self.db().contains(CHAIN_HEAD_KEY)
    }

    fn head_record(&self) -> Result<HeadRecord> {
        self.read(CHAIN_HEAD_KEY)?
            .ok_or(StoreError::NotInitialized)
    }

    // =========================================================================
    // Block Reads
    // =========================================================================

    /// Get the canonical block at a height. `None` past the head.
    pub fn get_block(&self, index: u64) -> Result<Option<Block>> {
        let hash: Option<Hash> = self.read(&Database::block_height_key(index))?;
        let Some(hash) = hash else {
            return Ok(None);
        };
        let block = self.load_block(&hash)?.ok_or_else(|| {
            self.corrupt(format!("height index {index} points at missing block {hash}"))
        })?;
        if block.index() != index {
            return Err(self.corrupt(format!(
                "block stored at height {index} claims height {}",
                block.index()
            )));
        }
        Ok(Some(block))
    }

    /// Get a block by its hash. Blocks displaced from the head by a heavier
    /// sibling stay readable here.
    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>> {
        self.load_block(hash)
    }

    fn load_block(&self, hash: &Hash) -> Result<Option<Block>> {
        let block: Option<Block> = self.read(&Database::block_hash_key(hash))?;
        match block {
            Some(block) if block.hash != *hash || !block.verify_hash() => Err(self.corrupt(format!(
                "block stored under {hash} does not hash to it"
            ))),
            other => Ok(other),
        }
    }

    /// Check if a block exists by hash.
    pub fn has_block(&self, hash: &Hash) -> Result<bool> {
        self.check()?;
        self.db().contains(Database::block_hash_key(hash))
    }

    /// Height of the head block.
    pub fn height(&self) -> Result<u64> {
        Ok(self.head_record()?.height)
    }

    /// Hash of the head block.
    pub fn head_hash(&self) -> Result<Hash> {
        Ok(self.head_record()?.hash)
    }

    /// The latest block on the chain.
    pub fn head(&self) -> Result<Block> {
        let record = self.head_record()?;
        let block = self
            .load_block(&record.hash)?
            .ok_or_else(|| self.corrupt(format!("head block {} is missing", record.hash)))?;
        if block.index() != record.height {
            return Err(self.corrupt(format!(
                "head record says height {}, head block is at {}",
                record.height,
                block.index()
            )));
        }
        Ok(block)
    }

    /// Sum of block weights from genesis to the head.
    pub fn cumulative_weight(&self) -> Result<u128> {
        Ok(self.head_record()?.cumulative_weight)
    }

    /// Cumulative weight from genesis up to and including the stored block
    /// `hash`.
    pub fn weight_of(&self, hash: &Hash) -> Result<Option<u128>> {
        self.read(&Database::block_weight_key(hash))
    }

    /// Number of transactions in all canonical blocks.
    pub fn total_transactions(&self) -> Result<u64> {
        Ok(self.head_record()?.total_transactions)
    }

    /// Get blocks in a range [from_height, to_height].
    pub fn blocks_range(&self, from_height: u64, to_height: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for height in from_height..=to_height {
            match self.get_block(height)? {
                Some(block) => blocks.push(block),
                None => break, // Stop at first missing block
            }
        }
        Ok(blocks)
    }

    /// Get the last N blocks (most recent first).
    pub fn recent_blocks(&self, count: u64) -> Result<Vec<Block>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let height = self.height()?;
        let from_height = height.saturating_sub(count - 1);
        let mut blocks = self.blocks_range(from_height, height)?;
        blocks.reverse();
        Ok(blocks)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let head = self.head_record()?;
        Ok(StoreStats {
            height: head.height,
            total_blocks: head.height + 1,
            total_transactions: head.total_transactions,
            total_contracts: self.total_contracts()?,
            head_hash: head.hash,
            cumulative_weight: head.cumulative_weight,
        })
    }

    /// Walk the chain from genesis, checking every stored hash, height and
    /// link. Latches corruption on the first violation.
    pub fn verify_integrity(&self) -> Result<u64> {
        let head = self.head_record()?;
        let mut previous: Option<Hash> = None;
        for index in 0..=head.height {
            let block = self
                .get_block(index)?
                .ok_or_else(|| self.corrupt(format!("block {index} missing below head")))?;
            let expected = previous.unwrap_or(Hash::ZERO);
            if block.header.previous_hash != expected {
                return Err(self.corrupt(format!(
                    "block {index} links to {} instead of {expected}",
                    block.header.previous_hash
                )));
            }
            previous = Some(block.hash);
        }
        // A head replaced mid-walk is not corruption; only a record that
        // still disagrees after the walk is.
        if previous != Some(head.hash) && self.head_record()? == head {
            return Err(self.corrupt("head record disagrees with the block at its height".into()));
        }
        debug!(height = head.height, "integrity check passed");
        Ok(head.height)
    }

    /// State records written at genesis.
    pub fn genesis_allocations(&self) -> Result<StateChanges> {
        self.read(GENESIS_ALLOC_KEY)?
            .ok_or(StoreError::NotInitialized)
    }
}

impl StoreWriter<'_> {
    /// Write the genesis block and its initial state.
    pub fn initialize(&self, genesis: &Block, allocations: &StateChanges) -> Result<()> {
        if self.store.is_initialized()? {
            return Err(StoreError::AlreadyInitialized);
        }
        if !genesis.is_genesis() {
            return Err(StoreError::InvalidGenesis(
                "genesis must have index 0 and a zero parent".into(),
            ));
        }
        if !genesis.verify_hash() {
            return Err(StoreError::InvalidGenesis("hash mismatch".into()));
        }

        let record = HeadRecord {
            hash: genesis.hash,
            height: 0,
            cumulative_weight: 0,
            total_transactions: genesis.tx_count() as u64,
        };
        let mut batch = WriteBatch::default();
        put_block(&mut batch, genesis, &record)?;
        batch.put(GENESIS_ALLOC_KEY, allocations)?;
        put_state(&mut batch, 0, allocations)?;
        self.store.db().apply(batch)?;
        self.store.flush()?;

        info!(hash = %genesis.hash, accounts = allocations.accounts.len(), "genesis written");
        Ok(())
    }

    /// Append a validated block together with the state it produces.
    ///
    /// Checks linkage, height and hash against the current head, then writes
    /// the block, its indexes, the head record, the state changes and their
    /// undo record in a single atomic batch. Returns the new cumulative
    /// weight.
    pub fn append(
        &self,
        block: &Block,
        changes: &StateChanges,
    ) -> std::result::Result<u128, AppendError> {
        let store = self.store;
        let head = store.head_record()?;

        if block.header.previous_hash != head.hash {
            return Err(AppendError::HeadMismatch {
                expected: head.hash,
                got: block.header.previous_hash,
            });
        }
        if block.index() != head.height + 1 {
            return Err(AppendError::HeightMismatch {
                expected: head.height + 1,
                got: block.index(),
            });
        }
        if !block.verify_hash() {
            return Err(AppendError::HashMismatch);
        }

        let record = HeadRecord {
            hash: block.hash,
            height: block.index(),
            cumulative_weight: head.cumulative_weight + u128::from(block.header.weight()),
            total_transactions: head.total_transactions + block.tx_count() as u64,
        };
        let undo = StateUndo::capture(&ParentState::current(store), changes)?;

        let mut batch = WriteBatch::default();
        put_block(&mut batch, block, &record)?;
        batch.put(Database::undo_key(&block.hash), &undo)?;
        batch.remove(Database::undo_key(&head.hash));
        put_state(&mut batch, block.index(), changes)?;
        store.db().apply(batch)?;
        store.flush()?;

        debug!(
            height = block.index(),
            hash = %block.hash,
            txs = block.tx_count(),
            weight = record.cumulative_weight,
            "block appended"
        );
        Ok(record.cumulative_weight)
    }

    /// Replace the head with `block`, a sibling built on the same parent,
    /// and `changes`, the state it produces from that parent's state.
    ///
    /// The head's state changes are rolled back and the sibling's applied
    /// in one atomic batch. The displaced head stays readable by hash.
    /// Returns the new cumulative weight.
    pub fn replace_head(
        &self,
        block: &Block,
        changes: &StateChanges,
    ) -> std::result::Result<u128, AppendError> {
        let store = self.store;
        let head = store.head()?;
        let record = store.head_record()?;

        if head.is_genesis() || block.index() != head.index() {
            return Err(AppendError::HeightMismatch {
                expected: head.index().max(1),
                got: block.index(),
            });
        }
        if block.header.previous_hash != head.header.previous_hash {
            return Err(AppendError::HeadMismatch {
                expected: head.header.previous_hash,
                got: block.header.previous_hash,
            });
        }
        if !block.verify_hash() {
            return Err(AppendError::HashMismatch);
        }

        let parent = self
            .parent_state()?
            .ok_or_else(|| store.corrupt("non-genesis head has no parent state".into()))?;
        let parent_weight = store.weight_of(&head.header.previous_hash)?.ok_or_else(|| {
            store.corrupt(format!("no weight stored for block {}", head.header.previous_hash))
        })?;
        let replacement = HeadRecord {
            hash: block.hash,
            height: block.index(),
            cumulative_weight: parent_weight + u128::from(block.header.weight()),
            total_transactions: record.total_transactions - head.tx_count() as u64
                + block.tx_count() as u64,
        };
        let undo = StateUndo::capture(&parent, changes)?;

        let mut batch = WriteBatch::default();
        parent.undo().revert(&mut batch)?;
        put_block(&mut batch, block, &replacement)?;
        batch.put(Database::undo_key(&block.hash), &undo)?;
        batch.remove(Database::undo_key(&head.hash));
        put_state(&mut batch, block.index(), changes)?;
        store.db().apply(batch)?;
        store.flush()?;

        warn!(
            height = block.index(),
            displaced = %head.hash,
            hash = %block.hash,
            weight = replacement.cumulative_weight,
            "head replaced by sibling"
        );
        Ok(replacement.cumulative_weight)
    }

    /// The state as of the head's parent, or `None` at genesis. Valid for as
    /// long as this writer is held.
    pub fn parent_state(&self) -> Result<Option<ParentState<'_>>> {
        let store = self.store;
        let head = store.head_record()?;
        if head.height == 0 {
            return Ok(None);
        }
        let undo: StateUndo = store
            .read(&Database::undo_key(&head.hash))?
            .ok_or_else(|| store.corrupt(format!("no undo record for head {}", head.hash)))?;
        Ok(Some(ParentState::new(store, undo)))
    }
}

fn put_block(batch: &mut WriteBatch, block: &Block, head: &HeadRecord) -> Result<()> {
    batch.put(Database::block_hash_key(&block.hash), block)?;
    batch.put(Database::block_height_key(block.index()), &block.hash)?;
    batch.put(Database::block_weight_key(&block.hash), &head.cumulative_weight)?;
    batch.put(CHAIN_HEAD_KEY, head)?;
    Ok(())
}

pub(crate) fn put_state(batch: &mut WriteBatch, height: u64, changes: &StateChanges) -> Result<()> {
    for (address, account) in &changes.accounts {
        batch.put(Database::account_key(address), account)?;
    }
    for (address, contract) in &changes.contracts {
        batch.put(Database::contract_key(address), contract)?;
    }
    batch.put(STATE_HEIGHT_KEY, &height)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ParentState;
    use hodl_core::{Account, Address, BlockHeader, Seal, StateReader};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn setup() -> Store {
        let store = Store::open_temporary().unwrap();
        let mut alloc = StateChanges::default();
        alloc
            .accounts
            .insert(Address([0xAA; 20]), Account::with_balance(1_000));
        store
            .writer()
            .unwrap()
            .initialize(&Block::genesis(1_000, Hash::ZERO, 2), &alloc)
            .unwrap();
        store
    }

    fn child_of(parent: &Block, difficulty: u32) -> Block {
        let header = BlockHeader {
            index: parent.index() + 1,
            timestamp: parent.header.timestamp + 1,
            previous_hash: parent.hash,
            transactions_root: Hash::ZERO,
            state_root: Hash::ZERO,
            difficulty,
            beneficiary: Address([0xBB; 20]),
            seal: Seal::Work { nonce: 0 },
        };
        Block::from_parts(header, vec![], None)
    }

    #[test]
    fn test_genesis_init() {
        let store = setup();
        assert!(store.is_initialized().unwrap());
        assert_eq!(store.height().unwrap(), 0);
        assert!(store.head().unwrap().is_genesis());
        assert_eq!(store.cumulative_weight().unwrap(), 0);
    }

    #[test]
    fn test_genesis_double_init_fails() {
        let store = setup();
        let result = store
            .writer()
            .unwrap()
            .initialize(&Block::genesis(1_000, Hash::ZERO, 2), &StateChanges::default());
        assert!(matches!(result, Err(StoreError::AlreadyInitialized)));
    }

    #[test]
    fn test_non_genesis_as_genesis_fails() {
        let store = Store::open_temporary().unwrap();
        let genesis = Block::genesis(1_000, Hash::ZERO, 2);
        let block = child_of(&genesis, 2);
        let result = store
            .writer()
            .unwrap()
            .initialize(&block, &StateChanges::default());
        assert!(matches!(result, Err(StoreError::InvalidGenesis(_))));
    }

    #[test]
    fn test_uninitialized_head() {
        let store = Store::open_temporary().unwrap();
        assert!(matches!(store.head(), Err(StoreError::NotInitialized)));
        assert!(store.get_block(0).unwrap().is_none());
    }

    #[test]
    fn test_append_and_lookup() {
        let store = setup();
        let genesis = store.head().unwrap();
        let block1 = child_of(&genesis, 3);
        let block2 = child_of(&block1, 4);

        let writer = store.writer().unwrap();
        assert_eq!(writer.append(&block1, &StateChanges::default()).unwrap(), 3);
        assert_eq!(writer.append(&block2, &StateChanges::default()).unwrap(), 7);
        drop(writer);

        assert_eq!(store.height().unwrap(), 2);
        assert_eq!(store.head().unwrap(), block2);
        assert_eq!(store.get_block_by_hash(&block1.hash).unwrap(), Some(block1.clone()));
        assert_eq!(store.get_block(1).unwrap(), Some(block1.clone()));
        assert!(store.get_block(3).unwrap().is_none());
        assert!(store.get_block_by_hash(&Hash([0xFF; 32])).unwrap().is_none());
        assert_eq!(store.weight_of(&block1.hash).unwrap(), Some(3));
        assert_eq!(store.verify_integrity().unwrap(), 2);
    }

    #[test]
    fn test_append_wrong_parent_is_head_mismatch() {
        let store = setup();
        let genesis = store.head().unwrap();
        let mut block = child_of(&genesis, 2);
        block.header.previous_hash = Hash([0xFF; 32]);
        let block = Block::from_parts(block.header, vec![], None);

        let result = store.writer().unwrap().append(&block, &StateChanges::default());
        assert!(matches!(result, Err(AppendError::HeadMismatch { .. })));
        assert_eq!(store.height().unwrap(), 0);
    }

    #[test]
    fn test_append_wrong_height_fails() {
        let store = setup();
        let genesis = store.head().unwrap();
        let mut header = child_of(&genesis, 2).header;
        header.index = 5;
        let block = Block::from_parts(header, vec![], None);

        let result = store.writer().unwrap().append(&block, &StateChanges::default());
        assert!(matches!(
            result,
            Err(AppendError::HeightMismatch { expected: 1, got: 5 })
        ));
    }

    #[test]
    fn test_append_bad_hash_fails() {
        let store = setup();
        let genesis = store.head().unwrap();
        let mut block = child_of(&genesis, 2);
        block.header.timestamp += 10;

        let result = store.writer().unwrap().append(&block, &StateChanges::default());
        assert!(matches!(result, Err(AppendError::HashMismatch)));
    }

    #[test]
    fn test_reader_cannot_write() {
        let store = setup();
        let reader = store.reader();
        assert!(matches!(reader.writer(), Err(StoreError::ReadOnly)));
        assert_eq!(reader.height().unwrap(), 0);
    }

    #[test]
    fn test_recent_blocks() {
        let store = setup();
        let genesis = store.head().unwrap();
        let block1 = child_of(&genesis, 1);
        let block2 = child_of(&block1, 1);
        let writer = store.writer().unwrap();
        writer.append(&block1, &StateChanges::default()).unwrap();
        writer.append(&block2, &StateChanges::default()).unwrap();
        drop(writer);

        let blocks = store.recent_blocks(2).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].index(), 2);
        assert_eq!(blocks[1].index(), 1);
        assert_eq!(store.blocks_range(0, 10).unwrap().len(), 3);
    }

    #[test]
    fn test_stats() {
        let store = setup();
        let stats = store.stats().unwrap();
        assert_eq!(stats.height, 0);
        assert_eq!(stats.total_blocks, 1);
        assert_eq!(stats.total_transactions, 0);
        assert_eq!(stats.head_hash, store.head_hash().unwrap());
    }

    #[test]
    fn test_head_reads_stable_during_appends() {
        let store = setup();
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let reader = store.reader();
            let done = &done;
            let handle = scope.spawn(move || {
                let mut last = 0;
                while !done.load(Ordering::Acquire) {
                    let head = reader.head().unwrap();
                    let height = reader.height().unwrap();
                    let stats = reader.stats().unwrap();
                    assert!(head.index() >= last);
                    assert!(height >= head.index());
                    assert!(stats.height >= height);
                    last = stats.height;
                }
            });

            let writer = store.writer().unwrap();
            let mut parent = store.head().unwrap();
            for _ in 0..500 {
                let block = child_of(&parent, 1);
                writer.append(&block, &StateChanges::default()).unwrap();
                parent = block;
            }
            drop(writer);
            done.store(true, Ordering::Release);
            handle.join().unwrap();
        });

        assert!(store.corruption().is_none());
        assert_eq!(store.height().unwrap(), 500);
        assert_eq!(store.verify_integrity().unwrap(), 500);
    }

    #[test]
    fn test_replace_head_swaps_block_and_state() {
        let store = setup();
        let genesis = store.head().unwrap();
        let a = Address([0xAA; 20]);
        let c = Address([0xCC; 20]);

        let head = child_of(&genesis, 2);
        let mut head_changes = StateChanges::default();
        head_changes.accounts.insert(a, Account::with_balance(900));
        head_changes.accounts.insert(c, Account::with_balance(100));
        let writer = store.writer().unwrap();
        writer.append(&head, &head_changes).unwrap();

        let parent = writer.parent_state().unwrap().unwrap();
        assert_eq!(parent.account(&a).unwrap().balance, 1_000);
        assert_eq!(parent.account(&c).unwrap(), Account::default());
        assert!(!parent.all_accounts().unwrap().contains_key(&c));
        drop(parent);

        let mut header = child_of(&genesis, 5).header;
        header.beneficiary = Address([0xDD; 20]);
        let sibling = Block::from_parts(header, vec![], None);
        let mut sibling_changes = StateChanges::default();
        sibling_changes.accounts.insert(a, Account::with_balance(990));
        assert_eq!(writer.replace_head(&sibling, &sibling_changes).unwrap(), 5);

        // The sibling's parent state is still genesis.
        let parent = writer.parent_state().unwrap().unwrap();
        assert_eq!(parent.account(&a).unwrap().balance, 1_000);
        drop(parent);
        drop(writer);

        assert_eq!(store.head().unwrap(), sibling);
        assert_eq!(store.get_block(1).unwrap(), Some(sibling.clone()));
        assert_eq!(store.cumulative_weight().unwrap(), 5);
        assert_eq!(store.balance(&a).unwrap(), 990);
        assert!(!store.all_accounts().unwrap().contains_key(&c));
        assert_eq!(store.get_block_by_hash(&head.hash).unwrap(), Some(head));
        assert_eq!(store.verify_integrity().unwrap(), 1);
    }

    #[test]
    fn test_replace_head_rejects_non_sibling() {
        let store = setup();
        let genesis = store.head().unwrap();
        let block1 = child_of(&genesis, 1);
        let writer = store.writer().unwrap();
        writer.append(&block1, &StateChanges::default()).unwrap();

        let child = child_of(&block1, 1);
        assert!(matches!(
            writer.replace_head(&child, &StateChanges::default()),
            Err(AppendError::HeightMismatch { expected: 1, got: 2 })
        ));
        assert!(writer.parent_state().unwrap().is_some());
        assert!(ParentState::current(&store).stakers().unwrap().is_empty());
    }
}
