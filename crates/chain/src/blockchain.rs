//! Main blockchain orchestration.
//!
//! This module brings together all components: consensus, storage, mempool, and execution.

use crate::config::ChainConfig;
use crate::error::{ChainError, Result};
use crate::executor::{BlockExecutionResult, Executor};
use crate::mempool::Mempool;
use hodl_consensus::{
    proposer_of, select_validator, stake_of, BlockValidator, CancelToken, ConsensusError,
    ConsensusViolation, ForkChoice, Forfeits, Miner, Phase, Tip, ValidationContext,
};
use hodl_core::{
    Account, Address, Block, BlockHeader, ContractState, Hash, ProposerKind, Seal, StateReader,
    Transaction, Wallet,
};
use hodl_storage::{AccessMode, AppendError, Store, StoreError, StoreWriter};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Assembly attempts before giving up on a head that keeps moving.
pub const MAX_ASSEMBLY_ATTEMPTS: usize = 3;

/// Who is producing a block.
pub enum Proposer<'a> {
    /// Open PoW competition; rewards go to `beneficiary`.
    Miner { beneficiary: Address },
    /// PoS validator signing with its stake key.
    Validator(&'a Wallet),
}

impl Proposer<'_> {
    pub fn kind(&self) -> ProposerKind {
        match self {
            Proposer::Miner { .. } => ProposerKind::Work,
            Proposer::Validator(_) => ProposerKind::Stake,
        }
    }
}

/// What became of a block handed to [`Blockchain::validate_and_maybe_append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Extended the head.
    Appended {
        height: u64,
        hash: Hash,
        cumulative_weight: u128,
    },
    /// Already stored.
    Known(Hash),
    /// A fully validated sibling of the head. When `preferred`, fork choice
    /// ranked it above the old head and it has replaced the head in the
    /// store.
    Fork {
        hash: Hash,
        cumulative_weight: u128,
        preferred: bool,
    },
}

/// Chain statistics, as served by a query façade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainStats {
    pub height: u64,
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub total_contracts: u64,
    /// Difficulty required of the next PoW block.
    pub difficulty: u32,
    pub head_hash: String,
    pub cumulative_weight: u128,
    pub pending_transactions: usize,
}

/// General chain information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub consensus: &'static str,
    pub policy: String,
    pub smart_contracts: &'static str,
    pub network: &'static str,
}

/// Main blockchain struct that orchestrates all components.
pub struct Blockchain {
    store: Store,
    config: ChainConfig,
    mempool: Mempool,
    forfeits: Mutex<Forfeits>,
    fork_choice: Mutex<ForkChoice>,
}

impl Blockchain {
    /// Write the configured genesis into an empty store and open it.
    pub fn initialize(store: Store, config: ChainConfig) -> Result<Self> {
        let genesis = config.genesis.block(config.consensus.initial_difficulty);
        store
            .writer()?
            .initialize(&genesis, &config.genesis.state())?;
        Self::open(store, config)
    }

    /// Open an initialized store. A read-write store whose state snapshot
    /// lags the chain is rebuilt by replaying from genesis.
    pub fn open(store: Store, config: ChainConfig) -> Result<Self> {
        let stored = store.get_block(0)?.ok_or(StoreError::NotInitialized)?;
        let configured = config.genesis.block(config.consensus.initial_difficulty);
        if stored.hash != configured.hash {
            return Err(ChainError::GenesisMismatch {
                stored: stored.hash,
                configured: configured.hash,
            });
        }

        let mempool = Mempool::new(config.mempool.clone(), config.execution.max_gas_per_tx);
        let chain = Self {
            store,
            config,
            mempool,
            forfeits: Mutex::new(Forfeits::new()),
            fork_choice: Mutex::new(ForkChoice::new()),
        };

        if chain.store.mode() == AccessMode::ReadWrite {
            let height = chain.store.height()?;
            if chain.store.snapshot_height()? != Some(height) {
                chain.rebuild_state()?;
            }
        }

        let head = chain.store.head()?;
        let weight = chain.store.cumulative_weight()?;
        chain.fork_choice.lock().observe(head.hash, head.index(), weight);
        info!(height = head.index(), head = %head.hash, mode = ?chain.store.mode(), "chain opened");
        Ok(chain)
    }

    /// Reset the state snapshot to genesis and re-execute every block.
    pub fn rebuild_state(&self) -> Result<()> {
        let writer = self.store.writer()?;
        let height = writer.store().height()?;
        warn!(
            snapshot = ?writer.store().snapshot_height()?,
            height,
            "replaying state from genesis"
        );
        writer.reset_state()?;
        for index in 1..=height {
            let block = writer.store().get_block(index)?.ok_or_else(|| {
                StoreError::Corruption(format!("block {index} missing below head {height}"))
            })?;
            let result = self.execute(writer.store(), &block)?;
            if result.state_root != block.header.state_root {
                return Err(StoreError::Corruption(format!(
                    "replayed state root of block {index} does not match its header"
                ))
                .into());
            }
            writer.apply_state(index, &result.changes)?;
        }
        info!(height, "state replayed");
        Ok(())
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    /// Get the current chain height.
    pub fn height(&self) -> Result<u64> {
        Ok(self.store.height()?)
    }

    /// Get the latest block.
    pub fn head(&self) -> Result<Block> {
        Ok(self.store.head()?)
    }

    /// Get a block by height.
    pub fn get_block(&self, index: u64) -> Result<Option<Block>> {
        Ok(self.store.get_block(index)?)
    }

    /// Get a block by hash.
    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>> {
        Ok(self.store.get_block_by_hash(hash)?)
    }

    pub fn account(&self, address: &Address) -> Result<Account> {
        Ok(self.store.account(address)?)
    }

    pub fn balance(&self, address: &Address) -> Result<u64> {
        Ok(self.store.balance(address)?)
    }

    pub fn contract(&self, address: &Address) -> Result<Option<ContractState>> {
        Ok(self.store.contract(address)?)
    }

    /// The heaviest tip seen so far.
    pub fn canonical_tip(&self) -> Option<Tip> {
        self.fork_choice.lock().best()
    }

    /// Submit a transaction to the mempool.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash> {
        let committed = self.store.account(&tx.sender)?;
        Ok(self.mempool.submit(tx, committed)?)
    }

    /// Difficulty the child of `parent` must carry.
    pub fn expected_difficulty(&self, parent: &Block) -> Result<u32> {
        let retarget = self.config.consensus.retarget();
        if !retarget.is_boundary(parent.index()) {
            return Ok(parent.header.difficulty);
        }
        let start_index = retarget.epoch_start(parent.index());
        let start = self.store.get_block(start_index)?.ok_or_else(|| {
            StoreError::Corruption(format!("block {start_index} missing below head"))
        })?;
        let span = parent.header.timestamp.saturating_sub(start.header.timestamp);
        Ok(retarget.next_difficulty(parent.header.difficulty, parent.index(), span))
    }

    /// The validator scheduled for the block after the head, if PoS may
    /// produce it.
    pub fn scheduled_validator(&self) -> Result<Option<Address>> {
        let head = self.store.head()?;
        let height = head.index() + 1;
        if !self.config.consensus.policy.allows(ProposerKind::Stake, height) {
            return Ok(None);
        }
        Ok(select_validator(&self.store.stakers()?, &head.hash, height))
    }

    /// Run one height through proposer selection, candidate assembly,
    /// validation and commit. Re-assembles against the new head if another
    /// block lands first.
    pub fn produce_block(&self, proposer: Proposer<'_>, cancel: &CancelToken) -> Result<Block> {
        for attempt in 1..=MAX_ASSEMBLY_ATTEMPTS {
            match self.try_produce(&proposer, cancel)? {
                Some(block) => return Ok(block),
                None => debug!(attempt, "head moved during assembly, retrying"),
            }
        }
        Err(ChainError::HeadContention {
            attempts: MAX_ASSEMBLY_ATTEMPTS,
        })
    }

    fn try_produce(&self, proposer: &Proposer<'_>, cancel: &CancelToken) -> Result<Option<Block>> {
        let consensus = &self.config.consensus;
        let phase = Phase::ProposerSelection;
        let parent = self.store.head()?;
        let height = parent.index() + 1;
        let kind = proposer.kind();
        if !consensus.policy.allows(kind, height) {
            return Err(ConsensusError::NotEligible { kind, height }.into());
        }

        let (beneficiary, seal) = match proposer {
            Proposer::Miner { beneficiary } => (*beneficiary, Seal::Work { nonce: 0 }),
            Proposer::Validator(wallet) => {
                let stakers = self.store.stakers()?;
                let selected = select_validator(&stakers, &parent.hash, height)
                    .ok_or(ConsensusError::NoEligibleProposer { height })?;
                let address = wallet.address();
                if selected != address {
                    return Err(ConsensusError::NotSelected {
                        expected: selected,
                        got: address,
                    }
                    .into());
                }
                let seal = Seal::Stake {
                    validator: wallet.public_key.clone(),
                    stake: stake_of(&stakers, &address),
                };
                (address, seal)
            }
        };
        if kind == ProposerKind::Stake && self.forfeits.lock().is_forfeited(height, &beneficiary) {
            return Err(ConsensusViolation::ForfeitedProposer {
                proposer: beneficiary,
                height,
            }
            .into());
        }

        let phase = advance(phase, height);
        let candidates = self
            .mempool
            .select_for_block(self.config.block.max_transactions, self.config.block.max_bytes);
        let body = Executor::new(&self.store, self.config.execution.sandbox(), consensus.block_reward)
            .assemble(beneficiary, candidates)?;
        let header = BlockHeader {
            index: height,
            timestamp: BlockHeader::current_timestamp().max(parent.header.timestamp + 1),
            previous_hash: parent.hash,
            transactions_root: Block::compute_transactions_root(&body.transactions),
            state_root: body.state_root,
            difficulty: self.expected_difficulty(&parent)?,
            beneficiary,
            seal,
        };
        let block = match proposer {
            Proposer::Miner { .. } => {
                let sealed = Miner::mine(header, consensus.mining_workers, cancel).ok_or(ChainError::Cancelled)?;
                Block::from_parts(sealed, body.transactions, None)
            }
            Proposer::Validator(wallet) => Block::signed_by(header, body.transactions, wallet),
        };

        let phase = advance(phase, height);
        let writer = self.store.writer()?;
        if writer.store().head_hash()? != parent.hash {
            return Ok(None);
        }
        match self.validate_and_commit(&writer, &block, &parent, phase) {
            Ok(_) => Ok(Some(block)),
            Err(ChainError::Append(AppendError::HeadMismatch { .. })) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Validate a block received from the network and append it if it
    /// extends the head. A sibling of the head is validated against the
    /// parent's state and replaces the head if fork choice prefers it.
    /// Invalid blocks are discarded and a PoS proposer forfeits the height.
    pub fn validate_and_maybe_append(&self, block: Block) -> Result<AppendOutcome> {
        if self.store.has_block(&block.hash)? {
            return Ok(AppendOutcome::Known(block.hash));
        }
        self.forfeits.lock().check(&block)?;

        let writer = self.store.writer()?;
        let head = writer.store().head()?;
        if block.header.previous_hash == head.hash {
            let cumulative_weight = self.validate_and_commit(&writer, &block, &head, Phase::Validation)?;
            return Ok(AppendOutcome::Appended {
                height: block.index(),
                hash: block.hash,
                cumulative_weight,
            });
        }
        if !head.is_genesis() && block.header.previous_hash == head.header.previous_hash {
            return self.validate_competitor(&writer, &block, &head);
        }
        Err(ChainError::UnknownParent(block.header.previous_hash))
    }

    /// Full validation against the head, then the atomic append.
    fn validate_and_commit(
        &self,
        writer: &StoreWriter<'_>,
        block: &Block,
        parent: &Block,
        phase: Phase,
    ) -> Result<u128> {
        debug!(height = block.index(), %phase, hash = %block.hash, "validating candidate");
        let stakers = writer.store().stakers()?;
        let result = self.verify_candidate(writer.store(), block, parent, &stakers)?;

        let phase = advance(phase, block.index());
        let weight = writer.append(block, &result.changes)?;
        self.mempool.on_block_committed(block);
        self.forfeits.lock().prune_through(block.index().saturating_sub(1));
        {
            let mut fork_choice = self.fork_choice.lock();
            fork_choice.prune_below(block.index());
            fork_choice.observe(block.hash, block.index(), weight);
        }
        info!(
            height = block.index(),
            hash = %block.hash,
            kind = %block.proposer_kind(),
            txs = block.tx_count(),
            gas = result.total_gas_used,
            cumulative_weight = weight,
            %phase,
            "block committed"
        );
        Ok(weight)
    }

    /// Fully validate a sibling of the head against the state at their
    /// common parent. If fork choice then prefers it, it replaces the head
    /// and the head's transactions go back to the pool.
    fn validate_competitor(
        &self,
        writer: &StoreWriter<'_>,
        block: &Block,
        head: &Block,
    ) -> Result<AppendOutcome> {
        let store = writer.store();
        let parent = store.get_block_by_hash(&head.header.previous_hash)?.ok_or_else(|| {
            StoreError::Corruption(format!("parent of head {} is missing", head.hash))
        })?;
        let parent_state = writer.parent_state()?.ok_or_else(|| {
            StoreError::Corruption(format!("no parent state below head {}", head.hash))
        })?;
        let stakers = parent_state.stakers()?;
        let result = self.verify_candidate(&parent_state, block, &parent, &stakers)?;
        drop(parent_state);

        let parent_weight = store.weight_of(&parent.hash)?.unwrap_or_default();
        let cumulative_weight = parent_weight + u128::from(block.header.weight());
        let preferred = self
            .fork_choice
            .lock()
            .observe(block.hash, block.index(), cumulative_weight);
        if !preferred {
            debug!(height = block.index(), hash = %block.hash, cumulative_weight, "sibling of the head kept aside");
            return Ok(AppendOutcome::Fork {
                hash: block.hash,
                cumulative_weight,
                preferred,
            });
        }

        writer.replace_head(block, &result.changes)?;
        self.mempool.on_block_committed(block);
        for tx in &head.transactions {
            if block.transactions.contains(tx) {
                continue;
            }
            let committed = store.account(&tx.sender)?;
            if let Err(err) = self.mempool.reinstate(tx.clone(), committed) {
                debug!(id = %tx.id(), %err, "displaced transaction not reinstated");
            }
        }
        info!(
            height = block.index(),
            hash = %block.hash,
            displaced = %head.hash,
            kind = %block.proposer_kind(),
            cumulative_weight,
            "head replaced by heavier sibling"
        );
        Ok(AppendOutcome::Fork {
            hash: block.hash,
            cumulative_weight,
            preferred,
        })
    }

    /// Stateless rules, then re-execution against `state` and the state
    /// root check. A rejected candidate's proposer forfeits the height.
    fn verify_candidate<R>(
        &self,
        state: &R,
        block: &Block,
        parent: &Block,
        stakers: &[(Address, u64)],
    ) -> Result<BlockExecutionResult>
    where
        R: StateReader,
        ChainError: From<R::Error>,
    {
        let checked = self.check_stateless(block, parent, stakers).and_then(|_| {
            let result = self.execute(state, block)?;
            if result.state_root != block.header.state_root {
                return Err(ConsensusViolation::StateRootMismatch {
                    claimed: block.header.state_root,
                    computed: result.state_root,
                }
                .into());
            }
            Ok(result)
        });
        if let Err(ChainError::Rejected(violation)) = &checked {
            self.forfeit(block, violation);
        }
        checked
    }

    fn check_stateless(&self, block: &Block, parent: &Block, stakers: &[(Address, u64)]) -> Result<()> {
        let consensus = &self.config.consensus;
        let ctx = ValidationContext {
            parent,
            expected_difficulty: self.expected_difficulty(parent)?,
            stakers,
            policy: consensus.policy,
            now: BlockHeader::current_timestamp(),
            max_clock_drift: consensus.max_clock_drift_secs,
        };
        Ok(BlockValidator::validate_full(block, &ctx)?)
    }

    fn execute<R>(&self, state: &R, block: &Block) -> Result<BlockExecutionResult>
    where
        R: StateReader,
        ChainError: From<R::Error>,
    {
        Executor::new(state, self.config.execution.sandbox(), self.config.consensus.block_reward)
            .execute_block(block.header.beneficiary, &block.transactions)
    }

    /// Record a forfeit against the validator whose signature the block
    /// carries. PoW blocks name no accountable proposer.
    fn forfeit(&self, block: &Block, violation: &ConsensusViolation) {
        let proposer = proposer_of(block)
            .filter(|_| block.verify_hash() && block.verify_validator_signature());
        warn!(height = block.index(), hash = %block.hash, %violation, forfeited = ?proposer, "candidate rejected");
        if let Some(proposer) = proposer {
            self.forfeits.lock().record(block.index(), proposer);
        }
    }

    /// Chain statistics.
    pub fn stats(&self) -> Result<ChainStats> {
        let stats = self.store.stats()?;
        let head = self.store.head()?;
        Ok(ChainStats {
            height: stats.height,
            total_blocks: stats.total_blocks,
            total_transactions: stats.total_transactions,
            total_contracts: stats.total_contracts,
            difficulty: self.expected_difficulty(&head)?,
            head_hash: stats.head_hash.to_hex(),
            cumulative_weight: stats.cumulative_weight,
            pending_transactions: self.mempool.len(),
        })
    }

    /// General chain information.
    pub fn info(&self) -> ChainInfo {
        let policy = self.config.consensus.policy;
        ChainInfo {
            name: "HODL",
            description: "HODL is a decentralized platform for payments, computing, storing and DApps",
            consensus: policy.label(),
            policy: policy.to_string(),
            smart_contracts: "deterministic register machine",
            network: "testnet",
        }
    }
}

fn advance(phase: Phase, height: u64) -> Phase {
    let next = phase.next().unwrap_or(phase);
    debug!(height, from = %phase, to = %next, "consensus phase");
    next
}
