use hodl_chain::{
    AppendOutcome, Blockchain, ChainConfig, ChainError, Executor, GenesisAllocation,
    InvalidTxReason, PoolError, Proposer,
};
use hodl_consensus::{CancelToken, ConsensusPolicy, ConsensusViolation, Miner};
use hodl_core::{Account, Address, Block, BlockHeader, Hash, Seal, Transaction, Wallet};
use hodl_storage::{AccessMode, Store};
use hodl_vm::{encode, Instruction};
use std::sync::Arc;
use std::thread;

const REWARD: u64 = 50;

fn config(policy: ConsensusPolicy, allocations: &[(&Wallet, u64, u64)]) -> ChainConfig {
    let mut config = ChainConfig::default();
    config.consensus.policy = policy;
    config.consensus.initial_difficulty = 3;
    config.consensus.block_reward = REWARD;
    config.consensus.mining_workers = 2;
    config.genesis.allocations = allocations
        .iter()
        .map(|(wallet, balance, stake)| GenesisAllocation {
            address: wallet.address(),
            balance: *balance,
            stake: *stake,
        })
        .collect();
    config
}

fn mine(chain: &Blockchain, beneficiary: Address) -> Block {
    chain
        .produce_block(Proposer::Miner { beneficiary }, &CancelToken::new())
        .unwrap()
}

fn total_supply(store: &Store) -> u128 {
    store
        .all_accounts()
        .unwrap()
        .values()
        .map(Account::holdings)
        .sum()
}

#[test]
fn test_transfer_scenario() {
    let a = Wallet::generate();
    let b = Wallet::generate();
    let miner = Address::from_bytes([9; 20]);
    let chain = Blockchain::initialize(
        Store::open_temporary().unwrap(),
        config(ConsensusPolicy::PowOnly, &[(&a, 100, 0)]),
    )
    .unwrap();

    let tx = Transaction::transfer(&a, b.address(), 10, 0, 1).signed(&a);
    let id = chain.submit_transaction(tx).unwrap();
    assert!(chain.mempool().contains(&id));

    let block = mine(&chain, miner);
    assert_eq!(block.transactions[0].id(), id);
    assert_eq!(chain.balance(&a.address()).unwrap(), 90);
    assert_eq!(chain.balance(&b.address()).unwrap(), 10);
}

#[test]
fn test_chain_linkage_and_hashes() {
    let a = Wallet::generate();
    let chain = Blockchain::initialize(
        Store::open_temporary().unwrap(),
        config(ConsensusPolicy::PowOnly, &[(&a, 1_000, 0)]),
    )
    .unwrap();

    for nonce in 1..=4 {
        let tx = Transaction::transfer(&a, Address::from_bytes([2; 20]), nonce, 1, nonce).signed(&a);
        chain.submit_transaction(tx).unwrap();
        mine(&chain, a.address());
    }

    let blocks = chain.store().blocks_range(0, 4).unwrap();
    assert_eq!(blocks.len(), 5);
    for pair in blocks.windows(2) {
        assert_eq!(pair[1].header.previous_hash, pair[0].header.hash());
        assert_eq!(pair[1].index(), pair[0].index() + 1);
    }
    assert!(blocks.iter().all(|block| block.hash == block.header.hash()));
    assert_eq!(chain.store().verify_integrity().unwrap(), 4);
}

#[test]
fn test_tampered_transaction_breaks_state_root() {
    let a = Wallet::generate();
    let b = Wallet::generate();
    let genesis_config = config(ConsensusPolicy::PowOnly, &[(&a, 100, 0)]);
    let honest = Blockchain::initialize(Store::open_temporary().unwrap(), genesis_config.clone()).unwrap();
    let peer = Blockchain::initialize(Store::open_temporary().unwrap(), genesis_config.clone()).unwrap();

    honest
        .submit_transaction(Transaction::transfer(&a, b.address(), 10, 0, 1).signed(&a))
        .unwrap();
    let block = mine(&honest, a.address());

    // Same sender, same nonce, different amount, validly signed and sealed.
    let tampered_txs = vec![Transaction::transfer(&a, b.address(), 20, 0, 1).signed(&a)];
    let mut header = block.header.clone();
    header.transactions_root = Block::compute_transactions_root(&tampered_txs);
    let header = Miner::mine(header, 2, &CancelToken::new()).unwrap();
    let tampered = Block::from_parts(header, tampered_txs, None);

    let replayed = Executor::new(
        peer.store(),
        genesis_config.execution.sandbox(),
        genesis_config.consensus.block_reward,
    )
    .execute_block(tampered.header.beneficiary, &tampered.transactions)
    .unwrap();
    assert_ne!(replayed.state_root, tampered.header.state_root);

    assert!(matches!(
        peer.validate_and_maybe_append(tampered),
        Err(ChainError::Rejected(ConsensusViolation::StateRootMismatch { .. }))
    ));
    assert_eq!(peer.height().unwrap(), 0);
    assert_eq!(peer.balance(&b.address()).unwrap(), 0);
}

#[test]
fn test_supply_grows_only_by_reward() {
    let a = Wallet::generate();
    let b = Wallet::generate();
    let chain = Blockchain::initialize(
        Store::open_temporary().unwrap(),
        config(ConsensusPolicy::PowOnly, &[(&a, 1_000, 0), (&b, 500, 0)]),
    )
    .unwrap();
    let counter = encode(&[
        Instruction::LoadImm { dst: 1, value: 0 },
        Instruction::SLoad { dst: 2, key: 1 },
        Instruction::LoadImm { dst: 3, value: 1 },
        Instruction::Add { dst: 2, a: 2, b: 3 },
        Instruction::SStore { key: 1, value: 2 },
        Instruction::Halt,
    ]);

    let mut deploy = Transaction::deploy(&a, counter, 3, 2, 100_000);
    deploy.amount = 25;
    let deploy = deploy.signed(&a);
    let batches = vec![
        vec![
            Transaction::transfer(&a, b.address(), 100, 2, 1).signed(&a),
            Transaction::stake(&b, 200, true, 1, 1).signed(&b),
        ],
        vec![deploy, Transaction::stake(&b, 500, false, 1, 2).signed(&b)],
        vec![],
    ];

    let mut supply = total_supply(chain.store());
    for batch in batches {
        for tx in batch {
            chain.submit_transaction(tx).unwrap();
        }
        mine(&chain, Address::from_bytes([9; 20]));
        let next = total_supply(chain.store());
        assert_eq!(next, supply + u128::from(REWARD));
        supply = next;
    }
}

#[test]
fn test_reused_nonce_rejected_after_commit() {
    let a = Wallet::generate();
    let chain = Blockchain::initialize(
        Store::open_temporary().unwrap(),
        config(ConsensusPolicy::PowOnly, &[(&a, 100, 0)]),
    )
    .unwrap();

    chain
        .submit_transaction(Transaction::transfer(&a, Address::from_bytes([2; 20]), 10, 0, 1).signed(&a))
        .unwrap();
    mine(&chain, a.address());

    let replay = Transaction::transfer(&a, Address::from_bytes([3; 20]), 5, 0, 1).signed(&a);
    assert!(matches!(
        chain.submit_transaction(replay),
        Err(ChainError::Pool(PoolError::InvalidTransaction(
            InvalidTxReason::BadNonce { expected: 2, got: 1 }
        )))
    ));
}

#[test]
fn test_reads_are_stable_under_writer() {
    let a = Wallet::generate();
    let chain = Arc::new(
        Blockchain::initialize(
            Store::open_temporary().unwrap(),
            config(ConsensusPolicy::PowOnly, &[(&a, 1_000, 0)]),
        )
        .unwrap(),
    );
    mine(&chain, a.address());
    let first = chain.get_block(1).unwrap().unwrap();
    let reader = chain.store().reader();

    thread::scope(|scope| {
        let writer = Arc::clone(&chain);
        let miner = a.address();
        scope.spawn(move || {
            for _ in 0..5 {
                mine(&writer, miner);
            }
        });
        for _ in 0..4 {
            let reader = reader.clone();
            let expected = first.clone();
            scope.spawn(move || {
                for _ in 0..50 {
                    assert_eq!(reader.get_block(1).unwrap(), Some(expected.clone()));
                    assert_eq!(reader.get_block_by_hash(&expected.hash).unwrap(), Some(expected.clone()));
                }
            });
        }
        for _ in 0..2 {
            let reader = reader.clone();
            let chain = Arc::clone(&chain);
            scope.spawn(move || {
                let mut last = 1;
                for _ in 0..200 {
                    let head = reader.head().unwrap();
                    let height = reader.height().unwrap();
                    let stats = chain.stats().unwrap();
                    assert!(head.index() >= last);
                    assert!(height >= head.index());
                    assert!(stats.height >= height);
                    last = stats.height;
                }
            });
        }
    });

    assert!(chain.store().corruption().is_none());
    assert_eq!(chain.height().unwrap(), 6);
    assert_eq!(reader.mode(), AccessMode::ReadOnly);
    assert!(reader.writer().is_err());
}

#[test]
fn test_pos_block_outweighs_pow_block_at_height_five() {
    let validator = Wallet::generate();
    let miner = Address::from_bytes([9; 20]);
    let chain = Blockchain::initialize(
        Store::open_temporary().unwrap(),
        config(ConsensusPolicy::Simultaneous, &[(&validator, 100, 5)]),
    )
    .unwrap();

    for _ in 0..4 {
        mine(&chain, miner);
    }
    let parent = chain.head().unwrap();
    let pos_root = Executor::new(
        chain.store(),
        chain.config().execution.sandbox(),
        chain.config().consensus.block_reward,
    )
    .execute_block(validator.address(), &[])
    .unwrap()
    .state_root;
    let pow = mine(&chain, miner);
    assert_eq!(pow.index(), 5);
    assert_eq!(pow.header.weight(), 3);
    let pow_weight = chain.store().cumulative_weight().unwrap();

    let header = BlockHeader {
        index: 5,
        timestamp: pow.header.timestamp,
        previous_hash: parent.hash,
        transactions_root: Block::compute_transactions_root(&[]),
        state_root: pos_root,
        difficulty: chain.expected_difficulty(&parent).unwrap(),
        beneficiary: validator.address(),
        seal: Seal::Stake {
            validator: validator.public_key.clone(),
            stake: 5,
        },
    };
    let pos = Block::signed_by(header, vec![], &validator);

    match chain.validate_and_maybe_append(pos.clone()).unwrap() {
        AppendOutcome::Fork {
            hash,
            cumulative_weight,
            preferred,
        } => {
            assert_eq!(hash, pos.hash);
            assert_eq!(cumulative_weight, pow_weight - 3 + 5);
            assert!(preferred);
        }
        other => panic!("expected a fork, got {other:?}"),
    }
    assert_eq!(chain.canonical_tip().unwrap().hash, pos.hash);
    assert_eq!(chain.head().unwrap(), pos);
    assert_eq!(chain.balance(&miner).unwrap(), 4 * REWARD);
    assert_eq!(chain.balance(&validator.address()).unwrap(), 100 + REWARD);
    assert_eq!(chain.get_block_by_hash(&pow.hash).unwrap(), Some(pow));
}

#[test]
fn test_pos_sibling_with_forged_state_root_rejected() {
    let validator = Wallet::generate();
    let miner = Address::from_bytes([9; 20]);
    let chain = Blockchain::initialize(
        Store::open_temporary().unwrap(),
        config(ConsensusPolicy::Simultaneous, &[(&validator, 100, 5)]),
    )
    .unwrap();
    let genesis = chain.head().unwrap();
    let pow = mine(&chain, miner);

    let header = BlockHeader {
        index: 1,
        timestamp: pow.header.timestamp,
        previous_hash: genesis.hash,
        transactions_root: Block::compute_transactions_root(&[]),
        state_root: Hash([0xEE; 32]),
        difficulty: chain.expected_difficulty(&genesis).unwrap(),
        beneficiary: validator.address(),
        seal: Seal::Stake {
            validator: validator.public_key.clone(),
            stake: 5,
        },
    };
    let pos = Block::signed_by(header, vec![], &validator);
    assert!(matches!(
        chain.validate_and_maybe_append(pos.clone()),
        Err(ChainError::Rejected(ConsensusViolation::StateRootMismatch { .. }))
    ));

    assert_eq!(chain.head().unwrap(), pow);
    assert_eq!(chain.canonical_tip().unwrap().hash, pow.hash);
    assert_eq!(chain.get_block_by_hash(&pos.hash).unwrap(), None);
    // A child of the rejected block has nowhere to go.
    let orphan = BlockHeader {
        index: 2,
        previous_hash: pos.hash,
        ..pos.header.clone()
    };
    let orphan = Block::signed_by(orphan, vec![], &validator);
    assert!(matches!(
        chain.validate_and_maybe_append(orphan),
        Err(ChainError::UnknownParent(hash)) if hash == pos.hash
    ));
}

#[test]
fn test_deploy_then_over_budget_call() {
    let a = Wallet::generate();
    let chain = Blockchain::initialize(
        Store::open_temporary().unwrap(),
        config(ConsensusPolicy::PowOnly, &[(&a, 1_000, 0)]),
    )
    .unwrap();
    // Writes slot 0 on every run; loops forever when called with an argument.
    let code = encode(&[
        Instruction::LoadImm { dst: 1, value: 0 },
        Instruction::LoadImm { dst: 2, value: 42 },
        Instruction::SStore { key: 1, value: 2 },
        Instruction::ArgCount { dst: 3 },
        Instruction::JumpIf { cond: 3, target: 6 },
        Instruction::Halt,
        Instruction::LoadImm { dst: 2, value: 7 },
        Instruction::SStore { key: 1, value: 2 },
        Instruction::Jump { target: 6 },
    ]);

    let deploy = Transaction::deploy(&a, code, 1, 1, 100_000).signed(&a);
    let contract = deploy.contract_address().unwrap();
    let call = Transaction::call(&a, contract, vec![1], 1, 2, 500).signed(&a);
    chain.submit_transaction(deploy).unwrap();
    chain.submit_transaction(call.clone()).unwrap();

    let block = mine(&chain, Address::from_bytes([9; 20]));
    assert_eq!(block.tx_count(), 2);
    assert_eq!(block.transactions[1].id(), call.id());

    let state = chain.contract(&contract).unwrap().unwrap();
    assert_eq!(state.load(0), 42);
    let sender = chain.account(&a.address()).unwrap();
    assert_eq!((sender.balance, sender.nonce), (998, 2));
}

#[test]
fn test_reopen_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let a = Wallet::generate();
    let b = Wallet::generate();
    let config = config(ConsensusPolicy::PowOnly, &[(&a, 100, 0)]);

    {
        let store = Store::open(dir.path(), AccessMode::ReadWrite).unwrap();
        let chain = Blockchain::initialize(store, config.clone()).unwrap();
        chain
            .submit_transaction(Transaction::transfer(&a, b.address(), 10, 0, 1).signed(&a))
            .unwrap();
        mine(&chain, a.address());
        chain.store().flush().unwrap();
    }

    let store = Store::open(dir.path(), AccessMode::ReadOnly).unwrap();
    let chain = Blockchain::open(store, config).unwrap();
    assert_eq!(chain.height().unwrap(), 1);
    assert_eq!(chain.balance(&b.address()).unwrap(), 10);
    assert!(matches!(
        chain.produce_block(Proposer::Miner { beneficiary: a.address() }, &CancelToken::new()),
        Err(ChainError::Storage(_))
    ));
}

#[test]
fn test_alternating_schedule() {
    let validator = Wallet::generate();
    let mut config = config(ConsensusPolicy::Alternating { epoch_length: 2 }, &[(&validator, 100, 5)]);
    config.consensus.retarget_interval = 100;
    let chain = Blockchain::initialize(Store::open_temporary().unwrap(), config).unwrap();
    let miner = Address::from_bytes([9; 20]);

    // Heights 0 and 1 form epoch 0 (PoW); 2 and 3 are PoS.
    mine(&chain, miner);
    assert!(matches!(
        chain.produce_block(Proposer::Miner { beneficiary: miner }, &CancelToken::new()),
        Err(ChainError::Consensus(_))
    ));
    let block = chain
        .produce_block(Proposer::Validator(&validator), &CancelToken::new())
        .unwrap();
    assert_eq!(block.index(), 2);
    assert!(block.verify_validator_signature());
}
