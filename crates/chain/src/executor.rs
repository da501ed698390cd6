//! Block execution engine.
//!
//! Applies a block's transactions, in order, on top of committed state and
//! produces the changes to persist and the resulting state root. Proposers
//! and validators run the same code, so an honest block always reproduces
//! its claimed root.

use crate::error::{ChainError, InvalidTxReason, Result};
use hodl_core::{
    Address, ContractState, Hash, Overlay, Payload, StateChanges, StateReader, Transaction,
    TransactionError,
};
use hodl_consensus::ConsensusViolation;
use hodl_vm::Sandbox;
use tracing::{debug, warn};

/// Result of executing a single transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    /// Transaction id.
    pub tx_id: Hash,
    /// Whether the payload took effect. The fee is charged either way.
    pub success: bool,
    /// Gas used by contract execution.
    pub gas_used: u64,
    /// Contract address (if deployment).
    pub contract_address: Option<Address>,
    /// Error message (if failed).
    pub error: Option<String>,
}

/// Result of executing a block.
#[derive(Debug, Clone)]
pub struct BlockExecutionResult {
    /// Transactions that were applied, in order.
    pub transactions: Vec<Transaction>,
    /// Transactions left out during assembly, with the reason.
    pub dropped: Vec<(Hash, InvalidTxReason)>,
    pub receipts: Vec<TransactionReceipt>,
    /// Records written by the block.
    pub changes: StateChanges,
    /// New state root.
    pub state_root: Hash,
    pub total_gas_used: u64,
}

/// Check whether `tx` may be applied by a sender whose account nonce is
/// `nonce` and whose spendable balance is `available`.
pub fn check_admission(
    tx: &Transaction,
    nonce: u64,
    available: u64,
    max_gas_per_tx: u64,
) -> std::result::Result<(), InvalidTxReason> {
    tx.verify().map_err(|err| match err {
        TransactionError::VerificationFailed => InvalidTxReason::BadSignature,
        TransactionError::SenderKeyMismatch => InvalidTxReason::SenderKeyMismatch,
    })?;
    if tx.gas_limit > max_gas_per_tx {
        return Err(InvalidTxReason::GasLimitTooHigh {
            max: max_gas_per_tx,
            got: tx.gas_limit,
        });
    }
    if matches!(&tx.payload, Some(Payload::Deploy { code }) if code.is_empty()) {
        return Err(InvalidTxReason::EmptyDeployCode);
    }
    let expected = nonce.saturating_add(1);
    if tx.nonce != expected {
        return Err(InvalidTxReason::BadNonce {
            expected,
            got: tx.nonce,
        });
    }
    if available < tx.total_cost() {
        return Err(InvalidTxReason::InsufficientBalance {
            required: tx.total_cost(),
            available,
        });
    }
    Ok(())
}

/// Block executor over a committed state.
pub struct Executor<'a, R> {
    state: &'a R,
    sandbox: Sandbox,
    block_reward: u64,
}

impl<'a, R> Executor<'a, R>
where
    R: StateReader,
    ChainError: From<R::Error>,
{
    pub fn new(state: &'a R, sandbox: Sandbox, block_reward: u64) -> Self {
        Self {
            state,
            sandbox,
            block_reward,
        }
    }

    /// Re-execute a received block. Any transaction that cannot be
    /// admitted makes the whole block invalid.
    pub fn execute_block(&self, beneficiary: Address, transactions: &[Transaction]) -> Result<BlockExecutionResult> {
        self.run(beneficiary, transactions.iter().cloned(), false)
    }

    /// Build a block body from pool candidates, dropping those that cannot
    /// be admitted against the state built so far.
    pub fn assemble(&self, beneficiary: Address, candidates: Vec<Transaction>) -> Result<BlockExecutionResult> {
        self.run(beneficiary, candidates.into_iter(), true)
    }

    fn run(
        &self,
        beneficiary: Address,
        transactions: impl Iterator<Item = Transaction>,
        drop_invalid: bool,
    ) -> Result<BlockExecutionResult> {
        let mut overlay = Overlay::new(self.state);
        let mut applied = Vec::new();
        let mut dropped = Vec::new();
        let mut receipts = Vec::new();
        let mut total_gas_used = 0u64;

        for tx in transactions {
            match self.apply_transaction(&mut overlay, beneficiary, &tx)? {
                Ok(receipt) => {
                    total_gas_used = total_gas_used.saturating_add(receipt.gas_used);
                    receipts.push(receipt);
                    applied.push(tx);
                }
                Err(reason) if drop_invalid => {
                    debug!(tx = %tx.id(), %reason, "dropping transaction from candidate");
                    dropped.push((tx.id(), reason));
                }
                Err(reason) => {
                    return Err(ChainError::Rejected(
                        ConsensusViolation::InvalidTransaction {
                            id: tx.id(),
                            reason: reason.to_string(),
                        },
                    ))
                }
            }
        }

        let mut account = overlay.account(&beneficiary)?;
        if account.credit(self.block_reward) {
            overlay.set_account(beneficiary, account);
        } else {
            warn!(%beneficiary, reward = self.block_reward, "block reward would overflow the beneficiary balance, not minted");
        }

        let state_root = overlay.state_root()?;
        Ok(BlockExecutionResult {
            transactions: applied,
            dropped,
            receipts,
            changes: overlay.into_changes(),
            state_root,
            total_gas_used,
        })
    }

    /// Apply one transaction. The outer error is a state read failure; the
    /// inner one means the transaction was not admitted and nothing changed.
    fn apply_transaction(
        &self,
        overlay: &mut Overlay<'_, R>,
        beneficiary: Address,
        tx: &Transaction,
    ) -> Result<std::result::Result<TransactionReceipt, InvalidTxReason>> {
        let mut sender = overlay.account(&tx.sender)?;
        if let Err(reason) = check_admission(tx, sender.nonce, sender.balance, self.sandbox.max_gas_per_tx) {
            return Ok(Err(reason));
        }

        // fee and nonce stick even if the payload fails
        let before = sender;
        sender.debit(tx.fee);
        sender.nonce = tx.nonce;
        overlay.set_account(tx.sender, sender);
        let mut collector = overlay.account(&beneficiary)?;
        if !collector.credit(tx.fee) {
            overlay.set_account(tx.sender, before);
            return Ok(Err(InvalidTxReason::FeeOverflow(beneficiary)));
        }
        overlay.set_account(beneficiary, collector);

        let mut receipt = TransactionReceipt {
            tx_id: tx.id(),
            success: true,
            gas_used: 0,
            contract_address: None,
            error: None,
        };

        match &tx.payload {
            None => {
                if !self.move_value(overlay, &tx.sender, &tx.recipient, tx.amount)? {
                    receipt.fail("credit would overflow the recipient balance");
                }
            }
            Some(Payload::Stake) => {
                let mut account = overlay.account(&tx.sender)?;
                if account.bond(tx.amount) {
                    overlay.set_account(tx.sender, account);
                } else {
                    receipt.fail("cannot bond the requested amount");
                }
            }
            Some(Payload::Unstake) => {
                let mut account = overlay.account(&tx.sender)?;
                if account.unbond(tx.amount) {
                    overlay.set_account(tx.sender, account);
                } else {
                    receipt.fail("cannot release the requested amount");
                }
            }
            Some(Payload::Deploy { .. }) | Some(Payload::Call { .. }) => {
                let snapshot = if tx.is_call() {
                    overlay.contract(&tx.recipient)?
                } else {
                    None
                };
                match self.sandbox.execute(snapshot.as_ref(), tx) {
                    Ok(delta) => {
                        receipt.gas_used = delta.gas_used;
                        if !self.move_value(overlay, &tx.sender, &delta.contract, tx.amount)? {
                            receipt.fail("credit would overflow the contract balance");
                            return Ok(Ok(receipt));
                        }
                        let base = snapshot.unwrap_or_else(ContractState::default);
                        overlay.set_contract(delta.contract, delta.apply_to(base));
                        if tx.is_deploy() {
                            receipt.contract_address = Some(delta.contract);
                        }
                    }
                    Err(err) => receipt.fail(err.to_string()),
                }
            }
        }
        Ok(Ok(receipt))
    }

    /// Move `amount` between balances. False, with nothing moved, if the
    /// credit would overflow the target.
    fn move_value(&self, overlay: &mut Overlay<'_, R>, from: &Address, to: &Address, amount: u64) -> Result<bool> {
        if amount == 0 {
            return Ok(true);
        }
        let before = overlay.account(from)?;
        let mut source = before;
        // admission already checked the balance covers amount + fee
        if !source.debit(amount) {
            return Ok(true);
        }
        overlay.set_account(*from, source);
        let mut target = overlay.account(to)?;
        if !target.credit(amount) {
            overlay.set_account(*from, before);
            return Ok(false);
        }
        overlay.set_account(*to, target);
        Ok(true)
    }
}

impl TransactionReceipt {
    fn fail(&mut self, error: impl Into<String>) {
        self.success = false;
        self.error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodl_core::{generate_keypair, Account, MemoryState, Wallet};
    use hodl_vm::{encode, Instruction};

    const REWARD: u64 = 50;

    fn funded(wallets: &[(&Wallet, u64)]) -> MemoryState {
        let mut state = MemoryState::default();
        for (wallet, balance) in wallets {
            state
                .accounts
                .insert(wallet.address(), Account::with_balance(*balance));
        }
        state
    }

    fn total_supply(state: &MemoryState) -> u128 {
        state.accounts.values().map(Account::holdings).sum()
    }

    fn counter_code() -> Vec<u8> {
        encode(&[
            Instruction::LoadImm { dst: 1, value: 0 },
            Instruction::SLoad { dst: 2, key: 1 },
            Instruction::LoadImm { dst: 3, value: 1 },
            Instruction::Add {
                dst: 2,
                a: 2,
                b: 3,
            },
            Instruction::SStore { key: 1, value: 2 },
            Instruction::Halt,
        ])
    }

    #[test]
    fn test_transfer_moves_value_and_fee() {
        let alice = generate_keypair();
        let bob = generate_keypair();
        let miner = Address([9; 20]);
        let mut state = funded(&[(&alice, 100)]);
        let before = total_supply(&state);

        let tx = Transaction::transfer(&alice, bob.address(), 10, 2, 1).signed(&alice);
        let result = Executor::new(&state, Sandbox::default(), REWARD)
            .execute_block(miner, &[tx])
            .unwrap();
        state.apply(&result.changes);

        assert_eq!(state.accounts[&alice.address()].balance, 88);
        assert_eq!(state.accounts[&alice.address()].nonce, 1);
        assert_eq!(state.accounts[&bob.address()].balance, 10);
        assert_eq!(state.accounts[&miner].balance, 2 + REWARD);
        assert_eq!(total_supply(&state), before + REWARD as u128);
        assert_eq!(result.state_root, state.root());
    }

    #[test]
    fn test_credit_overflow_fails_transfer_without_losing_supply() {
        let alice = generate_keypair();
        let whale = generate_keypair();
        let miner = Address([9; 20]);
        let mut state = funded(&[(&alice, 100), (&whale, u64::MAX - 5)]);
        let before = total_supply(&state);

        let tx = Transaction::transfer(&alice, whale.address(), 10, 2, 1).signed(&alice);
        let result = Executor::new(&state, Sandbox::default(), REWARD)
            .execute_block(miner, &[tx])
            .unwrap();
        state.apply(&result.changes);

        assert!(!result.receipts[0].success);
        assert_eq!(state.accounts[&alice.address()].balance, 98);
        assert_eq!(state.accounts[&alice.address()].nonce, 1);
        assert_eq!(state.accounts[&whale.address()].balance, u64::MAX - 5);
        assert_eq!(total_supply(&state), before + REWARD as u128);
    }

    #[test]
    fn test_fee_overflow_is_not_admitted() {
        let alice = generate_keypair();
        let miner = generate_keypair();
        let state = funded(&[(&alice, 100), (&miner, u64::MAX - 1)]);

        let tx = Transaction::transfer(&alice, Address([2; 20]), 10, 2, 1).signed(&alice);
        let executor = Executor::new(&state, Sandbox::default(), 0);
        let assembled = executor.assemble(miner.address(), vec![tx.clone()]).unwrap();
        assert!(assembled.transactions.is_empty());
        assert_eq!(
            assembled.dropped,
            vec![(tx.id(), InvalidTxReason::FeeOverflow(miner.address()))]
        );
        let alice_balance = assembled.changes.accounts.get(&alice.address()).map(|a| a.balance);
        assert!(matches!(alice_balance, None | Some(100)));

        assert!(matches!(
            executor.execute_block(miner.address(), &[tx]),
            Err(ChainError::Rejected(ConsensusViolation::InvalidTransaction { .. }))
        ));
    }

    #[test]
    fn test_invalid_transaction_rejects_block() {
        let alice = generate_keypair();
        let state = funded(&[(&alice, 5)]);
        let tx = Transaction::transfer(&alice, Address([2; 20]), 10, 0, 1).signed(&alice);

        let result = Executor::new(&state, Sandbox::default(), REWARD).execute_block(Address::ZERO, &[tx]);
        assert!(matches!(
            result,
            Err(ChainError::Rejected(
                ConsensusViolation::InvalidTransaction { .. }
            ))
        ));
    }

    #[test]
    fn test_assembly_drops_invalid_and_keeps_order() {
        let alice = generate_keypair();
        let state = funded(&[(&alice, 100)]);
        let good = Transaction::transfer(&alice, Address([2; 20]), 10, 0, 1).signed(&alice);
        let gap = Transaction::transfer(&alice, Address([2; 20]), 10, 0, 3).signed(&alice);
        let next = Transaction::transfer(&alice, Address([2; 20]), 10, 0, 2).signed(&alice);

        let result = Executor::new(&state, Sandbox::default(), REWARD)
            .assemble(Address::ZERO, vec![good.clone(), gap.clone(), next.clone()])
            .unwrap();
        assert_eq!(result.transactions, vec![good, next]);
        assert_eq!(
            result.dropped,
            vec![(gap.id(), InvalidTxReason::BadNonce { expected: 2, got: 3 })]
        );
    }

    #[test]
    fn test_deploy_then_call_over_budget() {
        let alice = generate_keypair();
        let mut state = funded(&[(&alice, 1_000)]);
        let deploy = Transaction::deploy(&alice, counter_code(), 1, 1, 1_000_000).signed(&alice);
        let contract = deploy.contract_address().unwrap();
        let call = Transaction::call(&alice, contract, vec![], 1, 2, 50).signed(&alice);

        let result = Executor::new(&state, Sandbox::default(), 0)
            .execute_block(Address([9; 20]), &[deploy, call])
            .unwrap();
        assert!(result.receipts[0].success);
        assert_eq!(result.receipts[0].contract_address, Some(contract));
        assert!(!result.receipts[1].success);
        state.apply(&result.changes);

        // the constructor ran once; the failed call left storage alone
        assert_eq!(state.contracts[&contract].load(0), 1);
        // both fees were still charged
        assert_eq!(state.accounts[&alice.address()].balance, 998);
        assert_eq!(state.accounts[&alice.address()].nonce, 2);
    }

    #[test]
    fn test_stake_and_unstake() {
        let alice = generate_keypair();
        let mut state = funded(&[(&alice, 100)]);
        let stake = Transaction::stake(&alice, 40, true, 0, 1).signed(&alice);
        let unstake_too_much = Transaction::stake(&alice, 50, false, 0, 2).signed(&alice);
        let unstake = Transaction::stake(&alice, 15, false, 0, 3).signed(&alice);

        let result = Executor::new(&state, Sandbox::default(), 0)
            .execute_block(Address([9; 20]), &[stake, unstake_too_much, unstake])
            .unwrap();
        assert!(!result.receipts[1].success);
        state.apply(&result.changes);

        let account = state.accounts[&alice.address()];
        assert_eq!((account.balance, account.stake, account.nonce), (75, 25, 3));
    }

    #[test]
    fn test_execution_is_deterministic() {
        let alice = generate_keypair();
        let state = funded(&[(&alice, 1_000)]);
        let txs = vec![
            Transaction::deploy(&alice, counter_code(), 1, 1, 1_000_000).signed(&alice),
            Transaction::transfer(&alice, Address([3; 20]), 7, 1, 2).signed(&alice),
        ];
        let executor = Executor::new(&state, Sandbox::default(), REWARD);
        let a = executor.execute_block(Address([9; 20]), &txs).unwrap();
        let b = executor.execute_block(Address([9; 20]), &txs).unwrap();
        assert_eq!(a.state_root, b.state_root);
        assert_eq!(a.changes, b.changes);
    }
}
