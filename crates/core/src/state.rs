//! Ledger state access, pending changes and the state root.

use crate::account::{Account, ContractState};
use crate::crypto::Address;
use crate::hash::{hash_concat, Hash};
use crate::merkle::merkle_root;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read access to committed ledger state.
///
/// Implemented by the block store; consumers such as the mempool and the
/// executor only ever see this view.
pub trait StateReader {
    type Error;

    /// Account at `address`; unknown addresses read as the zero account.
    fn account(&self, address: &Address) -> Result<Account, Self::Error>;

    /// Contract deployed at `address`, if any.
    fn contract(&self, address: &Address) -> Result<Option<ContractState>, Self::Error>;

    /// Every materialized account, ordered by address.
    fn all_accounts(&self) -> Result<BTreeMap<Address, Account>, Self::Error>;

    /// Every deployed contract, ordered by address.
    fn all_contracts(&self) -> Result<BTreeMap<Address, ContractState>, Self::Error>;
}

/// Records written by one block, keyed by address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChanges {
    pub accounts: BTreeMap<Address, Account>,
    pub contracts: BTreeMap<Address, ContractState>,
}

impl StateChanges {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.contracts.is_empty()
    }
}

/// Uncommitted changes layered over a committed state.
pub struct Overlay<'a, R> {
    base: &'a R,
    changes: StateChanges,
}

impl<'a, R: StateReader> Overlay<'a, R> {
    pub fn new(base: &'a R) -> Self {
        Self {
            base,
            changes: StateChanges::default(),
        }
    }

    pub fn account(&self, address: &Address) -> Result<Account, R::Error> {
        match self.changes.accounts.get(address) {
            Some(account) => Ok(*account),
            None => self.base.account(address),
        }
    }

    pub fn set_account(&mut self, address: Address, account: Account) {
        self.changes.accounts.insert(address, account);
    }

    pub fn contract(&self, address: &Address) -> Result<Option<ContractState>, R::Error> {
        match self.changes.contracts.get(address) {
            Some(contract) => Ok(Some(contract.clone())),
            None => self.base.contract(address),
        }
    }

    pub fn set_contract(&mut self, address: Address, contract: ContractState) {
        self.changes.contracts.insert(address, contract);
    }

    /// Root of the committed state with the pending changes applied.
    pub fn state_root(&self) -> Result<Hash, R::Error> {
        let mut accounts = self.base.all_accounts()?;
        accounts.extend(self.changes.accounts.iter().map(|(a, acct)| (*a, *acct)));
        let mut contracts = self.base.all_contracts()?;
        contracts.extend(
            self.changes
                .contracts
                .iter()
                .map(|(a, c)| (*a, c.clone())),
        );
        Ok(state_root(&accounts, &contracts))
    }

    pub fn changes(&self) -> &StateChanges {
        &self.changes
    }

    pub fn into_changes(self) -> StateChanges {
        self.changes
    }
}

/// Merkle root over every non-empty account and every contract.
///
/// Leaves are domain separated and taken in address order, accounts
/// first, so the root depends only on the state itself.
pub fn state_root(
    accounts: &BTreeMap<Address, Account>,
    contracts: &BTreeMap<Address, ContractState>,
) -> Hash {
    let account_leaves = accounts
        .iter()
        .filter(|(_, account)| **account != Account::default())
        .map(|(address, account)| {
            let record = bincode::serialize(account).expect("serialization should not fail");
            hash_concat(&[b"acct".as_slice(), address.as_ref(), record.as_slice()])
        });
    let contract_leaves = contracts.iter().map(|(address, contract)| {
        let record = bincode::serialize(contract).expect("serialization should not fail");
        hash_concat(&[b"code".as_slice(), address.as_ref(), record.as_slice()])
    });
    let leaves: Vec<Hash> = account_leaves.chain(contract_leaves).collect();
    merkle_root(&leaves)
}

/// In-memory state, handy for tests and genesis construction.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub accounts: BTreeMap<Address, Account>,
    pub contracts: BTreeMap<Address, ContractState>,
}

impl MemoryState {
    /// Fold committed changes into this state.
    pub fn apply(&mut self, changes: &StateChanges) {
        self.accounts
            .extend(changes.accounts.iter().map(|(a, acct)| (*a, *acct)));
        self.contracts
            .extend(changes.contracts.iter().map(|(a, c)| (*a, c.clone())));
    }

    pub fn root(&self) -> Hash {
        state_root(&self.accounts, &self.contracts)
    }
}

impl StateReader for MemoryState {
    type Error = std::convert::Infallible;

    fn account(&self, address: &Address) -> Result<Account, Self::Error> {
        Ok(self.accounts.get(address).copied().unwrap_or_default())
    }

    fn contract(&self, address: &Address) -> Result<Option<ContractState>, Self::Error> {
        Ok(self.contracts.get(address).cloned())
    }

    fn all_accounts(&self) -> Result<BTreeMap<Address, Account>, Self::Error> {
        Ok(self.accounts.clone())
    }

    fn all_contracts(&self) -> Result<BTreeMap<Address, ContractState>, Self::Error> {
        Ok(self.contracts.clone())
    }
}
