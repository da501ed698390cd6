//! Materialized account and contract state.
//!
//! The snapshot is only ever written by [`StoreWriter::append`] (or by a
//! replay from genesis) and always reflects the block at
//! [`Store::snapshot_height`].

use crate::chain::{put_state, GENESIS_ALLOC_KEY, STATE_HEIGHT_KEY};
use crate::db::{Database, WriteBatch, ACCOUNT_PREFIX, CONTRACT_PREFIX};
use crate::error::{Result, StoreError};
use crate::store::{Store, StoreWriter};
use hodl_core::{Account, Address, ContractState, StateChanges, StateReader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

impl Store {
    /// Account at `address`; unknown addresses read as the zero account.
    pub fn account(&self, address: &Address) -> Result<Account> {
        Ok(self
            .read(&Database::account_key(address))?
            .unwrap_or_default())
    }

    /// Spendable balance at `address`.
    pub fn balance(&self, address: &Address) -> Result<u64> {
        Ok(self.account(address)?.balance)
    }

    /// Contract deployed at `address`, if any.
    pub fn contract(&self, address: &Address) -> Result<Option<ContractState>> {
        self.read(&Database::contract_key(address))
    }

    pub fn all_accounts(&self) -> Result<BTreeMap<Address, Account>> {
        self.check()?;
        self.scan_by_address(ACCOUNT_PREFIX)
    }

    pub fn all_contracts(&self) -> Result<BTreeMap<Address, ContractState>> {
        self.check()?;
        self.scan_by_address(CONTRACT_PREFIX)
    }

    /// Accounts with non-zero stake, ordered by address.
    pub fn stakers(&self) -> Result<Vec<(Address, u64)>> {
        Ok(self
            .all_accounts()?
            .into_iter()
            .filter(|(_, account)| account.stake > 0)
            .map(|(address, account)| (address, account.stake))
            .collect())
    }

    pub fn total_contracts(&self) -> Result<u64> {
        self.check()?;
        self.db().count(CONTRACT_PREFIX)
    }

    /// Height of the block the materialized state reflects.
    pub fn snapshot_height(&self) -> Result<Option<u64>> {
        self.read(STATE_HEIGHT_KEY)
    }

    fn scan_by_address<V: serde::de::DeserializeOwned>(
        &self,
        prefix: &[u8],
    ) -> Result<BTreeMap<Address, V>> {
        let entries = self.db().scan::<V>(prefix).map_err(|err| match err {
            StoreError::Serialization(e) => self.corrupt(format!("undecodable state record: {e}")),
            other => other,
        })?;
        entries
            .into_iter()
            .map(|(suffix, value)| {
                let bytes: [u8; 20] = suffix.as_slice().try_into().map_err(|_| {
                    self.corrupt(format!("state key with {}-byte address", suffix.len()))
                })?;
                Ok((Address(bytes), value))
            })
            .collect()
    }
}

impl StateReader for Store {
    type Error = StoreError;

    fn account(&self, address: &Address) -> Result<Account> {
        Store::account(self, address)
    }

    fn contract(&self, address: &Address) -> Result<Option<ContractState>> {
        Store::contract(self, address)
    }

    fn all_accounts(&self) -> Result<BTreeMap<Address, Account>> {
        Store::all_accounts(self)
    }

    fn all_contracts(&self) -> Result<BTreeMap<Address, ContractState>> {
        Store::all_contracts(self)
    }
}

/// What a block overwrote: for each state record it touched, the value
/// before the block (`None` where the record did not exist).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUndo {
    accounts: BTreeMap<Address, Option<Account>>,
    contracts: BTreeMap<Address, Option<ContractState>>,
}

impl StateUndo {
    /// Record what `base` holds at every key `changes` is about to write.
    pub(crate) fn capture(base: &ParentState<'_>, changes: &StateChanges) -> Result<Self> {
        let mut undo = StateUndo::default();
        for address in changes.accounts.keys() {
            undo.accounts.insert(*address, base.stored_account(address)?);
        }
        for address in changes.contracts.keys() {
            undo.contracts.insert(*address, base.stored_contract(address)?);
        }
        Ok(undo)
    }

    /// Queue the writes that restore every recorded value.
    pub(crate) fn revert(&self, batch: &mut WriteBatch) -> Result<()> {
        for (address, account) in &self.accounts {
            match account {
                Some(account) => batch.put(Database::account_key(address), account)?,
                None => batch.remove(Database::account_key(address)),
            }
        }
        for (address, contract) in &self.contracts {
            match contract {
                Some(contract) => batch.put(Database::contract_key(address), contract)?,
                None => batch.remove(Database::contract_key(address)),
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.contracts.is_empty()
    }
}

/// Read view of the snapshot with one block's writes stepped back: the
/// state a sibling of the head executes against.
pub struct ParentState<'a> {
    store: &'a Store,
    undo: StateUndo,
}

impl<'a> ParentState<'a> {
    pub(crate) fn new(store: &'a Store, undo: StateUndo) -> Self {
        Self { store, undo }
    }

    /// The snapshot as it stands.
    pub(crate) fn current(store: &'a Store) -> Self {
        Self::new(store, StateUndo::default())
    }

    pub(crate) fn undo(&self) -> &StateUndo {
        &self.undo
    }

    fn stored_account(&self, address: &Address) -> Result<Option<Account>> {
        match self.undo.accounts.get(address) {
            Some(account) => Ok(account.clone()),
            None => self.store.read(&Database::account_key(address)),
        }
    }

    fn stored_contract(&self, address: &Address) -> Result<Option<ContractState>> {
        match self.undo.contracts.get(address) {
            Some(contract) => Ok(contract.clone()),
            None => self.store.read(&Database::contract_key(address)),
        }
    }

    /// Accounts with non-zero stake, ordered by address.
    pub fn stakers(&self) -> Result<Vec<(Address, u64)>> {
        Ok(StateReader::all_accounts(self)?
            .into_iter()
            .filter(|(_, account)| account.stake > 0)
            .map(|(address, account)| (address, account.stake))
            .collect())
    }
}

impl StateReader for ParentState<'_> {
    type Error = StoreError;

    fn account(&self, address: &Address) -> Result<Account> {
        Ok(self.stored_account(address)?.unwrap_or_default())
    }

    fn contract(&self, address: &Address) -> Result<Option<ContractState>> {
        self.stored_contract(address)
    }

    fn all_accounts(&self) -> Result<BTreeMap<Address, Account>> {
        let mut accounts = self.store.all_accounts()?;
        for (address, account) in &self.undo.accounts {
            match account {
                Some(account) => accounts.insert(*address, account.clone()),
                None => accounts.remove(address),
            };
        }
        Ok(accounts)
    }

    fn all_contracts(&self) -> Result<BTreeMap<Address, ContractState>> {
        let mut contracts = self.store.all_contracts()?;
        for (address, contract) in &self.undo.contracts {
            match contract {
                Some(contract) => contracts.insert(*address, contract.clone()),
                None => contracts.remove(address),
            };
        }
        Ok(contracts)
    }
}

impl StoreWriter<'_> {
    /// Drop the materialized state and restore the genesis allocations.
    /// Blocks are untouched; follow with [`StoreWriter::apply_state`] per
    /// block to rebuild.
    pub fn reset_state(&self) -> Result<()> {
        let store = self.store;
        let allocations: StateChanges = store
            .read(GENESIS_ALLOC_KEY)?
            .ok_or(StoreError::NotInitialized)?;

        let mut batch = WriteBatch::default();
        for address in store.all_accounts()?.keys() {
            batch.remove(Database::account_key(address));
        }
        for address in store.all_contracts()?.keys() {
            batch.remove(Database::contract_key(address));
        }
        put_state(&mut batch, 0, &allocations)?;
        store.db().apply(batch)?;
        info!("state snapshot reset to genesis");
        Ok(())
    }

    /// Write the state produced by the already-stored block at `height`.
    pub fn apply_state(&self, height: u64, changes: &StateChanges) -> Result<()> {
        let store = self.store;
        let expected = store.snapshot_height()?.map_or(0, |h| h + 1);
        if height != expected || height > store.height()? {
            return Err(StoreError::ReplayOutOfOrder { height, expected });
        }
        let mut batch = WriteBatch::default();
        put_state(&mut batch, height, changes)?;
        store.db().apply(batch)?;
        Ok(())
    }
}
