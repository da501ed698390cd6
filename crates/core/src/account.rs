//! Account and contract state records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-address ledger record.
///
/// Every address implicitly exists with zero balance, nonce and stake; a
/// record is materialized the first time a block touches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Account {
    /// Nonce of the last committed transaction from this address (0 = none).
    pub nonce: u64,
    /// Spendable balance in the native token.
    pub balance: u64,
    /// Balance locked for proof-of-stake block production.
    pub stake: u64,
}

impl Account {
    /// Create an account holding `balance` and nothing staked.
    pub fn with_balance(balance: u64) -> Self {
        Self {
            nonce: 0,
            balance,
            stake: 0,
        }
    }

    /// The nonce the next transaction from this account must carry.
    pub fn next_nonce(&self) -> u64 {
        self.nonce.saturating_add(1)
    }

    /// Add balance to the account.
    /// Returns false and leaves the balance untouched if it would overflow.
    #[must_use]
    pub fn credit(&mut self, amount: u64) -> bool {
        match self.balance.checked_add(amount) {
            Some(total) => {
                self.balance = total;
                true
            }
            None => false,
        }
    }

    /// Subtract balance from the account.
    /// Returns false and leaves the balance untouched if it is too small.
    pub fn debit(&mut self, amount: u64) -> bool {
        match self.balance.checked_sub(amount) {
            Some(rest) => {
                self.balance = rest;
                true
            }
            None => false,
        }
    }

    /// Move `amount` from balance into stake.
    pub fn bond(&mut self, amount: u64) -> bool {
        match (self.balance.checked_sub(amount), self.stake.checked_add(amount)) {
            (Some(balance), Some(stake)) => {
                self.balance = balance;
                self.stake = stake;
                true
            }
            _ => false,
        }
    }

    /// Move `amount` from stake back into balance.
    pub fn unbond(&mut self, amount: u64) -> bool {
        match (self.stake.checked_sub(amount), self.balance.checked_add(amount)) {
            (Some(stake), Some(balance)) => {
                self.stake = stake;
                self.balance = balance;
                true
            }
            _ => false,
        }
    }

    /// Tokens owned by the account, staked or not.
    pub fn holdings(&self) -> u128 {
        self.balance as u128 + self.stake as u128
    }
}

/// Code and storage of a deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContractState {
    /// Encoded sandbox program.
    pub code: Vec<u8>,
    /// Persistent key/value storage.
    pub storage: BTreeMap<u64, u64>,
}

impl ContractState {
    pub fn new(code: Vec<u8>) -> Self {
        Self {
            code,
            storage: BTreeMap::new(),
        }
    }

    /// Read a storage slot; unset slots read as zero.
    pub fn load(&self, key: u64) -> u64 {
        self.storage.get(&key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_account() {
        let account = Account::default();
        assert_eq!(account.nonce, 0);
        assert_eq!(account.next_nonce(), 1);
        assert_eq!(account.holdings(), 0);
    }

    #[test]
    fn test_credit_and_debit() {
        let mut account = Account::with_balance(100);
        assert!(account.credit(50));
        assert_eq!(account.balance, 150);

        assert!(account.debit(100));
        assert_eq!(account.balance, 50);

        assert!(!account.debit(100));
        assert_eq!(account.balance, 50);
    }

    #[test]
    fn test_bond_and_unbond_preserve_holdings() {
        let mut account = Account::with_balance(100);
        assert!(account.bond(40));
        assert_eq!((account.balance, account.stake), (60, 40));
        assert_eq!(account.holdings(), 100);

        assert!(!account.unbond(41));
        assert!(account.unbond(15));
        assert_eq!((account.balance, account.stake), (75, 25));

        assert!(!account.bond(1_000));
        assert_eq!(account.holdings(), 100);
    }

    #[test]
    fn test_overflow_leaves_account_untouched() {
        let mut account = Account::with_balance(u64::MAX - 5);
        assert!(!account.credit(10));
        assert_eq!(account.balance, u64::MAX - 5);

        let mut staked = Account {
            nonce: 0,
            balance: 10,
            stake: u64::MAX,
        };
        assert!(!staked.bond(1));
        assert_eq!((staked.balance, staked.stake), (10, u64::MAX));

        let mut full = Account {
            nonce: 0,
            balance: u64::MAX,
            stake: 10,
        };
        assert!(!full.unbond(1));
        assert_eq!((full.balance, full.stake), (u64::MAX, 10));
    }

    #[test]
    fn test_contract_storage_defaults_to_zero() {
        let mut contract = ContractState::new(vec![0x00]);
        assert_eq!(contract.load(7), 0);
        contract.storage.insert(7, 42);
        assert_eq!(contract.load(7), 42);
    }
}
