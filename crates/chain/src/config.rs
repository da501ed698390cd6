//! Node configuration, persisted as `config.json` in the data directory.

use crate::error::{ChainError, Result};
use hodl_consensus::{ConsensusPolicy, Retarget};
use hodl_core::{state_root, Account, Address, Block, ContractState, StateChanges};
use hodl_vm::Sandbox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// File name of the config inside a data directory.
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub policy: ConsensusPolicy,
    /// Leading zero bits required of the first PoW blocks.
    pub initial_difficulty: u32,
    /// Blocks per difficulty epoch.
    pub retarget_interval: u64,
    pub target_block_time_secs: u64,
    pub max_clock_drift_secs: u64,
    /// Issued to the beneficiary of every block.
    pub block_reward: u64,
    /// Threads used by the nonce search.
    pub mining_workers: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            policy: ConsensusPolicy::default(),
            initial_difficulty: 16,
            retarget_interval: 10,
            target_block_time_secs: 30,
            max_clock_drift_secs: 30,
            block_reward: 50,
            mining_workers: 4,
        }
    }
}

impl ConsensusConfig {
    pub fn retarget(&self) -> Retarget {
        Retarget {
            interval: self.retarget_interval,
            target_block_time: self.target_block_time_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Maximum number of transactions in the mempool.
    pub max_transactions: usize,
    /// Maximum pending transactions per sender.
    pub max_per_sender: usize,
    /// Seconds a transaction may wait before eviction.
    pub ttl_secs: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
            max_per_sender: 100,
            ttl_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    pub max_transactions: usize,
    /// Cap on the summed encoded size of a block's transactions.
    pub max_bytes: usize,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            max_transactions: 1_000,
            max_bytes: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_gas_per_tx: u64,
    pub max_storage_entries: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let sandbox = Sandbox::default();
        Self {
            max_gas_per_tx: sandbox.max_gas_per_tx,
            max_storage_entries: sandbox.max_storage_entries,
        }
    }
}

impl ExecutionConfig {
    pub fn sandbox(&self) -> Sandbox {
        Sandbox::new(self.max_gas_per_tx, self.max_storage_entries)
    }
}

/// An initial balance and stake for one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    #[serde(with = "hex_address")]
    pub address: Address,
    #[serde(default)]
    pub balance: u64,
    #[serde(default)]
    pub stake: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    pub timestamp: u64,
    pub allocations: Vec<GenesisAllocation>,
}

impl GenesisConfig {
    /// Initial state; repeated addresses accumulate.
    pub fn state(&self) -> StateChanges {
        let mut changes = StateChanges::default();
        for alloc in &self.allocations {
            let account = changes.accounts.entry(alloc.address).or_default();
            account.balance = account.balance.saturating_add(alloc.balance);
            account.stake = account.stake.saturating_add(alloc.stake);
        }
        changes
    }

    /// Genesis block committing to [`GenesisConfig::state`].
    pub fn block(&self, difficulty: u32) -> Block {
        let changes = self.state();
        let contracts: BTreeMap<Address, ContractState> = BTreeMap::new();
        let accounts: BTreeMap<Address, Account> = changes.accounts;
        Block::genesis(self.timestamp, state_root(&accounts, &contracts), difficulty)
    }
}

mod hex_address {
    use hodl_core::Address;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(address: &Address, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&address.to_hex())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Full node configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub consensus: ConsensusConfig,
    pub mempool: MempoolConfig,
    pub block: BlockConfig,
    pub execution: ExecutionConfig,
    pub genesis: GenesisConfig,
}

impl ChainConfig {
    /// Read `config.json` from `data_dir`.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        let raw = fs::read_to_string(&path).map_err(|source| ChainError::Config {
            path: path.display().to_string(),
            reason: source.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|source| ChainError::Config {
            path: path.display().to_string(),
            reason: source.to_string(),
        })
    }

    /// Write `config.json` into `data_dir`.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|source| ChainError::Config {
            path: path.display().to_string(),
            reason: source.to_string(),
        })?;
        fs::write(&path, json).map_err(|source| ChainError::Config {
            path: path.display().to_string(),
            reason: source.to_string(),
        })
    }
}
