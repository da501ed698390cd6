//! Contract transactions in, state deltas out.

use crate::error::{ExecutionError, Result};
use crate::executor::{CallContext, Vm};
use crate::gas::GasCosts;
use crate::opcodes::decode;
use hodl_core::{Address, ContractState, Payload, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Default cap on gas a single transaction may request.
pub const DEFAULT_MAX_GAS_PER_TX: u64 = 10_000_000;

/// Default cap on live storage slots per contract.
pub const DEFAULT_MAX_STORAGE_ENTRIES: usize = 1_024;

/// Changes one successful contract transaction makes to one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDelta {
    pub contract: Address,
    /// Set for deployments only.
    pub code: Option<Vec<u8>>,
    /// Slot writes; zero clears a slot.
    pub storage_writes: BTreeMap<u64, u64>,
    pub logs: Vec<u64>,
    pub gas_used: u64,
}

impl StateDelta {
    /// Apply the delta on top of `base` (the empty contract for deploys).
    pub fn apply_to(&self, base: ContractState) -> ContractState {
        let mut state = base;
        if let Some(code) = &self.code {
            state.code = code.clone();
        }
        for (key, value) in &self.storage_writes {
            if *value == 0 {
                state.storage.remove(key);
            } else {
                state.storage.insert(*key, *value);
            }
        }
        state
    }
}

/// Deterministic executor for deploy and call payloads.
#[derive(Debug, Clone, Copy)]
pub struct Sandbox {
    pub max_gas_per_tx: u64,
    pub max_storage_entries: usize,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self {
            max_gas_per_tx: DEFAULT_MAX_GAS_PER_TX,
            max_storage_entries: DEFAULT_MAX_STORAGE_ENTRIES,
        }
    }
}

impl Sandbox {
    pub fn new(max_gas_per_tx: u64, max_storage_entries: usize) -> Self {
        Self {
            max_gas_per_tx,
            max_storage_entries,
        }
    }

    /// Execute `tx` against `snapshot`, the current state of the target
    /// contract (`None` for a deployment or a missing contract).
    ///
    /// The result depends only on the arguments. Any error means the
    /// transaction has no effect on contract state.
    pub fn execute(
        &self,
        snapshot: Option<&ContractState>,
        tx: &Transaction,
    ) -> Result<StateDelta> {
        let gas_limit = tx.gas_limit.min(self.max_gas_per_tx);
        let outcome = match &tx.payload {
            Some(Payload::Deploy { code }) => self.deploy(tx, code, gas_limit),
            Some(Payload::Call { args }) => match snapshot {
                Some(contract) => self.call(tx, contract, args, gas_limit),
                None => Err(ExecutionError::ContractNotFound(tx.recipient.to_hex())),
            },
            _ => Err(ExecutionError::InvalidProgram(
                "transaction carries no contract payload".into(),
            )),
        };

        match &outcome {
            Ok(delta) => debug!(
                contract = %delta.contract,
                gas_used = delta.gas_used,
                writes = delta.storage_writes.len(),
                "contract execution succeeded"
            ),
            Err(err) => debug!(tx = %tx.id(), error = %err, "contract execution failed"),
        }
        outcome
    }

    fn deploy(&self, tx: &Transaction, code: &[u8], gas_limit: u64) -> Result<StateDelta> {
        if code.is_empty() {
            return Err(ExecutionError::InvalidProgram("empty code".into()));
        }
        let deposit = GasCosts::CODE_DEPOSIT_PER_BYTE.saturating_mul(code.len() as u64);
        let budget = gas_limit
            .checked_sub(deposit)
            .ok_or(ExecutionError::OutOfResources { limit: gas_limit })?;

        let program = decode(code)?;
        let empty = BTreeMap::new();
        let context = CallContext {
            caller: tx.sender,
            call_value: tx.amount,
            args: &[],
        };
        let result = Vm::new(&program, budget, context, &empty, self.max_storage_entries).run()?;

        let contract = tx
            .contract_address()
            .ok_or_else(|| ExecutionError::InvalidProgram("not a deployment".into()))?;
        Ok(StateDelta {
            contract,
            code: Some(code.to_vec()),
            storage_writes: result.storage_writes,
            logs: result.logs,
            gas_used: deposit + result.gas_used,
        })
    }

    fn call(
        &self,
        tx: &Transaction,
        contract: &ContractState,
        args: &[u64],
        gas_limit: u64,
    ) -> Result<StateDelta> {
        let program = decode(&contract.code)?;
        let context = CallContext {
            caller: tx.sender,
            call_value: tx.amount,
            args,
        };
        let result = Vm::new(
            &program,
            gas_limit,
            context,
            &contract.storage,
            self.max_storage_entries,
        )
        .run()?;

        Ok(StateDelta {
            contract: tx.recipient,
            code: None,
            storage_writes: result.storage_writes,
            logs: result.logs,
            gas_used: result.gas_used,
        })
    }
}

/// Execute with default limits.
pub fn execute(snapshot: Option<&ContractState>, tx: &Transaction) -> Result<StateDelta> {
    Sandbox::default().execute(snapshot, tx)
}
