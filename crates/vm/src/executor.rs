//! VM execution loop.

use crate::{
    error::{ExecutionError, Result},
    gas::{GasCosts, GasMeter},
    opcodes::{Instruction, Reg},
    registers::Registers,
};
use hodl_core::Address;
use std::collections::BTreeMap;

/// Inputs visible to a running contract.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub caller: Address,
    pub call_value: u64,
    pub args: &'a [u64],
}

/// Output of a run that reached `Halt` (or the end of the program).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub gas_used: u64,
    /// Slots written during the run; a zero value clears the slot.
    pub storage_writes: BTreeMap<u64, u64>,
    pub logs: Vec<u64>,
}

/// The virtual machine state.
pub struct Vm<'a> {
    program: &'a [Instruction],
    registers: Registers,
    pc: usize,
    gas: GasMeter,
    halted: bool,

    context: CallContext<'a>,

    // Storage: read-only snapshot plus this run's writes
    storage: &'a BTreeMap<u64, u64>,
    writes: BTreeMap<u64, u64>,
    live_entries: usize,
    max_entries: usize,

    logs: Vec<u64>,
}

impl<'a> Vm<'a> {
    /// Create a VM over a decoded program and a storage snapshot.
    pub fn new(
        program: &'a [Instruction],
        gas_limit: u64,
        context: CallContext<'a>,
        storage: &'a BTreeMap<u64, u64>,
        max_entries: usize,
    ) -> Self {
        Self {
            program,
            registers: Registers::new(),
            pc: 0,
            gas: GasMeter::new(gas_limit),
            halted: false,
            context,
            storage,
            writes: BTreeMap::new(),
            live_entries: storage.values().filter(|v| **v != 0).count(),
            max_entries,
            logs: Vec::new(),
        }
    }

    /// Get current register values.
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// Get remaining gas.
    pub fn gas_remaining(&self) -> u64 {
        self.gas.remaining()
    }

    /// Run the VM until it halts, fails or runs out of gas.
    pub fn run(mut self) -> Result<ExecutionResult> {
        while !self.halted && self.pc < self.program.len() {
            self.step()?;
        }

        Ok(ExecutionResult {
            gas_used: self.gas.used(),
            storage_writes: self.writes,
            logs: self.logs,
        })
    }

    /// Execute a single instruction.
    fn step(&mut self) -> Result<()> {
        let instruction = self.program[self.pc];
        self.gas.consume(GasCosts::of(&instruction))?;
        let mut next = self.pc + 1;

        match instruction {
            Instruction::Halt => self.halted = true,
            Instruction::Nop => {}
            Instruction::Revert => return Err(ExecutionError::Reverted),

            Instruction::Jump { target } => next = self.jump_target(target)?,
            Instruction::JumpIf { cond, target } => {
                if self.registers.get(cond) != 0 {
                    next = self.jump_target(target)?;
                }
            }

            Instruction::Add { dst, a, b } => self.binary(dst, a, b, u64::wrapping_add),
            Instruction::Sub { dst, a, b } => self.binary(dst, a, b, u64::wrapping_sub),
            Instruction::Mul { dst, a, b } => self.binary(dst, a, b, u64::wrapping_mul),
            Instruction::Div { dst, a, b } => {
                let divisor = self.nonzero(b)?;
                self.registers.set(dst, self.registers.get(a) / divisor);
            }
            Instruction::Mod { dst, a, b } => {
                let divisor = self.nonzero(b)?;
                self.registers.set(dst, self.registers.get(a) % divisor);
            }

            Instruction::And { dst, a, b } => self.binary(dst, a, b, |x, y| x & y),
            Instruction::Or { dst, a, b } => self.binary(dst, a, b, |x, y| x | y),
            Instruction::Xor { dst, a, b } => self.binary(dst, a, b, |x, y| x ^ y),
            Instruction::Not { dst, src } => self.registers.set(dst, !self.registers.get(src)),
            Instruction::Shl { dst, a, b } => self.binary(dst, a, b, |x, y| x << (y & 0x3F)),
            Instruction::Shr { dst, a, b } => self.binary(dst, a, b, |x, y| x >> (y & 0x3F)),

            Instruction::Eq { dst, a, b } => self.binary(dst, a, b, |x, y| (x == y) as u64),
            Instruction::Lt { dst, a, b } => self.binary(dst, a, b, |x, y| (x < y) as u64),
            Instruction::Gt { dst, a, b } => self.binary(dst, a, b, |x, y| (x > y) as u64),
            Instruction::IsZero { dst, src } => {
                self.registers
                    .set(dst, (self.registers.get(src) == 0) as u64)
            }

            Instruction::LoadImm { dst, value } => self.registers.set(dst, value),
            Instruction::Mov { dst, src } => self.registers.set(dst, self.registers.get(src)),

            Instruction::Arg { dst, index } => {
                let value = self
                    .context
                    .args
                    .get(index as usize)
                    .copied()
                    .unwrap_or(0);
                self.registers.set(dst, value);
            }
            Instruction::ArgCount { dst } => {
                self.registers.set(dst, self.context.args.len() as u64)
            }

            Instruction::SLoad { dst, key } => {
                let value = self.sload(self.registers.get(key));
                self.registers.set(dst, value);
            }
            Instruction::SStore { key, value } => {
                self.sstore(self.registers.get(key), self.registers.get(value))?
            }

            Instruction::Caller { dst } => {
                let caller_bytes = self.context.caller.as_bytes();
                let mut value = [0u8; 8];
                value.copy_from_slice(&caller_bytes[..8]);
                self.registers.set(dst, u64::from_le_bytes(value));
            }
            Instruction::CallValue { dst } => self.registers.set(dst, self.context.call_value),

            Instruction::Log { src } => self.logs.push(self.registers.get(src)),
        }

        self.pc = next;
        Ok(())
    }

    fn binary(&mut self, dst: Reg, a: Reg, b: Reg, op: impl Fn(u64, u64) -> u64) {
        let result = op(self.registers.get(a), self.registers.get(b));
        self.registers.set(dst, result);
    }

    fn nonzero(&self, r: Reg) -> Result<u64> {
        match self.registers.get(r) {
            0 => Err(ExecutionError::DivisionByZero),
            v => Ok(v),
        }
    }

    fn jump_target(&self, target: u32) -> Result<usize> {
        let addr = target as usize;
        if addr >= self.program.len() {
            return Err(ExecutionError::InvalidJump(target));
        }
        Ok(addr)
    }

    fn sload(&self, key: u64) -> u64 {
        self.writes
            .get(&key)
            .or_else(|| self.storage.get(&key))
            .copied()
            .unwrap_or(0)
    }

    fn sstore(&mut self, key: u64, value: u64) -> Result<()> {
        let current = self.sload(key);
        let cost = if current == 0 {
            GasCosts::SSTORE_SET
        } else {
            GasCosts::SSTORE_RESET
        };
        self.gas.consume(cost)?;

        match (current == 0, value == 0) {
            (true, false) => {
                if self.live_entries >= self.max_entries {
                    return Err(ExecutionError::StorageLimit(self.max_entries));
                }
                self.live_entries += 1;
            }
            (false, true) => self.live_entries -= 1,
            _ => {}
        }
        self.writes.insert(key, value);
        Ok(())
    }
}
