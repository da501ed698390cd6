//! Gas metering.

use crate::error::{ExecutionError, Result};
use crate::opcodes::Instruction;

/// Gas costs for operations.
pub struct GasCosts;

impl GasCosts {
    // Tier 1: Very cheap (simple register operations)
    pub const ZERO: u64 = 0; // HALT, NOP, REVERT
    pub const BASE: u64 = 2; // ADD, SUB, AND, OR, MOV

    // Tier 2: Cheap (more complex ALU operations)
    pub const LOW: u64 = 3; // MUL, comparison ops

    // Tier 3: Medium (division, shifts)
    pub const MID: u64 = 5; // DIV, MOD, SHL, SHR

    // Tier 4: Storage
    pub const SLOAD: u64 = 100;
    pub const SSTORE_SET: u64 = 20000; // Write to empty slot
    pub const SSTORE_RESET: u64 = 5000; // Overwrite existing slot

    // Control flow
    pub const JUMP: u64 = 8;

    // Deployment, per byte of code
    pub const CODE_DEPOSIT_PER_BYTE: u64 = 10;

    /// Static cost of an instruction. `SStore` is priced separately since
    /// it depends on the slot's current value.
    pub fn of(instruction: &Instruction) -> u64 {
        match instruction {
            Instruction::Halt | Instruction::Nop | Instruction::Revert => Self::ZERO,
            Instruction::Jump { .. } | Instruction::JumpIf { .. } => Self::JUMP,
            Instruction::Mul { .. }
            | Instruction::Eq { .. }
            | Instruction::Lt { .. }
            | Instruction::Gt { .. } => Self::LOW,
            Instruction::Div { .. }
            | Instruction::Mod { .. }
            | Instruction::Shl { .. }
            | Instruction::Shr { .. } => Self::MID,
            Instruction::SLoad { .. } => Self::SLOAD,
            Instruction::SStore { .. } => Self::ZERO,
            _ => Self::BASE,
        }
    }
}

/// Gas meter tracks remaining gas.
#[derive(Debug)]
pub struct GasMeter {
    limit: u64,
    remaining: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    /// Consume gas, returning error if insufficient.
    pub fn consume(&mut self, amount: u64) -> Result<()> {
        if self.remaining < amount {
            self.remaining = 0;
            return Err(ExecutionError::OutOfResources { limit: self.limit });
        }
        self.remaining -= amount;
        Ok(())
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn used(&self) -> u64 {
        self.limit - self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_until_exhausted() {
        let mut meter = GasMeter::new(10);
        meter.consume(GasCosts::MID).unwrap();
        meter.consume(GasCosts::MID).unwrap();
        assert_eq!(meter.used(), 10);
        assert_eq!(
            meter.consume(GasCosts::BASE),
            Err(ExecutionError::OutOfResources { limit: 10 })
        );
    }

    #[test]
    fn test_instruction_tiers() {
        assert_eq!(GasCosts::of(&Instruction::Halt), GasCosts::ZERO);
        assert_eq!(GasCosts::of(&Instruction::Jump { target: 0 }), GasCosts::JUMP);
        assert_eq!(GasCosts::of(&Instruction::Div { dst: 0, a: 1, b: 2 }), GasCosts::MID);
        assert_eq!(GasCosts::of(&Instruction::SLoad { dst: 0, key: 1 }), GasCosts::SLOAD);
    }
}
