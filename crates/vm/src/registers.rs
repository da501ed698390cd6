//! Register file.

use crate::opcodes::Reg;

pub const NUM_REGISTERS: usize = 16;

/// Sixteen general purpose `u64` registers, all zero at start.
#[derive(Debug, Clone, Default)]
pub struct Registers {
    values: [u64; NUM_REGISTERS],
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, r: Reg) -> u64 {
        self.values[r as usize % NUM_REGISTERS]
    }

    pub fn set(&mut self, r: Reg, value: u64) {
        self.values[r as usize % NUM_REGISTERS] = value;
    }

    pub fn values(&self) -> &[u64; NUM_REGISTERS] {
        &self.values
    }
}
