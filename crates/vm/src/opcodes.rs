//! Opcode byte values and the decoded instruction set.
//!
//! Encoding: one opcode byte followed by operands. Registers are packed
//! into nibbles (`[opcode, AAAA_BBBB, CCCC____]`), immediates are
//! little-endian. Jump targets are instruction indices, not byte offsets.

use crate::error::{ExecutionError, Result};

/// Register index (0..16).
pub type Reg = u8;

/// All opcode byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    // Control Flow (0x00-0x0F)
    HALT = 0x00,
    NOP = 0x01,
    JUMP = 0x02,
    JUMPI = 0x03,
    REVERT = 0x0F,

    // Arithmetic (0x10-0x1F)
    ADD = 0x10,
    SUB = 0x11,
    MUL = 0x12,
    DIV = 0x13,
    MOD = 0x14,

    // Bitwise (0x20-0x2F)
    AND = 0x20,
    OR = 0x21,
    XOR = 0x22,
    NOT = 0x23,
    SHL = 0x24,
    SHR = 0x25,

    // Comparison (0x30-0x3F)
    EQ = 0x30,
    LT = 0x32,
    GT = 0x33,
    ISZERO = 0x36,

    // Storage (0x50-0x5F)
    SLOAD = 0x50,
    SSTORE = 0x51,

    // Immediate (0x70-0x7F)
    LOADI = 0x70,
    MOV = 0x71,

    // Context (0x80-0x8F)
    CALLER = 0x80,
    CALLVALUE = 0x81,
    ARG = 0x86,
    ARGCOUNT = 0x87,

    // Debug (0xF0-0xFF)
    LOG = 0xF0,
}

impl Opcode {
    /// Parse a byte as an opcode.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Opcode::HALT),
            0x01 => Some(Opcode::NOP),
            0x02 => Some(Opcode::JUMP),
            0x03 => Some(Opcode::JUMPI),
            0x0F => Some(Opcode::REVERT),

            0x10 => Some(Opcode::ADD),
            0x11 => Some(Opcode::SUB),
            0x12 => Some(Opcode::MUL),
            0x13 => Some(Opcode::DIV),
            0x14 => Some(Opcode::MOD),

            0x20 => Some(Opcode::AND),
            0x21 => Some(Opcode::OR),
            0x22 => Some(Opcode::XOR),
            0x23 => Some(Opcode::NOT),
            0x24 => Some(Opcode::SHL),
            0x25 => Some(Opcode::SHR),

            0x30 => Some(Opcode::EQ),
            0x32 => Some(Opcode::LT),
            0x33 => Some(Opcode::GT),
            0x36 => Some(Opcode::ISZERO),

            0x50 => Some(Opcode::SLOAD),
            0x51 => Some(Opcode::SSTORE),

            0x70 => Some(Opcode::LOADI),
            0x71 => Some(Opcode::MOV),

            0x80 => Some(Opcode::CALLER),
            0x81 => Some(Opcode::CALLVALUE),
            0x86 => Some(Opcode::ARG),
            0x87 => Some(Opcode::ARGCOUNT),

            0xF0 => Some(Opcode::LOG),

            _ => None,
        }
    }

    /// Get the number of bytes this instruction consumes (including opcode).
    pub fn instruction_size(&self) -> usize {
        match self {
            Opcode::HALT | Opcode::NOP | Opcode::REVERT => 1,

            // One or two packed registers
            Opcode::NOT
            | Opcode::ISZERO
            | Opcode::MOV
            | Opcode::SLOAD
            | Opcode::SSTORE
            | Opcode::CALLER
            | Opcode::CALLVALUE
            | Opcode::ARGCOUNT
            | Opcode::LOG => 2,

            // Three packed registers, or register + 8-bit immediate
            Opcode::ADD
            | Opcode::SUB
            | Opcode::MUL
            | Opcode::DIV
            | Opcode::MOD
            | Opcode::AND
            | Opcode::OR
            | Opcode::XOR
            | Opcode::SHL
            | Opcode::SHR
            | Opcode::EQ
            | Opcode::LT
            | Opcode::GT
            | Opcode::ARG => 3,

            // 32-bit target
            Opcode::JUMP => 5,
            // Register + 32-bit target
            Opcode::JUMPI => 6,
            // Register + 64-bit immediate
            Opcode::LOADI => 10,
        }
    }
}

/// A decoded sandbox instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Halt,
    Nop,
    Jump { target: u32 },
    JumpIf { cond: Reg, target: u32 },
    Revert,

    Add { dst: Reg, a: Reg, b: Reg },
    Sub { dst: Reg, a: Reg, b: Reg },
    Mul { dst: Reg, a: Reg, b: Reg },
    Div { dst: Reg, a: Reg, b: Reg },
    Mod { dst: Reg, a: Reg, b: Reg },

    And { dst: Reg, a: Reg, b: Reg },
    Or { dst: Reg, a: Reg, b: Reg },
    Xor { dst: Reg, a: Reg, b: Reg },
    Not { dst: Reg, src: Reg },
    Shl { dst: Reg, a: Reg, b: Reg },
    Shr { dst: Reg, a: Reg, b: Reg },

    Eq { dst: Reg, a: Reg, b: Reg },
    Lt { dst: Reg, a: Reg, b: Reg },
    Gt { dst: Reg, a: Reg, b: Reg },
    IsZero { dst: Reg, src: Reg },

    LoadImm { dst: Reg, value: u64 },
    Mov { dst: Reg, src: Reg },

    /// `dst = args[index]`, zero when out of range.
    Arg { dst: Reg, index: u8 },
    ArgCount { dst: Reg },

    SLoad { dst: Reg, key: Reg },
    SStore { key: Reg, value: Reg },

    Caller { dst: Reg },
    CallValue { dst: Reg },

    Log { src: Reg },
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Halt => Opcode::HALT,
            Instruction::Nop => Opcode::NOP,
            Instruction::Jump { .. } => Opcode::JUMP,
            Instruction::JumpIf { .. } => Opcode::JUMPI,
            Instruction::Revert => Opcode::REVERT,
            Instruction::Add { .. } => Opcode::ADD,
            Instruction::Sub { .. } => Opcode::SUB,
            Instruction::Mul { .. } => Opcode::MUL,
            Instruction::Div { .. } => Opcode::DIV,
            Instruction::Mod { .. } => Opcode::MOD,
            Instruction::And { .. } => Opcode::AND,
            Instruction::Or { .. } => Opcode::OR,
            Instruction::Xor { .. } => Opcode::XOR,
            Instruction::Not { .. } => Opcode::NOT,
            Instruction::Shl { .. } => Opcode::SHL,
            Instruction::Shr { .. } => Opcode::SHR,
            Instruction::Eq { .. } => Opcode::EQ,
            Instruction::Lt { .. } => Opcode::LT,
            Instruction::Gt { .. } => Opcode::GT,
            Instruction::IsZero { .. } => Opcode::ISZERO,
            Instruction::LoadImm { .. } => Opcode::LOADI,
            Instruction::Mov { .. } => Opcode::MOV,
            Instruction::Arg { .. } => Opcode::ARG,
            Instruction::ArgCount { .. } => Opcode::ARGCOUNT,
            Instruction::SLoad { .. } => Opcode::SLOAD,
            Instruction::SStore { .. } => Opcode::SSTORE,
            Instruction::Caller { .. } => Opcode::CALLER,
            Instruction::CallValue { .. } => Opcode::CALLVALUE,
            Instruction::Log { .. } => Opcode::LOG,
        }
    }
}

fn pack(hi: Reg, lo: Reg) -> u8 {
    (hi << 4) | (lo & 0x0F)
}

fn high(byte: u8) -> Reg {
    (byte >> 4) & 0x0F
}

fn low(byte: u8) -> Reg {
    byte & 0x0F
}

/// Encode a program to bytecode.
pub fn encode(program: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::new();
    for instruction in program {
        out.push(instruction.opcode() as u8);
        match *instruction {
            Instruction::Halt | Instruction::Nop | Instruction::Revert => {}
            Instruction::Jump { target } => out.extend_from_slice(&target.to_le_bytes()),
            Instruction::JumpIf { cond, target } => {
                out.push(pack(cond, 0));
                out.extend_from_slice(&target.to_le_bytes());
            }
            Instruction::Add { dst, a, b }
            | Instruction::Sub { dst, a, b }
            | Instruction::Mul { dst, a, b }
            | Instruction::Div { dst, a, b }
            | Instruction::Mod { dst, a, b }
            | Instruction::And { dst, a, b }
            | Instruction::Or { dst, a, b }
            | Instruction::Xor { dst, a, b }
            | Instruction::Shl { dst, a, b }
            | Instruction::Shr { dst, a, b }
            | Instruction::Eq { dst, a, b }
            | Instruction::Lt { dst, a, b }
            | Instruction::Gt { dst, a, b } => {
                out.push(pack(dst, a));
                out.push(pack(b, 0));
            }
            Instruction::Not { dst, src }
            | Instruction::IsZero { dst, src }
            | Instruction::Mov { dst, src } => out.push(pack(dst, src)),
            Instruction::SLoad { dst, key } => out.push(pack(dst, key)),
            Instruction::SStore { key, value } => out.push(pack(key, value)),
            Instruction::LoadImm { dst, value } => {
                out.push(pack(dst, 0));
                out.extend_from_slice(&value.to_le_bytes());
            }
            Instruction::Arg { dst, index } => {
                out.push(pack(dst, 0));
                out.push(index);
            }
            Instruction::ArgCount { dst }
            | Instruction::Caller { dst }
            | Instruction::CallValue { dst } => out.push(pack(dst, 0)),
            Instruction::Log { src } => out.push(pack(src, 0)),
        }
    }
    out
}

/// Decode bytecode into a program, rejecting unknown opcodes, truncated
/// operands and jumps outside the program.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut program = Vec::new();
    let mut pc = 0;

    while pc < code.len() {
        let byte = code[pc];
        let opcode = Opcode::from_byte(byte).ok_or_else(|| {
            ExecutionError::InvalidProgram(format!("unknown opcode 0x{byte:02X} at byte {pc}"))
        })?;
        let size = opcode.instruction_size();
        let operands = code.get(pc + 1..pc + size).ok_or_else(|| {
            ExecutionError::InvalidProgram(format!("truncated {opcode:?} at byte {pc}"))
        })?;
        program.push(decode_one(opcode, operands));
        pc += size;
    }

    let len = program.len() as u64;
    for instruction in &program {
        if let Instruction::Jump { target } | Instruction::JumpIf { target, .. } = instruction {
            if u64::from(*target) >= len {
                return Err(ExecutionError::InvalidJump(*target));
            }
        }
    }

    Ok(program)
}

fn imm32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn imm64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// `operands` is exactly `instruction_size() - 1` bytes long.
fn decode_one(opcode: Opcode, operands: &[u8]) -> Instruction {
    let rrr = || {
        let (b1, b2) = (operands[0], operands[1]);
        (high(b1), low(b1), high(b2))
    };
    let rr = || (high(operands[0]), low(operands[0]));
    let r = || high(operands[0]);

    match opcode {
        Opcode::HALT => Instruction::Halt,
        Opcode::NOP => Instruction::Nop,
        Opcode::REVERT => Instruction::Revert,
        Opcode::JUMP => Instruction::Jump {
            target: imm32(operands),
        },
        Opcode::JUMPI => Instruction::JumpIf {
            cond: r(),
            target: imm32(&operands[1..]),
        },
        Opcode::ADD => {
            let (dst, a, b) = rrr();
            Instruction::Add { dst, a, b }
        }
        Opcode::SUB => {
            let (dst, a, b) = rrr();
            Instruction::Sub { dst, a, b }
        }
        Opcode::MUL => {
            let (dst, a, b) = rrr();
            Instruction::Mul { dst, a, b }
        }
        Opcode::DIV => {
            let (dst, a, b) = rrr();
            Instruction::Div { dst, a, b }
        }
        Opcode::MOD => {
            let (dst, a, b) = rrr();
            Instruction::Mod { dst, a, b }
        }
        Opcode::AND => {
            let (dst, a, b) = rrr();
            Instruction::And { dst, a, b }
        }
        Opcode::OR => {
            let (dst, a, b) = rrr();
            Instruction::Or { dst, a, b }
        }
        Opcode::XOR => {
            let (dst, a, b) = rrr();
            Instruction::Xor { dst, a, b }
        }
        Opcode::SHL => {
            let (dst, a, b) = rrr();
            Instruction::Shl { dst, a, b }
        }
        Opcode::SHR => {
            let (dst, a, b) = rrr();
            Instruction::Shr { dst, a, b }
        }
        Opcode::EQ => {
            let (dst, a, b) = rrr();
            Instruction::Eq { dst, a, b }
        }
        Opcode::LT => {
            let (dst, a, b) = rrr();
            Instruction::Lt { dst, a, b }
        }
        Opcode::GT => {
            let (dst, a, b) = rrr();
            Instruction::Gt { dst, a, b }
        }
        Opcode::NOT => {
            let (dst, src) = rr();
            Instruction::Not { dst, src }
        }
        Opcode::ISZERO => {
            let (dst, src) = rr();
            Instruction::IsZero { dst, src }
        }
        Opcode::MOV => {
            let (dst, src) = rr();
            Instruction::Mov { dst, src }
        }
        Opcode::SLOAD => {
            let (dst, key) = rr();
            Instruction::SLoad { dst, key }
        }
        Opcode::SSTORE => {
            let (key, value) = rr();
            Instruction::SStore { key, value }
        }
        Opcode::LOADI => Instruction::LoadImm {
            dst: r(),
            value: imm64(&operands[1..]),
        },
        Opcode::ARG => Instruction::Arg {
            dst: r(),
            index: operands[1],
        },
        Opcode::ARGCOUNT => Instruction::ArgCount { dst: r() },
        Opcode::CALLER => Instruction::Caller { dst: r() },
        Opcode::CALLVALUE => Instruction::CallValue { dst: r() },
        Opcode::LOG => Instruction::Log { src: r() },
    }
}
