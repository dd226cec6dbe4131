//! Opcode table for the CPU debug peripheral
//!
//! Every request starts with one of these bytes. Some opcodes are followed
//! by a fixed number of payload bytes (register index, little-endian words).

use std::fmt;

/// Name returned for bytes outside the opcode table
pub const UNKNOWN_NAME: &str = "UNKNOWN";

/// Single-byte operation codes understood by the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Reset = 0x01,
    Unreset = 0x02,
    Halt = 0x03,
    Unhalt = 0x04,
    Ping = 0x05,
    ReadPc = 0x06,
    WritePc = 0x07,
    ReadRegister = 0x08,
    WriteRegister = 0x09,
}

impl Opcode {
    /// All opcodes in wire order
    pub const ALL: [Opcode; 10] = [
        Opcode::Nop,
        Opcode::Reset,
        Opcode::Unreset,
        Opcode::Halt,
        Opcode::Unhalt,
        Opcode::Ping,
        Opcode::ReadPc,
        Opcode::WritePc,
        Opcode::ReadRegister,
        Opcode::WriteRegister,
    ];

    /// Look up an opcode by its wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    /// Wire byte for this opcode
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Human-readable name, as printed in logs
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Reset => "RESET",
            Opcode::Unreset => "UNRESET",
            Opcode::Halt => "HALT",
            Opcode::Unhalt => "UNHALT",
            Opcode::Ping => "PING",
            Opcode::ReadPc => "READ_PC",
            Opcode::WritePc => "WRITE_PC",
            Opcode::ReadRegister => "READ_REGISTER",
            Opcode::WriteRegister => "WRITE_REGISTER",
        }
    }

    /// Number of payload bytes the peripheral consumes after the opcode
    pub fn payload_len(self) -> usize {
        match self {
            // register index
            Opcode::ReadRegister => 1,
            // register index + u32 LE
            Opcode::WriteRegister => 5,
            // u32 LE address
            Opcode::WritePc => 4,
            _ => 0,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_byte(byte).ok_or(byte)
    }
}

/// Name of an arbitrary byte, `UNKNOWN` when it is not an opcode
pub fn name_of(byte: u8) -> &'static str {
    Opcode::from_byte(byte).map_or(UNKNOWN_NAME, Opcode::name)
}
