//! Operator command catalog
//!
//! A [`Command`] is what the operator asks for ("Halt CPU"). Most commands map
//! onto one opcode; some are placeholders that are listed but have no wire
//! representation yet. Commands that touch a register or the PC need extra
//! input before a [`Request`] can be built.

use super::opcode::Opcode;
use crate::error::ProtocolError;
use byteorder::{ByteOrder, LittleEndian};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

/// Highest register index on the target CPU
pub const MAX_REGISTER: u8 = 31;

/// Operator-facing commands, in menu order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Halt,
    Unhalt,
    Reset,
    Unreset,
    ReadRegister,
    FullDump,
    Ping,
    ReadPc,
    SetRegister,
    JumpToAddress,
    LoadProgram,
    StatsDump,
    ReadMemory,
    WriteMemory,
}

/// Kind of auxiliary input a command needs before it can be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputKind {
    /// Register index 0-31
    Register,
    /// Register index 0-31 followed by a hex value
    RegisterValue,
    /// Hex address
    Address,
}

/// Static description of a command
#[derive(Debug, Clone, Serialize)]
pub struct CommandInfo {
    /// Short identifier used on the command line
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    pub description: &'static str,
    /// Whether the console allows triggering it
    pub implemented: bool,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "opcode_name")]
    pub opcode: Option<Opcode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputKind>,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub prompt: &'static str,
}

fn opcode_name<S: serde::Serializer>(op: &Option<Opcode>, s: S) -> Result<S::Ok, S::Error> {
    op.map(Opcode::name).serialize(s)
}

const REGISTER_PROMPT: &str = "Register number (0-31): ";
const REGISTER_VALUE_PROMPT: &str = "Register number (0-31) and value (hex, e.g. DEADBEEF): ";
const ADDRESS_PROMPT: &str = "Address (hex, e.g. 1000): ";

const fn entry(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    implemented: bool,
    opcode: Option<Opcode>,
    input: Option<InputKind>,
    prompt: &'static str,
) -> CommandInfo {
    CommandInfo {
        id,
        name,
        description,
        implemented,
        opcode,
        input,
        prompt,
    }
}

/// Catalog rows, indexed by `Command as usize`
static CATALOG: [CommandInfo; 14] = [
    entry("halt", "Halt CPU", "Stop CPU execution", true, Some(Opcode::Halt), None, ""),
    entry("unhalt", "Unhalt CPU", "Resume CPU execution", true, Some(Opcode::Unhalt), None, ""),
    entry("reset", "Reset CPU", "Reset the CPU", true, Some(Opcode::Reset), None, ""),
    entry("unreset", "Unreset CPU", "Take CPU out of reset", true, Some(Opcode::Unreset), None, ""),
    entry(
        "read-reg",
        "Read Register",
        "Read a specific register value (CPU stays halted)",
        true,
        Some(Opcode::ReadRegister),
        Some(InputKind::Register),
        REGISTER_PROMPT,
    ),
    entry("dump", "Full Dump", "Read all registers and memory", false, None, None, ""),
    entry("ping", "Ping CPU", "Check if CPU is responsive", true, Some(Opcode::Ping), None, ""),
    entry("read-pc", "Read PC", "Read program counter value", true, Some(Opcode::ReadPc), None, ""),
    entry(
        "set-reg",
        "Set Register",
        "Write value to a register (CPU stays halted)",
        true,
        Some(Opcode::WriteRegister),
        Some(InputKind::RegisterValue),
        REGISTER_VALUE_PROMPT,
    ),
    entry(
        "jump",
        "Jump to Address",
        "Set PC to specific address (CPU stays halted)",
        true,
        Some(Opcode::WritePc),
        Some(InputKind::Address),
        ADDRESS_PROMPT,
    ),
    entry("load", "Load Program", "Load program from file", false, None, None, ""),
    entry("stats", "Read Stats", "Read CPU statistics", false, None, None, ""),
    entry("read-mem", "Read Memory", "Read memory at address", false, None, None, ""),
    entry("write-mem", "Write Memory", "Write to memory address", false, None, None, ""),
];

/// Identifier and alias lookup for command-line input
static COMMAND_IDS: Lazy<HashMap<&'static str, Command>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for cmd in Command::ALL {
        m.insert(cmd.info().id, cmd);
    }
    m.insert("read-register", Command::ReadRegister);
    m.insert("set-register", Command::SetRegister);
    m.insert("write-reg", Command::SetRegister);
    m.insert("write-pc", Command::JumpToAddress);
    m.insert("full-dump", Command::FullDump);
    m
});

impl Command {
    /// All commands in menu order
    pub const ALL: [Command; 14] = [
        Command::Halt,
        Command::Unhalt,
        Command::Reset,
        Command::Unreset,
        Command::ReadRegister,
        Command::FullDump,
        Command::Ping,
        Command::ReadPc,
        Command::SetRegister,
        Command::JumpToAddress,
        Command::LoadProgram,
        Command::StatsDump,
        Command::ReadMemory,
        Command::WriteMemory,
    ];

    /// Catalog row for this command
    pub fn info(self) -> &'static CommandInfo {
        &CATALOG[self as usize]
    }

    /// Look up a command by identifier or alias (case-insensitive)
    pub fn lookup(id: &str) -> Result<Self, ProtocolError> {
        COMMAND_IDS
            .get(id.trim().to_lowercase().as_str())
            .copied()
            .ok_or_else(|| ProtocolError::UnknownCommand(id.to_string()))
    }

    pub fn opcode(self) -> Option<Opcode> {
        self.info().opcode
    }

    pub fn needs_input(self) -> bool {
        self.info().input.is_some()
    }

    /// Prompt to show before collecting input, empty if none is needed
    pub fn input_prompt(self) -> &'static str {
        self.info().prompt
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn is_implemented(self) -> bool {
        self.info().implemented
    }
}

/// Catalog in TOML, one `[[command]]` table per entry
pub fn catalog_toml() -> Result<String, toml::ser::Error> {
    #[derive(Serialize)]
    struct Catalog<'a> {
        command: Vec<&'a CommandInfo>,
    }

    toml::to_string(&Catalog {
        command: CATALOG.iter().collect(),
    })
}

/// Auxiliary data collected from the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Register(u8),
    RegisterValue { register: u8, value: u32 },
    Address(u32),
}

impl Operand {
    /// Parse whitespace-separated operator input for a command
    pub fn parse(command: Command, args: &[&str]) -> Result<Self, ProtocolError> {
        let info = command.info();
        match (info.input, args) {
            (None, []) => Ok(Operand::None),
            (None, _) => Err(ProtocolError::UnexpectedInput(info.name)),
            (Some(InputKind::Register), [reg]) => Ok(Operand::Register(parse_register(reg)?)),
            (Some(InputKind::RegisterValue), [reg, value]) => Ok(Operand::RegisterValue {
                register: parse_register(reg)?,
                value: parse_hex(value)?,
            }),
            (Some(InputKind::Address), [addr]) => Ok(Operand::Address(parse_hex(addr)?)),
            (Some(_), _) => Err(ProtocolError::MissingInput {
                command: info.name,
                prompt: info.prompt,
            }),
        }
    }

    fn kind(self) -> Option<InputKind> {
        match self {
            Operand::None => None,
            Operand::Register(_) => Some(InputKind::Register),
            Operand::RegisterValue { .. } => Some(InputKind::RegisterValue),
            Operand::Address(_) => Some(InputKind::Address),
        }
    }
}

/// Parse a register index, accepting `5`, `x5` or `r5`
pub fn parse_register(input: &str) -> Result<u8, ProtocolError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix(['x', 'X', 'r', 'R'])
        .unwrap_or(trimmed);

    match digits.parse::<u8>() {
        Ok(reg) if reg <= MAX_REGISTER => Ok(reg),
        _ => Err(ProtocolError::InvalidRegister(input.to_string())),
    }
}

/// Parse a 32-bit hex value, with or without a `0x` prefix
pub fn parse_hex(input: &str) -> Result<u32, ProtocolError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() {
        return Err(ProtocolError::InvalidAddress(input.to_string()));
    }
    u32::from_str_radix(digits, 16).map_err(|_| ProtocolError::InvalidAddress(input.to_string()))
}

/// A validated command ready to go on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Request {
    /// Check a command against the catalog and encode its payload
    pub fn build(command: Command, operand: Operand) -> Result<Self, ProtocolError> {
        let info = command.info();
        if !info.implemented {
            return Err(ProtocolError::NotImplemented(info.name));
        }
        let opcode = info.opcode.ok_or(ProtocolError::NoOpcode(info.name))?;

        if operand.kind() != info.input {
            return Err(match info.input {
                Some(_) => ProtocolError::MissingInput {
                    command: info.name,
                    prompt: info.prompt,
                },
                None => ProtocolError::UnexpectedInput(info.name),
            });
        }

        let payload = match operand {
            Operand::None => Vec::new(),
            Operand::Register(reg) => vec![reg],
            Operand::RegisterValue { register, value } => {
                let mut buf = [0u8; 5];
                buf[0] = register;
                LittleEndian::write_u32(&mut buf[1..], value);
                buf.to_vec()
            }
            Operand::Address(addr) => {
                let mut buf = [0u8; 4];
                LittleEndian::write_u32(&mut buf, addr);
                buf.to_vec()
            }
        };
        debug_assert_eq!(payload.len(), opcode.payload_len());

        Ok(Self {
            command,
            opcode,
            payload,
        })
    }
}
