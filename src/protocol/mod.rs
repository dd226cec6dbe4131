//! Debug peripheral protocol
//!
//! This module provides:
//! - The opcode table understood by the CPU debug peripheral
//! - The operator command catalog and request encoding
//! - Heuristic classification of unframed replies

pub mod command;
pub mod opcode;
pub mod response;

pub use command::{Command, CommandInfo, InputKind, Operand, Request};
pub use opcode::Opcode;
pub use response::{classify, to_hex, Response};
