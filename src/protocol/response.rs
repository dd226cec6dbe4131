//! Reply classification
//!
//! The peripheral sends unframed byte chunks with no length or type header,
//! so replies are interpreted by shape. Rules are applied in order and the
//! first match wins:
//!
//! 1. empty chunk
//! 2. the single acknowledgement byte `0xAA`
//! 3. exactly four bytes: a little-endian `u32` (register or PC read)
//! 4. a leading opcode byte: an echo of that opcode
//! 5. anything else: an opaque byte count
//!
//! A four byte chunk starting with an opcode byte is always a value (rule 3
//! before rule 4). Only the sender knows which command it last issued.

use super::opcode::{name_of, UNKNOWN_NAME};
use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Local};

/// Acknowledgement byte sent by the peripheral
pub const ACK_BYTE: u8 = 0xAA;

/// One received chunk, classified at capture time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub timestamp: DateTime<Local>,
    /// Bytes as read from the transport
    pub data: Vec<u8>,
    /// `to_hex(data)`
    pub raw: String,
    /// `classify(data)`
    pub parsed: String,
}

impl Response {
    /// Capture a chunk now
    pub fn new(data: Vec<u8>) -> Self {
        Self::at(Local::now(), data)
    }

    pub fn at(timestamp: DateTime<Local>, data: Vec<u8>) -> Self {
        let raw = to_hex(&data);
        let parsed = classify(&data);
        Self {
            timestamp,
            data,
            raw,
            parsed,
        }
    }

    /// Little-endian word carried by a four byte reply
    pub fn value(&self) -> Option<u32> {
        (self.data.len() == 4).then(|| LittleEndian::read_u32(&self.data))
    }
}

/// Best-effort description of a reply; never fails
pub fn classify(data: &[u8]) -> String {
    match data {
        [] => "Empty response".to_string(),
        [ACK_BYTE] => "PING response".to_string(),
        [_, _, _, _] => {
            let value = LittleEndian::read_u32(data);
            format!("Value: 0x{:08X} ({})", value, value)
        }
        [first, rest @ ..] => match name_of(*first) {
            UNKNOWN_NAME => format!("{} bytes", data.len()),
            name if rest.is_empty() => format!("Echo: {}", name),
            name => format!("Echo: {} + {} bytes", name, rest.len()),
        },
    }
}

/// Space-separated `0xHH` tokens, uppercase
pub fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("0x{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
