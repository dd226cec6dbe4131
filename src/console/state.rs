//! CPU state as seen from the console
//!
//! The peripheral never reports halt or reset status, so the console infers
//! it from the commands it sent. It also remembers the last request so a
//! four byte reply can be attributed to a register or the PC.

use crate::protocol::{Command, Opcode, Request, Response};
use chrono::{DateTime, Local};

#[derive(Debug, Clone, Default)]
pub struct CpuState {
    pub halted: bool,
    pub in_reset: bool,
    pub last_ping: Option<DateTime<Local>>,
    pub last_request: Option<Request>,
    pub commands_sent: usize,
}

impl CpuState {
    /// Update the inferred state after a request was sent successfully
    pub fn record(&mut self, request: &Request) {
        match request.command {
            Command::Halt => self.halted = true,
            Command::Unhalt => self.halted = false,
            Command::Reset => self.in_reset = true,
            Command::Unreset => self.in_reset = false,
            Command::Ping => self.last_ping = Some(Local::now()),
            _ => {}
        }
        self.last_request = Some(request.clone());
        self.commands_sent += 1;
    }

    /// Interpret a reply in light of the last request sent
    pub fn interpret(&self, response: &Response) -> Option<String> {
        let request = self.last_request.as_ref()?;
        match (request.opcode, response.value()) {
            (Opcode::ReadRegister, Some(value)) => {
                let reg = request.payload.first().copied().unwrap_or_default();
                Some(format!("x{} = 0x{:08X} ({})", reg, value, value))
            }
            (Opcode::ReadPc, Some(value)) => Some(format!("PC = 0x{:08X}", value)),
            _ => None,
        }
    }

    pub fn summary(&self) -> String {
        let ping = self
            .last_ping
            .map(|t| t.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "never".to_string());
        format!(
            "halted: {}, in reset: {}, last ping: {}, commands sent: {}",
            yes_no(self.halted),
            yes_no(self.in_reset),
            ping,
            self.commands_sent
        )
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Operand;

    fn request(command: Command, operand: Operand) -> Request {
        Request::build(command, operand).unwrap()
    }

    #[test]
    fn test_halt_and_reset_tracking() {
        let mut state = CpuState::default();
        state.record(&request(Command::Halt, Operand::None));
        state.record(&request(Command::Reset, Operand::None));
        assert!(state.halted && state.in_reset);

        state.record(&request(Command::Unreset, Operand::None));
        state.record(&request(Command::Unhalt, Operand::None));
        assert!(!state.halted && !state.in_reset);
        assert_eq!(state.commands_sent, 4);
        assert!(state.last_ping.is_none());

        state.record(&request(Command::Ping, Operand::None));
        assert!(state.last_ping.is_some());
    }

    #[test]
    fn test_interpret_register_read() {
        let mut state = CpuState::default();
        let reply = Response::new(vec![0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(state.interpret(&reply), None);

        state.record(&request(Command::ReadRegister, Operand::Register(7)));
        assert_eq!(
            state.interpret(&reply).as_deref(),
            Some("x7 = 0xDEADBEEF (3735928559)")
        );

        state.record(&request(Command::ReadPc, Operand::None));
        assert_eq!(state.interpret(&reply).as_deref(), Some("PC = 0xDEADBEEF"));
        assert_eq!(state.interpret(&Response::new(vec![0xAA])), None);
    }

    #[test]
    fn test_summary() {
        let state = CpuState::default();
        assert_eq!(
            state.summary(),
            "halted: no, in reset: no, last ping: never, commands sent: 0"
        );
    }
}
