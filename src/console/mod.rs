//! Operator console
//!
//! Line-oriented front end over [`SerialManager`]:
//! - `send` runs one command and prints the replies that follow
//! - `console` keeps a session open, printing replies as they arrive and
//!   reading commands from stdin

pub mod state;

pub use state::CpuState;

use crate::error::ProtocolError;
use crate::protocol::{Command, Operand, Request, Response};
use crate::serial::{Observer, SerialManager};
use anyhow::{Context, Result};
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::time::Instant;

/// Parse one console line (`<command> [args...]`) into a request
pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let mut words = line.split_whitespace();
    let id = words.next().unwrap_or_default();
    let command = Command::lookup(id)?;
    let args: Vec<&str> = words.collect();
    let operand = Operand::parse(command, &args)?;
    Request::build(command, operand)
}

/// Print the command catalog
pub fn print_commands() {
    println!("{}", "=".repeat(70));
    println!("{}", "Debug Commands".cyan().bold());
    println!("{}", "=".repeat(70));

    for cmd in Command::ALL {
        let info = cmd.info();
        let id = format!("{:<10}", info.id);
        let id = if cmd.is_implemented() {
            id.white().bold()
        } else {
            id.dimmed()
        };
        let opcode = cmd
            .opcode()
            .map(|op| format!("0x{:02X} {}", op.byte(), op))
            .unwrap_or_else(|| "-".to_string());

        println!("  {} {:<16} {:<22} {}", id, info.name, opcode, info.description);
        if cmd.needs_input() {
            println!("             {}", cmd.input_prompt().trim_end().dimmed());
        }
        if !cmd.is_implemented() {
            println!("             {}", "[not implemented]".dimmed());
        }
    }

    println!("{}", "=".repeat(70));
}

fn format_response(response: &Response, state: &CpuState) -> String {
    let mut line = format!(
        "{} {} {} {}",
        response.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
        "[RX]".cyan().bold(),
        response.raw,
        response.parsed.green()
    );
    if let Some(meaning) = state.interpret(response) {
        line.push_str(&format!("  {}", meaning.white().bold()));
    }
    line
}

fn lock_state(state: &Mutex<CpuState>) -> std::sync::MutexGuard<'_, CpuState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connect, send one command, print replies for `wait`, then close
pub fn run_send(manager: &SerialManager, port: &str, line: &str, wait: Duration) -> Result<()> {
    let request = parse_request(line)?;

    manager
        .connect(port)
        .with_context(|| format!("Failed to connect to {}", port))?;
    manager.start_listening();
    let mut observer = manager.subscribe();

    println!(
        "{} {} ({} payload bytes) to {}",
        "[TX]".cyan().bold(),
        request.command.name(),
        request.payload.len(),
        port
    );
    manager.send_request(&request)?;

    let mut state = CpuState::default();
    state.record(&request);

    let replies = collect_replies(&mut observer, wait)?;
    if replies.is_empty() {
        println!("{}", "No reply received".yellow());
    }
    for reply in &replies {
        println!("{}", format_response(reply, &state));
    }

    manager.close()?;
    Ok(())
}

/// Drain an observer until `wait` has elapsed
fn collect_replies(observer: &mut Observer, wait: Duration) -> Result<Vec<Response>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to start runtime")?;

    Ok(runtime.block_on(async {
        let deadline = Instant::now() + wait;
        let mut replies = Vec::new();
        while let Ok(Some(reply)) = tokio::time::timeout_at(deadline, observer.recv()).await {
            replies.push(reply);
        }
        replies
    }))
}

/// Interactive session: replies are printed from a subscription while
/// commands are read line by line from stdin.
pub fn run_console(manager: &SerialManager, port: &str) -> Result<()> {
    manager
        .connect(port)
        .with_context(|| format!("Failed to connect to {}", port))?;
    manager.start_listening();

    println!(
        "{} Connected to {}{}",
        "[OK]".green().bold(),
        port.white().bold(),
        if manager.is_mock() { " (mock)" } else { "" }
    );
    println!("{}", "Type 'help' for commands, 'quit' to exit\n".yellow());

    let state = Arc::new(Mutex::new(CpuState::default()));
    spawn_printer(manager.subscribe(), Arc::clone(&state))?;

    let stdin = io::stdin();
    prompt()?;
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read from stdin")?;
        let line = line.trim();

        match line {
            "" => {}
            "quit" | "exit" | "q" => break,
            "help" | "?" => print_commands(),
            "status" => {
                println!(
                    "  port: {}, listening: {}",
                    manager.port_name().unwrap_or_else(|| "-".to_string()),
                    manager.is_listening()
                );
                println!("  {}", lock_state(&state).summary());
            }
            "history" => {
                let snapshot = lock_state(&state).clone();
                for response in manager.recent_responses() {
                    println!("{}", format_response(&response, &snapshot));
                }
            }
            _ => match parse_request(line) {
                Ok(request) => match manager.send_request(&request) {
                    Ok(()) => {
                        lock_state(&state).record(&request);
                        println!("{} {} sent", "[OK]".green().bold(), request.command.name());
                    }
                    Err(e) => println!("{} Failed to send command: {}", "[ERROR]".red().bold(), e),
                },
                Err(e) => println!("{} {}", "[ERROR]".red().bold(), e),
            },
        }
        prompt()?;
    }

    manager.close()?;

    let state = lock_state(&state);
    println!("\n{}", "=".repeat(70).dimmed());
    println!("{}", "--- Session Summary ---".cyan().bold());
    println!("Commands sent: {}", state.commands_sent);
    println!("Replies retained: {}", manager.recent_responses().len());
    println!("{}", "=".repeat(70).dimmed());
    Ok(())
}

fn prompt() -> Result<()> {
    print!("{} ", ">".cyan().bold());
    io::stdout().flush().context("Failed to flush stdout")
}

fn spawn_printer(mut observer: Observer, state: Arc<Mutex<CpuState>>) -> Result<()> {
    thread::Builder::new()
        .name("console-printer".to_string())
        .spawn(move || {
            while let Some(response) = observer.blocking_recv() {
                let line = format_response(&response, &lock_state(&state));
                println!("\r{}", line);
            }
        })
        .context("Failed to spawn printer thread")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Opcode;
    use crate::serial::MOCK_PORT_NAME;
    use crate::session_log::NullLog;

    #[test]
    fn test_parse_request() {
        let req = parse_request("halt").unwrap();
        assert_eq!(req.opcode, Opcode::Halt);

        let req = parse_request("  set-reg x2 0xCAFE ").unwrap();
        assert_eq!(req.opcode, Opcode::WriteRegister);
        assert_eq!(req.payload, vec![2, 0xFE, 0xCA, 0, 0]);

        let req = parse_request("jump 1000").unwrap();
        assert_eq!(req.payload, vec![0x00, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn test_parse_request_errors() {
        assert!(matches!(
            parse_request(""),
            Err(ProtocolError::UnknownCommand(_))
        ));
        assert!(matches!(
            parse_request("read-mem 1000"),
            Err(ProtocolError::UnexpectedInput(_))
        ));
        assert_eq!(
            parse_request("load"),
            Err(ProtocolError::NotImplemented("Load Program"))
        );
        assert!(matches!(
            parse_request("read-reg"),
            Err(ProtocolError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_format_response_includes_interpretation() {
        let mut state = CpuState::default();
        state.record(&parse_request("read-reg 4").unwrap());
        let line = format_response(&Response::new(vec![1, 0, 0, 0]), &state);
        assert!(line.contains("0x01 0x00 0x00 0x00"));
        assert!(line.contains("x4 = 0x00000001"));
    }

    #[test]
    fn test_run_send_against_mock() {
        let manager = SerialManager::new(Arc::new(NullLog));
        run_send(&manager, MOCK_PORT_NAME, "read-reg 3", Duration::from_millis(300)).unwrap();

        assert!(!manager.is_connected());
        let history = manager.recent_responses();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].data.len(), 4);
    }

    #[test]
    fn test_run_send_rejects_unimplemented_before_connecting() {
        let manager = SerialManager::new(Arc::new(NullLog));
        assert!(run_send(&manager, MOCK_PORT_NAME, "stats", Duration::ZERO).is_err());
        assert!(!manager.is_connected());
    }
}
