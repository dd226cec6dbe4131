//! CPU Debugger
//!
//! Serial debug console for the CPU debug peripheral. Sends single-byte
//! opcodes (halt, reset, ping, register and PC access) over a 115200 8-N-1
//! link and classifies the replies.
//!
//! # Features
//!
//! - **Port listing**: the built-in mock port plus USB/PCI serial ports
//!   (real ports require the `serial` feature and libudev on Linux)
//! - **One-shot commands**: send a command and print the replies
//! - **Console**: interactive session with live replies and inferred CPU state
//! - **Session log**: every connect, command and reply, timestamped
//!
//! # Usage
//!
//! ```bash
//! # List ports (the mock port is always first)
//! cpu-debugger ports
//!
//! # Show the command catalog
//! cpu-debugger commands
//!
//! # Read register 5 without hardware
//! cpu-debugger send "[Mock Port - Testing Only]" read-reg 5
//!
//! # Interactive session on real hardware
//! cpu-debugger console /dev/ttyUSB1
//! ```

mod console;
mod error;
mod protocol;
mod serial;
mod session_log;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serial::SerialManager;
use session_log::{FileLog, NullLog, SessionLog};

/// CPU Debugger
///
/// Serial debug console for the CPU debug peripheral
#[derive(Parser)]
#[command(name = "cpu-debugger")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Serial debug console for the CPU debug peripheral")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory for session log files
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    /// Do not write a session log
    #[arg(long, global = true)]
    no_log: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List selectable serial ports
    Ports,

    /// Show the debug command catalog
    Commands {
        /// Print the catalog as TOML
        #[arg(long)]
        toml: bool,
    },

    /// Send one command and print the replies
    Send {
        /// Serial port path, or the mock port name
        port: String,

        /// Command identifier (e.g. halt, ping, read-reg, set-reg, jump)
        command: String,

        /// Command input: register number, value or address (hex)
        args: Vec<String>,

        /// How long to wait for replies, in milliseconds
        #[arg(short, long, default_value_t = 500)]
        wait: u64,
    },

    /// Interactive debug console
    Console {
        /// Serial port path, or the mock port name
        port: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Ports => {
            serial::port::print_ports();
            Ok(())
        }
        Commands::Commands { toml } => {
            if toml {
                let catalog = protocol::command::catalog_toml()
                    .context("Failed to serialize command catalog")?;
                print!("{}", catalog);
            } else {
                console::print_commands();
            }
            Ok(())
        }
        Commands::Send {
            port,
            command,
            args,
            wait,
        } => {
            let manager = SerialManager::new(open_session_log(&cli.log_dir, cli.no_log)?);
            let line = std::iter::once(command).chain(args).collect::<Vec<_>>().join(" ");
            console::run_send(&manager, &port, &line, Duration::from_millis(wait))
        }
        Commands::Console { port } => {
            let manager = SerialManager::new(open_session_log(&cli.log_dir, cli.no_log)?);
            console::run_console(&manager, &port)
        }
    }
}

fn open_session_log(dir: &Path, disabled: bool) -> Result<Arc<dyn SessionLog>> {
    if disabled {
        return Ok(Arc::new(NullLog));
    }

    let log = FileLog::create_in(dir)?;
    println!(
        "{} Logging to: {}",
        "[LOG]".cyan().bold(),
        log.path().display().to_string().white()
    );
    Ok(Arc::new(log))
}
