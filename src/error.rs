//! Error types for the transport, the connection manager and the protocol

use std::io;
use thiserror::Error;

/// Errors surfaced by a [`Transport`](crate::serial::Transport)
#[derive(Debug, Error)]
pub enum TransportError {
    /// No data arrived within the read timeout
    #[error("read timed out")]
    Timeout,

    /// The transport was closed, usually by `close()` or `stop_listening()`
    #[error("transport closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Map an I/O error from the OS port, folding timeouts into `Timeout`
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => TransportError::Closed,
            _ => TransportError::Io(err),
        }
    }
}

/// Errors returned by [`SerialManager`](crate::serial::SerialManager) operations
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to open serial port {port}: {reason}")]
    Connect { port: String, reason: String },

    #[error("serial port not connected")]
    NotConnected,

    #[error("failed to write to serial port: {0}")]
    Write(#[source] TransportError),

    #[error("failed to close serial port: {0}")]
    Close(#[source] TransportError),
}

/// Errors raised while turning operator input into a wire request
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("{0} has no wire opcode")]
    NoOpcode(&'static str),

    #[error("{command} needs input: {prompt}")]
    MissingInput {
        command: &'static str,
        prompt: &'static str,
    },

    #[error("{0} takes no input")]
    UnexpectedInput(&'static str),

    #[error("invalid register '{0}' (expected 0-31)")]
    InvalidRegister(String),

    #[error("invalid hex value '{0}'")]
    InvalidAddress(String),
}
