//! Mock port for exercising the console without hardware
//!
//! Every opcode written is answered once, after [`MOCK_REPLY_DELAY`], with a
//! synthesized reply:
//!
//! - `READ_REGISTER` → four bytes, [`MOCK_REGISTER_VALUE`] little-endian
//! - `WRITE_REGISTER` / `WRITE_PC` → the single ack byte
//! - anything else → the opcode followed by the ack byte
//!
//! Replies are keyed on the request, not on the byte stream: the manager
//! calls [`MockTransport::answer`] once per send and never writes payload
//! bytes to the mock. The mock never produces anything on `read`; replies
//! are delivered through the callback handed to [`MockTransport::new`].

use super::transport::Transport;
use crate::error::TransportError;
use crate::protocol::opcode::Opcode;
use crate::protocol::response::ACK_BYTE;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Endpoint name that selects the mock port
pub const MOCK_PORT_NAME: &str = "[Mock Port - Testing Only]";

/// Delay before a synthesized reply is delivered
pub const MOCK_REPLY_DELAY: Duration = Duration::from_millis(50);

/// Value returned for every register read
pub const MOCK_REGISTER_VALUE: u32 = 0xDEAD_BEEF;

type ReplyFn = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

pub struct MockTransport {
    on_reply: ReplyFn,
    closed: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl MockTransport {
    /// `on_reply` runs on a timer thread with each synthesized reply
    pub fn new<F>(on_reply: F, poll_interval: Duration) -> Self
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        Self {
            on_reply: Arc::new(on_reply),
            closed: Arc::new(AtomicBool::new(false)),
            poll_interval,
        }
    }

    /// Answer one request for `opcode`, whatever its payload
    pub fn answer(&self, opcode: Opcode) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.schedule_reply(mock_reply(opcode.byte()));
        Ok(())
    }

    fn schedule_reply(&self, reply: Vec<u8>) {
        let on_reply = Arc::clone(&self.on_reply);
        let closed = Arc::clone(&self.closed);
        let spawned = thread::Builder::new()
            .name("mock-reply".to_string())
            .spawn(move || {
                thread::sleep(MOCK_REPLY_DELAY);
                if !closed.load(Ordering::SeqCst) {
                    on_reply(reply);
                }
            });
        if let Err(e) = spawned {
            log::warn!("Failed to schedule mock reply: {}", e);
        }
    }
}

/// Reply the mock peripheral gives to an opcode byte
pub fn mock_reply(opcode: u8) -> Vec<u8> {
    match Opcode::from_byte(opcode) {
        Some(Opcode::ReadRegister) => MOCK_REGISTER_VALUE.to_le_bytes().to_vec(),
        Some(Opcode::WriteRegister) | Some(Opcode::WritePc) => vec![ACK_BYTE],
        _ => vec![opcode, ACK_BYTE],
    }
}

impl Transport for MockTransport {
    fn read(&self, _buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        thread::sleep(self.poll_interval);
        Err(TransportError::Timeout)
    }

    /// Raw bytes are accepted and dropped; requests go through `answer`
    fn write(&self, _data: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::transport::lock;
    use std::sync::{mpsc, Mutex};

    fn mock() -> (MockTransport, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let transport = MockTransport::new(
            move |reply| {
                let _ = lock(&tx).send(reply);
            },
            Duration::from_millis(5),
        );
        (transport, rx)
    }

    #[test]
    fn test_reply_shapes() {
        assert_eq!(mock_reply(0x08), vec![0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(mock_reply(0x09), vec![0xAA]);
        assert_eq!(mock_reply(0x07), vec![0xAA]);
        assert_eq!(mock_reply(0x05), vec![0x05, 0xAA]);
        assert_eq!(mock_reply(0x42), vec![0x42, 0xAA]);
    }

    #[test]
    fn test_one_reply_per_request() {
        let (transport, rx) = mock();
        // opcode that normally carries a payload, sent bare
        transport.answer(Opcode::ReadRegister).unwrap();
        transport.answer(Opcode::Halt).unwrap();

        let mut replies = vec![
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        ];
        replies.sort();
        assert_eq!(replies, vec![vec![0x03, ACK_BYTE], vec![0xEF, 0xBE, 0xAD, 0xDE]]);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_raw_writes_are_not_answered() {
        let (transport, rx) = mock();
        transport.write(&[0x03, 0x05, 0x06, 0x07, 0x08]).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_read_times_out_until_closed() {
        let (transport, _rx) = mock();
        let mut buf = [0u8; 8];
        assert!(matches!(transport.read(&mut buf), Err(TransportError::Timeout)));

        transport.close().unwrap();
        assert!(matches!(transport.read(&mut buf), Err(TransportError::Closed)));
        assert!(matches!(transport.write(&[0x05]), Err(TransportError::Closed)));
        assert!(matches!(transport.answer(Opcode::Ping), Err(TransportError::Closed)));
    }

    #[test]
    fn test_no_reply_after_close() {
        let (transport, rx) = mock();
        transport.answer(Opcode::Ping).unwrap();
        transport.close().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
