//! Connection manager for the debug peripheral
//!
//! Owns the current [`Transport`], runs a background receive loop, keeps the
//! last [`HISTORY_CAPACITY`] replies and offers each new reply to every
//! subscribed observer.
//!
//! Lifecycle:
//!
//! ```text
//! Disconnected --connect--> Connected --start_listening--> Listening
//!      ^                        ^ <------stop_listening------'
//!      '---------close----------'-----------close-----------'
//! ```
//!
//! One reader/writer lock guards the connection, the listening flag, the
//! history and the observer list. Observer delivery never blocks: a full
//! observer simply misses that reply. Stopping and closing only signal the
//! receive loop; it exits on its own after its current read.

use super::mock::MockTransport;
use super::port::PortConfig;
use super::transport::Transport;
use crate::error::{SerialError, TransportError};
use crate::protocol::opcode::Opcode;
use crate::protocol::response::{to_hex, Response};
use crate::protocol::Request;
use crate::session_log::SessionLog;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Replies retained for `recent_responses`
pub const HISTORY_CAPACITY: usize = 100;

/// Buffered replies per observer before deliveries are dropped
pub const OBSERVER_CAPACITY: usize = 10;

/// Largest chunk taken from the transport in one read
pub const READ_BUFFER_SIZE: usize = 64;

/// Pause after an unexpected read error
pub const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Pause between an opcode and its payload
pub const PAYLOAD_SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Receiving side of a subscription
pub type Observer = mpsc::Receiver<Response>;

struct Connection {
    name: String,
    transport: Arc<dyn Transport>,
    /// Set when `transport` is the mock port; sends are answered through it
    mock: Option<Arc<MockTransport>>,
}

#[derive(Default)]
struct State {
    connection: Option<Connection>,
    /// Stop flag of the running receive loop
    listener: Option<Arc<AtomicBool>>,
    history: VecDeque<Response>,
    observers: Vec<mpsc::Sender<Response>>,
}

struct Shared {
    state: RwLock<State>,
    log: Arc<dyn SessionLog>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a received chunk and offer it to every observer
    fn handle_response(&self, data: Vec<u8>) {
        let response = Response::new(data);

        {
            let mut state = self.write();
            state.history.push_back(response.clone());
            while state.history.len() > HISTORY_CAPACITY {
                state.history.pop_front();
            }

            state
                .observers
                .retain(|tx| match tx.try_send(response.clone()) {
                    Ok(()) | Err(TrySendError::Full(_)) => true,
                    Err(TrySendError::Closed(_)) => false,
                });
        }

        debug!("RX: {} | {}", response.raw, response.parsed);
        self.log
            .log_line(&format!("RX: {} | Parsed: {}", response.raw, response.parsed));
    }
}

/// Serial connection manager
pub struct SerialManager {
    shared: Arc<Shared>,
}

impl SerialManager {
    /// Create a disconnected manager writing session events to `log`
    pub fn new(log: Arc<dyn SessionLog>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(State::default()),
                log,
            }),
        }
    }

    /// Connect to `port_name` at the peripheral's default settings
    pub fn connect(&self, port_name: &str) -> Result<(), SerialError> {
        self.connect_with(PortConfig::new(port_name))
    }

    /// Connect using an explicit port configuration.
    ///
    /// The mock port name selects [`MockTransport`]. Any existing connection
    /// is closed first. On failure the manager stays disconnected.
    pub fn connect_with(&self, config: PortConfig) -> Result<(), SerialError> {
        if self.is_connected() {
            info!("Closing previous connection before connecting to {}", config.port_path);
            self.close()?;
        }

        if config.is_mock() {
            let weak: Weak<Shared> = Arc::downgrade(&self.shared);
            let mock = Arc::new(MockTransport::new(
                move |reply| {
                    if let Some(shared) = weak.upgrade() {
                        shared.handle_response(reply);
                    }
                },
                config.timeout,
            ));
            self.attach(&config.port_path, mock.clone(), Some(mock));
            info!("Connected to mock port");
            self.shared.log.log_line("Connected to mock port");
            return Ok(());
        }

        let transport = open_port(&config)?;
        self.attach(&config.port_path, transport, None);
        info!("Connected to {} at {} baud", config.port_path, config.baud_rate);
        self.shared.log.log_line(&format!(
            "Connected to {} at {} baud",
            config.port_path, config.baud_rate
        ));
        Ok(())
    }

    /// Install an already-open transport as the current connection.
    ///
    /// A connection installed concurrently since `connect_with` checked is
    /// replaced here, and released like `close` would.
    fn attach(&self, name: &str, transport: Arc<dyn Transport>, mock: Option<Arc<MockTransport>>) {
        let previous = {
            let mut state = self.shared.write();
            let previous = state.connection.replace(Connection {
                name: name.to_string(),
                transport,
                mock,
            });
            if previous.is_some() {
                if let Some(stop) = state.listener.take() {
                    stop.store(true, Ordering::SeqCst);
                }
            }
            previous
        };

        if let Some(previous) = previous {
            if let Err(e) = self.release(previous) {
                warn!("Error closing replaced connection: {}", e);
            }
        }
    }

    /// Start the background receive loop. No-op if already listening.
    pub fn start_listening(&self) {
        let mut state = self.shared.write();
        if state.listener.is_some() {
            return;
        }
        let Some(transport) = state.connection.as_ref().map(|c| Arc::clone(&c.transport)) else {
            warn!("start_listening called without a connection");
            return;
        };

        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let loop_stop = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name("serial-rx".to_string())
            .spawn(move || receive_loop(shared, transport, loop_stop));

        match spawned {
            Ok(_) => state.listener = Some(stop),
            Err(e) => warn!("Failed to spawn receive loop: {}", e),
        }
    }

    /// Signal the receive loop to exit. Does not wait for it.
    pub fn stop_listening(&self) {
        if let Some(stop) = self.shared.write().listener.take() {
            stop.store(true, Ordering::SeqCst);
        }
    }

    /// Send a bare opcode
    pub fn send(&self, opcode: Opcode) -> Result<(), SerialError> {
        self.send_with_payload(opcode, &[])
    }

    /// Send an opcode, wait [`PAYLOAD_SETTLE_DELAY`], then send the payload.
    ///
    /// The two writes are separate; a concurrent `close` between them fails
    /// the second one with a write error. On the mock port nothing is
    /// written and exactly one reply is scheduled for `opcode`.
    pub fn send_with_payload(&self, opcode: Opcode, payload: &[u8]) -> Result<(), SerialError> {
        let (transport, mock) = {
            let state = self.shared.read();
            let conn = state.connection.as_ref().ok_or(SerialError::NotConnected)?;
            (Arc::clone(&conn.transport), conn.mock.clone())
        };

        let line = if payload.is_empty() {
            format!("TX: {} (0x{:02X})", opcode, opcode.byte())
        } else {
            format!("TX: {} (0x{:02X}) + {}", opcode, opcode.byte(), to_hex(payload))
        };
        debug!("{}", line);
        self.shared.log.log_line(&line);

        if let Some(mock) = mock {
            return mock.answer(opcode).map_err(SerialError::Write);
        }

        transport
            .write(&[opcode.byte()])
            .map_err(SerialError::Write)?;

        if !payload.is_empty() {
            thread::sleep(PAYLOAD_SETTLE_DELAY);
            transport.write(payload).map_err(SerialError::Write)?;
        }
        Ok(())
    }

    /// Send a validated request
    pub fn send_request(&self, request: &Request) -> Result<(), SerialError> {
        match request.payload.as_slice() {
            [] => self.send(request.opcode),
            payload => self.send_with_payload(request.opcode, payload),
        }
    }

    /// Register a new observer receiving every later reply
    pub fn subscribe(&self) -> Observer {
        let (tx, rx) = mpsc::channel(OBSERVER_CAPACITY);
        self.shared.write().observers.push(tx);
        rx
    }

    /// Copy of the retained replies, oldest first
    pub fn recent_responses(&self) -> Vec<Response> {
        self.shared.read().history.iter().cloned().collect()
    }

    /// Stop listening and release the transport. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), SerialError> {
        let connection = {
            let mut state = self.shared.write();
            if let Some(stop) = state.listener.take() {
                stop.store(true, Ordering::SeqCst);
            }
            state.connection.take()
        };

        match connection {
            Some(connection) => self.release(connection),
            None => Ok(()),
        }
    }

    /// Close a connection already removed from the state
    fn release(&self, connection: Connection) -> Result<(), SerialError> {
        let result = connection.transport.close();
        info!("Disconnected from {}", connection.name);
        self.shared
            .log
            .log_line(&format!("Disconnected from {}", connection.name));
        result.map_err(SerialError::Close)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.read().connection.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.shared.read().listener.is_some()
    }

    pub fn is_mock(&self) -> bool {
        self.shared
            .read()
            .connection
            .as_ref()
            .is_some_and(|c| c.mock.is_some())
    }

    /// Name of the connected port
    pub fn port_name(&self) -> Option<String> {
        self.shared.read().connection.as_ref().map(|c| c.name.clone())
    }
}

impl Drop for SerialManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing serial port: {}", e);
        }
    }
}

#[cfg(feature = "serial")]
fn open_port(config: &PortConfig) -> Result<Arc<dyn Transport>, SerialError> {
    let transport = super::port::SerialPortTransport::open(config)?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "serial"))]
fn open_port(config: &PortConfig) -> Result<Arc<dyn Transport>, SerialError> {
    Err(SerialError::Connect {
        port: config.port_path.clone(),
        reason: "built without serial port support (rebuild with --features serial)".to_string(),
    })
}

fn receive_loop(shared: Arc<Shared>, transport: Arc<dyn Transport>, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    debug!("Receive loop started");

    while !stop.load(Ordering::SeqCst) {
        match transport.read(&mut buf) {
            Ok(0) => thread::sleep(Duration::from_millis(10)),
            Ok(n) => shared.handle_response(buf[..n].to_vec()),
            Err(TransportError::Timeout) => {}
            Err(TransportError::Closed) => break,
            Err(e) => {
                warn!("Read error: {}", e);
                shared.log.log_line(&format!("Read error: {}", e));
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    debug!("Receive loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::response::ACK_BYTE;
    use crate::serial::mock::{MOCK_PORT_NAME, MOCK_REPLY_DELAY};
    use crate::session_log::{MemoryLog, NullLog};
    use std::collections::HashSet;
    use std::io;
    use std::sync::Mutex;
    use std::thread::ThreadId;
    use std::time::Instant;

    /// Transport fed from a queue of chunks, recording writes and readers
    #[derive(Default)]
    struct ScriptedTransport {
        inbound: Mutex<VecDeque<Result<Vec<u8>, io::ErrorKind>>>,
        written: Mutex<Vec<Vec<u8>>>,
        readers: Mutex<HashSet<ThreadId>>,
        closed: AtomicBool,
        /// Close the transport once this many writes have succeeded
        close_after_writes: Mutex<Option<usize>>,
    }

    impl ScriptedTransport {
        fn push(&self, chunk: &[u8]) {
            self.inbound.lock().unwrap().push_back(Ok(chunk.to_vec()));
        }

        fn push_error(&self, kind: io::ErrorKind) {
            self.inbound.lock().unwrap().push_back(Err(kind));
        }

        fn written(&self) -> Vec<Vec<u8>> {
            self.written.lock().unwrap().clone()
        }

        fn close_after_writes(&self, writes: usize) {
            *self.close_after_writes.lock().unwrap() = Some(writes);
        }

        fn reader_threads(&self) -> usize {
            self.readers.lock().unwrap().len()
        }
    }

    impl Transport for ScriptedTransport {
        fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            self.readers.lock().unwrap().insert(thread::current().id());

            let next = self.inbound.lock().unwrap().pop_front();
            match next {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(kind)) => Err(TransportError::Io(io::Error::new(kind, "line noise"))),
                None => {
                    thread::sleep(Duration::from_millis(2));
                    Err(TransportError::Timeout)
                }
            }
        }

        fn write(&self, data: &[u8]) -> Result<(), TransportError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            let mut written = self.written.lock().unwrap();
            written.push(data.to_vec());
            if *self.close_after_writes.lock().unwrap() == Some(written.len()) {
                self.closed.store(true, Ordering::SeqCst);
            }
            Ok(())
        }

        fn close(&self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scripted_manager() -> (SerialManager, Arc<ScriptedTransport>) {
        let manager = SerialManager::new(Arc::new(NullLog));
        let transport = Arc::new(ScriptedTransport::default());
        manager.attach("/dev/scripted", transport.clone(), None);
        (manager, transport)
    }

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_lifecycle() {
        let (manager, _transport) = scripted_manager();
        assert!(manager.is_connected());
        assert!(!manager.is_listening());
        assert_eq!(manager.port_name().as_deref(), Some("/dev/scripted"));

        manager.start_listening();
        assert!(manager.is_listening());
        manager.stop_listening();
        assert!(!manager.is_listening());
        assert!(manager.is_connected());

        manager.close().unwrap();
        assert!(!manager.is_connected());
        assert!(!manager.is_listening());
        assert_eq!(manager.port_name(), None);
    }

    #[test]
    fn test_stop_and_close_are_idempotent() {
        let (manager, _transport) = scripted_manager();
        manager.stop_listening();
        manager.start_listening();
        manager.stop_listening();
        manager.stop_listening();
        manager.close().unwrap();
        manager.close().unwrap();

        let fresh = SerialManager::new(Arc::new(NullLog));
        fresh.close().unwrap();
    }

    #[test]
    fn test_start_listening_twice_runs_one_loop() {
        let (manager, transport) = scripted_manager();
        manager.start_listening();
        manager.start_listening();

        transport.push(&[0x03]);
        assert!(wait_until(|| manager.recent_responses().len() == 1));
        thread::sleep(Duration::from_millis(50));

        assert_eq!(manager.recent_responses().len(), 1);
        assert_eq!(transport.reader_threads(), 1);
    }

    #[test]
    fn test_received_chunks_are_classified() {
        let log = Arc::new(MemoryLog::default());
        let manager = SerialManager::new(log.clone());
        let transport = Arc::new(ScriptedTransport::default());
        manager.attach("/dev/scripted", transport.clone(), None);
        manager.start_listening();

        transport.push(&[0xAA]);
        transport.push(&[0x78, 0x56, 0x34, 0x12]);
        assert!(wait_until(|| manager.recent_responses().len() == 2));

        let responses = manager.recent_responses();
        assert_eq!(responses[0].parsed, "PING response");
        assert_eq!(responses[1].raw, "0x78 0x56 0x34 0x12");
        assert_eq!(responses[1].value(), Some(0x1234_5678));
        assert!(responses[0].timestamp <= responses[1].timestamp);

        assert!(log
            .lines()
            .contains(&"RX: 0xAA | Parsed: PING response".to_string()));
    }

    #[test]
    fn test_history_keeps_latest_hundred() {
        let (manager, transport) = scripted_manager();
        for i in 0..150u8 {
            transport.push(&[i, 0xFF, 0xFF]);
        }
        manager.start_listening();
        assert!(wait_until(|| manager
            .recent_responses()
            .last()
            .is_some_and(|r| r.data[0] == 149)));

        let history = manager.recent_responses();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        let firsts: Vec<u8> = history.iter().map(|r| r.data[0]).collect();
        let expected: Vec<u8> = (50..150).collect();
        assert_eq!(firsts, expected);
    }

    #[test]
    fn test_read_errors_do_not_stop_the_loop() {
        let (manager, transport) = scripted_manager();
        transport.push_error(io::ErrorKind::InvalidData);
        transport.push(&[0x05]);
        manager.start_listening();

        assert!(wait_until(|| manager.recent_responses().len() == 1));
        assert!(manager.is_listening());
        assert_eq!(manager.recent_responses()[0].parsed, "Echo: PING");
    }

    #[test]
    fn test_loop_exits_after_close() {
        let (manager, transport) = scripted_manager();
        manager.start_listening();
        manager.close().unwrap();

        transport.push(&[0x01]);
        thread::sleep(Duration::from_millis(50));
        assert!(manager.recent_responses().is_empty());
    }

    #[test]
    fn test_send_writes_opcode_then_payload() {
        let log = Arc::new(MemoryLog::default());
        let manager = SerialManager::new(log.clone());
        let transport = Arc::new(ScriptedTransport::default());
        manager.attach("/dev/scripted", transport.clone(), None);

        manager.send(Opcode::Halt).unwrap();
        manager
            .send_with_payload(Opcode::WritePc, &[0x00, 0x10, 0x00, 0x00])
            .unwrap();

        assert_eq!(
            transport.written(),
            vec![vec![0x03], vec![0x07], vec![0x00, 0x10, 0x00, 0x00]]
        );
        assert_eq!(
            log.lines(),
            vec![
                "TX: HALT (0x03)".to_string(),
                "TX: WRITE_PC (0x07) + 0x00 0x10 0x00 0x00".to_string(),
            ]
        );
    }

    #[test]
    fn test_send_while_disconnected() {
        let (manager, transport) = scripted_manager();
        manager.close().unwrap();

        let err = manager.send(Opcode::Ping).unwrap_err();
        assert!(matches!(err, SerialError::NotConnected));
        let err = manager.send_with_payload(Opcode::ReadRegister, &[1]).unwrap_err();
        assert!(matches!(err, SerialError::NotConnected));

        thread::sleep(Duration::from_millis(20));
        assert!(transport.written().is_empty());
        assert!(manager.recent_responses().is_empty());
    }

    #[test]
    fn test_write_after_transport_closed_is_an_error() {
        let (manager, transport) = scripted_manager();
        transport.close().unwrap();

        let err = manager.send(Opcode::Ping).unwrap_err();
        assert!(matches!(err, SerialError::Write(TransportError::Closed)));
        assert!(manager.is_connected());
    }

    #[test]
    fn test_close_between_opcode_and_payload_is_a_write_error() {
        let (manager, transport) = scripted_manager();
        transport.close_after_writes(1);

        let err = manager
            .send_with_payload(Opcode::WritePc, &[0x00, 0x10, 0x00, 0x00])
            .unwrap_err();
        assert!(matches!(err, SerialError::Write(TransportError::Closed)));
        assert_eq!(transport.written(), vec![vec![0x07]]);
        assert!(manager.is_connected());
    }

    #[test]
    fn test_stalled_observer_does_not_block_others() {
        let manager = SerialManager::new(Arc::new(NullLog));
        let mut stalled = manager.subscribe();
        let mut active = manager.subscribe();

        let mut delivered = 0;
        for i in 0..30u8 {
            manager.shared.handle_response(vec![0xF0, i]);
            while let Ok(resp) = active.try_recv() {
                assert_eq!(resp.data, vec![0xF0, i]);
                delivered += 1;
            }
        }

        assert_eq!(delivered, 30);
        assert_eq!(manager.recent_responses().len(), 30);

        let mut buffered = 0;
        while stalled.try_recv().is_ok() {
            buffered += 1;
        }
        assert_eq!(buffered, OBSERVER_CAPACITY);
    }

    #[test]
    fn test_stalled_observer_does_not_block_loop() {
        let (manager, transport) = scripted_manager();
        let _stalled = manager.subscribe();
        for i in 0..40u8 {
            transport.push(&[0xF0, i]);
        }
        manager.start_listening();

        assert!(wait_until(|| manager.recent_responses().len() == 40));
    }

    #[test]
    fn test_dropped_observers_are_pruned() {
        let manager = SerialManager::new(Arc::new(NullLog));
        let dropped = manager.subscribe();
        let mut kept = manager.subscribe();
        drop(dropped);

        manager.shared.handle_response(vec![0x05]);
        assert_eq!(manager.shared.read().observers.len(), 1);
        assert_eq!(kept.try_recv().unwrap().parsed, "Echo: PING");
    }

    #[test]
    fn test_observer_sees_only_later_responses() {
        let manager = SerialManager::new(Arc::new(NullLog));
        manager.shared.handle_response(vec![0x01]);
        let mut rx = manager.subscribe();
        manager.shared.handle_response(vec![0x02]);

        assert_eq!(rx.try_recv().unwrap().data, vec![0x02]);
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.recent_responses().len(), 2);
    }

    #[cfg(not(feature = "serial"))]
    #[test]
    fn test_real_port_unavailable_without_feature() {
        let manager = SerialManager::new(Arc::new(NullLog));
        let err = manager.connect("/dev/ttyUSB1").unwrap_err();
        assert!(matches!(err, SerialError::Connect { .. }));
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_mock_connect_opens_no_port() {
        let log = Arc::new(MemoryLog::default());
        let manager = SerialManager::new(log.clone());
        manager.connect(MOCK_PORT_NAME).unwrap();

        assert!(manager.is_connected());
        assert!(manager.is_mock());
        assert_eq!(log.lines(), vec!["Connected to mock port".to_string()]);
    }

    async fn next_reply(rx: &mut Observer) -> Response {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no reply within a second")
            .expect("observer closed")
    }

    async fn assert_quiet(rx: &mut Observer) {
        tokio::time::sleep(MOCK_REPLY_DELAY * 3).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mock_replies_per_opcode() {
        let manager = SerialManager::new(Arc::new(NullLog));
        manager.connect(MOCK_PORT_NAME).unwrap();
        let mut rx = manager.subscribe();

        manager.send_with_payload(Opcode::ReadRegister, &[5]).unwrap();
        let reply = next_reply(&mut rx).await;
        assert_eq!(reply.data.len(), 4);
        assert_eq!(reply.parsed, "Value: 0xDEADBEEF (3735928559)");
        assert_quiet(&mut rx).await;

        manager
            .send_with_payload(Opcode::WriteRegister, &[3, 0x05, 0x06, 0x07, 0x08])
            .unwrap();
        let reply = next_reply(&mut rx).await;
        assert_eq!(reply.data, vec![ACK_BYTE]);
        assert_quiet(&mut rx).await;

        manager
            .send_with_payload(Opcode::WritePc, &[0x00, 0x10, 0x00, 0x00])
            .unwrap();
        assert_eq!(next_reply(&mut rx).await.data.len(), 1);
        assert_quiet(&mut rx).await;

        manager.send(Opcode::Halt).unwrap();
        let reply = next_reply(&mut rx).await;
        assert_eq!(reply.data, vec![0x03, ACK_BYTE]);
        assert_eq!(reply.parsed, "Echo: HALT + 1 bytes");
        assert_quiet(&mut rx).await;

        assert_eq!(manager.recent_responses().len(), 4);
    }

    #[tokio::test]
    async fn test_mock_replies_without_listening() {
        let manager = SerialManager::new(Arc::new(NullLog));
        manager.connect(MOCK_PORT_NAME).unwrap();
        manager.start_listening();
        let mut rx = manager.subscribe();

        manager.send(Opcode::Ping).unwrap();
        assert!(manager.recent_responses().is_empty());
        let reply = next_reply(&mut rx).await;
        assert_eq!(reply.data, vec![0x05, ACK_BYTE]);

        manager.stop_listening();
        manager.send(Opcode::Ping).unwrap();
        next_reply(&mut rx).await;
        assert_eq!(manager.recent_responses().len(), 2);
    }

    #[test]
    fn test_mock_bare_payload_opcode_does_not_swallow_next_send() {
        let manager = SerialManager::new(Arc::new(NullLog));
        manager.connect(MOCK_PORT_NAME).unwrap();

        manager.send(Opcode::ReadRegister).unwrap();
        assert!(wait_until(|| manager.recent_responses().len() == 1));
        manager.send(Opcode::Halt).unwrap();
        assert!(wait_until(|| manager.recent_responses().len() == 2));

        let raws: Vec<String> = manager.recent_responses().into_iter().map(|r| r.raw).collect();
        assert_eq!(raws, vec!["0xEF 0xBE 0xAD 0xDE", "0x03 0xAA"]);
    }

    #[test]
    fn test_mock_answers_once_regardless_of_payload() {
        let manager = SerialManager::new(Arc::new(NullLog));
        manager.connect(MOCK_PORT_NAME).unwrap();

        manager.send_with_payload(Opcode::Halt, &[0x01, 0x02]).unwrap();
        assert!(wait_until(|| !manager.recent_responses().is_empty()));
        thread::sleep(MOCK_REPLY_DELAY * 3);

        let history = manager.recent_responses();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].raw, "0x03 0xAA");
    }

    #[test]
    fn test_mock_send_after_close_fails() {
        let manager = SerialManager::new(Arc::new(NullLog));
        manager.connect(MOCK_PORT_NAME).unwrap();
        manager.close().unwrap();
        assert!(matches!(
            manager.send(Opcode::Ping).unwrap_err(),
            SerialError::NotConnected
        ));
    }

    #[test]
    fn test_attach_releases_replaced_connection() {
        let (manager, first) = scripted_manager();
        manager.start_listening();

        // installed without going through connect's check
        let second = Arc::new(ScriptedTransport::default());
        manager.attach("/dev/other", second.clone(), None);

        assert!(first.closed.load(Ordering::SeqCst));
        assert!(!second.closed.load(Ordering::SeqCst));
        assert!(!manager.is_listening());
        assert_eq!(manager.port_name().as_deref(), Some("/dev/other"));
    }

    #[test]
    fn test_reconnect_after_close() {
        let manager = SerialManager::new(Arc::new(NullLog));
        manager.connect(MOCK_PORT_NAME).unwrap();
        manager.start_listening();
        manager.close().unwrap();
        assert!(!manager.is_connected());

        manager.connect(MOCK_PORT_NAME).unwrap();
        assert!(manager.is_connected());
        assert!(!manager.is_listening());
        manager.send(Opcode::Nop).unwrap();
    }

    #[test]
    fn test_connect_replaces_previous_connection() {
        let (manager, transport) = scripted_manager();
        manager.start_listening();
        manager.connect(MOCK_PORT_NAME).unwrap();

        assert!(transport.closed.load(Ordering::SeqCst));
        assert!(manager.is_mock());
        assert!(!manager.is_listening());
    }
}
