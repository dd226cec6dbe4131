//! Serial link to the CPU debug peripheral
//!
//! This module provides:
//! - The [`Transport`] capability shared by real ports and the mock port
//! - Port configuration and discovery
//! - [`SerialManager`], which owns the connection, runs the receive loop
//!   and fans replies out to observers

pub mod manager;
pub mod mock;
pub mod port;
pub mod transport;

pub use manager::{Observer, SerialManager};
pub use mock::{MockTransport, MOCK_PORT_NAME};
pub use port::PortConfig;
pub use transport::Transport;
