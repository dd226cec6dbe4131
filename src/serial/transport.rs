//! Byte transport capability
//!
//! Both the OS serial port and the mock port implement [`Transport`]. All
//! methods take `&self` so the receive loop can block in `read` while
//! commands are written from other threads.

use crate::error::TransportError;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub trait Transport: Send + Sync {
    /// Read whatever is available, waiting at most the port timeout.
    ///
    /// Returns `TransportError::Timeout` when nothing arrived and
    /// `TransportError::Closed` once `close` has been called.
    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write all of `data`
    fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Release the underlying handle. Later reads and writes fail with `Closed`.
    fn close(&self) -> Result<(), TransportError>;
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
