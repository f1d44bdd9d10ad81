//! Transport layer for the handset link
//!
//! The phone is reached over an RS-232 style channel. Everything above this
//! module talks to the [`SerialChannel`] trait, so the real port binding and
//! the in-memory [`VirtualPhone`](crate::core::simulator::VirtualPhone) are
//! interchangeable.

mod serial;

pub use serial::{
    is_allowable_data_bits, is_allowable_speed, list_ports, PortConfig, SerialFlowControl,
    SerialParity, SerialPortChannel, SerialStopBits, ALLOWED_DATA_BITS, ALLOWED_SPEEDS,
};

use std::time::Duration;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Byte channel to the handset.
///
/// Implementations own their own "data available" wakeup: [`wait_for_data`]
/// blocks until bytes arrive or the timeout elapses, so readers never need to
/// busy-poll.
///
/// [`wait_for_data`]: SerialChannel::wait_for_data
pub trait SerialChannel: Send {
    /// Open (or re-open) the channel with the given parameters
    fn open(&mut self, config: &PortConfig) -> Result<(), TransportError>;

    /// Release the channel. Closing an already closed channel is a no-op.
    fn close(&mut self);

    /// Check if the channel is open
    fn is_open(&self) -> bool;

    /// Number of bytes that can be read without blocking
    fn bytes_available(&mut self) -> Result<usize, TransportError>;

    /// Read up to `buf.len()` already-available bytes
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write all bytes
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Block until data is available or `timeout` elapses.
    ///
    /// Returns `true` when bytes are ready to be read. A spurious wakeup is
    /// reported as `false`; callers re-check [`bytes_available`] anyway.
    ///
    /// [`bytes_available`]: SerialChannel::bytes_available
    fn wait_for_data(&mut self, timeout: Duration) -> bool;
}

impl<T: SerialChannel + ?Sized> SerialChannel for Box<T> {
    fn open(&mut self, config: &PortConfig) -> Result<(), TransportError> {
        (**self).open(config)
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        (**self).bytes_available()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(data)
    }

    fn wait_for_data(&mut self, timeout: Duration) -> bool {
        (**self).wait_for_data(timeout)
    }
}
