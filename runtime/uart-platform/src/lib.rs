//! # UART Platform Layer
//!
//! The two collaborator seams the portable UART driver is written against:
//! - [`UartHardware`]: peripheral registers (configure, transfer, status, shutdown)
//! - [`IrqController`]: interrupt routing, enable and disable
//!
//! ## Backends
//!
//! - [`pl011`]: ARM PrimeCell PL011, register-level over MMIO
//! - `mock`: in-memory peripheral and interrupt controller for host tests
//!
//! ```bash
//! # Hardware backends only (default)
//! cargo build
//!
//! # Host testing
//! cargo test --features mock
//! ```

#![no_std]

extern crate alloc;

pub mod irq;
pub mod line;
pub mod pl011;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use irq::{IrqController, IrqError, IrqRouter};
pub use line::{CharSize, FlowControl, LineConfig, Parity, StopBits};

use thiserror::Error;

/// UART instance number (0-based, bounded by the platform)
pub type InstanceId = u8;

/// Interrupt line number
pub type IrqLine = u16;

/// Errors reported by a hardware backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HwError {
    #[error("configuration not supported by this peripheral")]
    Unsupported,

    #[error("peripheral busy with an outstanding transaction")]
    Busy,

    #[error("peripheral reported a transfer fault")]
    Fault,

    #[error("no such UART instance: {0}")]
    InvalidInstance(InstanceId),
}

pub type Result<T> = core::result::Result<T, HwError>;

/// Asynchronous transaction handed to [`UartHardware::begin_transfer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRequest<'a> {
    /// Receive `len` bytes
    Receive { len: usize },
    /// Transmit `data`; the backend stages what it cannot send immediately
    Transmit { data: &'a [u8] },
}

impl TransferRequest<'_> {
    pub fn len(&self) -> usize {
        match self {
            TransferRequest::Receive { len } => *len,
            TransferRequest::Transmit { data } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of [`UartHardware::collect_transfer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Transaction finished; number of bytes moved
    Complete(usize),
    /// Interrupt was partial progress; transaction still outstanding
    InProgress,
}

/// UART peripheral register layer
///
/// One implementation drives every instance of a UART family; the instance
/// is passed on each call.
///
/// # Contract
/// - `begin_transfer` returns immediately. Completion is signalled through
///   the interrupt line reported by `irq_line`.
/// - `collect_transfer` is only called from completion context, after the
///   interrupt for that instance fired.
/// - `write`/`read` are direct synchronous transfers used by the blocking
///   path. `write` is offered at most `fifo_depth()` bytes and may accept
///   fewer; it returns how many it took.
pub trait UartHardware {
    /// Apply baud rate and line format, enabling the peripheral
    ///
    /// # Errors
    /// - `HwError::Unsupported` if the peripheral cannot express `line`
    /// - `HwError::InvalidInstance` if `id` does not exist
    fn configure(&mut self, id: InstanceId, line: &LineConfig) -> Result<()>;

    /// Disable the peripheral
    fn shutdown(&mut self, id: InstanceId);

    /// Interrupt line wired to this instance
    fn irq_line(&self, id: InstanceId) -> IrqLine;

    /// Transmit FIFO depth in bytes
    fn fifo_depth(&self) -> usize;

    /// Transmit path ready to accept a full FIFO chunk
    fn poll_ready(&self, id: InstanceId) -> bool;

    /// Write from the front of `chunk`, returning the bytes accepted
    fn write(&mut self, id: InstanceId, chunk: &[u8]) -> Result<usize>;

    /// Read exactly `buf.len()` bytes synchronously
    fn read(&mut self, id: InstanceId, buf: &mut [u8]) -> Result<usize>;

    /// Start an asynchronous transaction
    ///
    /// # Errors
    /// Returns `HwError::Busy` if the instance already has one outstanding.
    fn begin_transfer(&mut self, id: InstanceId, request: TransferRequest<'_>) -> Result<()>;

    /// Fetch the outcome of the outstanding transaction
    ///
    /// Receive transactions copy the received bytes into `rx`; transmit
    /// transactions ignore it.
    fn collect_transfer(&mut self, id: InstanceId, rx: &mut [u8]) -> Result<Progress>;
}
