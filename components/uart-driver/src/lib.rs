//! UART Driver - portable serial I/O over any UART family
//!
//! # Purpose
//! Exposes a UART peripheral through one operation set ([`UartOps`]):
//! init, blocking read/write, nonblocking read/write, error query and
//! teardown. Code above it stays portable across peripheral families.
//!
//! # Integration Points
//! - Depends on: `kaal-uart-platform` (hardware and interrupt seams),
//!   `kaal-fifo` (receive queue)
//! - Provides to: consoles, protocol stacks, shells
//! - Interrupts: the platform ISR calls [`UartContext::on_interrupt`],
//!   which never waits on caller operations
//!
//! # Architecture
//! [`UartContext`] owns a fixed table of instance slots. Each slot holds a
//! transfer descriptor with at most one outstanding hardware transaction.
//! With background receive enabled, every completed one-byte receive is
//! pushed into a lock-free queue and immediately re-armed; `read` drains the
//! queue through its own consumer half. Blocking writes poll the transmitter
//! directly and never touch the descriptor.
//!
//! ```text
//!   caller ──submit──▶ TransferDescriptor ──begin_transfer──▶ hardware
//!                                                               │ IRQ
//!   caller ◀──read──── ByteQueue ◀──push── refill ◀──complete───┘
//! ```
//!
//! # Testing Strategy
//! - Unit tests: descriptor state machine, table, engine, blocking I/O
//! - Integration tests: full operation set against the mock backend

#![no_std]

extern crate alloc;

mod blocking;
mod config;
mod context;
mod descriptor;
mod engine;
mod error;
mod table;

pub use config::{UartInitParam, MAX_INSTANCES, RX_FIFO_CAPACITY};
pub use context::UartContext;
pub use descriptor::{Completed, CompletionFn, Direction};
pub use error::{Error, Result};
pub use kaal_uart_platform::{CharSize, FlowControl, InstanceId, Parity, StopBits};

use alloc::vec::Vec;

/// Opaque handle to a UART instance
///
/// Handles are plain instance numbers. Operations on a handle whose instance
/// is not initialized fail with `Error::InvalidArgument`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UartHandle(InstanceId);

impl UartHandle {
    /// Handle naming `device_id`, initialized or not
    pub const fn from_raw(device_id: InstanceId) -> Self {
        Self(device_id)
    }

    pub const fn device_id(self) -> InstanceId {
        self.0
    }
}

/// Uniform UART operation set
///
/// Every operation validates its arguments before any hardware action;
/// an empty buffer or an uninitialized handle fails with
/// `Error::InvalidArgument`. Operations take `&self` so completion context
/// can share the implementation with callers.
pub trait UartOps {
    /// Configure an instance and, if requested, start background receive
    ///
    /// Any failure undoes every side effect before returning.
    ///
    /// # Errors
    /// - `Error::InvalidArgument` for a bad parameter or one the hardware
    ///   cannot express
    /// - `Error::Busy` if the instance is already initialized
    /// - `Error::ResourceExhausted` if interrupt resources are unavailable
    fn init(&self, param: &UartInitParam) -> Result<UartHandle>;

    /// Read up to `buf.len()` bytes
    ///
    /// With background receive this returns what is queued (at least one
    /// byte) or `Error::WouldBlock`. Without it the call blocks until `buf`
    /// is full.
    fn read(&self, handle: UartHandle, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data`, blocking until the last chunk is accepted
    ///
    /// # Errors
    /// `Error::HardwareFault { transferred }` on a mid-transfer fault.
    fn write(&self, handle: UartHandle, data: &[u8]) -> Result<usize>;

    /// Start receiving `buffer.len()` bytes into `buffer`
    ///
    /// Returns once the transfer is accepted. `on_complete` gets the filled
    /// buffer back. Instances with background receive always have a transfer
    /// in flight and report `Error::Busy`.
    ///
    /// The first nonblocking transfer on an instance without background
    /// receive registers and enables its interrupt line, failing with
    /// `Error::ResourceExhausted` if that is refused.
    fn read_nonblocking(
        &self,
        handle: UartHandle,
        buffer: Vec<u8>,
        on_complete: Option<CompletionFn>,
    ) -> Result<()>;

    /// Start transmitting `data`
    ///
    /// # Errors
    /// `Error::Busy` if a transfer is still in flight on this instance.
    fn write_nonblocking(
        &self,
        handle: UartHandle,
        data: Vec<u8>,
        on_complete: Option<CompletionFn>,
    ) -> Result<()>;

    /// Line error status; always `Error::NotImplemented`
    fn get_errors(&self, handle: UartHandle) -> Result<u32>;

    /// Shut the instance down and release what it owns
    ///
    /// Must not be called while a caller transfer may still be in flight.
    fn remove(&self, handle: UartHandle) -> Result<()>;
}
