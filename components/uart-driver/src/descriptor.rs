//! Transfer descriptor - the one outstanding transaction of an instance
//!
//! A [`Transfer`] owns everything bound to one hardware transaction: its
//! buffer, its length and progress, and the completion callback. The
//! descriptor holds at most one of them, plus the instance's own scratch
//! byte used by the background receive loop.

use alloc::boxed::Box;
use alloc::vec::Vec;

use kaal_uart_platform::TransferRequest;

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Receive,
    Transmit,
}

/// Outcome handed to a completion callback
#[derive(Debug, PartialEq, Eq)]
pub struct Completed {
    pub direction: Direction,
    /// The caller's buffer, returned; holds the received bytes for receives
    pub buffer: Vec<u8>,
    /// Bytes moved by the hardware
    pub transferred: usize,
}

/// Completion callback bound to a single transfer
///
/// Runs in completion context with the driver held, so it must not call
/// back into the `UartContext`.
pub type CompletionFn = Box<dyn FnOnce(Completed) + Send>;

/// Where the transfer's bytes live
pub(crate) enum Payload {
    /// The descriptor's scratch byte (background receive)
    Scratch,
    /// A caller-supplied buffer
    Owned(Vec<u8>),
}

/// One submitted hardware transaction
pub(crate) struct Transfer {
    pub direction: Direction,
    pub payload: Payload,
    pub length: usize,
    pub transferred: usize,
    pub on_complete: Option<CompletionFn>,
}

impl Transfer {
    /// Caller transfer over `buffer`
    pub fn owned(direction: Direction, buffer: Vec<u8>, on_complete: Option<CompletionFn>) -> Self {
        Self {
            direction,
            length: buffer.len(),
            payload: Payload::Owned(buffer),
            transferred: 0,
            on_complete,
        }
    }

    /// One-byte receive into the scratch byte
    pub fn refill() -> Self {
        Self {
            direction: Direction::Receive,
            payload: Payload::Scratch,
            length: 1,
            transferred: 0,
            on_complete: None,
        }
    }

    pub fn is_refill(&self) -> bool {
        matches!(self.payload, Payload::Scratch)
    }

    /// Hardware request describing this transfer
    pub fn request(&self) -> TransferRequest<'_> {
        match (self.direction, &self.payload) {
            (Direction::Transmit, Payload::Owned(data)) => TransferRequest::Transmit {
                data: data.as_slice(),
            },
            _ => TransferRequest::Receive { len: self.length },
        }
    }
}

/// Per-instance transaction state
///
/// `Idle` when `in_flight` is `None`, `InFlight` otherwise.
#[derive(Default)]
pub(crate) struct TransferDescriptor {
    in_flight: Option<Transfer>,
    /// Receive target of the background loop; never shared between instances
    pub scratch: u8,
}

impl TransferDescriptor {
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Record `transfer` as in flight
    ///
    /// Hands the transfer back if another one is still outstanding.
    pub fn begin(&mut self, transfer: Transfer) -> Result<&Transfer, Transfer> {
        if self.in_flight.is_some() {
            return Err(transfer);
        }
        Ok(self.in_flight.insert(transfer))
    }

    /// Clear the in-flight transfer, returning it
    pub fn take(&mut self) -> Option<Transfer> {
        self.in_flight.take()
    }

    /// Put back a transfer that is still outstanding
    pub fn resume(&mut self, transfer: Transfer) {
        debug_assert!(self.in_flight.is_none());
        self.in_flight = Some(transfer);
    }

    pub fn in_flight(&self) -> Option<&Transfer> {
        self.in_flight.as_ref()
    }
}
