//! Driver error taxonomy

use kaal_uart_platform::{HwError, IrqError};
use thiserror::Error;

/// Errors returned by the UART operation set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Empty buffer, unknown handle or out-of-range configuration value.
    /// Always detected before any hardware action.
    #[error("invalid argument")]
    InvalidArgument,

    #[error("instance busy with an outstanding transfer")]
    Busy,

    /// Asynchronous receive queue had nothing buffered
    #[error("no received data available")]
    WouldBlock,

    /// Peripheral fault mid-transfer; bytes already sent are not rolled back
    #[error("hardware fault after {transferred} bytes")]
    HardwareFault { transferred: usize },

    #[error("interrupt or memory resources exhausted")]
    ResourceExhausted,

    #[error("operation not implemented")]
    NotImplemented,
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<HwError> for Error {
    fn from(err: HwError) -> Self {
        match err {
            HwError::Unsupported | HwError::InvalidInstance(_) => Error::InvalidArgument,
            HwError::Busy => Error::Busy,
            HwError::Fault => Error::HardwareFault { transferred: 0 },
        }
    }
}

impl From<IrqError> for Error {
    fn from(err: IrqError) -> Self {
        match err {
            IrqError::AlreadyRegistered { .. } => Error::ResourceExhausted,
            IrqError::InvalidLine { .. } | IrqError::NotRegistered { .. } => {
                Error::InvalidArgument
            }
        }
    }
}
