//! Instance configuration
//!
//! [`UartInitParam`] is the parameter block handed to `init`. The line
//! format fields use the typed enums from the platform layer; blocks built
//! from raw integer codes go through [`UartInitParam::from_raw`] so that
//! unknown codes are rejected before any hardware is touched.

use kaal_uart_platform::{CharSize, FlowControl, InstanceId, LineConfig, Parity, StopBits};
use static_assertions::const_assert;

use crate::{Error, Result};

/// Number of UART instances the driver can manage
pub const MAX_INSTANCES: usize = 3;

/// Capacity of the asynchronous receive queue, in bytes
pub const RX_FIFO_CAPACITY: usize = kaal_fifo::DEFAULT_CAPACITY;

const_assert!(RX_FIFO_CAPACITY.is_power_of_two());
const_assert!(MAX_INSTANCES <= InstanceId::MAX as usize);

/// Parameters for initializing one UART instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartInitParam {
    /// Instance number, `0..MAX_INSTANCES`
    pub device_id: InstanceId,
    pub baud_rate: u32,
    pub parity: Parity,
    pub size: CharSize,
    pub stop: StopBits,
    pub flow: FlowControl,
    /// Receive continuously in the background into the receive queue
    pub asynchronous_rx: bool,
}

impl Default for UartInitParam {
    fn default() -> Self {
        let line = LineConfig::default();
        Self {
            device_id: 0,
            baud_rate: line.baud_rate,
            parity: line.parity,
            size: line.size,
            stop: line.stop,
            flow: line.flow,
            asynchronous_rx: false,
        }
    }
}

impl UartInitParam {
    /// Build a parameter block from raw enumeration codes
    ///
    /// # Errors
    /// `Error::InvalidArgument` if any code is out of range.
    pub fn from_raw(
        device_id: InstanceId,
        baud_rate: u32,
        parity: u32,
        size: u32,
        stop: u32,
        flow: u32,
        asynchronous_rx: bool,
    ) -> Result<Self> {
        let param = Self {
            device_id,
            baud_rate,
            parity: Parity::try_from(parity)?,
            size: CharSize::try_from(size)?,
            stop: StopBits::try_from(stop)?,
            flow: FlowControl::try_from(flow)?,
            asynchronous_rx,
        };
        param.validate()?;
        Ok(param)
    }

    /// Check fields the enums cannot rule out
    pub fn validate(&self) -> Result<()> {
        if usize::from(self.device_id) >= MAX_INSTANCES || self.baud_rate == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    /// Line format handed to the hardware layer
    pub fn line_config(&self) -> LineConfig {
        LineConfig {
            baud_rate: self.baud_rate,
            parity: self.parity,
            size: self.size,
            stop: self.stop,
            flow: self.flow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_param() {
        let param = UartInitParam::default();
        assert_eq!(param.device_id, 0);
        assert_eq!(param.line_config(), LineConfig::default());
        assert!(!param.asynchronous_rx);
        assert!(param.validate().is_ok());
    }

    #[test]
    fn test_from_raw() {
        let param = UartInitParam::from_raw(1, 9600, 4, 2, 1, 1, true).unwrap();
        assert_eq!(param.parity, Parity::Even);
        assert_eq!(param.size, CharSize::Seven);
        assert_eq!(param.stop, StopBits::Two);
        assert_eq!(param.flow, FlowControl::ActiveLow);
        assert!(param.asynchronous_rx);
    }

    #[test]
    fn test_from_raw_rejects_unknown_codes() {
        assert_eq!(
            UartInitParam::from_raw(0, 115200, 7, 3, 0, 0, false),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            UartInitParam::from_raw(0, 115200, 0, 9, 0, 0, false),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            UartInitParam::from_raw(0, 115200, 0, 3, 0, 3, false),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_validate_bounds() {
        let param = UartInitParam {
            device_id: MAX_INSTANCES as InstanceId,
            ..Default::default()
        };
        assert_eq!(param.validate(), Err(Error::InvalidArgument));

        let param = UartInitParam {
            baud_rate: 0,
            ..Default::default()
        };
        assert_eq!(param.validate(), Err(Error::InvalidArgument));
    }
}
