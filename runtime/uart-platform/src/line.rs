//! Line format - baud rate, parity, character size, stop bits, flow control
//!
//! The portable numbering used by `TryFrom<u32>` is what configuration
//! blocks built outside Rust carry. Backends map these onto their own
//! register encodings and may reject values they cannot express.

use crate::HwError;

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    /// Parity bit always 1
    Mark,
    /// Parity bit always 0
    Space,
    Odd,
    Even,
}

/// Data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CharSize {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

/// Stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Hardware flow control (RTS/CTS) and its signal polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    #[default]
    Disabled,
    ActiveLow,
    ActiveHigh,
}

impl TryFrom<u32> for Parity {
    type Error = HwError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Parity::None),
            1 => Ok(Parity::Mark),
            2 => Ok(Parity::Space),
            3 => Ok(Parity::Odd),
            4 => Ok(Parity::Even),
            _ => Err(HwError::Unsupported),
        }
    }
}

impl TryFrom<u32> for CharSize {
    type Error = HwError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(CharSize::Five),
            1 => Ok(CharSize::Six),
            2 => Ok(CharSize::Seven),
            3 => Ok(CharSize::Eight),
            _ => Err(HwError::Unsupported),
        }
    }
}

impl TryFrom<u32> for StopBits {
    type Error = HwError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(StopBits::One),
            1 => Ok(StopBits::Two),
            _ => Err(HwError::Unsupported),
        }
    }
}

impl TryFrom<u32> for FlowControl {
    type Error = HwError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(FlowControl::Disabled),
            1 => Ok(FlowControl::ActiveLow),
            2 => Ok(FlowControl::ActiveHigh),
            _ => Err(HwError::Unsupported),
        }
    }
}

impl CharSize {
    /// Number of data bits
    pub const fn bits(self) -> u8 {
        match self {
            CharSize::Five => 5,
            CharSize::Six => 6,
            CharSize::Seven => 7,
            CharSize::Eight => 8,
        }
    }
}

/// Complete line configuration for one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineConfig {
    /// Baud rate in bits per second
    pub baud_rate: u32,
    pub parity: Parity,
    pub size: CharSize,
    pub stop: StopBits,
    pub flow: FlowControl,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            parity: Parity::None,
            size: CharSize::Eight,
            stop: StopBits::One,
            flow: FlowControl::Disabled,
        }
    }
}
