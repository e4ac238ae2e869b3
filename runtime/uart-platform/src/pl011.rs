//! ARM PL011 UART Hardware Interface
//!
//! Register-level backend for the ARM PrimeCell UART (PL011).
//! Reference: ARM PrimeCell UART (PL011) Technical Reference Manual
//!
//! Asynchronous transfers are driven from the interrupt mask: `begin_transfer`
//! arms the RX or TX interrupt and `collect_transfer` moves bytes when it
//! fires, reporting `InProgress` until the whole request is satisfied.

use alloc::vec::Vec;
use core::ptr::{read_volatile, write_volatile};

use bitflags::bitflags;

use crate::{
    FlowControl, HwError, InstanceId, IrqLine, LineConfig, Parity, Progress, Result, StopBits,
    TransferRequest, UartHardware,
};

/// PL011 Register offsets
const UARTDR: usize = 0x000; // Data Register
const UARTRSR: usize = 0x004; // Receive Status / Error Clear
const UARTFR: usize = 0x018; // Flag Register
const UARTIBRD: usize = 0x024; // Integer Baud Rate Divisor
const UARTFBRD: usize = 0x028; // Fractional Baud Rate Divisor
const UARTLCR_H: usize = 0x02C; // Line Control Register
const UARTCR: usize = 0x030; // Control Register
const UARTIMSC: usize = 0x038; // Interrupt Mask Set/Clear
const UARTMIS: usize = 0x040; // Masked Interrupt Status
const UARTICR: usize = 0x044; // Interrupt Clear Register

/// Error bits carried alongside each received byte in UARTDR
const DR_ERROR_MASK: u32 = 0xF00;

/// Transmit/receive FIFO depth
pub const PL011_FIFO_DEPTH: usize = 16;

/// QEMU virt UARTCLK
pub const DEFAULT_UARTCLK: u32 = 24_000_000;

bitflags! {
    /// Flag Register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u32 {
        const BUSY = 1 << 3;
        const RXFE = 1 << 4;
        const TXFF = 1 << 5;
        const RXFF = 1 << 6;
        const TXFE = 1 << 7;
    }

    /// Line Control Register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LineControl: u32 {
        const PEN = 1 << 1;
        const EPS = 1 << 2;
        const STP2 = 1 << 3;
        const FEN = 1 << 4;
        const WLEN_6 = 0b01 << 5;
        const WLEN_7 = 0b10 << 5;
        const WLEN_8 = 0b11 << 5;
        const SPS = 1 << 7;
    }

    /// Control Register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Control: u32 {
        const UARTEN = 1 << 0;
        const TXE = 1 << 8;
        const RXE = 1 << 9;
        const RTSEN = 1 << 14;
        const CTSEN = 1 << 15;
    }

    /// Interrupt bits (IMSC, RIS, MIS, ICR share the layout)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interrupts: u32 {
        const RX = 1 << 4;
        const TX = 1 << 5;
        const RT = 1 << 6;
        const FE = 1 << 7;
        const PE = 1 << 8;
        const BE = 1 << 9;
        const OE = 1 << 10;
    }
}

impl Interrupts {
    /// Receive line errors
    pub const ERRORS: Self = Self::FE.union(Self::PE).union(Self::BE).union(Self::OE);

    /// Everything the receive path arms
    pub const RECEIVE: Self = Self::RX.union(Self::RT).union(Self::ERRORS);
}

/// Integer and fractional baud divisors for `baud` at `uartclk`
///
/// Divisor = UARTCLK / (16 * baud), fractional part in 1/64ths, rounded.
/// Returns `None` when the integer part falls outside 1..=0xFFFF.
pub fn baud_divisors(uartclk: u32, baud: u32) -> Option<(u32, u32)> {
    if baud == 0 {
        return None;
    }

    // 64 * UARTCLK / (16 * baud), computed at double precision to round
    let scaled = (u64::from(uartclk) * 8 / u64::from(baud) + 1) / 2;
    let ibrd = scaled >> 6;
    let fbrd = scaled & 0x3f;

    if ibrd == 0 || ibrd > 0xFFFF {
        return None;
    }

    Some((ibrd as u32, fbrd as u32))
}

/// Encode parity, size and stop bits into UARTLCR_H (FIFOs enabled)
pub fn line_control(line: &LineConfig) -> LineControl {
    let mut lcr = LineControl::FEN;

    lcr |= match line.size.bits() {
        5 => LineControl::empty(),
        6 => LineControl::WLEN_6,
        7 => LineControl::WLEN_7,
        _ => LineControl::WLEN_8,
    };

    // Mark/Space use stick parity: SPS with EPS clear sends 1, set sends 0
    lcr |= match line.parity {
        Parity::None => LineControl::empty(),
        Parity::Odd => LineControl::PEN,
        Parity::Even => LineControl::PEN | LineControl::EPS,
        Parity::Mark => LineControl::PEN | LineControl::SPS,
        Parity::Space => LineControl::PEN | LineControl::EPS | LineControl::SPS,
    };

    if line.stop == StopBits::Two {
        lcr |= LineControl::STP2;
    }

    lcr
}

/// Flow control bits for UARTCR
///
/// nRTS/nCTS are active low on the PL011; active-high signalling is not
/// available.
pub fn flow_control(flow: FlowControl) -> Result<Control> {
    match flow {
        FlowControl::Disabled => Ok(Control::empty()),
        FlowControl::ActiveLow => Ok(Control::RTSEN | Control::CTSEN),
        FlowControl::ActiveHigh => Err(HwError::Unsupported),
    }
}

/// PL011 register block
pub struct Pl011 {
    base: usize,
}

impl Pl011 {
    /// Create a new PL011 register accessor
    ///
    /// # Safety
    /// The caller must ensure that `base` points to valid PL011 UART MMIO registers
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    /// Read a register
    #[inline]
    unsafe fn read_reg(&self, offset: usize) -> u32 {
        read_volatile((self.base + offset) as *const u32)
    }

    /// Write a register
    #[inline]
    unsafe fn write_reg(&mut self, offset: usize, value: u32) {
        write_volatile((self.base + offset) as *mut u32, value);
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(unsafe { self.read_reg(UARTFR) })
    }

    /// Check if transmit FIFO is full
    pub fn tx_full(&self) -> bool {
        self.flags().contains(Flags::TXFF)
    }

    /// Check if receive FIFO is empty
    pub fn rx_empty(&self) -> bool {
        self.flags().contains(Flags::RXFE)
    }

    /// Write a byte, waiting for FIFO space
    pub fn write_byte(&mut self, byte: u8) {
        while self.tx_full() {
            core::hint::spin_loop();
        }

        unsafe {
            self.write_reg(UARTDR, u32::from(byte));
        }
    }

    /// Pop one entry from the receive FIFO, error bits included
    fn read_data(&mut self) -> u32 {
        unsafe { self.read_reg(UARTDR) }
    }

    /// Clear latched receive errors
    fn clear_errors(&mut self) {
        unsafe {
            self.write_reg(UARTRSR, 0);
        }
    }

    pub fn interrupt_mask(&self) -> Interrupts {
        Interrupts::from_bits_truncate(unsafe { self.read_reg(UARTIMSC) })
    }

    fn set_interrupt_mask(&mut self, mask: Interrupts) {
        unsafe {
            self.write_reg(UARTIMSC, mask.bits());
        }
    }

    /// Get masked interrupt status
    pub fn masked_interrupt_status(&self) -> Interrupts {
        Interrupts::from_bits_truncate(unsafe { self.read_reg(UARTMIS) })
    }

    /// Clear interrupts
    fn clear_interrupts(&mut self, mask: Interrupts) {
        unsafe {
            self.write_reg(UARTICR, mask.bits());
        }
    }
}

/// Per-instance wiring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pl011Resources {
    /// Mapped MMIO base
    pub base: usize,
    /// Interrupt line
    pub irq: IrqLine,
}

enum Pending {
    Receive { len: usize, staged: Vec<u8> },
    Transmit { data: Vec<u8>, sent: usize },
}

struct Pl011Port {
    regs: Pl011,
    irq: IrqLine,
    pending: Option<Pending>,
}

/// All PL011 instances of a board
pub struct Pl011Bank {
    ports: Vec<Pl011Port>,
    uartclk: u32,
}

impl Pl011Bank {
    /// Create a bank; instance `i` is `resources[i]`
    ///
    /// # Safety
    /// Every `base` must point to mapped PL011 registers that nothing else
    /// accesses for the lifetime of the bank.
    pub unsafe fn new(resources: &[Pl011Resources], uartclk: u32) -> Self {
        let ports = resources
            .iter()
            .map(|r| Pl011Port {
                regs: Pl011::new(r.base),
                irq: r.irq,
                pending: None,
            })
            .collect();

        Self { ports, uartclk }
    }

    pub fn instance_count(&self) -> usize {
        self.ports.len()
    }

    fn port(&self, id: InstanceId) -> Result<&Pl011Port> {
        self.ports
            .get(usize::from(id))
            .ok_or(HwError::InvalidInstance(id))
    }

    fn port_mut(&mut self, id: InstanceId) -> Result<&mut Pl011Port> {
        self.ports
            .get_mut(usize::from(id))
            .ok_or(HwError::InvalidInstance(id))
    }
}

impl UartHardware for Pl011Bank {
    fn configure(&mut self, id: InstanceId, line: &LineConfig) -> Result<()> {
        // Work out every register value first so a rejected configuration
        // leaves the peripheral untouched
        let (ibrd, fbrd) = baud_divisors(self.uartclk, line.baud_rate).ok_or(HwError::Unsupported)?;
        let lcr = line_control(line);
        let flow = flow_control(line.flow)?;

        let regs = &mut self.port_mut(id)?.regs;

        unsafe {
            // Disable UART
            regs.write_reg(UARTCR, 0);

            // Wait for end of transmission
            while regs.flags().contains(Flags::BUSY) {
                core::hint::spin_loop();
            }

            // Flush FIFOs by disabling them
            regs.write_reg(UARTLCR_H, 0);

            regs.write_reg(UARTIBRD, ibrd);
            regs.write_reg(UARTFBRD, fbrd);
            regs.write_reg(UARTLCR_H, lcr.bits());
        }

        regs.set_interrupt_mask(Interrupts::empty());
        regs.clear_interrupts(Interrupts::all());

        unsafe {
            regs.write_reg(UARTCR, (Control::UARTEN | Control::TXE | Control::RXE | flow).bits());
        }

        log::debug!(
            "PL011 UART{}: {} baud, IBRD={} FBRD={} LCR_H={:#x}",
            id,
            line.baud_rate,
            ibrd,
            fbrd,
            lcr.bits()
        );
        Ok(())
    }

    fn shutdown(&mut self, id: InstanceId) {
        let Ok(port) = self.port_mut(id) else {
            log::warn!("PL011 shutdown of unknown UART{}", id);
            return;
        };

        port.pending = None;
        port.regs.set_interrupt_mask(Interrupts::empty());
        port.regs.clear_interrupts(Interrupts::all());
        unsafe {
            port.regs.write_reg(UARTCR, 0);
        }
    }

    fn irq_line(&self, id: InstanceId) -> IrqLine {
        self.port(id).map_or(IrqLine::MAX, |port| port.irq)
    }

    fn fifo_depth(&self) -> usize {
        PL011_FIFO_DEPTH
    }

    fn poll_ready(&self, id: InstanceId) -> bool {
        self.port(id)
            .map(|port| port.regs.flags().contains(Flags::TXFE))
            .unwrap_or(false)
    }

    fn write(&mut self, id: InstanceId, chunk: &[u8]) -> Result<usize> {
        let regs = &mut self.port_mut(id)?.regs;
        for &byte in chunk {
            regs.write_byte(byte);
        }
        Ok(chunk.len())
    }

    fn read(&mut self, id: InstanceId, buf: &mut [u8]) -> Result<usize> {
        let regs = &mut self.port_mut(id)?.regs;
        for slot in buf.iter_mut() {
            while regs.rx_empty() {
                core::hint::spin_loop();
            }

            let data = regs.read_data();
            if data & DR_ERROR_MASK != 0 {
                regs.clear_errors();
                return Err(HwError::Fault);
            }
            *slot = data as u8;
        }
        Ok(buf.len())
    }

    fn begin_transfer(&mut self, id: InstanceId, request: TransferRequest<'_>) -> Result<()> {
        let port = self.port_mut(id)?;
        if port.pending.is_some() {
            return Err(HwError::Busy);
        }

        match request {
            TransferRequest::Receive { len } => {
                port.pending = Some(Pending::Receive {
                    len,
                    staged: Vec::with_capacity(len),
                });
                let mask = port.regs.interrupt_mask() | Interrupts::RECEIVE;
                port.regs.set_interrupt_mask(mask);
            }
            TransferRequest::Transmit { data } => {
                // Prime the FIFO; the TX interrupt refills the rest
                let mut sent = 0;
                while sent < data.len() && !port.regs.tx_full() {
                    unsafe {
                        port.regs.write_reg(UARTDR, u32::from(data[sent]));
                    }
                    sent += 1;
                }
                port.pending = Some(Pending::Transmit {
                    data: data.to_vec(),
                    sent,
                });
                let mask = port.regs.interrupt_mask() | Interrupts::TX;
                port.regs.set_interrupt_mask(mask);
            }
        }

        Ok(())
    }

    fn collect_transfer(&mut self, id: InstanceId, rx: &mut [u8]) -> Result<Progress> {
        let port = self.port_mut(id)?;
        let Some(pending) = port.pending.take() else {
            return Ok(Progress::Complete(0));
        };

        let status = port.regs.masked_interrupt_status();
        if status.intersects(Interrupts::ERRORS) {
            port.regs.clear_errors();
            port.regs.clear_interrupts(Interrupts::ERRORS);
            let mask = port.regs.interrupt_mask() - Interrupts::RECEIVE - Interrupts::TX;
            port.regs.set_interrupt_mask(mask);
            return Err(HwError::Fault);
        }

        match pending {
            Pending::Receive { len, mut staged } => {
                while staged.len() < len && !port.regs.rx_empty() {
                    let data = port.regs.read_data();
                    if data & DR_ERROR_MASK != 0 {
                        port.regs.clear_errors();
                        let mask = port.regs.interrupt_mask() - Interrupts::RECEIVE;
                        port.regs.set_interrupt_mask(mask);
                        return Err(HwError::Fault);
                    }
                    staged.push(data as u8);
                }

                port.regs.clear_interrupts(Interrupts::RX | Interrupts::RT);
                if staged.len() < len {
                    port.pending = Some(Pending::Receive { len, staged });
                    return Ok(Progress::InProgress);
                }

                let n = len.min(rx.len());
                rx[..n].copy_from_slice(&staged[..n]);

                let mask = port.regs.interrupt_mask() - Interrupts::RECEIVE;
                port.regs.set_interrupt_mask(mask);
                Ok(Progress::Complete(len))
            }
            Pending::Transmit { data, mut sent } => {
                while sent < data.len() && !port.regs.tx_full() {
                    unsafe {
                        port.regs.write_reg(UARTDR, u32::from(data[sent]));
                    }
                    sent += 1;
                }

                port.regs.clear_interrupts(Interrupts::TX);
                if sent < data.len() {
                    port.pending = Some(Pending::Transmit { data, sent });
                    return Ok(Progress::InProgress);
                }

                let mask = port.regs.interrupt_mask() - Interrupts::TX;
                port.regs.set_interrupt_mask(mask);
                Ok(Progress::Complete(sent))
            }
        }
    }
}
