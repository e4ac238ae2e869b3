//! Mock UART and interrupt controller for testing
//!
//! In-memory stand-ins for the two collaborator seams. Handles are cheap
//! clones sharing one state, so a test can keep a handle after moving
//! another into the driver. Both mocks can share a journal that records
//! every side effect in call order.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::{
    HwError, InstanceId, IrqController, IrqError, IrqLine, IrqRouter, LineConfig, Progress,
    Result, TransferRequest, UartHardware,
};

/// Interrupt line of mock UART0; instance `n` uses `MOCK_IRQ_BASE + n`
pub const MOCK_IRQ_BASE: IrqLine = 14;

/// Default transmit FIFO depth of the mock
pub const MOCK_FIFO_DEPTH: usize = 8;

/// Lines the mock controller accepts
const MOCK_IRQ_LINES: IrqLine = 64;

/// Side effect recorded by the mocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Configure(InstanceId),
    Shutdown(InstanceId),
    Write { id: InstanceId, len: usize },
    Read { id: InstanceId, len: usize },
    BeginTransfer { id: InstanceId, transfer: MockTransfer },
    RegisterHandler(IrqLine),
    UnregisterHandler(IrqLine),
    Enable(IrqLine),
    Disable(IrqLine),
}

/// Outstanding asynchronous transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockTransfer {
    Receive { len: usize },
    Transmit { data: Vec<u8> },
}

/// Shared, ordered record of side effects
#[derive(Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<MockEvent>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: MockEvent) {
        self.0.borrow_mut().push(event);
    }

    /// Snapshot of everything recorded so far
    pub fn events(&self) -> Vec<MockEvent> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

#[derive(Default)]
struct MockPort {
    line: Option<LineConfig>,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    pending: Option<MockTransfer>,
    reject_configure: Option<HwError>,
    fault_next_transfer: bool,
    force_busy: bool,
    /// Chunks `write` accepts before reporting a fault
    write_fault_after: Option<usize>,
    /// Most bytes one `write` call accepts
    write_limit: Option<usize>,
    /// `poll_ready` calls that report not-ready before the next ready
    not_ready_polls: usize,
}

struct MockUartState {
    ports: Vec<MockPort>,
    fifo_depth: usize,
}

/// Mock UART peripheral bank
///
/// # Example
///
/// ```ignore
/// use kaal_uart_platform::mock::MockUart;
/// use kaal_uart_platform::{LineConfig, UartHardware};
///
/// let mut uart = MockUart::new(1);
/// uart.configure(0, &LineConfig::default()).unwrap();
///
/// uart.write(0, b"Hello").unwrap();
/// assert_eq!(uart.tx_data(0), b"Hello");
///
/// uart.inject_rx(0, b"World");
/// let mut buf = [0u8; 5];
/// uart.read(0, &mut buf).unwrap();
/// assert_eq!(&buf, b"World");
/// ```
#[derive(Clone)]
pub struct MockUart {
    state: Rc<RefCell<MockUartState>>,
    journal: Journal,
}

impl MockUart {
    /// Create a bank with `instances` ports and its own journal
    pub fn new(instances: usize) -> Self {
        Self::with_journal(instances, Journal::new())
    }

    /// Create a bank recording into `journal`
    pub fn with_journal(instances: usize, journal: Journal) -> Self {
        let ports = (0..instances).map(|_| MockPort::default()).collect();
        Self {
            state: Rc::new(RefCell::new(MockUartState {
                ports,
                fifo_depth: MOCK_FIFO_DEPTH,
            })),
            journal,
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn set_fifo_depth(&self, depth: usize) {
        self.state.borrow_mut().fifo_depth = depth;
    }

    fn with_port<R>(&self, id: InstanceId, f: impl FnOnce(&mut MockPort) -> R) -> Result<R> {
        let mut state = self.state.borrow_mut();
        let port = state
            .ports
            .get_mut(usize::from(id))
            .ok_or(HwError::InvalidInstance(id))?;
        Ok(f(port))
    }

    /// Queue bytes as if they arrived on the wire
    ///
    /// # Panics
    /// Panics if `id` does not exist
    pub fn inject_rx(&self, id: InstanceId, data: &[u8]) {
        self.with_port(id, |port| port.rx.extend(data.iter().copied()))
            .expect("no such mock UART instance");
    }

    /// Everything transmitted so far on `id`
    pub fn tx_data(&self, id: InstanceId) -> Vec<u8> {
        self.with_port(id, |port| port.tx.clone()).unwrap_or_default()
    }

    /// Outstanding asynchronous transaction on `id`
    pub fn pending(&self, id: InstanceId) -> Option<MockTransfer> {
        self.with_port(id, |port| port.pending.clone()).ok().flatten()
    }

    /// Line configuration applied to `id`, `None` when shut down
    pub fn line(&self, id: InstanceId) -> Option<LineConfig> {
        self.with_port(id, |port| port.line).ok().flatten()
    }

    pub fn is_configured(&self, id: InstanceId) -> bool {
        self.line(id).is_some()
    }

    /// Make the next `configure` of `id` fail with `error`
    pub fn reject_configure(&self, id: InstanceId, error: HwError) {
        let _ = self.with_port(id, |port| port.reject_configure = Some(error));
    }

    /// Make the next `collect_transfer` of `id` report a fault
    pub fn fail_next_transfer(&self, id: InstanceId) {
        let _ = self.with_port(id, |port| port.fault_next_transfer = true);
    }

    /// Report `Busy` from `begin_transfer` regardless of state
    pub fn set_busy(&self, id: InstanceId, busy: bool) {
        let _ = self.with_port(id, |port| port.force_busy = busy);
    }

    /// Accept `chunks` synchronous writes, then fault
    pub fn fail_write_after(&self, id: InstanceId, chunks: usize) {
        let _ = self.with_port(id, |port| port.write_fault_after = Some(chunks));
    }

    /// Report not-ready for the next `polls` calls to `poll_ready`
    /// Accept at most `max` bytes per `write` call on `id`
    pub fn limit_write(&self, id: InstanceId, max: usize) {
        let _ = self.with_port(id, |port| port.write_limit = Some(max));
    }

    pub fn delay_ready(&self, id: InstanceId, polls: usize) {
        let _ = self.with_port(id, |port| port.not_ready_polls = polls);
    }
}

impl UartHardware for MockUart {
    fn configure(&mut self, id: InstanceId, line: &LineConfig) -> Result<()> {
        self.with_port(id, |port| match port.reject_configure.take() {
            Some(error) => Err(error),
            None => {
                port.line = Some(*line);
                Ok(())
            }
        })??;
        self.journal.record(MockEvent::Configure(id));
        Ok(())
    }

    fn shutdown(&mut self, id: InstanceId) {
        let _ = self.with_port(id, |port| {
            port.line = None;
            port.pending = None;
        });
        self.journal.record(MockEvent::Shutdown(id));
    }

    fn irq_line(&self, id: InstanceId) -> IrqLine {
        MOCK_IRQ_BASE + IrqLine::from(id)
    }

    fn fifo_depth(&self) -> usize {
        self.state.borrow().fifo_depth
    }

    fn poll_ready(&self, id: InstanceId) -> bool {
        self.with_port(id, |port| {
            if port.not_ready_polls > 0 {
                port.not_ready_polls -= 1;
                false
            } else {
                true
            }
        })
        .unwrap_or(false)
    }

    fn write(&mut self, id: InstanceId, chunk: &[u8]) -> Result<usize> {
        self.journal.record(MockEvent::Write {
            id,
            len: chunk.len(),
        });
        self.with_port(id, |port| {
            match port.write_fault_after {
                Some(0) => return Err(HwError::Fault),
                Some(ref mut remaining) => *remaining -= 1,
                None => {}
            }
            let accepted = port.write_limit.map_or(chunk.len(), |max| max.min(chunk.len()));
            port.tx.extend_from_slice(&chunk[..accepted]);
            Ok(accepted)
        })?
    }

    /// Reports data that never arrives as a fault instead of hanging
    fn read(&mut self, id: InstanceId, buf: &mut [u8]) -> Result<usize> {
        self.journal.record(MockEvent::Read { id, len: buf.len() });
        self.with_port(id, |port| {
            if port.rx.len() < buf.len() {
                return Err(HwError::Fault);
            }
            for slot in buf.iter_mut() {
                *slot = port.rx.pop_front().unwrap_or_default();
            }
            Ok(buf.len())
        })?
    }

    fn begin_transfer(&mut self, id: InstanceId, request: TransferRequest<'_>) -> Result<()> {
        let transfer = match request {
            TransferRequest::Receive { len } => MockTransfer::Receive { len },
            TransferRequest::Transmit { data } => MockTransfer::Transmit {
                data: data.to_vec(),
            },
        };

        self.with_port(id, |port| {
            if port.force_busy || port.pending.is_some() {
                return Err(HwError::Busy);
            }
            port.pending = Some(transfer.clone());
            Ok(())
        })??;

        self.journal.record(MockEvent::BeginTransfer { id, transfer });
        Ok(())
    }

    fn collect_transfer(&mut self, id: InstanceId, rx: &mut [u8]) -> Result<Progress> {
        self.with_port(id, |port| {
            let Some(pending) = port.pending.take() else {
                return Ok(Progress::Complete(0));
            };

            if port.fault_next_transfer {
                port.fault_next_transfer = false;
                return Err(HwError::Fault);
            }

            match pending {
                MockTransfer::Receive { len } => {
                    if port.rx.len() < len {
                        port.pending = Some(MockTransfer::Receive { len });
                        return Ok(Progress::InProgress);
                    }
                    for i in 0..len {
                        let byte = port.rx.pop_front().unwrap_or_default();
                        if let Some(slot) = rx.get_mut(i) {
                            *slot = byte;
                        }
                    }
                    Ok(Progress::Complete(len))
                }
                MockTransfer::Transmit { data } => {
                    port.tx.extend_from_slice(&data);
                    Ok(Progress::Complete(data.len()))
                }
            }
        })?
    }
}

struct MockIrqState {
    router: IrqRouter,
    enabled: Vec<IrqLine>,
    register_error: Option<IrqError>,
    enable_error: Option<IrqError>,
}

/// Mock interrupt controller
#[derive(Clone)]
pub struct MockIrq {
    state: Rc<RefCell<MockIrqState>>,
    journal: Journal,
}

impl MockIrq {
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            state: Rc::new(RefCell::new(MockIrqState {
                router: IrqRouter::new(MOCK_IRQ_LINES),
                enabled: Vec::new(),
                register_error: None,
                enable_error: None,
            })),
            journal,
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn is_enabled(&self, line: IrqLine) -> bool {
        self.state.borrow().enabled.contains(&line)
    }

    pub fn is_registered(&self, line: IrqLine) -> bool {
        self.state.borrow().router.is_registered(line)
    }

    /// Instance routed to `line`
    pub fn route(&self, line: IrqLine) -> Option<InstanceId> {
        self.state.borrow().router.route(line)
    }

    /// Make the next `register_handler` fail with `error`
    pub fn fail_next_register(&self, error: IrqError) {
        self.state.borrow_mut().register_error = Some(error);
    }

    /// Make the next `enable` fail with `error`
    pub fn fail_next_enable(&self, error: IrqError) {
        self.state.borrow_mut().enable_error = Some(error);
    }
}

impl Default for MockIrq {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqController for MockIrq {
    fn register_handler(&mut self, line: IrqLine, instance: InstanceId) -> crate::irq::Result<()> {
        {
            let mut state = self.state.borrow_mut();
            if let Some(error) = state.register_error.take() {
                return Err(error);
            }
            state.router.register(line, instance)?;
        }
        self.journal.record(MockEvent::RegisterHandler(line));
        Ok(())
    }

    fn unregister_handler(&mut self, line: IrqLine) -> crate::irq::Result<()> {
        self.state.borrow_mut().router.unregister(line)?;
        self.journal.record(MockEvent::UnregisterHandler(line));
        Ok(())
    }

    fn enable(&mut self, line: IrqLine) -> crate::irq::Result<()> {
        {
            let mut state = self.state.borrow_mut();
            if let Some(error) = state.enable_error.take() {
                return Err(error);
            }
            if !state.enabled.contains(&line) {
                state.enabled.push(line);
            }
        }
        self.journal.record(MockEvent::Enable(line));
        Ok(())
    }

    fn disable(&mut self, line: IrqLine) -> crate::irq::Result<()> {
        self.state.borrow_mut().enabled.retain(|l| *l != line);
        self.journal.record(MockEvent::Disable(line));
        Ok(())
    }
}

/// A mock UART bank and interrupt controller sharing one journal
pub fn mock_board(instances: usize) -> (MockUart, MockIrq) {
    let journal = Journal::new();
    (
        MockUart::with_journal(instances, journal.clone()),
        MockIrq::with_journal(journal),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_mock_uart_write() {
        let mut uart = MockUart::new(1);
        let written = uart.write(0, b"Hello").unwrap();
        assert_eq!(written, 5);
        assert_eq!(uart.tx_data(0), b"Hello");
    }

    #[test]
    fn test_mock_uart_read() {
        let mut uart = MockUart::new(1);
        uart.inject_rx(0, b"Test Data");

        let mut buffer = [0u8; 4];
        assert_eq!(uart.read(0, &mut buffer), Ok(4));
        assert_eq!(&buffer, b"Test");

        // Not enough left for a full read
        let mut buffer2 = [0u8; 10];
        assert_eq!(uart.read(0, &mut buffer2), Err(HwError::Fault));
    }

    #[test]
    fn test_shared_handles() {
        let uart = MockUart::new(2);
        let mut driver_side = uart.clone();

        driver_side.configure(1, &LineConfig::default()).unwrap();
        assert!(uart.is_configured(1));
        assert!(!uart.is_configured(0));
    }

    #[test]
    fn test_begin_transfer_busy_while_pending() {
        let mut uart = MockUart::new(1);

        uart.begin_transfer(0, TransferRequest::Receive { len: 1 }).unwrap();
        assert_eq!(
            uart.begin_transfer(0, TransferRequest::Receive { len: 1 }),
            Err(HwError::Busy)
        );
        assert_eq!(uart.pending(0), Some(MockTransfer::Receive { len: 1 }));
    }

    #[test]
    fn test_collect_receive() {
        let mut uart = MockUart::new(1);
        uart.begin_transfer(0, TransferRequest::Receive { len: 1 }).unwrap();

        let mut rx = [0u8; 1];
        assert_eq!(uart.collect_transfer(0, &mut rx), Ok(Progress::InProgress));

        uart.inject_rx(0, b"q");
        assert_eq!(uart.collect_transfer(0, &mut rx), Ok(Progress::Complete(1)));
        assert_eq!(rx[0], b'q');
        assert_eq!(uart.pending(0), None);
    }

    #[test]
    fn test_injected_faults() {
        let mut uart = MockUart::new(1);

        uart.reject_configure(0, HwError::Unsupported);
        assert_eq!(
            uart.configure(0, &LineConfig::default()),
            Err(HwError::Unsupported)
        );
        uart.configure(0, &LineConfig::default()).unwrap();

        uart.fail_write_after(0, 1);
        assert_eq!(uart.write(0, b"ab"), Ok(2));
        assert_eq!(uart.write(0, b"cd"), Err(HwError::Fault));
        assert_eq!(uart.tx_data(0), b"ab");
    }

    #[test]
    fn test_delay_ready() {
        let uart = MockUart::new(1);
        uart.delay_ready(0, 2);
        assert!(!uart.poll_ready(0));
        assert!(!uart.poll_ready(0));
        assert!(uart.poll_ready(0));
    }

    #[test]
    fn test_board_journal_order() {
        let (mut uart, mut irq) = mock_board(1);

        uart.configure(0, &LineConfig::default()).unwrap();
        irq.register_handler(MOCK_IRQ_BASE, 0).unwrap();
        irq.enable(MOCK_IRQ_BASE).unwrap();
        irq.disable(MOCK_IRQ_BASE).unwrap();
        uart.shutdown(0);

        assert_eq!(
            uart.journal().events(),
            vec![
                MockEvent::Configure(0),
                MockEvent::RegisterHandler(MOCK_IRQ_BASE),
                MockEvent::Enable(MOCK_IRQ_BASE),
                MockEvent::Disable(MOCK_IRQ_BASE),
                MockEvent::Shutdown(0),
            ]
        );
        assert_eq!(irq.route(MOCK_IRQ_BASE), Some(0));
        assert!(!irq.is_enabled(MOCK_IRQ_BASE));
    }
}
