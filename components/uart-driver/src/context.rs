//! Driver context - the process-wide owner of every UART instance
//!
//! # Locking
//! Hardware, interrupt controller and instance table sit behind one spin
//! lock. Caller operations hold it for bounded steps only; a blocking write
//! takes it once per ready check and FIFO chunk, never across the wait.
//!
//! Completion context never waits on that lock. A completion marks its
//! instance pending and runs only if the lock is free; otherwise the caller
//! that holds it runs the pending completions as it lets go.
//!
//! Each instance's receive queue is split. The producer lives in the
//! instance slot and is written only by completions. The consumer sits in a
//! separate per-instance reader lock that completion context never touches,
//! so draining received bytes never contends with the interrupt path.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::array;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use kaal_fifo::Lf256Fifo;
use kaal_uart_platform::{InstanceId, IrqController, IrqLine, UartHardware};
use spin::Mutex;
use static_assertions::const_assert;

use crate::config::MAX_INSTANCES;
use crate::descriptor::{CompletionFn, Direction, Transfer};
use crate::table::{InstanceSlot, InstanceTable, RxReader, SlotFlags};
use crate::{blocking, engine, Error, Result, UartHandle, UartInitParam, UartOps};

// One pending-completion bit per instance
const_assert!(MAX_INSTANCES <= 8);

/// No route published for an instance
const NO_ROUTE: u32 = 0;

/// State touched by both caller and completion context
struct Core<H, I> {
    hw: H,
    irq: I,
    table: InstanceTable,
}

impl<H: UartHardware, I: IrqController> Core<H, I> {
    fn complete(&mut self, id: InstanceId) {
        let Some(slot) = self.table.get_mut(id) else {
            log::warn!("UART{}: completion for uninitialized instance", id);
            return;
        };
        engine::complete(&mut self.hw, id, slot);
    }
}

/// Owns the hardware layer, the interrupt controller and the instance table
///
/// Every operation takes `&self`, so the platform's interrupt glue can call
/// [`on_interrupt`](Self::on_interrupt) or
/// [`on_hardware_complete`](Self::on_hardware_complete) while a caller
/// operation is in progress on the same context.
///
/// # Example
///
/// ```ignore
/// let uart = UartContext::new(MockUart::new(3), MockIrq::new());
///
/// let handle = uart.init(&UartInitParam {
///     asynchronous_rx: true,
///     ..Default::default()
/// })?;
/// uart.write(handle, b"hello\n")?;
/// ```
pub struct UartContext<H: UartHardware, I: IrqController> {
    core: Mutex<Core<H, I>>,
    readers: [Mutex<Option<RxReader>>; MAX_INSTANCES],
    /// Interrupt line per instance, offset by one; `NO_ROUTE` when unrouted
    routes: [AtomicU32; MAX_INSTANCES],
    /// Instances with a completion waiting for the core lock
    pending: AtomicU8,
}

impl<H: UartHardware, I: IrqController> UartContext<H, I> {
    pub fn new(hw: H, irq: I) -> Self {
        Self {
            core: Mutex::new(Core {
                hw,
                irq,
                table: InstanceTable::new(),
            }),
            readers: array::from_fn(|_| Mutex::new(None)),
            routes: array::from_fn(|_| AtomicU32::new(NO_ROUTE)),
            pending: AtomicU8::new(0),
        }
    }

    /// Number of initialized instances
    pub fn active_instances(&self) -> usize {
        self.with_core(|core| core.table.len())
    }

    /// Release the collaborators; initialized instances are not shut down
    pub fn into_parts(self) -> (H, I) {
        let core = self.core.into_inner();
        (core.hw, core.irq)
    }

    /// Received bytes dropped because the receive queue was full
    pub fn overruns(&self, handle: UartHandle) -> Result<u32> {
        self.with_slot(handle, |slot| slot.overruns)
    }

    /// Is a transfer in flight? Always true while background receive runs.
    pub fn is_busy(&self, handle: UartHandle) -> Result<bool> {
        self.with_slot(handle, |slot| !slot.descriptor.is_idle())
    }

    /// Bytes waiting in the receive queue (0 without background receive)
    pub fn rx_available(&self, handle: UartHandle) -> Result<usize> {
        if let Some(rx) = &*self.reader(handle.device_id())?.lock() {
            return Ok(rx.len());
        }
        self.with_slot(handle, |_| 0)
    }

    /// Deliver an interrupt on `line` to the instance routed to it
    pub fn on_interrupt(&self, line: IrqLine) {
        let routed = u32::from(line) + 1;
        match self
            .routes
            .iter()
            .position(|route| route.load(Ordering::Acquire) == routed)
        {
            Some(id) => self.on_hardware_complete(id as InstanceId),
            None => log::warn!("IRQ {}: no UART instance routed", line),
        }
    }

    /// Deliver a hardware completion to instance `id`
    ///
    /// Never waits: if a caller holds the driver, the completion runs when
    /// that caller lets go.
    pub fn on_hardware_complete(&self, id: InstanceId) {
        if usize::from(id) >= MAX_INSTANCES {
            log::warn!("UART{}: completion for unknown instance", id);
            return;
        }
        self.pending.fetch_or(1 << id, Ordering::SeqCst);
        self.run_pending();
    }

    /// Run marked completions unless someone else holds the core
    fn run_pending(&self) {
        while self.pending.load(Ordering::SeqCst) != 0 {
            // The holder runs them after unlocking
            let Some(mut core) = self.core.try_lock() else {
                return;
            };

            let pending = self.pending.swap(0, Ordering::SeqCst);
            for id in 0..MAX_INSTANCES as InstanceId {
                if pending & (1 << id) != 0 {
                    core.complete(id);
                }
            }
        }
    }

    /// Run `f` on the core, then any completions that arrived meanwhile
    fn with_core<R>(&self, f: impl FnOnce(&mut Core<H, I>) -> R) -> R {
        let result = f(&mut self.core.lock());
        self.run_pending();
        result
    }

    fn with_slot<R>(&self, handle: UartHandle, f: impl FnOnce(&InstanceSlot) -> R) -> Result<R> {
        self.with_core(|core| {
            core.table
                .get(handle.device_id())
                .map(f)
                .ok_or(Error::InvalidArgument)
        })
    }

    fn reader(&self, id: InstanceId) -> Result<&Mutex<Option<RxReader>>> {
        self.readers.get(usize::from(id)).ok_or(Error::InvalidArgument)
    }

    /// Register the completion route for `slot` and enable its line
    ///
    /// On failure `slot.flags` records what was acquired, for [`unroute`](Self::unroute).
    fn route(&self, irq: &mut I, id: InstanceId, slot: &mut InstanceSlot) -> Result<()> {
        irq.register_handler(slot.irq_line, id).map_err(|err| {
            log::warn!("UART{}: IRQ {} registration failed: {}", id, slot.irq_line, err);
            Error::ResourceExhausted
        })?;
        slot.flags |= SlotFlags::IRQ_REGISTERED;
        self.routes[usize::from(id)].store(u32::from(slot.irq_line) + 1, Ordering::Release);

        irq.enable(slot.irq_line).map_err(|err| {
            log::warn!("UART{}: IRQ {} enable failed: {}", id, slot.irq_line, err);
            Error::ResourceExhausted
        })?;
        slot.flags |= SlotFlags::IRQ_ENABLED;

        log::debug!("UART{}: completions routed from IRQ {}", id, slot.irq_line);
        Ok(())
    }

    /// Release what [`route`](Self::route) acquired: disable, then unregister
    fn unroute(&self, irq: &mut I, id: InstanceId, slot: &mut InstanceSlot) {
        if slot.flags.contains(SlotFlags::IRQ_ENABLED) {
            if let Err(err) = irq.disable(slot.irq_line) {
                log::warn!("UART{}: disable of IRQ {}: {}", id, slot.irq_line, err);
            }
        }
        self.release_route(irq, id, slot);
        slot.flags.remove(SlotFlags::IRQ_ENABLED);
    }

    /// Unregister the route, leaving the line's enable state alone
    fn release_route(&self, irq: &mut I, id: InstanceId, slot: &mut InstanceSlot) {
        self.routes[usize::from(id)].store(NO_ROUTE, Ordering::Release);
        if slot.flags.contains(SlotFlags::IRQ_REGISTERED) {
            if let Err(err) = irq.unregister_handler(slot.irq_line) {
                log::warn!("UART{}: unregister of IRQ {}: {}", id, slot.irq_line, err);
            }
        }
        slot.flags.remove(SlotFlags::IRQ_REGISTERED);
    }

    /// Create the receive queue, route the interrupt and arm the first
    /// one-byte receive
    fn start_async_rx(
        &self,
        core: &mut Core<H, I>,
        id: InstanceId,
        slot: &mut InstanceSlot,
    ) -> Result<RxReader> {
        let (writer, reader) = Box::new(Lf256Fifo::new()).into_split();
        slot.rx = Some(writer);
        slot.flags |= SlotFlags::ASYNC_RX;

        self.route(&mut core.irq, id, slot)?;
        engine::submit(&mut core.hw, &mut core.irq, id, slot, Transfer::refill())?;
        Ok(reader)
    }

    /// Undo a partial init in reverse order
    fn rollback(&self, core: &mut Core<H, I>, id: InstanceId, mut slot: InstanceSlot) {
        self.unroute(&mut core.irq, id, &mut slot);
        core.hw.shutdown(id);
        drop(slot);
    }

    fn submit(
        &self,
        handle: UartHandle,
        direction: Direction,
        buffer: Vec<u8>,
        on_complete: Option<CompletionFn>,
    ) -> Result<()> {
        if buffer.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let id = handle.device_id();
        self.with_core(|core| {
            let Core { hw, irq, table } = core;
            let slot = table.get_mut(id).ok_or(Error::InvalidArgument)?;

            // First nonblocking transfer on an instance without background
            // receive: its completion needs a route too
            if !slot.flags.contains(SlotFlags::IRQ_REGISTERED) {
                if let Err(err) = self.route(irq, id, slot) {
                    self.unroute(irq, id, slot);
                    return Err(err);
                }
            }

            let transfer = Transfer::owned(direction, buffer, on_complete);
            engine::submit(hw, irq, id, slot, transfer)
        })
    }
}

impl<H: UartHardware, I: IrqController> UartOps for UartContext<H, I> {
    fn init(&self, param: &UartInitParam) -> Result<UartHandle> {
        param.validate()?;
        let id = param.device_id;

        self.with_core(|core| {
            if core.table.is_occupied(id) {
                return Err(Error::Busy);
            }

            core.hw.configure(id, &param.line_config())?;

            let mut slot = InstanceSlot::new(*param, core.hw.irq_line(id));
            let reader = if param.asynchronous_rx {
                match self.start_async_rx(core, id, &mut slot) {
                    Ok(reader) => Some(reader),
                    Err(err) => {
                        self.rollback(core, id, slot);
                        return Err(err);
                    }
                }
            } else {
                None
            };

            if let Err(slot) = core.table.insert(id, slot) {
                self.rollback(core, id, slot);
                return Err(Error::Busy);
            }
            *self.readers[usize::from(id)].lock() = reader;

            log::debug!(
                "UART{}: initialized at {} baud, {} data bits, parity {:?}, async rx {}",
                id,
                param.baud_rate,
                param.size.bits(),
                param.parity,
                param.asynchronous_rx
            );
            Ok(UartHandle::from_raw(id))
        })
    }

    fn read(&self, handle: UartHandle, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let id = handle.device_id();
        if let Some(rx) = &mut *self.reader(id)?.lock() {
            return blocking::drain(rx, buf);
        }

        self.with_core(|core| {
            let slot = core.table.get(id).ok_or(Error::InvalidArgument)?;
            if slot.flags.contains(SlotFlags::ASYNC_RX) {
                // Initialized since the reader check; nothing queued yet
                return Err(Error::WouldBlock);
            }
            blocking::read_direct(&mut core.hw, id, buf)
        })
    }

    fn write(&self, handle: UartHandle, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let id = handle.device_id();
        let depth = self.with_core(|core| {
            core.table
                .get(id)
                .map(|_| core.hw.fifo_depth())
                .ok_or(Error::InvalidArgument)
        })?;

        blocking::write(id, data, depth, |chunk| {
            self.with_core(|core| blocking::attempt(&mut core.hw, id, chunk))
        })
    }

    fn read_nonblocking(
        &self,
        handle: UartHandle,
        buffer: Vec<u8>,
        on_complete: Option<CompletionFn>,
    ) -> Result<()> {
        self.submit(handle, Direction::Receive, buffer, on_complete)
    }

    fn write_nonblocking(
        &self,
        handle: UartHandle,
        data: Vec<u8>,
        on_complete: Option<CompletionFn>,
    ) -> Result<()> {
        self.submit(handle, Direction::Transmit, data, on_complete)
    }

    fn get_errors(&self, _handle: UartHandle) -> Result<u32> {
        Err(Error::NotImplemented)
    }

    fn remove(&self, handle: UartHandle) -> Result<()> {
        let id = handle.device_id();

        self.with_core(|core| {
            let mut slot = core.table.take(id).ok_or(Error::InvalidArgument)?;

            if slot
                .descriptor
                .in_flight()
                .is_some_and(|transfer| !transfer.is_refill())
            {
                log::warn!("UART{}: removed with a transfer in flight", id);
            }

            core.hw.shutdown(id);
            self.release_route(&mut core.irq, id, &mut slot);
            *self.readers[usize::from(id)].lock() = None;
            self.pending.fetch_and(!(1 << id), Ordering::SeqCst);

            log::debug!(
                "UART{}: removed ({} baud, {} overruns)",
                id,
                slot.config.baud_rate,
                slot.overruns
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaal_uart_platform::mock::{mock_board, MockEvent, MockIrq, MockTransfer, MockUart, MOCK_IRQ_BASE};

    fn context() -> (UartContext<MockUart, MockIrq>, MockUart, MockIrq) {
        let (uart, irq) = mock_board(3);
        let ctx = UartContext::new(uart.clone(), irq.clone());
        (ctx, uart, irq)
    }

    fn async_param(device_id: InstanceId) -> UartInitParam {
        UartInitParam {
            device_id,
            asynchronous_rx: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_init_and_remove() {
        let (ctx, uart, _irq) = context();
        let handle = ctx.init(&UartInitParam::default()).unwrap();
        assert_eq!(handle.device_id(), 0);
        assert_eq!(ctx.active_instances(), 1);
        assert!(uart.is_configured(0));

        ctx.remove(handle).unwrap();
        assert_eq!(ctx.active_instances(), 0);
        assert!(!uart.is_configured(0));
    }

    #[test]
    fn test_double_init_busy() {
        let (ctx, _uart, _irq) = context();
        ctx.init(&UartInitParam::default()).unwrap();
        assert_eq!(ctx.init(&UartInitParam::default()), Err(Error::Busy));
        assert_eq!(ctx.active_instances(), 1);
    }

    #[test]
    fn test_get_errors_not_implemented() {
        let (ctx, _uart, _irq) = context();
        let handle = ctx.init(&UartInitParam::default()).unwrap();
        assert_eq!(ctx.get_errors(handle), Err(Error::NotImplemented));
    }

    #[test]
    fn test_on_interrupt_routes_by_line() {
        let (ctx, uart, _irq) = context();
        let handle = ctx.init(&async_param(1)).unwrap();

        uart.inject_rx(1, b"z");
        ctx.on_interrupt(MOCK_IRQ_BASE + 1);
        assert_eq!(ctx.rx_available(handle), Ok(1));

        // Unrouted line is ignored
        ctx.on_interrupt(MOCK_IRQ_BASE);
        assert_eq!(ctx.rx_available(handle), Ok(1));
    }

    #[test]
    fn test_completion_waits_for_lock_holder() {
        let (ctx, uart, _irq) = context();
        let handle = ctx.init(&async_param(0)).unwrap();
        uart.inject_rx(0, b"q");

        // Interrupt arrives while a caller holds the driver
        let guard = ctx.core.lock();
        ctx.on_interrupt(MOCK_IRQ_BASE);
        assert_eq!(uart.pending(0), Some(MockTransfer::Receive { len: 1 }));
        assert_eq!(ctx.pending.load(Ordering::SeqCst), 1);
        drop(guard);

        // The next caller step runs it
        assert_eq!(ctx.is_busy(handle), Ok(true));
        assert_eq!(ctx.pending.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.rx_available(handle), Ok(1));
    }

    #[test]
    fn test_queue_drains_while_driver_is_held() {
        let (ctx, uart, _irq) = context();
        let handle = ctx.init(&async_param(0)).unwrap();
        uart.inject_rx(0, b"r");
        ctx.on_interrupt(MOCK_IRQ_BASE);

        // Reading queued bytes needs only the reader half
        let _guard = ctx.core.lock();
        let mut buf = [0u8; 4];
        assert_eq!(ctx.read(handle, &mut buf), Ok(1));
        assert_eq!(buf[0], b'r');
    }

    #[test]
    fn test_remove_releases_route_but_not_line() {
        let (ctx, uart, irq) = context();
        let handle = ctx.init(&async_param(0)).unwrap();

        uart.journal().clear();
        ctx.remove(handle).unwrap();

        assert_eq!(
            uart.journal().events(),
            [
                MockEvent::Shutdown(0),
                MockEvent::UnregisterHandler(MOCK_IRQ_BASE),
            ]
        );
        assert!(irq.is_enabled(MOCK_IRQ_BASE));
        assert!(!irq.is_registered(MOCK_IRQ_BASE));
        assert_eq!(ctx.routes[0].load(Ordering::SeqCst), NO_ROUTE);
    }

    #[test]
    fn test_nonblocking_routes_instance_on_first_use() {
        let (ctx, uart, irq) = context();
        let handle = ctx.init(&UartInitParam::default()).unwrap();
        assert!(!irq.is_registered(MOCK_IRQ_BASE));
        uart.journal().clear();

        ctx.write_nonblocking(handle, b"ab".to_vec(), None).unwrap();
        assert_eq!(
            uart.journal().events(),
            [
                MockEvent::RegisterHandler(MOCK_IRQ_BASE),
                MockEvent::Enable(MOCK_IRQ_BASE),
                MockEvent::Disable(MOCK_IRQ_BASE),
                MockEvent::BeginTransfer {
                    id: 0,
                    transfer: MockTransfer::Transmit { data: b"ab".to_vec() },
                },
                MockEvent::Enable(MOCK_IRQ_BASE),
            ]
        );

        // Routed once; later submissions only mask
        ctx.on_interrupt(MOCK_IRQ_BASE);
        uart.journal().clear();
        ctx.write_nonblocking(handle, b"cd".to_vec(), None).unwrap();
        assert_eq!(uart.journal().events()[0], MockEvent::Disable(MOCK_IRQ_BASE));
    }
}
