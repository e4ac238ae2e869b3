//! Async Engine - submission and completion of nonblocking transfers
//!
//! Per instance the descriptor moves `Idle -> InFlight` on submit and back to
//! `Idle` when a caller transfer completes. A background receive transfer
//! completes into the receive queue and is immediately re-armed, so the
//! instance stays `InFlight` for as long as it lives.
//!
//! [`submit`] runs in caller context with the instance's interrupt line
//! masked. [`complete`] runs in completion context and never blocks; it only
//! writes the producer half of the receive queue.

use core::slice;

use kaal_uart_platform::{InstanceId, IrqController, Progress, UartHardware};

use crate::descriptor::{Completed, Direction, Payload, Transfer};
use crate::table::InstanceSlot;
use crate::{Error, Result};

/// Record `transfer` on the instance and start it on the hardware
///
/// # Errors
/// - `Error::InvalidArgument` for a zero-length transfer
/// - `Error::Busy` if a transfer is already in flight or the peripheral
///   reports one outstanding
pub(crate) fn submit<H, I>(
    hw: &mut H,
    irq: &mut I,
    id: InstanceId,
    slot: &mut InstanceSlot,
    transfer: Transfer,
) -> Result<()>
where
    H: UartHardware,
    I: IrqController,
{
    if transfer.length == 0 {
        return Err(Error::InvalidArgument);
    }

    let masked = slot.masked_line();
    if let Some(line) = masked {
        irq.disable(line)?;
    }

    let result = start(hw, id, slot, transfer);

    if let Some(line) = masked {
        if let Err(err) = irq.enable(line) {
            log::warn!("UART{}: failed to unmask IRQ {}: {}", id, line, err);
        }
    }

    result
}

/// Record and start without masking; interrupt context calls this directly
fn start<H: UartHardware>(
    hw: &mut H,
    id: InstanceId,
    slot: &mut InstanceSlot,
    transfer: Transfer,
) -> Result<()> {
    let direction = transfer.direction;
    let length = transfer.length;

    let request = match slot.descriptor.begin(transfer) {
        Ok(recorded) => recorded.request(),
        Err(_) => {
            log::debug!("UART{}: {:?} rejected, transfer in flight", id, direction);
            return Err(Error::Busy);
        }
    };

    if let Err(err) = hw.begin_transfer(id, request) {
        slot.descriptor.take();
        return Err(err.into());
    }

    log::debug!("UART{}: {:?} of {} bytes submitted", id, direction, length);
    Ok(())
}

/// Handle the hardware's completion signal for the instance
///
/// A fault on a caller transfer clears it without invoking its callback. A
/// fault on the background receive discards that byte and re-arms.
pub(crate) fn complete<H: UartHardware>(hw: &mut H, id: InstanceId, slot: &mut InstanceSlot) {
    let Some(mut transfer) = slot.descriptor.take() else {
        log::warn!("UART{}: completion with no transfer in flight", id);
        return;
    };

    let receive = transfer.direction == Direction::Receive;
    let outcome = match &mut transfer.payload {
        Payload::Scratch => hw.collect_transfer(id, slice::from_mut(&mut slot.descriptor.scratch)),
        Payload::Owned(buffer) if receive => hw.collect_transfer(id, buffer),
        Payload::Owned(_) => hw.collect_transfer(id, &mut [0u8; 0]),
    };

    match outcome {
        Ok(Progress::InProgress) => slot.descriptor.resume(transfer),
        Ok(Progress::Complete(count)) => {
            transfer.transferred = count;
            finish(hw, id, slot, transfer);
        }
        Err(err) => {
            log::warn!(
                "UART{}: {:?} of {} bytes failed: {}",
                id,
                transfer.direction,
                transfer.length,
                err
            );
            if transfer.is_refill() {
                rearm(hw, id, slot);
            }
        }
    }
}

fn finish<H: UartHardware>(hw: &mut H, id: InstanceId, slot: &mut InstanceSlot, transfer: Transfer) {
    match transfer.payload {
        Payload::Scratch => refill(hw, id, slot),
        Payload::Owned(buffer) => {
            log::debug!(
                "UART{}: {:?} complete, {} of {} bytes",
                id,
                transfer.direction,
                transfer.transferred,
                transfer.length
            );
            if let Some(on_complete) = transfer.on_complete {
                on_complete(Completed {
                    direction: transfer.direction,
                    buffer,
                    transferred: transfer.transferred,
                });
            }
        }
    }
}

/// Queue the received scratch byte and re-arm the one-byte receive
fn refill<H: UartHardware>(hw: &mut H, id: InstanceId, slot: &mut InstanceSlot) {
    let byte = slot.descriptor.scratch;

    if let Some(rx) = slot.rx.as_mut() {
        if rx.push(byte).is_ok() {
            log::trace!("UART{}: rx {:#04x}", id, byte);
        } else {
            slot.overruns = slot.overruns.saturating_add(1);
            log::warn!(
                "UART{}: receive queue full, dropped {:#04x} ({} overruns)",
                id,
                byte,
                slot.overruns
            );
        }
    }

    rearm(hw, id, slot);
}

fn rearm<H: UartHardware>(hw: &mut H, id: InstanceId, slot: &mut InstanceSlot) {
    if let Err(err) = start(hw, id, slot, Transfer::refill()) {
        log::warn!("UART{}: failed to re-arm receive: {}", id, err);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::UartInitParam;
    use crate::descriptor::CompletionFn;
    use crate::table::SlotFlags;
    use crate::table::RxReader;
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use kaal_fifo::Lf256Fifo;
    use kaal_uart_platform::mock::{
        mock_board, MockEvent, MockIrq, MockTransfer, MockUart, MOCK_IRQ_BASE,
    };
    use std::sync::Mutex;

    fn setup() -> (MockUart, MockIrq, InstanceSlot) {
        let (uart, irq) = mock_board(1);
        let slot = InstanceSlot::new(UartInitParam::default(), MOCK_IRQ_BASE);
        (uart, irq, slot)
    }

    fn async_slot() -> (InstanceSlot, RxReader) {
        let (writer, reader) = Box::new(Lf256Fifo::new()).into_split();
        let mut slot = InstanceSlot::new(UartInitParam::default(), MOCK_IRQ_BASE);
        slot.rx = Some(writer);
        slot.flags = SlotFlags::ASYNC_RX | SlotFlags::IRQ_REGISTERED | SlotFlags::IRQ_ENABLED;
        (slot, reader)
    }

    fn counting_callback(calls: &Arc<AtomicUsize>) -> CompletionFn {
        let calls = Arc::clone(calls);
        Box::new(move |done: Completed| {
            assert_eq!(done.direction, Direction::Transmit);
            calls.fetch_add(done.transferred, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_submit_then_second_submit_busy() {
        let (mut uart, mut irq, mut slot) = setup();

        let first = Transfer::owned(Direction::Transmit, vec![1, 2, 3, 4], None);
        submit(&mut uart, &mut irq, 0, &mut slot, first).unwrap();

        let second = Transfer::owned(Direction::Transmit, vec![5, 6, 7, 8], None);
        assert_eq!(submit(&mut uart, &mut irq, 0, &mut slot, second), Err(Error::Busy));

        assert_eq!(
            uart.pending(0),
            Some(MockTransfer::Transmit { data: vec![1, 2, 3, 4] })
        );
    }

    #[test]
    fn test_zero_length_rejected_before_hardware() {
        let (mut uart, mut irq, mut slot) = setup();

        let empty = Transfer::owned(Direction::Receive, Vec::new(), None);
        assert_eq!(
            submit(&mut uart, &mut irq, 0, &mut slot, empty),
            Err(Error::InvalidArgument)
        );
        assert!(uart.journal().events().is_empty());
        assert!(slot.descriptor.is_idle());
    }

    #[test]
    fn test_hardware_busy_leaves_descriptor_idle() {
        let (mut uart, mut irq, mut slot) = setup();
        uart.set_busy(0, true);

        let transfer = Transfer::owned(Direction::Transmit, vec![1], None);
        assert_eq!(submit(&mut uart, &mut irq, 0, &mut slot, transfer), Err(Error::Busy));
        assert!(slot.descriptor.is_idle());
    }

    #[test]
    fn test_submit_masks_enabled_line() {
        let (mut uart, mut irq, _) = setup();
        let (mut slot, _reader) = async_slot();

        submit(&mut uart, &mut irq, 0, &mut slot, Transfer::refill()).unwrap();

        assert_eq!(
            uart.journal().events(),
            vec![
                MockEvent::Disable(MOCK_IRQ_BASE),
                MockEvent::BeginTransfer {
                    id: 0,
                    transfer: MockTransfer::Receive { len: 1 },
                },
                MockEvent::Enable(MOCK_IRQ_BASE),
            ]
        );
    }

    #[test]
    fn test_transmit_completion_invokes_callback_once() {
        let (mut uart, mut irq, mut slot) = setup();
        let calls = Arc::new(AtomicUsize::new(0));

        let transfer = Transfer::owned(
            Direction::Transmit,
            b"ping".to_vec(),
            Some(counting_callback(&calls)),
        );
        submit(&mut uart, &mut irq, 0, &mut slot, transfer).unwrap();

        complete(&mut uart, 0, &mut slot);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(slot.descriptor.is_idle());
        assert_eq!(uart.tx_data(0), b"ping");

        // Spurious completion: nothing in flight, callback already consumed
        complete(&mut uart, 0, &mut slot);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_receive_completion_returns_buffer() {
        let (mut uart, mut irq, mut slot) = setup();
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&received);
        let transfer = Transfer::owned(
            Direction::Receive,
            vec![0; 3],
            Some(Box::new(move |done: Completed| {
                *sink.lock().unwrap() = done.buffer;
            })),
        );
        submit(&mut uart, &mut irq, 0, &mut slot, transfer).unwrap();

        // Nothing arrived yet: interrupt was partial progress
        complete(&mut uart, 0, &mut slot);
        assert!(!slot.descriptor.is_idle());

        uart.inject_rx(0, b"abc");
        complete(&mut uart, 0, &mut slot);
        assert!(slot.descriptor.is_idle());
        assert_eq!(*received.lock().unwrap(), b"abc");
    }

    #[test]
    fn test_refill_queues_byte_and_rearms() {
        let (mut uart, mut irq, _) = setup();
        let (mut slot, mut reader) = async_slot();
        submit(&mut uart, &mut irq, 0, &mut slot, Transfer::refill()).unwrap();

        for &byte in b"hi!" {
            uart.inject_rx(0, &[byte]);
            complete(&mut uart, 0, &mut slot);
            assert_eq!(uart.pending(0), Some(MockTransfer::Receive { len: 1 }));
        }

        assert_eq!(reader.pop(), Ok(b'h'));
        assert_eq!(reader.pop(), Ok(b'i'));
        assert_eq!(reader.pop(), Ok(b'!'));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_refill_fault_discards_byte_and_rearms() {
        let (mut uart, mut irq, _) = setup();
        let (mut slot, mut reader) = async_slot();
        submit(&mut uart, &mut irq, 0, &mut slot, Transfer::refill()).unwrap();

        uart.fail_next_transfer(0);
        complete(&mut uart, 0, &mut slot);

        assert!(!slot.descriptor.is_idle());
        assert_eq!(uart.pending(0), Some(MockTransfer::Receive { len: 1 }));
        assert!(reader.is_empty());
        assert_eq!(slot.overruns, 0);

        uart.inject_rx(0, b"k");
        complete(&mut uart, 0, &mut slot);
        assert_eq!(reader.pop(), Ok(b'k'));
    }

    #[test]
    fn test_callback_not_invoked_on_fault() {
        let (mut uart, mut irq, mut slot) = setup();
        let calls = Arc::new(AtomicUsize::new(0));

        let transfer = Transfer::owned(
            Direction::Transmit,
            b"x".to_vec(),
            Some(counting_callback(&calls)),
        );
        submit(&mut uart, &mut irq, 0, &mut slot, transfer).unwrap();

        uart.fail_next_transfer(0);
        complete(&mut uart, 0, &mut slot);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(slot.descriptor.is_idle());
    }
}
