//! Blocking I/O - synchronous transfers that bypass the async engine
//!
//! The write loop never holds the hardware while it waits: each
//! [`attempt`] takes it for one ready check and at most one FIFO chunk, so
//! completions can run between attempts.

use kaal_uart_platform::{HwError, InstanceId, UartHardware};

use crate::table::RxReader;
use crate::{Error, Result};

/// One locked step of a blocking write
///
/// Returns `None` while the transmitter is not ready, otherwise the bytes
/// the hardware accepted from the front of `chunk`.
pub(crate) fn attempt<H: UartHardware>(
    hw: &mut H,
    id: InstanceId,
    chunk: &[u8],
) -> core::result::Result<Option<usize>, HwError> {
    if !hw.poll_ready(id) {
        return Ok(None);
    }
    hw.write(id, chunk).map(Some)
}

/// Write all of `data` in chunks of at most `depth` bytes
///
/// `step` performs one attempt on a chunk (see [`attempt`]). Bytes the
/// hardware did not accept are offered again in the next chunk.
///
/// # Errors
/// `Error::HardwareFault` carrying the bytes written before the fault. Those
/// bytes are already on the wire.
pub(crate) fn write<F>(id: InstanceId, data: &[u8], depth: usize, mut step: F) -> Result<usize>
where
    F: FnMut(&[u8]) -> core::result::Result<Option<usize>, HwError>,
{
    let depth = depth.max(1);
    let mut transferred = 0;

    while transferred < data.len() {
        let chunk = &data[transferred..data.len().min(transferred + depth)];

        match step(chunk) {
            Ok(Some(written)) if written > 0 => transferred += written.min(chunk.len()),
            Ok(_) => core::hint::spin_loop(),
            Err(err) => {
                log::warn!("UART{}: write fault after {} bytes: {}", id, transferred, err);
                return Err(Error::HardwareFault { transferred });
            }
        }
    }

    Ok(transferred)
}

/// Drain queued bytes into `buf`, stopping at the first empty slot
///
/// # Errors
/// `Error::WouldBlock` if the queue held nothing
pub(crate) fn drain(rx: &mut RxReader, buf: &mut [u8]) -> Result<usize> {
    let mut count = 0;
    for byte in buf.iter_mut() {
        match rx.pop() {
            Ok(value) => *byte = value,
            Err(_) => break,
        }
        count += 1;
    }

    if count == 0 {
        return Err(Error::WouldBlock);
    }
    Ok(count)
}

/// Read directly from the hardware until `buf` is full
pub(crate) fn read_direct<H: UartHardware>(
    hw: &mut H,
    id: InstanceId,
    buf: &mut [u8],
) -> Result<usize> {
    hw.read(id, buf).map_err(|err| {
        log::warn!("UART{}: direct read of {} bytes failed: {}", id, buf.len(), err);
        Error::from(err)
    })
}
