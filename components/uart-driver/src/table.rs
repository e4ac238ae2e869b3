//! Instance table - fixed slots indexed by instance number

use core::array;

use bitflags::bitflags;
use kaal_fifo::{OwnedConsumer, OwnedProducer};
use kaal_uart_platform::{InstanceId, IrqLine};

use crate::config::{UartInitParam, MAX_INSTANCES, RX_FIFO_CAPACITY};
use crate::descriptor::TransferDescriptor;

/// Completion-side half of an instance's receive queue
pub(crate) type RxWriter = OwnedProducer<RX_FIFO_CAPACITY>;

/// Reader-side half of an instance's receive queue
pub(crate) type RxReader = OwnedConsumer<RX_FIFO_CAPACITY>;

bitflags! {
    /// Resources an instance currently holds
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct SlotFlags: u8 {
        /// Background receive into the receive queue
        const ASYNC_RX       = 1 << 0;
        /// Completion route registered with the interrupt controller
        const IRQ_REGISTERED = 1 << 1;
        /// Interrupt line enabled by this instance
        const IRQ_ENABLED    = 1 << 2;
    }
}

/// Everything owned by one initialized instance
pub(crate) struct InstanceSlot {
    pub config: UartInitParam,
    pub descriptor: TransferDescriptor,
    pub rx: Option<RxWriter>,
    pub irq_line: IrqLine,
    pub flags: SlotFlags,
    /// Bytes dropped because the receive queue was full
    pub overruns: u32,
}

impl InstanceSlot {
    pub fn new(config: UartInitParam, irq_line: IrqLine) -> Self {
        Self {
            config,
            descriptor: TransferDescriptor::default(),
            rx: None,
            irq_line,
            flags: SlotFlags::empty(),
            overruns: 0,
        }
    }

    /// Interrupt line to mask around descriptor updates, if this instance enabled one
    pub fn masked_line(&self) -> Option<IrqLine> {
        self.flags
            .contains(SlotFlags::IRQ_ENABLED)
            .then_some(self.irq_line)
    }
}

/// Slot table owned by the driver context
pub(crate) struct InstanceTable {
    slots: [Option<InstanceSlot>; MAX_INSTANCES],
}

impl InstanceTable {
    pub fn new() -> Self {
        Self {
            slots: array::from_fn(|_| None),
        }
    }

    pub fn get(&self, id: InstanceId) -> Option<&InstanceSlot> {
        self.slots.get(usize::from(id))?.as_ref()
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut InstanceSlot> {
        self.slots.get_mut(usize::from(id))?.as_mut()
    }

    pub fn is_occupied(&self, id: InstanceId) -> bool {
        self.get(id).is_some()
    }

    /// Store `slot` under `id`
    ///
    /// Hands the slot back if `id` is out of range or taken.
    pub fn insert(&mut self, id: InstanceId, slot: InstanceSlot) -> Result<(), InstanceSlot> {
        let Some(entry) = self.slots.get_mut(usize::from(id)) else {
            return Err(slot);
        };
        if entry.is_some() {
            return Err(slot);
        }
        *entry = Some(slot);
        Ok(())
    }

    pub fn take(&mut self, id: InstanceId) -> Option<InstanceSlot> {
        self.slots.get_mut(usize::from(id))?.take()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}
