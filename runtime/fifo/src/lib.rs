//! Lock-free byte FIFO - Interrupt-to-caller byte transport
//!
//! # Purpose
//! Buffers bytes produced in interrupt context until the ordinary caller
//! context drains them, without any lock between the two.
//!
//! # Integration Points
//! - Depends on: nothing (pure `core`)
//! - Provides to: UART driver (asynchronous receive path)
//!
//! # Architecture
//! Fixed-capacity ring with two free-running atomic counters. `head` is only
//! written by the producer, `tail` only by the consumer. The queue is empty
//! when the counters are equal and full when they are `N` apart, so every
//! slot is usable and full/empty never collide.
//!
//! # Lock-Free Guarantees
//! - Single producer, single consumer (SPSC)
//! - Wait-free on both sides
//! - Producer publishes a slot with a `Release` store of `head`; consumer
//!   frees it with a `Release` store of `tail`. Each side reads the other
//!   counter with `Acquire`.
//!
//! # Handles
//! - [`ByteQueue::split`]: borrowed halves, for a queue on the stack
//! - [`ByteQueue::into_split`]: owned halves over one heap allocation, so
//!   the producer can sit in interrupt-side state and the consumer with the
//!   reader

#![no_std]

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use static_assertions::const_assert;

/// Capacity used by UART receive queues
pub const DEFAULT_CAPACITY: usize = 256;

const_assert!(DEFAULT_CAPACITY.is_power_of_two());

/// The 256-entry queue the UART receive path uses
pub type Lf256Fifo = ByteQueue<DEFAULT_CAPACITY>;

/// Queue error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoError {
    /// No free slot; the byte was not stored
    Full,
    /// Nothing buffered
    Empty,
}

impl fmt::Display for FifoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FifoError::Full => write!(f, "FIFO full"),
            FifoError::Empty => write!(f, "FIFO empty"),
        }
    }
}

pub type Result<T> = core::result::Result<T, FifoError>;

/// Single-producer/single-consumer byte ring
///
/// # Type Parameters
/// * `N` - Capacity in bytes (must be a power of 2)
///
/// Owned access (`&mut self`) can push and pop directly. To feed the queue
/// from one context and drain it from another, [`split`](Self::split) it
/// into a [`Producer`] and a [`Consumer`].
pub struct ByteQueue<const N: usize> {
    /// Ring storage
    buffer: UnsafeCell<[u8; N]>,
    /// Total bytes ever written (producer owned)
    head: AtomicUsize,
    /// Total bytes ever read (consumer owned)
    tail: AtomicUsize,
}

// Only one Producer and one Consumer can exist at a time (split borrows the
// queue mutably), and they touch disjoint slots ordered by head/tail.
unsafe impl<const N: usize> Sync for ByteQueue<N> {}

impl<const N: usize> ByteQueue<N> {
    /// Create an empty queue
    ///
    /// # Panics
    /// Panics if N is not a power of 2 (compile-time when used in a const)
    pub const fn new() -> Self {
        assert!(N.is_power_of_two(), "FIFO capacity must be power of 2");

        Self {
            buffer: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Total number of slots
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Push a byte (owned access)
    ///
    /// # Errors
    /// Returns `FifoError::Full` if no slot is free; the queue is unchanged.
    pub fn push(&mut self, byte: u8) -> Result<()> {
        // SAFETY: &mut self excludes any other producer or consumer.
        unsafe { self.enqueue(byte) }
    }

    /// Pop the oldest byte (owned access)
    ///
    /// # Errors
    /// Returns `FifoError::Empty` if nothing is buffered.
    pub fn pop(&mut self) -> Result<u8> {
        // SAFETY: &mut self excludes any other producer or consumer.
        unsafe { self.dequeue() }
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        let head = self.head.load(Ordering::Relaxed);
        self.tail.store(head, Ordering::Release);
    }

    /// Split into producer and consumer halves
    ///
    /// The halves borrow the queue, so no other access is possible while
    /// either one is alive.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        (Producer { queue: &*self }, Consumer { queue: &*self })
    }

    /// Split a heap-allocated queue into owned halves
    ///
    /// Consuming the box guarantees these are the only two handles ever
    /// created for this queue.
    pub fn into_split(self: Box<Self>) -> (OwnedProducer<N>, OwnedConsumer<N>) {
        let queue: Arc<Self> = Arc::from(self);
        (
            OwnedProducer {
                queue: Arc::clone(&queue),
            },
            OwnedConsumer { queue },
        )
    }

    /// # Safety
    /// Caller must be the only producer.
    unsafe fn enqueue(&self, byte: u8) -> Result<()> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) == N {
            return Err(FifoError::Full);
        }

        let slot = (self.buffer.get() as *mut u8).add(head & (N - 1));
        slot.write(byte);

        self.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// # Safety
    /// Caller must be the only consumer.
    unsafe fn dequeue(&self) -> Result<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if head == tail {
            return Err(FifoError::Empty);
        }

        let slot = (self.buffer.get() as *const u8).add(tail & (N - 1));
        let byte = slot.read();

        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(byte)
    }
}

impl<const N: usize> Default for ByteQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for ByteQueue<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteQueue")
            .field("capacity", &N)
            .field("len", &self.len())
            .finish()
    }
}

/// Producer half (interrupt side)
pub struct Producer<'a, const N: usize> {
    queue: &'a ByteQueue<N>,
}

impl<'a, const N: usize> Producer<'a, N> {
    /// Push a byte
    ///
    /// Never blocks. On `Full` the caller decides whether to drop the byte.
    pub fn push(&mut self, byte: u8) -> Result<()> {
        // SAFETY: split() hands out exactly one Producer per borrow.
        unsafe { self.queue.enqueue(byte) }
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }
}

/// Consumer half (caller side)
pub struct Consumer<'a, const N: usize> {
    queue: &'a ByteQueue<N>,
}

impl<'a, const N: usize> Consumer<'a, N> {
    /// Pop the oldest byte
    pub fn pop(&mut self) -> Result<u8> {
        // SAFETY: split() hands out exactly one Consumer per borrow.
        unsafe { self.queue.dequeue() }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Owned producer half, see [`ByteQueue::into_split`]
pub struct OwnedProducer<const N: usize> {
    queue: Arc<ByteQueue<N>>,
}

impl<const N: usize> OwnedProducer<N> {
    /// Push a byte; never blocks
    pub fn push(&mut self, byte: u8) -> Result<()> {
        // SAFETY: into_split() creates exactly one OwnedProducer per queue.
        unsafe { self.queue.enqueue(byte) }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }
}

impl<const N: usize> fmt::Debug for OwnedProducer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedProducer").field(&*self.queue).finish()
    }
}

/// Owned consumer half, see [`ByteQueue::into_split`]
pub struct OwnedConsumer<const N: usize> {
    queue: Arc<ByteQueue<N>>,
}

impl<const N: usize> OwnedConsumer<N> {
    /// Pop the oldest byte
    pub fn pop(&mut self) -> Result<u8> {
        // SAFETY: into_split() creates exactly one OwnedConsumer per queue.
        unsafe { self.queue.dequeue() }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<const N: usize> fmt::Debug for OwnedConsumer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedConsumer").field(&*self.queue).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_fifo_order() {
        let mut fifo: ByteQueue<8> = ByteQueue::new();

        fifo.push(1).unwrap();
        fifo.push(2).unwrap();
        fifo.push(3).unwrap();
        assert_eq!(fifo.len(), 3);

        assert_eq!(fifo.pop(), Ok(1));
        assert_eq!(fifo.pop(), Ok(2));
        assert_eq!(fifo.pop(), Ok(3));
        assert_eq!(fifo.pop(), Err(FifoError::Empty));
    }

    #[test]
    fn test_empty_on_creation() {
        let mut fifo = Lf256Fifo::new();
        assert!(fifo.is_empty());
        assert_eq!(fifo.capacity(), 256);
        assert_eq!(fifo.pop(), Err(FifoError::Empty));
    }

    #[test]
    fn test_every_slot_usable() {
        let mut fifo: ByteQueue<4> = ByteQueue::new();
        for b in 0..4 {
            fifo.push(b).unwrap();
        }
        assert!(fifo.is_full());
        assert_eq!(fifo.push(99), Err(FifoError::Full));
    }

    #[test]
    fn test_full_keeps_prior_contents() {
        let mut fifo: ByteQueue<4> = ByteQueue::new();
        for b in [10, 20, 30, 40] {
            fifo.push(b).unwrap();
        }

        // Dropped byte must not disturb what is already queued
        assert_eq!(fifo.push(50), Err(FifoError::Full));
        assert_eq!(fifo.len(), 4);

        assert_eq!(fifo.pop(), Ok(10));
        assert_eq!(fifo.pop(), Ok(20));
        assert_eq!(fifo.pop(), Ok(30));
        assert_eq!(fifo.pop(), Ok(40));
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_wraparound() {
        let mut fifo: ByteQueue<4> = ByteQueue::new();

        for round in 0u8..50 {
            fifo.push(round).unwrap();
            fifo.push(round.wrapping_mul(3)).unwrap();
            assert_eq!(fifo.pop(), Ok(round));
            assert_eq!(fifo.pop(), Ok(round.wrapping_mul(3)));
        }
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut fifo: ByteQueue<8> = ByteQueue::new();
        fifo.push(1).unwrap();
        fifo.push(2).unwrap();
        fifo.clear();
        assert!(fifo.is_empty());

        fifo.push(3).unwrap();
        assert_eq!(fifo.pop(), Ok(3));
    }

    #[test]
    fn test_split_halves_share_storage() {
        let mut fifo: ByteQueue<8> = ByteQueue::new();
        {
            let (mut producer, mut consumer) = fifo.split();
            producer.push(b'a').unwrap();
            producer.push(b'b').unwrap();
            assert_eq!(consumer.len(), 2);
            assert_eq!(consumer.pop(), Ok(b'a'));
        }
        assert_eq!(fifo.pop(), Ok(b'b'));
    }

    #[test]
    fn test_owned_halves_share_storage() {
        let (mut producer, mut consumer) = Box::new(ByteQueue::<4>::new()).into_split();

        producer.push(7).unwrap();
        producer.push(8).unwrap();
        assert_eq!(consumer.len(), 2);
        assert_eq!(consumer.pop(), Ok(7));

        // Producer sees the slot freed by the consumer
        producer.push(9).unwrap();
        producer.push(10).unwrap();
        producer.push(11).unwrap();
        assert!(producer.is_full());
        assert_eq!(producer.push(12), Err(FifoError::Full));

        assert_eq!(consumer.pop(), Ok(8));
        assert_eq!(consumer.pop(), Ok(9));
    }
}
