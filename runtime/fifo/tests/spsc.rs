//! Cross-thread tests for the SPSC byte queue
//!
//! One thread plays the interrupt producer, the other the caller consumer.

use std::sync::atomic::{AtomicBool, Ordering};

use kaal_fifo::{ByteQueue, FifoError};

/// Every byte pushed arrives exactly once and in order
#[test]
fn test_spsc_preserves_order_across_threads() {
    const TOTAL: usize = 100_000;
    let mut fifo: ByteQueue<64> = ByteQueue::new();
    let (mut producer, mut consumer) = fifo.split();

    crossbeam::thread::scope(|s| {
        s.spawn(move |_| {
            let mut sent = 0usize;
            while sent < TOTAL {
                match producer.push((sent % 251) as u8) {
                    Ok(()) => sent += 1,
                    Err(FifoError::Full) => std::hint::spin_loop(),
                    Err(e) => panic!("unexpected error: {:?}", e),
                }
            }
        });

        let mut received = 0usize;
        while received < TOTAL {
            match consumer.pop() {
                Ok(byte) => {
                    assert_eq!(byte, (received % 251) as u8, "byte {} out of order", received);
                    received += 1;
                }
                Err(FifoError::Empty) => std::hint::spin_loop(),
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }
    })
    .unwrap();

    assert!(fifo.is_empty());
}

/// A producer that drops on Full accounts for every byte exactly once
#[test]
fn test_dropping_producer_loses_nothing_unaccounted() {
    const TOTAL: u32 = 20_000;
    let mut fifo: ByteQueue<16> = ByteQueue::new();
    let (mut producer, mut consumer) = fifo.split();
    let done = AtomicBool::new(false);

    let (dropped, drained) = crossbeam::thread::scope(|s| {
        let handle = s.spawn(|_| {
            let mut dropped = 0u32;
            for i in 0..TOTAL {
                if producer.push((i % 256) as u8).is_err() {
                    dropped += 1;
                }
            }
            done.store(true, Ordering::Release);
            dropped
        });

        let mut drained = 0u32;
        loop {
            match consumer.pop() {
                Ok(_) => drained += 1,
                Err(_) if done.load(Ordering::Acquire) && consumer.is_empty() => break,
                Err(_) => std::thread::yield_now(),
            }
        }
        (handle.join().unwrap(), drained)
    })
    .unwrap();

    assert_eq!(dropped + drained, TOTAL);
}

/// Owned halves move into independent threads with no shared borrow
#[test]
fn test_owned_halves_across_threads() {
    const TOTAL: usize = 50_000;
    let (mut producer, mut consumer) = Box::new(ByteQueue::<32>::new()).into_split();

    let writer = std::thread::spawn(move || {
        let mut sent = 0usize;
        while sent < TOTAL {
            if producer.push((sent % 199) as u8).is_ok() {
                sent += 1;
            } else {
                std::hint::spin_loop();
            }
        }
    });

    let mut received = 0usize;
    while received < TOTAL {
        match consumer.pop() {
            Ok(byte) => {
                assert_eq!(byte, (received % 199) as u8);
                received += 1;
            }
            Err(_) => std::hint::spin_loop(),
        }
    }

    writer.join().unwrap();
    assert!(consumer.is_empty());
}
