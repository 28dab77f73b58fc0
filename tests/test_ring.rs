// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// SPSC ring buffer tests: FIFO order, full/empty detection, the zero-copy
// interface, wraparound, and a threaded producer/consumer stress run.

use zerocp::SpscRing;

#[test]
fn starts_empty() {
    let ring = SpscRing::<u64, 8>::zeroed_boxed();
    assert!(ring.is_empty());
    assert!(!ring.is_full());
    assert_eq!(ring.len(), 0);
    assert_eq!(ring.capacity(), 8);

    let mut out = 0u64;
    assert!(!ring.try_pop(&mut out), "empty ring must not pop");
}

#[test]
fn fifo_order() {
    let ring = SpscRing::<u64, 8>::zeroed_boxed();
    for value in 0..5u64 {
        assert!(ring.try_push(&value));
    }
    assert_eq!(ring.len(), 5);

    let mut out = 0u64;
    for expected in 0..5u64 {
        assert!(ring.try_pop(&mut out));
        assert_eq!(out, expected);
    }
    assert!(ring.is_empty());
}

#[test]
fn rejects_push_when_full() {
    let ring = SpscRing::<u32, 4>::zeroed_boxed();
    for value in 0..4u32 {
        assert!(ring.try_push(&value));
    }
    assert!(ring.is_full());
    assert!(!ring.try_push(&99), "full ring must refuse");

    // Drain one, then there is room again.
    let mut out = 0u32;
    assert!(ring.try_pop(&mut out));
    assert_eq!(out, 0);
    assert!(ring.try_push(&99));
    assert!(ring.is_full());
}

#[test]
fn zero_copy_interface() {
    let ring = SpscRing::<u64, 4>::zeroed_boxed();

    let slot = ring.begin_push().expect("ring has room");
    unsafe { slot.write(42) };
    ring.commit_push();
    assert_eq!(ring.len(), 1);

    let slot = ring.begin_pop().expect("one element queued");
    assert_eq!(unsafe { *slot }, 42);
    ring.commit_pop();
    assert!(ring.is_empty());

    // Without commit, the element is not visible.
    let _ = ring.begin_push().expect("room");
    assert!(ring.is_empty());
}

#[test]
fn begin_push_fails_when_full() {
    let ring = SpscRing::<u8, 2>::zeroed_boxed();
    assert!(ring.try_push(&1));
    assert!(ring.try_push(&2));
    assert!(ring.begin_push().is_none());
    assert!(ring.begin_pop().is_some());
}

#[test]
fn wraparound_preserves_order() {
    let ring = SpscRing::<u64, 4>::zeroed_boxed();
    let mut out = 0u64;
    // Far more elements than capacity, forcing many wraps.
    for value in 0..1000u64 {
        assert!(ring.try_push(&value));
        assert!(ring.try_pop(&mut out));
        assert_eq!(out, value);
    }
}

#[test]
fn reset_empties_the_ring() {
    let ring = SpscRing::<u32, 8>::zeroed_boxed();
    for value in 0..6u32 {
        ring.try_push(&value);
    }
    ring.reset();
    assert!(ring.is_empty());
    let mut out = 0u32;
    assert!(!ring.try_pop(&mut out));
    // Usable again after reset.
    assert!(ring.try_push(&7));
    assert!(ring.try_pop(&mut out));
    assert_eq!(out, 7);
}

// One producer, one consumer, different threads: every element arrives
// exactly once, in order, unless try_push reported failure.
#[test]
fn threaded_producer_consumer() {
    const COUNT: u64 = 100_000;
    let ring = SpscRing::<u64, 64>::zeroed_boxed();

    std::thread::scope(|scope| {
        let producer = scope.spawn(|| {
            let mut pushed = 0u64;
            let mut value = 0u64;
            while value < COUNT {
                if ring.try_push(&value) {
                    pushed += 1;
                    value += 1;
                } else {
                    std::hint::spin_loop();
                }
            }
            pushed
        });

        let consumer = scope.spawn(|| {
            let mut expected = 0u64;
            let mut out = 0u64;
            while expected < COUNT {
                if ring.try_pop(&mut out) {
                    assert_eq!(out, expected, "order violated");
                    expected += 1;
                } else {
                    std::hint::spin_loop();
                }
            }
            expected
        });

        assert_eq!(producer.join().unwrap(), COUNT);
        assert_eq!(consumer.join().unwrap(), COUNT);
    });
    assert!(ring.is_empty());
}
