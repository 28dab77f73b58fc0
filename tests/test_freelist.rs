// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Free-index list tests: initialization order, exhaustion, range checks,
// and conservation under concurrent push/pop: no index may ever be lost
// or duplicated.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use zerocp::relative_ptr::{self, SegmentId};
use zerocp::MpmcFreeList;

static NEXT_ID: AtomicU64 = AtomicU64::new(4100);

/// Registered heap arena holding one free list and its index array.
struct ListArena {
    base: *mut u8,
    layout: std::alloc::Layout,
    id: SegmentId,
}

impl ListArena {
    fn with_capacity(capacity: u32) -> (Self, *mut MpmcFreeList) {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let list_bytes = std::mem::size_of::<MpmcFreeList>();
        let index_bytes = MpmcFreeList::required_index_memory_size(capacity) as usize;
        let layout = std::alloc::Layout::from_size_align(list_bytes + index_bytes, 4096).unwrap();
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!base.is_null());
        relative_ptr::register_segment(id, base).unwrap();

        let list = base as *mut MpmcFreeList;
        let indices = unsafe { base.add(list_bytes) } as *mut u32;
        unsafe { (*list).init(indices, capacity, id) };
        (Self { base, layout, id }, list)
    }
}

impl Drop for ListArena {
    fn drop(&mut self) {
        relative_ptr::unregister_segment(self.id);
        unsafe { std::alloc::dealloc(self.base, self.layout) };
    }
}

#[test]
fn required_size_is_aligned() {
    assert_eq!(MpmcFreeList::required_index_memory_size(1), 8);
    assert_eq!(MpmcFreeList::required_index_memory_size(3), 16);
    assert_eq!(MpmcFreeList::required_index_memory_size(16), 72);
    assert_eq!(MpmcFreeList::required_index_memory_size(16) % 8, 0);
}

#[test]
fn pops_every_index_exactly_once() {
    let (_arena, list) = ListArena::with_capacity(8);
    let list = unsafe { &*list };

    let mut seen = HashSet::new();
    for _ in 0..8 {
        let index = list.pop().expect("list starts full");
        assert!(index < 8);
        assert!(seen.insert(index), "index {index} popped twice");
    }
    assert_eq!(list.pop(), None, "exhausted list must report empty");
}

#[test]
fn push_returns_indices_for_reuse() {
    let (_arena, list) = ListArena::with_capacity(4);
    let list = unsafe { &*list };

    for _ in 0..4 {
        list.pop().unwrap();
    }
    assert_eq!(list.pop(), None);

    assert!(list.push(2));
    assert!(list.push(0));
    // LIFO: last pushed comes back first.
    assert_eq!(list.pop(), Some(0));
    assert_eq!(list.pop(), Some(2));
    assert_eq!(list.pop(), None);
}

#[test]
fn push_rejects_out_of_range() {
    let (_arena, list) = ListArena::with_capacity(4);
    let list = unsafe { &*list };
    assert!(!list.push(4), "capacity is the invalid sentinel");
    assert!(!list.push(u32::MAX));
}

#[test]
fn capacity_accessor() {
    let (_arena, list) = ListArena::with_capacity(13);
    assert_eq!(unsafe { &*list }.capacity(), 13);
}

// Conservation under contention: many threads repeatedly pop a batch and
// push it back. At quiescence the list must contain every index exactly
// once. Nothing lost, nothing duplicated, no ABA corruption.
#[test]
fn concurrent_pop_push_conserves_indices() {
    const CAPACITY: u32 = 64;
    const THREADS: usize = 8;
    const ROUNDS: usize = 2000;

    let (_arena, list) = ListArena::with_capacity(CAPACITY);
    let list = unsafe { &*list };

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                let mut held = Vec::new();
                for round in 0..ROUNDS {
                    while held.len() < 4 {
                        match list.pop() {
                            Some(index) => held.push(index),
                            None => break,
                        }
                    }
                    for index in held.drain(..) {
                        assert!(list.push(index));
                    }
                    if round % 64 == 0 {
                        std::thread::yield_now();
                    }
                }
            });
        }
    });

    let mut seen = HashSet::new();
    while let Some(index) = list.pop() {
        assert!(index < CAPACITY);
        assert!(seen.insert(index), "index {index} present twice after stress");
    }
    assert_eq!(seen.len(), CAPACITY as usize, "indices were lost");
}
