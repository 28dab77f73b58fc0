// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Tests for the segment registry and relative pointers: round trips, the
// null encoding, and unregistered-segment behavior.

use std::sync::atomic::{AtomicU64, Ordering};

use zerocp::relative_ptr::{self, RelativePointer, SegmentId};

static NEXT_ID: AtomicU64 = AtomicU64::new(4000);

fn unique_id() -> SegmentId {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A registered heap region standing in for a mapped segment.
struct Arena {
    base: *mut u8,
    layout: std::alloc::Layout,
    id: SegmentId,
}

impl Arena {
    fn new(size: usize) -> Self {
        let id = unique_id();
        let layout = std::alloc::Layout::from_size_align(size, 4096).unwrap();
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!base.is_null());
        relative_ptr::register_segment(id, base).expect("fresh id must register");
        Self { base, layout, id }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        relative_ptr::unregister_segment(self.id);
        unsafe { std::alloc::dealloc(self.base, self.layout) };
    }
}

#[test]
fn round_trip_same_address() {
    let arena = Arena::new(4096);
    let target = unsafe { arena.base.add(128) } as *const u64;

    let rp = RelativePointer::new(target, arena.id);
    assert!(!rp.is_null());
    assert_eq!(rp.offset(), 128);
    assert_eq!(rp.segment_id(), arena.id);
    assert_eq!(rp.get() as *const u64, target);
}

#[test]
fn null_is_null() {
    let rp: RelativePointer<u32> = RelativePointer::null();
    assert!(rp.is_null());
    assert!(rp.get().is_null());
    assert_eq!(rp.segment_id(), 0);
    assert_eq!(rp.offset(), 0);
}

#[test]
fn default_is_null() {
    let rp: RelativePointer<u8> = RelativePointer::default();
    assert!(rp.is_null());
}

#[test]
fn unregistered_segment_resolves_to_null() {
    let id = unique_id();
    let rp: RelativePointer<u32> = RelativePointer::from_offset(id, 64);
    assert!(!rp.is_null());
    assert!(rp.get().is_null(), "must never fabricate an address");
}

#[test]
fn resolution_follows_remapping() {
    // The same (id, offset) resolves against whatever base is currently
    // registered; a second process sees exactly this.
    let arena_a = Arena::new(4096);
    let rp: RelativePointer<u8> = RelativePointer::from_offset(arena_a.id, 256);
    let resolved_a = rp.get();
    assert_eq!(resolved_a as usize, arena_a.base as usize + 256);

    relative_ptr::unregister_segment(arena_a.id);
    assert!(rp.get().is_null());

    // Remap at a different base address.
    let other = vec![0u8; 4096];
    let other_base = other.as_ptr() as *mut u8;
    relative_ptr::register_segment(arena_a.id, other_base).unwrap();
    assert_eq!(rp.get() as usize, other_base as usize + 256);
    // Arena::drop unregisters again; keep `other` alive until then.
    drop(other);
}

#[test]
fn register_rejects_id_zero() {
    let mut byte = 0u8;
    assert!(relative_ptr::register_segment(0, &mut byte as *mut u8).is_err());
}

#[test]
fn register_rejects_conflicting_base() {
    let arena = Arena::new(4096);
    let mut byte = 0u8;
    let err = relative_ptr::register_segment(arena.id, &mut byte as *mut u8);
    assert!(err.is_err(), "an id must not silently rebind to another base");
}

#[test]
fn registrations_are_counted() {
    let arena = Arena::new(4096);
    // A second registration of the same binding is fine and must be
    // balanced by its own unregister.
    assert!(relative_ptr::register_segment(arena.id, arena.base).is_ok());
    relative_ptr::unregister_segment(arena.id);
    assert!(relative_ptr::base_address(arena.id).is_some(), "one registration remains");
}

#[test]
fn pointer_below_base_is_null() {
    let arena = Arena::new(4096);
    let below = (arena.base as usize - 8) as *const u32;
    let rp = RelativePointer::new(below, arena.id);
    assert!(rp.is_null());
}

#[test]
fn copied_pointer_resolves_identically() {
    let arena = Arena::new(4096);
    let target = unsafe { arena.base.add(512) } as *const u16;
    let rp = RelativePointer::new(target, arena.id);
    let copy = rp;
    assert_eq!(rp.get(), copy.get());
}
