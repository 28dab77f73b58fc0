// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Relative pointers: the only legal form of a pointer stored inside shared
// memory. Every process maps a segment at a different virtual address, so
// shared structures hold (segment id, offset) pairs and resolve them
// through a process-local registry at dereference time.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{OnceLock, RwLock};

/// Identifier of a mapped shared-memory segment. The same numeric id refers
/// to the same logical segment in every attached process; id 0 is reserved
/// for the null pointer encoding.
pub type SegmentId = u64;

struct Registration {
    base: usize,
    /// Number of live handles that registered this id; the binding goes
    /// away when the last one unregisters.
    count: usize,
}

fn registry() -> &'static RwLock<HashMap<SegmentId, Registration>> {
    static REGISTRY: OnceLock<RwLock<HashMap<SegmentId, Registration>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register the process-local base address of `segment_id`.
///
/// Fails if the id is 0 or already registered with a different base; the
/// id/base binding must stay stable for the lifetime of the mapping.
/// Re-registering the same binding is counted and must be balanced by an
/// [`unregister_segment`] per registration.
pub fn register_segment(segment_id: SegmentId, base: *mut u8) -> Result<(), SegmentId> {
    if segment_id == 0 {
        return Err(segment_id);
    }
    let mut map = registry().write().unwrap_or_else(|e| e.into_inner());
    match map.get_mut(&segment_id) {
        Some(existing) if existing.base != base as usize => Err(segment_id),
        Some(existing) => {
            existing.count += 1;
            Ok(())
        }
        None => {
            map.insert(segment_id, Registration { base: base as usize, count: 1 });
            Ok(())
        }
    }
}

/// Drop one registration of `segment_id`. When the last registration is
/// gone, relative pointers into the segment dereference to null until it
/// is registered again.
pub fn unregister_segment(segment_id: SegmentId) {
    let mut map = registry().write().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = map.get_mut(&segment_id) {
        existing.count -= 1;
        if existing.count == 0 {
            map.remove(&segment_id);
        }
    }
}

/// The process-local base address of `segment_id`, if registered.
pub fn base_address(segment_id: SegmentId) -> Option<*mut u8> {
    let map = registry().read().unwrap_or_else(|e| e.into_inner());
    map.get(&segment_id).map(|r| r.base as *mut u8)
}

/// A (segment id, offset) pair that resolves to a `T` in whatever process
/// dereferences it. (0, 0) is the null value.
///
/// Raw absolute pointers must never be stored in shared memory; this type
/// is the replacement. Resolution of an unregistered segment yields the
/// null pointer, never an unrelated address.
#[repr(C)]
pub struct RelativePointer<T> {
    segment_id: u64,
    offset: u64,
    _marker: PhantomData<T>,
}

impl<T> RelativePointer<T> {
    /// The null relative pointer.
    pub const fn null() -> Self {
        Self { segment_id: 0, offset: 0, _marker: PhantomData }
    }

    /// Encode `ptr` relative to the registered base of `segment_id`.
    ///
    /// Returns null when the segment is unregistered or `ptr` lies below
    /// its base.
    pub fn new(ptr: *const T, segment_id: SegmentId) -> Self {
        let Some(base) = base_address(segment_id) else {
            return Self::null();
        };
        let addr = ptr as usize;
        let base = base as usize;
        if addr < base {
            return Self::null();
        }
        Self { segment_id, offset: (addr - base) as u64, _marker: PhantomData }
    }

    /// Build from an already-computed offset.
    pub const fn from_offset(segment_id: SegmentId, offset: u64) -> Self {
        Self { segment_id, offset, _marker: PhantomData }
    }

    pub fn is_null(&self) -> bool {
        self.segment_id == 0 && self.offset == 0
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Resolve to an absolute pointer in this process.
    ///
    /// Null for the null value and for unregistered segments.
    pub fn get(&self) -> *mut T {
        if self.is_null() {
            return std::ptr::null_mut();
        }
        match base_address(self.segment_id) {
            Some(base) => unsafe { base.add(self.offset as usize) as *mut T },
            None => std::ptr::null_mut(),
        }
    }
}

// Manual impls: `derive` would bound them on `T`, but copying the pointer
// never copies the pointee.
impl<T> Clone for RelativePointer<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RelativePointer<T> {}

impl<T> Default for RelativePointer<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> std::fmt::Debug for RelativePointer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelativePointer")
            .field("segment_id", &self.segment_id)
            .field("offset", &self.offset)
            .finish()
    }
}
