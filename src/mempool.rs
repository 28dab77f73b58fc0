// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// A single homogeneous pool of fixed-size chunks: the chunk array, its
// MPMC free-index list, and allocation counters. Lives inside the shared
// segment; every field is either immutable after construction or atomic.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::freelist::MpmcFreeList;
use crate::relative_ptr::{RelativePointer, SegmentId};

/// One fixed-chunk-size memory pool.
#[repr(C)]
pub struct MemPool {
    /// Total bytes per chunk (header + payload, 8-byte aligned).
    chunk_size: u64,
    /// Bytes of user payload a chunk can carry (0 for the management pool).
    payload_capacity: u64,
    /// Number of chunks in the pool.
    chunk_count: u32,
    /// Position of this pool within its manager (diagnostics only).
    pool_index: u32,
    /// Base of the chunk array.
    raw_memory: RelativePointer<u8>,
    free_indices: MpmcFreeList,
    used_chunks: AtomicU32,
    peak_chunks: AtomicU32,
}

impl MemPool {
    /// Construct in place.
    ///
    /// # Safety
    /// `raw_memory` must cover `chunk_size * chunk_count` bytes and
    /// `freelist_memory` must cover
    /// [`MpmcFreeList::required_index_memory_size`] bytes, both inside the
    /// registered segment `segment_id`, exclusive to this pool.
    pub(crate) unsafe fn init(
        &mut self,
        raw_memory: *mut u8,
        freelist_memory: *mut u32,
        chunk_size: u64,
        payload_capacity: u64,
        chunk_count: u32,
        pool_index: u32,
        segment_id: SegmentId,
    ) {
        debug_assert!(chunk_size > 0 && chunk_count > 0);
        debug_assert_eq!(chunk_size % 8, 0);
        self.chunk_size = chunk_size;
        self.payload_capacity = payload_capacity;
        self.chunk_count = chunk_count;
        self.pool_index = pool_index;
        self.raw_memory = RelativePointer::new(raw_memory, segment_id);
        self.free_indices.init(freelist_memory, chunk_count, segment_id);
        self.used_chunks = AtomicU32::new(0);
        self.peak_chunks = AtomicU32::new(0);
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn payload_capacity(&self) -> u64 {
        self.payload_capacity
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    pub fn pool_index(&self) -> u32 {
        self.pool_index
    }

    /// Chunks currently allocated.
    pub fn used_chunks(&self) -> u32 {
        self.used_chunks.load(Ordering::Relaxed)
    }

    /// High-water mark of allocated chunks.
    pub fn peak_chunks(&self) -> u32 {
        self.peak_chunks.load(Ordering::Relaxed)
    }

    /// Chunks currently free.
    pub fn free_chunks(&self) -> u32 {
        self.chunk_count - self.used_chunks()
    }

    /// Address of chunk `index`. Out-of-range indices yield null.
    pub fn chunk_at(&self, index: u32) -> *mut u8 {
        if index >= self.chunk_count {
            return std::ptr::null_mut();
        }
        let base = self.raw_memory.get();
        if base.is_null() {
            return std::ptr::null_mut();
        }
        unsafe { base.add(index as usize * self.chunk_size as usize) }
    }

    /// Claim a free chunk index, maintaining the used/peak counters.
    pub(crate) fn allocate_index(&self) -> Option<u32> {
        let index = self.free_indices.pop()?;
        let used = self.used_chunks.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_chunks.fetch_max(used, Ordering::Relaxed);
        Some(index)
    }

    /// Return a chunk index to the pool.
    pub(crate) fn release_index(&self, index: u32) {
        if self.free_indices.push(index) {
            self.used_chunks.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
