// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Chunk metadata: the header that starts every chunk and the reference-
// counted management record that owns a chunk's lifetime.
//
// Management records live in a pool separate from the data chunks, so the
// cross-process wire representation of a chunk is a single index into the
// management pool while any number of holders share one record.

use std::sync::atomic::{fence, AtomicU64, Ordering};

use crate::mempool::MemPool;
use crate::relative_ptr::RelativePointer;

/// Version stamp written into every chunk header.
pub const CHUNK_HEADER_VERSION: u8 = 1;

/// "No user header" marker.
pub const NO_USER_HEADER: u16 = 0;

/// Metadata at the start of every chunk, immediately followed by the user
/// payload.
#[repr(C)]
#[derive(Debug)]
pub struct ChunkHeader {
    /// Size of an optional user-defined header (0 = none).
    pub user_header_size: u32,
    /// Header layout version, for compatibility checks across processes.
    pub version: u8,
    _reserved: u8,
    /// Identifier of the optional user header type.
    pub user_header_id: u16,
    /// Heartbeat-slot index of the publishing process.
    pub origin_id: u64,
    /// Monotonically increasing publish sequence number.
    pub sequence_number: u64,
    /// Total chunk size (header + payload), 8-byte aligned.
    pub chunk_size: u64,
    /// Bytes of user payload actually requested.
    pub user_payload_size: u64,
    /// Alignment of the user payload.
    pub user_payload_alignment: u32,
    _pad: u32,
    /// Offset from this header's base to the user payload.
    pub user_payload_offset: u64,
}

impl ChunkHeader {
    /// Write a fresh header in place.
    ///
    /// # Safety
    /// `at` must point to writable memory of at least `chunk_size` bytes.
    pub(crate) unsafe fn write_new(at: *mut ChunkHeader, chunk_size: u64, payload_size: u64) {
        at.write(ChunkHeader {
            user_header_size: 0,
            version: CHUNK_HEADER_VERSION,
            _reserved: 0,
            user_header_id: NO_USER_HEADER,
            origin_id: 0,
            sequence_number: 0,
            chunk_size,
            user_payload_size: payload_size,
            user_payload_alignment: std::mem::align_of::<ChunkHeader>() as u32,
            _pad: 0,
            user_payload_offset: std::mem::size_of::<ChunkHeader>() as u64,
        });
    }

    /// Pointer to the user payload of this chunk.
    pub fn payload_ptr(&self) -> *mut u8 {
        let base = self as *const ChunkHeader as *const u8;
        unsafe { base.add(self.user_payload_offset as usize) as *mut u8 }
    }
}

/// Reference-counted descriptor of one allocated chunk.
///
/// Lives in the management pool; the index of a record within that pool is
/// the unit of cross-process chunk transfer. Released back to its pool only
/// when the reference count reaches zero.
#[repr(C)]
pub struct ChunkManagement {
    /// The chunk this record owns.
    pub chunk_header: RelativePointer<ChunkHeader>,
    /// Pool the data chunk came from.
    pub data_pool: RelativePointer<MemPool>,
    /// Pool this record itself came from.
    pub management_pool: RelativePointer<MemPool>,
    /// Cross-process atomic reference count.
    pub ref_count: AtomicU64,
    /// This record's index within the management pool (stable; what goes on
    /// the wire).
    pub own_index: u32,
    /// The data chunk's index within its pool.
    pub chunk_index: u32,
}

impl ChunkManagement {
    /// Current reference count (diagnostic; immediately stale under
    /// concurrency).
    pub fn use_count(&self) -> u64 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Take one additional reference.
    pub(crate) fn add_reference(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }
}

/// Drop one reference on `record`; at zero, return the data chunk and then
/// the record itself to their pools.
///
/// The data chunk goes back first so a live record never points at a
/// recycled chunk.
///
/// # Safety
/// `record` must point to a live management record whose count is at least
/// one, inside registered segments.
pub(crate) unsafe fn release_reference(record: *const ChunkManagement) {
    let rec = &*record;
    let previous = rec.ref_count.fetch_sub(1, Ordering::Release);
    debug_assert!(previous != 0, "reference count underflow");
    if previous != 1 {
        return;
    }
    // Pair with every Release decrement: all writes through other handles
    // happen-before the free below.
    fence(Ordering::Acquire);

    let chunk_index = rec.chunk_index;
    let own_index = rec.own_index;
    let data_pool = rec.data_pool.get();
    let management_pool = rec.management_pool.get();
    debug_assert!(!data_pool.is_null() && !management_pool.is_null());

    (*data_pool).release_index(chunk_index);
    (*management_pool).release_index(own_index);
}
