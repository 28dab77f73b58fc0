// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// SharedChunk: the process-local RAII owner of one reference on a
// chunk-management record. Clone takes a reference, drop gives one back,
// move is free. The count itself lives in shared memory, so handles in
// different processes cooperate on the same chunk's lifetime.

use std::ptr::NonNull;

use crate::chunk::{self, ChunkHeader, ChunkManagement};
use crate::mempool_manager::{MemPoolError, MemPoolManager};

/// Owner of one reference on a chunk.
///
/// An empty handle (after `reset` or `take`-like moves) is valid and inert;
/// releasing it again is a no-op.
pub struct SharedChunk {
    record: Option<NonNull<ChunkManagement>>,
}

// The record is in shared memory and its count is atomic; the handle itself
// carries no thread affinity.
unsafe impl Send for SharedChunk {}

impl SharedChunk {
    /// Adopt a freshly allocated record. The allocator left the count at 1;
    /// no increment happens here.
    pub(crate) unsafe fn from_allocated(record: *mut ChunkManagement) -> Self {
        Self { record: NonNull::new(record) }
    }

    /// Rematerialize a handle from a management-pool index on the receiving
    /// side of a transfer.
    ///
    /// Adopts the reference the sender reserved via
    /// [`prepare_for_transfer`](Self::prepare_for_transfer); the count is
    /// not incremented. Rejects out-of-range indices and records whose
    /// count is zero (nothing was reserved).
    pub fn from_index(index: u32, manager: &MemPoolManager) -> Result<Self, MemPoolError> {
        let record = manager.record_from_index(index)?;
        let count = unsafe { (*record).use_count() };
        if count == 0 {
            return Err(MemPoolError::DeadRecord { index });
        }
        Ok(Self { record: NonNull::new(record) })
    }

    /// Whether this handle currently owns a reference.
    pub fn is_valid(&self) -> bool {
        self.record.is_some()
    }

    fn management(&self) -> Option<&ChunkManagement> {
        self.record.map(|r| unsafe { r.as_ref() })
    }

    /// The chunk header, or null for an empty handle.
    pub fn header(&self) -> *mut ChunkHeader {
        match self.management() {
            Some(rec) => rec.chunk_header.get(),
            None => std::ptr::null_mut(),
        }
    }

    /// The user payload, or null for an empty handle.
    pub fn payload(&self) -> *mut u8 {
        let header = self.header();
        if header.is_null() {
            return std::ptr::null_mut();
        }
        unsafe { (*header).payload_ptr() }
    }

    /// Bytes of user payload this chunk was allocated for.
    pub fn payload_size(&self) -> u64 {
        let header = self.header();
        if header.is_null() {
            return 0;
        }
        unsafe { (*header).user_payload_size }
    }

    /// The payload as a mutable byte slice. Empty for an empty handle.
    ///
    /// # Safety
    /// The caller must uphold the payload discipline: the publisher writes
    /// before publishing, subscribers only read after receiving.
    pub unsafe fn payload_slice_mut(&self) -> &mut [u8] {
        let ptr = self.payload();
        if ptr.is_null() {
            return &mut [];
        }
        std::slice::from_raw_parts_mut(ptr, self.payload_size() as usize)
    }

    /// The payload as a byte slice. Empty for an empty handle.
    pub fn payload_slice(&self) -> &[u8] {
        let ptr = self.payload();
        if ptr.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(ptr, self.payload_size() as usize) }
    }

    /// Current reference count (diagnostics only).
    pub fn use_count(&self) -> u64 {
        self.management().map(|rec| rec.use_count()).unwrap_or(0)
    }

    /// This chunk's management-pool index, the value that crosses process
    /// boundaries.
    pub fn management_index(&self) -> Option<u32> {
        self.management().map(|rec| rec.own_index)
    }

    /// Reserve one reference for a peer and return the index it will use
    /// with [`from_index`](Self::from_index).
    ///
    /// If the peer never materializes the handle, the chunk stays
    /// allocated. That is a diagnostic concern, not a safety one.
    pub fn prepare_for_transfer(&self) -> Option<u32> {
        let rec = self.management()?;
        rec.add_reference();
        Some(rec.own_index)
    }

    /// Undo one [`prepare_for_transfer`](Self::prepare_for_transfer)
    /// reservation that will never be consumed.
    pub(crate) fn release_reservation(&self) {
        if let Some(rec) = self.record {
            unsafe { chunk::release_reference(rec.as_ptr()) };
        }
    }

    /// Drop the owned reference, leaving an empty handle. A no-op when the
    /// handle is already empty.
    pub fn reset(&mut self) {
        if let Some(rec) = self.record.take() {
            unsafe { chunk::release_reference(rec.as_ptr()) };
        }
    }
}

impl Clone for SharedChunk {
    /// Copying a handle takes one additional reference.
    fn clone(&self) -> Self {
        if let Some(rec) = self.management() {
            rec.add_reference();
        }
        Self { record: self.record }
    }
}

impl Drop for SharedChunk {
    fn drop(&mut self) {
        self.reset();
    }
}

impl std::fmt::Debug for SharedChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedChunk")
            .field("management_index", &self.management_index())
            .field("use_count", &self.use_count())
            .field("payload_size", &self.payload_size())
            .finish()
    }
}
