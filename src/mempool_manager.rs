// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// The memory-pool manager: owns the layout of the shared data segment and
// hands out reference-counted chunks.
//
// Segment layout, in order:
//
//   [ MemPoolManager ]                       ← constructed at the base, so
//   [ free-index array, data pool 0 ]          every process reaches the
//   [ ...                           ]          same object via the segment
//   [ free-index array, data pool N ]          base address
//   [ free-index array, management pool ]
//   [ management-record array ]
//   [ chunk array, data pool 0 ]
//   [ ... ]
//   [ chunk array, data pool N ]
//
// All offsets derive from the configuration alone, so the create flow and
// the attach flow agree without exchanging anything but the segment.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::align_up;
use crate::chunk::{ChunkHeader, ChunkManagement};
use crate::mempool::MemPool;
use crate::mempool_config::{ConfigError, MemPoolConfig};
use crate::relative_ptr::{RelativePointer, SegmentId};
use crate::shared_chunk::SharedChunk;
use crate::MpmcFreeList;

/// Maximum number of segregated data pools.
pub const MAX_POOLS: usize = 16;

#[derive(Debug, Error)]
pub enum MemPoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("segment of {available} bytes cannot hold the configured {required} bytes")]
    SegmentTooSmall { required: u64, available: u64 },
    #[error("no free chunk available")]
    OutOfChunks,
    #[error("requested payload of {requested} bytes exceeds the largest pool ({max} bytes)")]
    ChunkSizeExceeded { requested: u64, max: u64 },
    #[error("management-record index {index} out of range (capacity {capacity})")]
    InvalidRecordIndex { index: u32, capacity: u32 },
    #[error("record index {index} does not refer to a live chunk")]
    DeadRecord { index: u32 },
}

/// Snapshot of one pool's occupancy.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub payload_capacity: u64,
    pub chunk_size: u64,
    pub capacity: u32,
    pub used: u32,
    pub free: u32,
    pub peak: u32,
}

/// Total bytes a chunk of `payload_size` occupies: header plus payload,
/// rounded to 8 bytes.
const fn chunk_total_size(payload_size: u64) -> u64 {
    align_up(std::mem::size_of::<ChunkHeader>() as u64 + payload_size, 8)
}

/// Bytes each management record occupies in the management pool.
const fn record_size() -> u64 {
    align_up(std::mem::size_of::<ChunkManagement>() as u64, 8)
}

/// Manager of all pools in one shared segment. Constructed in place at the
/// segment base by the creating process; attached read/write by everyone
/// else.
#[repr(C)]
pub struct MemPoolManager {
    pools: [MemPool; MAX_POOLS],
    pool_count: u32,
    _pad: u32,
    management_pool: MemPool,
    /// Global publish sequence counter, shared by all publishers.
    sequence_counter: AtomicU64,
    segment_id: u64,
}

// The manager is shared between threads and processes; mutation goes
// through its lock-free members only.
unsafe impl Send for MemPoolManager {}
unsafe impl Sync for MemPoolManager {}

impl MemPoolManager {
    /// Total segment size the configuration requires.
    pub fn required_memory_size(config: &MemPoolConfig) -> Result<u64, MemPoolError> {
        let entries = config.validated_entries()?;
        let total_chunks = config.total_chunk_count() as u32;

        let mut size = align_up(std::mem::size_of::<MemPoolManager>() as u64, 8);
        for entry in &entries {
            size += MpmcFreeList::required_index_memory_size(entry.chunk_count);
        }
        size += MpmcFreeList::required_index_memory_size(total_chunks);
        size += record_size() * total_chunks as u64;
        for entry in &entries {
            size += chunk_total_size(entry.payload_size) * entry.chunk_count as u64;
        }
        Ok(size)
    }

    /// Construct the manager and all pools in place at `base`.
    ///
    /// # Safety
    /// `base` must be the 8-byte-aligned start of a writable region of at
    /// least `available` bytes that is registered as `segment_id`, and no
    /// other process may touch the segment until construction returns.
    pub unsafe fn construct_at(
        base: *mut u8,
        available: u64,
        config: &MemPoolConfig,
        segment_id: SegmentId,
    ) -> Result<*mut MemPoolManager, MemPoolError> {
        let entries = config.validated_entries()?;
        let required = Self::required_memory_size(config)?;
        if required > available {
            return Err(MemPoolError::SegmentTooSmall { required, available });
        }
        let total_chunks = config.total_chunk_count() as u32;

        let manager = base as *mut MemPoolManager;
        std::ptr::write_bytes(base, 0, std::mem::size_of::<MemPoolManager>());
        (*manager).pool_count = entries.len() as u32;
        (*manager).segment_id = segment_id;
        (*manager).sequence_counter = AtomicU64::new(0);

        // Walk the layout exactly as required_memory_size does.
        let mut cursor = align_up(std::mem::size_of::<MemPoolManager>() as u64, 8);

        let mut freelist_offsets = [0u64; MAX_POOLS];
        for (i, entry) in entries.iter().enumerate() {
            freelist_offsets[i] = cursor;
            cursor += MpmcFreeList::required_index_memory_size(entry.chunk_count);
        }
        let management_freelist_offset = cursor;
        cursor += MpmcFreeList::required_index_memory_size(total_chunks);
        let record_array_offset = cursor;
        cursor += record_size() * total_chunks as u64;

        for (i, entry) in entries.iter().enumerate() {
            let total_size = chunk_total_size(entry.payload_size);
            (*manager).pools[i].init(
                base.add(cursor as usize),
                base.add(freelist_offsets[i] as usize) as *mut u32,
                total_size,
                entry.payload_size,
                entry.chunk_count,
                i as u32,
                segment_id,
            );
            cursor += total_size * entry.chunk_count as u64;
        }

        (*manager).management_pool.init(
            base.add(record_array_offset as usize),
            base.add(management_freelist_offset as usize) as *mut u32,
            record_size(),
            0,
            total_chunks,
            MAX_POOLS as u32,
            segment_id,
        );

        Ok(manager)
    }

    /// View an already-constructed manager at the base of an attached
    /// segment. No construction happens; the attaching process must have
    /// registered the segment id beforehand.
    ///
    /// # Safety
    /// `base` must be the base address of a segment on which
    /// [`MemPoolManager::construct_at`] has completed.
    pub unsafe fn attach_at(base: *mut u8) -> *mut MemPoolManager {
        base as *mut MemPoolManager
    }

    /// The segment this manager lives in.
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// The configured data pools.
    pub fn pools(&self) -> &[MemPool] {
        &self.pools[..self.pool_count as usize]
    }

    /// The management-record pool.
    pub fn management_pool(&self) -> &MemPool {
        &self.management_pool
    }

    /// Allocate a chunk able to carry `payload_size` bytes.
    ///
    /// Picks the smallest pool whose payload capacity fits, pops a chunk
    /// and a management record, and returns a handle owning the fresh
    /// record's single reference.
    pub fn get_chunk(&self, payload_size: u64) -> Result<SharedChunk, MemPoolError> {
        let pool = self
            .pools()
            .iter()
            .find(|p| p.payload_capacity() >= payload_size)
            .ok_or_else(|| MemPoolError::ChunkSizeExceeded {
                requested: payload_size,
                max: self.pools().iter().map(|p| p.payload_capacity()).max().unwrap_or(0),
            })?;

        let chunk_index = pool.allocate_index().ok_or(MemPoolError::OutOfChunks)?;
        let record_index = match self.management_pool.allocate_index() {
            Some(i) => i,
            None => {
                pool.release_index(chunk_index);
                return Err(MemPoolError::OutOfChunks);
            }
        };

        let header = pool.chunk_at(chunk_index) as *mut ChunkHeader;
        let record = self.management_pool.chunk_at(record_index) as *mut ChunkManagement;
        debug_assert!(!header.is_null() && !record.is_null());

        unsafe {
            ChunkHeader::write_new(header, pool.chunk_size(), payload_size);
            (*header).sequence_number = self.sequence_counter.fetch_add(1, Ordering::Relaxed);

            record.write(ChunkManagement {
                chunk_header: RelativePointer::new(header, self.segment_id),
                data_pool: RelativePointer::new(pool as *const MemPool, self.segment_id),
                management_pool: RelativePointer::new(
                    &self.management_pool as *const MemPool,
                    self.segment_id,
                ),
                ref_count: AtomicU64::new(1),
                own_index: record_index,
                chunk_index,
            });

            Ok(SharedChunk::from_allocated(record))
        }
    }

    /// Address of the `index`-th management record, for the receiving side
    /// of a transfer. Out-of-range indices are rejected.
    pub fn record_from_index(&self, index: u32) -> Result<*mut ChunkManagement, MemPoolError> {
        let capacity = self.management_pool.chunk_count();
        if index >= capacity {
            return Err(MemPoolError::InvalidRecordIndex { index, capacity });
        }
        Ok(self.management_pool.chunk_at(index) as *mut ChunkManagement)
    }

    /// Occupancy of every data pool plus (last) the management pool.
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self.pools().iter().map(stat_of).collect();
        stats.push(stat_of(&self.management_pool));
        stats
    }
}

fn stat_of(pool: &MemPool) -> PoolStats {
    PoolStats {
        payload_capacity: pool.payload_capacity(),
        chunk_size: pool.chunk_size(),
        capacity: pool.chunk_count(),
        used: pool.used_chunks(),
        free: pool.free_chunks(),
        peak: pool.peak_chunks(),
    }
}
