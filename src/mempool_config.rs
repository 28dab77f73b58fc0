// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Memory-pool configuration: an ordered list of (payload size, chunk
// count) entries. Validated before any shared memory is touched; an
// invalid configuration never publishes state.

use thiserror::Error;

use crate::mempool_manager::MAX_POOLS;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("pool configuration has no entries")]
    Empty,
    #[error("pool entry {index} has a zero chunk size")]
    ZeroChunkSize { index: usize },
    #[error("pool entry {index} has a zero chunk count")]
    ZeroChunkCount { index: usize },
    #[error("{count} pool entries exceed the maximum of {max}")]
    TooManyPools { count: usize, max: usize },
}

/// One pool: `chunk_count` chunks each able to carry `payload_size` bytes
/// of user payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemPoolEntry {
    pub payload_size: u64,
    pub chunk_count: u32,
}

/// Configuration of all segregated data pools. The management-record pool
/// is implicit: one record per data chunk.
#[derive(Debug, Clone, Default)]
pub struct MemPoolConfig {
    entries: Vec<MemPoolEntry>,
}

impl MemPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pool entry.
    pub fn add_entry(mut self, payload_size: u64, chunk_count: u32) -> Self {
        self.entries.push(MemPoolEntry { payload_size, chunk_count });
        self
    }

    /// The stock pool ladder used when nothing else is configured.
    pub fn default_set() -> Self {
        Self::new()
            .add_entry(128, 10_000)
            .add_entry(1024, 5_000)
            .add_entry(4096, 500)
            .add_entry(8192, 100)
    }

    pub fn entries(&self) -> &[MemPoolEntry] {
        &self.entries
    }

    /// Total data chunks across all pools, i.e. the capacity the management
    /// pool must provide.
    pub fn total_chunk_count(&self) -> u64 {
        self.entries.iter().map(|e| e.chunk_count as u64).sum()
    }

    /// Check the configuration and return the entries sorted by payload
    /// size ascending, as the allocator's smallest-fit search requires.
    pub fn validated_entries(&self) -> Result<Vec<MemPoolEntry>, ConfigError> {
        if self.entries.is_empty() {
            return Err(ConfigError::Empty);
        }
        if self.entries.len() > MAX_POOLS {
            return Err(ConfigError::TooManyPools { count: self.entries.len(), max: MAX_POOLS });
        }
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.payload_size == 0 {
                return Err(ConfigError::ZeroChunkSize { index });
            }
            if entry.chunk_count == 0 {
                return Err(ConfigError::ZeroChunkCount { index });
            }
        }
        let mut sorted = self.entries.clone();
        sorted.sort_by_key(|e| e.payload_size);
        Ok(sorted)
    }
}
