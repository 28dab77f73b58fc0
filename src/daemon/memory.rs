// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// RouterMemory: creates and owns the daemon's two shared segments (the
// chunk-pool segment and the components segment) and posts the named init
// semaphore that gates client attach. Purge-and-create semantics: a daemon
// restart rebuilds everything from scratch.

use thiserror::Error;

use crate::config::RouterConfig;
use crate::daemon::components::RouterComponents;
use crate::mempool_manager::{MemPoolError, MemPoolManager};
use crate::platform::NamedSemaphore;
use crate::shm::{SegmentConfig, SharedMemorySegment, ShmError};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("shared memory setup failed: {0}")]
    Shm(#[from] ShmError),
    #[error("memory pool setup failed: {0}")]
    MemPool(#[from] MemPoolError),
    #[error("init semaphore setup failed: {0}")]
    Semaphore(std::io::Error),
    #[error("router socket setup failed: {0}")]
    Socket(std::io::Error),
    #[error("no free heartbeat slot for the daemon itself")]
    NoDaemonSlot,
}

/// The daemon's shared-memory estate. Dropping it unmaps and unlinks both
/// segments and removes the semaphore.
pub struct RouterMemory {
    // Declaration order is drop order: the semaphore disappears first so
    // late attachers cannot pass the gate and find unlinked segments.
    _init_sem: NamedSemaphore,
    memory_segment: SharedMemorySegment,
    components_segment: SharedMemorySegment,
    manager: *mut MemPoolManager,
    components: *mut RouterComponents,
}

unsafe impl Send for RouterMemory {}
unsafe impl Sync for RouterMemory {}

impl RouterMemory {
    /// Create both segments, construct the pool manager in place, and post
    /// the init semaphore.
    pub fn create(config: &RouterConfig) -> Result<Self, DaemonError> {
        let pool_bytes = MemPoolManager::required_memory_size(&config.pools)?;

        let memory_segment = SharedMemorySegment::open(
            &SegmentConfig {
                permissions: config.permissions,
                ..SegmentConfig::create(&config.memory_segment_name, pool_bytes as usize)
            },
            config.memory_segment_id,
        )?;
        let manager = unsafe {
            MemPoolManager::construct_at(
                memory_segment.base_ptr(),
                memory_segment.size() as u64,
                &config.pools,
                config.memory_segment_id,
            )?
        };
        log::info!(
            "chunk segment {} created: {} bytes, {} pools",
            config.memory_segment_name,
            pool_bytes,
            config.pools.entries().len()
        );

        let components_segment = SharedMemorySegment::open(
            &SegmentConfig {
                permissions: config.permissions,
                ..SegmentConfig::create(
                    &config.components_segment_name,
                    RouterComponents::segment_size(),
                )
            },
            config.components_segment_id,
        )?;
        // Freshly truncated shm is zero-filled, which is exactly the
        // components struct's initialized state.
        let components = components_segment.base_ptr() as *mut RouterComponents;
        log::info!(
            "components segment {} created: {} bytes",
            config.components_segment_name,
            RouterComponents::segment_size()
        );

        // Post once; attachers wait and re-post, so one post serves all.
        let init_sem = NamedSemaphore::create(&config.init_semaphore_name, 0)
            .map_err(DaemonError::Semaphore)?;
        init_sem.post().map_err(DaemonError::Semaphore)?;

        Ok(Self { _init_sem: init_sem, memory_segment, components_segment, manager, components })
    }

    pub fn manager(&self) -> &MemPoolManager {
        unsafe { &*self.manager }
    }

    pub fn components(&self) -> &RouterComponents {
        unsafe { &*self.components }
    }

    pub fn memory_segment(&self) -> &SharedMemorySegment {
        &self.memory_segment
    }

    pub fn components_segment(&self) -> &SharedMemorySegment {
        &self.components_segment
    }
}
