// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Shared fabric configuration: segment names and ids, socket path,
// semaphore name, and the heartbeat timing contract. The daemon creates
// everything named here; clients attach using the same values.

use std::path::PathBuf;
use std::time::Duration;

use crate::mempool_config::MemPoolConfig;
use crate::relative_ptr::SegmentId;

/// Configuration shared by the router daemon and every runtime client.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Datagram socket the daemon serves.
    pub socket_path: PathBuf,
    /// Name of the chunk-pool segment.
    pub memory_segment_name: String,
    /// Name of the daemon's components segment (heartbeats + queues).
    pub components_segment_name: String,
    /// Named semaphore posted once the daemon finished construction.
    pub init_semaphore_name: String,
    /// Segment id for the chunk-pool segment (identical in all processes).
    pub memory_segment_id: SegmentId,
    /// Segment id for the components segment.
    pub components_segment_id: SegmentId,
    /// Pool ladder for the chunk segment.
    pub pools: MemPoolConfig,
    /// How often clients write their heartbeat slot.
    pub heartbeat_interval: Duration,
    /// Slot age beyond which a monitored process counts as dead.
    pub heartbeat_deadline: Duration,
    /// Monitor thread scan period.
    pub monitor_period: Duration,
    /// How long clients wait for the daemon's init semaphore.
    pub attach_timeout: Duration,
    /// Client-side wait for a single request's reply.
    pub reply_timeout: Duration,
    /// POSIX permission bits for segments.
    pub permissions: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/zerocp_router.sock"),
            memory_segment_name: "/zerocp_memory".to_string(),
            components_segment_name: "/zerocp_diroute_components".to_string(),
            init_semaphore_name: "/zerocp_init_sem".to_string(),
            memory_segment_id: 1,
            components_segment_id: 2,
            pools: MemPoolConfig::default_set(),
            heartbeat_interval: Duration::from_millis(100),
            heartbeat_deadline: Duration::from_secs(3),
            monitor_period: Duration::from_millis(300),
            attach_timeout: Duration::from_secs(10),
            reply_timeout: Duration::from_millis(500),
            permissions: 0o660,
        }
    }
}
