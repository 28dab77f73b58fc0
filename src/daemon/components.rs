// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// The daemon's components segment: the heartbeat pool and the pool of
// per-subscriber receive queues, all in one flat repr(C) struct whose
// all-zero state is fully initialized. Subscribers are handed the byte
// offset of their queue and view it through their own mapping.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::heartbeat::HeartbeatPool;
use crate::ring::SpscRing;
use crate::service::ServiceDescription;

/// Capacity of each subscriber receive queue (power of two).
pub const RECEIVE_QUEUE_CAPACITY: usize = 1024;

/// Number of receive queues, the maximum number of concurrent
/// subscribers.
pub const MAX_RECEIVE_QUEUES: usize = 16;

/// One routed chunk, as it travels through a receive queue.
///
/// Carries the service description for sanity checking on the consumer
/// side; ownership itself is the management-pool index.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MessageDescriptor {
    pub service: ServiceDescription,
    /// Index of the chunk's management record; the receiver adopts the
    /// reference reserved for it.
    pub chunk_index: u32,
    /// Heartbeat-slot index of the publishing process.
    pub publisher_slot: u32,
    pub sequence_number: u64,
    /// CLOCK_MONOTONIC nanoseconds at routing time.
    pub timestamp_ns: u64,
}

/// A subscriber's receive queue.
pub type ReceiveQueue = SpscRing<MessageDescriptor, RECEIVE_QUEUE_CAPACITY>;

/// Everything the daemon shares besides the chunk pools.
#[repr(C)]
pub struct RouterComponents {
    heartbeat_pool: HeartbeatPool,
    queue_in_use: [AtomicBool; MAX_RECEIVE_QUEUES],
    queue_dropped: [AtomicU64; MAX_RECEIVE_QUEUES],
    queues: [ReceiveQueue; MAX_RECEIVE_QUEUES],
}

unsafe impl Send for RouterComponents {}
unsafe impl Sync for RouterComponents {}

impl RouterComponents {
    /// Size of the components segment.
    pub const fn segment_size() -> usize {
        std::mem::size_of::<RouterComponents>()
    }

    pub fn heartbeat_pool(&self) -> &HeartbeatPool {
        &self.heartbeat_pool
    }

    /// Claim a free receive queue, returning its index. The queue comes
    /// back empty with a zeroed drop counter.
    pub fn acquire_queue(&self) -> Option<usize> {
        for (index, flag) in self.queue_in_use.iter().enumerate() {
            if flag
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.queues[index].reset();
                self.queue_dropped[index].store(0, Ordering::Relaxed);
                return Some(index);
            }
        }
        None
    }

    /// Return a queue to the pool. The queue is drained by resetting its
    /// indices; any descriptors still inside were owned references and are
    /// released by the caller beforehand.
    pub fn release_queue(&self, index: usize) {
        if index < MAX_RECEIVE_QUEUES {
            self.queues[index].reset();
            self.queue_in_use[index].store(false, Ordering::Release);
        }
    }

    pub fn queue(&self, index: usize) -> Option<&ReceiveQueue> {
        if index < MAX_RECEIVE_QUEUES {
            Some(&self.queues[index])
        } else {
            None
        }
    }

    pub fn queue_in_use(&self, index: usize) -> bool {
        index < MAX_RECEIVE_QUEUES && self.queue_in_use[index].load(Ordering::Acquire)
    }

    /// Record one dropped descriptor for queue `index`.
    pub fn count_drop(&self, index: usize) {
        if index < MAX_RECEIVE_QUEUES {
            self.queue_dropped[index].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Descriptors dropped on queue `index` because it was full.
    pub fn dropped(&self, index: usize) -> u64 {
        if index < MAX_RECEIVE_QUEUES {
            self.queue_dropped[index].load(Ordering::Relaxed)
        } else {
            0
        }
    }

    /// Byte offset of queue `index` within this segment, the value handed
    /// to the subscriber at registration.
    pub fn queue_offset(&self, index: usize) -> Option<u64> {
        let queue = self.queue(index)?;
        let base = self as *const RouterComponents as usize;
        Some((queue as *const ReceiveQueue as usize - base) as u64)
    }

    /// Resolve an offset handed out by [`queue_offset`](Self::queue_offset)
    /// back to the queue. Rejects offsets that do not name a queue slot.
    pub fn queue_at_offset(&self, offset: u64) -> Option<&ReceiveQueue> {
        for index in 0..MAX_RECEIVE_QUEUES {
            if self.queue_offset(index) == Some(offset) {
                return self.queue(index);
            }
        }
        None
    }

    /// Find the queue index for a previously handed-out offset.
    pub fn queue_index_of_offset(&self, offset: u64) -> Option<usize> {
        (0..MAX_RECEIVE_QUEUES).find(|&index| self.queue_offset(index) == Some(offset))
    }
}
