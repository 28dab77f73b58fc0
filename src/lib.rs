// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Zero-copy inter-process communication over POSIX shared memory.
// Publishers reserve fixed-size chunks from segregated pools, write their
// payload in place, and hand ownership to subscribers by transmitting a
// single management-record index through the router daemon.

mod platform;
pub use platform::{
    install_shutdown_handlers, monotonic_now_ns, process_id, shutdown_requested, NamedSemaphore,
    SocketAddress, TransportError, UdsSocket,
};

pub mod shm;
pub use shm::{AccessMode, OpenMode, SegmentConfig, SharedMemorySegment, ShmError};

pub mod relative_ptr;
pub use relative_ptr::{RelativePointer, SegmentId};

pub mod freelist;
pub use freelist::MpmcFreeList;

pub mod fixed_string;
pub use fixed_string::{FixedString, StringCapacityError};

pub mod service;
pub use service::{ServiceDescription, IDENTIFIER_CAPACITY};

pub mod chunk;
pub use chunk::{ChunkHeader, ChunkManagement};

pub mod shared_chunk;
pub use shared_chunk::SharedChunk;

pub mod mempool;
pub use mempool::MemPool;

pub mod mempool_config;
pub use mempool_config::{ConfigError, MemPoolConfig, MemPoolEntry};

pub mod mempool_manager;
pub use mempool_manager::{MemPoolError, MemPoolManager, PoolStats, MAX_POOLS};

pub mod ring;
pub use ring::SpscRing;

pub mod heartbeat;
pub use heartbeat::{HeartbeatPool, HeartbeatSlot, MAX_HEARTBEAT_SLOTS};

pub mod wire;
pub use wire::{ProtocolError, Reply, Request, RuntimeName, MAX_DATAGRAM_SIZE};

pub mod config;
pub use config::RouterConfig;

pub mod daemon;
pub use daemon::{DaemonError, MessageDescriptor, Router, RouterComponents, RouterMemory};

pub mod runtime;
pub use runtime::{Publisher, Runtime, RuntimeError, Subscriber};

/// Round `value` up to the next multiple of `align` (a power of two).
pub(crate) const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}
