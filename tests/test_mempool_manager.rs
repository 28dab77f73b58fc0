// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Memory-pool manager tests: layout sizing, smallest-fit pool selection,
// exhaustion, chunk conservation (also under concurrency), and the
// record-index range checks.

use std::sync::atomic::{AtomicU64, Ordering};

use zerocp::relative_ptr::{self, SegmentId};
use zerocp::{ConfigError, MemPoolConfig, MemPoolError, MemPoolManager};

static NEXT_ID: AtomicU64 = AtomicU64::new(4200);

/// A registered heap region with a fully constructed manager inside.
struct ManagerArena {
    base: *mut u8,
    layout: std::alloc::Layout,
    id: SegmentId,
    manager: *mut MemPoolManager,
}

impl ManagerArena {
    fn build(config: &MemPoolConfig) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let size = MemPoolManager::required_memory_size(config).unwrap() as usize;
        let layout = std::alloc::Layout::from_size_align(size, 4096).unwrap();
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!base.is_null());
        relative_ptr::register_segment(id, base).unwrap();
        let manager =
            unsafe { MemPoolManager::construct_at(base, size as u64, config, id).unwrap() };
        Self { base, layout, id, manager }
    }

    fn manager(&self) -> &MemPoolManager {
        unsafe { &*self.manager }
    }
}

impl Drop for ManagerArena {
    fn drop(&mut self) {
        relative_ptr::unregister_segment(self.id);
        unsafe { std::alloc::dealloc(self.base, self.layout) };
    }
}

fn small_config() -> MemPoolConfig {
    MemPoolConfig::new().add_entry(64, 4).add_entry(256, 8)
}

#[test]
fn empty_config_is_rejected() {
    let err = MemPoolManager::required_memory_size(&MemPoolConfig::new()).unwrap_err();
    assert!(matches!(err, MemPoolError::Config(ConfigError::Empty)));
}

#[test]
fn zero_sized_entries_are_rejected() {
    let config = MemPoolConfig::new().add_entry(0, 4);
    assert!(matches!(
        MemPoolManager::required_memory_size(&config),
        Err(MemPoolError::Config(ConfigError::ZeroChunkSize { index: 0 }))
    ));
    let config = MemPoolConfig::new().add_entry(64, 0);
    assert!(matches!(
        MemPoolManager::required_memory_size(&config),
        Err(MemPoolError::Config(ConfigError::ZeroChunkCount { index: 0 }))
    ));
}

#[test]
fn required_size_covers_all_chunks() {
    let config = small_config();
    let size = MemPoolManager::required_memory_size(&config).unwrap();
    // At minimum the raw chunk payload bytes must fit.
    assert!(size > 64 * 4 + 256 * 8);
}

#[test]
fn construct_rejects_undersized_segment() {
    let config = small_config();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let size = MemPoolManager::required_memory_size(&config).unwrap() as usize;
    let layout = std::alloc::Layout::from_size_align(size, 4096).unwrap();
    let base = unsafe { std::alloc::alloc_zeroed(layout) };
    relative_ptr::register_segment(id, base).unwrap();

    let result = unsafe { MemPoolManager::construct_at(base, size as u64 - 1, &config, id) };
    assert!(matches!(result, Err(MemPoolError::SegmentTooSmall { .. })));

    relative_ptr::unregister_segment(id);
    unsafe { std::alloc::dealloc(base, layout) };
}

#[test]
fn pools_are_sorted_ascending() {
    // Entries added largest-first still come out sorted.
    let config = MemPoolConfig::new().add_entry(1024, 2).add_entry(64, 2).add_entry(256, 2);
    let arena = ManagerArena::build(&config);
    let sizes: Vec<u64> =
        arena.manager().pools().iter().map(|p| p.payload_capacity()).collect();
    assert_eq!(sizes, vec![64, 256, 1024]);
}

#[test]
fn smallest_fitting_pool_is_selected() {
    let arena = ManagerArena::build(&small_config());
    let manager = arena.manager();

    let chunk = manager.get_chunk(100).unwrap();
    assert_eq!(chunk.payload_size(), 100);

    let stats = manager.pool_stats();
    assert_eq!(stats[0].used, 0, "64-byte pool must be untouched");
    assert_eq!(stats[1].used, 1, "100 bytes allocate from the 256-byte pool");

    let tiny = manager.get_chunk(10).unwrap();
    let stats = manager.pool_stats();
    assert_eq!(stats[0].used, 1, "10 bytes fit the 64-byte pool");
    drop(tiny);
    drop(chunk);
}

#[test]
fn oversized_request_is_rejected() {
    let arena = ManagerArena::build(&small_config());
    let err = arena.manager().get_chunk(257).unwrap_err();
    assert!(matches!(err, MemPoolError::ChunkSizeExceeded { requested: 257, max: 256 }));
}

#[test]
fn exhaustion_reports_out_of_chunks() {
    let arena = ManagerArena::build(&MemPoolConfig::new().add_entry(64, 2));
    let manager = arena.manager();

    let a = manager.get_chunk(64).unwrap();
    let b = manager.get_chunk(64).unwrap();
    assert!(matches!(manager.get_chunk(64), Err(MemPoolError::OutOfChunks)));

    drop(a);
    let c = manager.get_chunk(64).unwrap();
    drop(b);
    drop(c);
}

#[test]
fn chunks_are_conserved_across_alloc_release_cycles() {
    let arena = ManagerArena::build(&small_config());
    let manager = arena.manager();

    for _ in 0..50 {
        let chunks: Vec<_> = (0..4).map(|_| manager.get_chunk(64).unwrap()).collect();
        drop(chunks);
    }

    let stats = manager.pool_stats();
    for stat in &stats {
        assert_eq!(stat.used, 0);
        assert_eq!(stat.free, stat.capacity);
    }
    assert_eq!(stats[0].peak, 4);
}

#[test]
fn payload_is_writable_and_isolated() {
    let arena = ManagerArena::build(&small_config());
    let manager = arena.manager();

    let a = manager.get_chunk(64).unwrap();
    let b = manager.get_chunk(64).unwrap();
    unsafe {
        a.payload_slice_mut().fill(0xAA);
        b.payload_slice_mut().fill(0xBB);
    }
    assert!(a.payload_slice().iter().all(|&byte| byte == 0xAA));
    assert!(b.payload_slice().iter().all(|&byte| byte == 0xBB));
}

#[test]
fn sequence_numbers_strictly_increase() {
    let arena = ManagerArena::build(&small_config());
    let manager = arena.manager();

    let mut last = None;
    for _ in 0..10 {
        let chunk = manager.get_chunk(32).unwrap();
        let seq = unsafe { (*chunk.header()).sequence_number };
        if let Some(previous) = last {
            assert!(seq > previous, "sequence must advance: {previous} then {seq}");
        }
        last = Some(seq);
    }
}

#[test]
fn record_index_is_range_checked() {
    let arena = ManagerArena::build(&small_config());
    let manager = arena.manager();
    let capacity = manager.management_pool().chunk_count();

    assert!(manager.record_from_index(0).is_ok());
    assert!(matches!(
        manager.record_from_index(capacity),
        Err(MemPoolError::InvalidRecordIndex { .. })
    ));
    assert!(matches!(
        manager.record_from_index(u32::MAX),
        Err(MemPoolError::InvalidRecordIndex { .. })
    ));
}

#[test]
fn management_pool_sized_for_every_chunk() {
    let arena = ManagerArena::build(&small_config());
    let manager = arena.manager();
    assert_eq!(manager.management_pool().chunk_count(), 4 + 8);
}

// Conservation under contention: allocate and release from several threads
// at once, then verify every pool is whole again.
#[test]
fn concurrent_alloc_release_conserves_chunks() {
    let arena = ManagerArena::build(&MemPoolConfig::new().add_entry(64, 32));
    let manager = arena.manager();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..500 {
                    let mut held = Vec::new();
                    for _ in 0..4 {
                        match manager.get_chunk(48) {
                            Ok(chunk) => held.push(chunk),
                            Err(MemPoolError::OutOfChunks) => break,
                            Err(other) => panic!("unexpected error: {other}"),
                        }
                    }
                    drop(held);
                }
            });
        }
    });

    let stats = manager.pool_stats();
    for stat in stats {
        assert_eq!(stat.used, 0, "all chunks must be back home");
        assert_eq!(stat.free, stat.capacity);
    }
}
