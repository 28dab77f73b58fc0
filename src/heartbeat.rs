// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Heartbeat slots: one atomic nanosecond timestamp per registered process,
// stored in a fixed-capacity pool inside the daemon's shared segment.
// Clients write their slot on a timer; the daemon's monitor treats a slot
// that stops advancing as a crashed process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Capacity of the heartbeat pool: the maximum number of concurrently
/// registered processes.
pub const MAX_HEARTBEAT_SLOTS: usize = 100;

/// A single heartbeat timestamp (CLOCK_MONOTONIC nanoseconds, 0 = never).
#[repr(C)]
pub struct HeartbeatSlot {
    timestamp_ns: AtomicU64,
}

impl HeartbeatSlot {
    /// Record `now_ns` as the latest sign of life.
    pub fn touch(&self, now_ns: u64) {
        self.timestamp_ns.store(now_ns, Ordering::Release);
    }

    /// The last recorded timestamp.
    pub fn last_ns(&self) -> u64 {
        self.timestamp_ns.load(Ordering::Acquire)
    }

    /// Nanoseconds elapsed since the last beat, as seen at `now_ns`.
    pub fn age_ns(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.last_ns())
    }
}

/// Fixed-position pool of heartbeat slots. Slot addresses are stable for
/// the lifetime of the segment, so a process can cache a pointer to its
/// own slot and write it lock-free forever.
#[repr(C)]
pub struct HeartbeatPool {
    in_use: [AtomicBool; MAX_HEARTBEAT_SLOTS],
    slots: [HeartbeatSlot; MAX_HEARTBEAT_SLOTS],
}

impl HeartbeatPool {
    /// Claim a free slot, seeding it with `now_ns` so a freshly registered
    /// process is not instantly considered stale. `None` when full.
    pub fn acquire(&self, now_ns: u64) -> Option<usize> {
        for (index, flag) in self.in_use.iter().enumerate() {
            if flag
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.slots[index].touch(now_ns);
                return Some(index);
            }
        }
        None
    }

    /// Return a slot to the pool.
    pub fn release(&self, index: usize) {
        if index < MAX_HEARTBEAT_SLOTS {
            self.slots[index].touch(0);
            self.in_use[index].store(false, Ordering::Release);
        }
    }

    /// The slot at `index`, if it is currently allocated.
    pub fn slot(&self, index: usize) -> Option<&HeartbeatSlot> {
        if index < MAX_HEARTBEAT_SLOTS && self.in_use[index].load(Ordering::Acquire) {
            Some(&self.slots[index])
        } else {
            None
        }
    }

    /// Number of allocated slots.
    pub fn size(&self) -> usize {
        self.in_use.iter().filter(|f| f.load(Ordering::Relaxed)).count()
    }

    pub fn is_full(&self) -> bool {
        self.size() >= MAX_HEARTBEAT_SLOTS
    }

    pub const fn capacity(&self) -> usize {
        MAX_HEARTBEAT_SLOTS
    }

    /// Visit every allocated slot.
    pub fn for_each<F: FnMut(usize, &HeartbeatSlot)>(&self, mut f: F) {
        for index in 0..MAX_HEARTBEAT_SLOTS {
            if self.in_use[index].load(Ordering::Acquire) {
                f(index, &self.slots[index]);
            }
        }
    }
}
