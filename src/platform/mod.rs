// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// POSIX syscall layer: shared memory, named semaphores, datagram sockets,
// the monotonic clock, and signal-flag handling. Everything above this
// module speaks in safe types; everything below is libc.

mod posix;

pub use posix::{
    install_shutdown_handlers, monotonic_now_ns, process_id, shutdown_requested, NamedSemaphore,
    PosixSharedMemory, SocketAddress, TransportError, UdsSocket,
};
pub(crate) use posix::{ShmAccess, ShmMode};
