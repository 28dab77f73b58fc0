// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// The router daemon: shared-segment construction, process registry,
// publish/subscribe match-making, heartbeat supervision, and chunk
// routing.

mod components;
mod memory;
mod router;

pub use components::{
    MessageDescriptor, ReceiveQueue, RouterComponents, MAX_RECEIVE_QUEUES, RECEIVE_QUEUE_CAPACITY,
};
pub use memory::{DaemonError, RouterMemory};
pub use router::Router;
