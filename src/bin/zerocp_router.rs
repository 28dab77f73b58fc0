// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// The router daemon executable. Creates the shared segments, serves the
// datagram socket, supervises heartbeats, and shuts down cleanly on
// SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use zerocp::daemon::{DaemonError, Router, RouterMemory};
use zerocp::{install_shutdown_handlers, monotonic_now_ns, shutdown_requested, RouterConfig};

fn run() -> Result<(), DaemonError> {
    let config = RouterConfig::default();

    let memory = Arc::new(RouterMemory::create(&config)?);

    // The daemon holds a heartbeat slot of its own; external tooling can
    // tell a hung daemon from a dead one by watching it.
    let heartbeats = memory.components().heartbeat_pool();
    let daemon_slot = heartbeats.acquire(monotonic_now_ns()).ok_or(DaemonError::NoDaemonSlot)?;
    log::info!("daemon heartbeat slot {daemon_slot} acquired");

    let mut router = Router::new(Arc::clone(&memory), config);
    router.start()?;
    log::info!("router running, ctrl-c to shut down");

    let mut loops = 0u32;
    while !shutdown_requested() {
        std::thread::sleep(Duration::from_millis(100));
        loops += 1;
        if loops >= 10 {
            if let Some(slot) = memory.components().heartbeat_pool().slot(daemon_slot) {
                slot.touch(monotonic_now_ns());
            }
            loops = 0;
        }
    }

    log::info!("shutdown requested, stopping router");
    router.stop();
    memory.components().heartbeat_pool().release(daemon_slot);
    log::info!("daemon heartbeat slot released");
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = install_shutdown_handlers() {
        log::error!("cannot install signal handlers: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run() {
        log::error!("router failed: {err}");
        std::process::exit(1);
    }
}
