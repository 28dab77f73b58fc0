// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Runtime: a process's connection to the router daemon. Waits for the
// daemon's init semaphore, attaches both shared segments, registers over
// the datagram socket, and keeps the heartbeat slot fresh from a
// dedicated thread until dropped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use thiserror::Error;

use crate::config::RouterConfig;
use crate::daemon::RouterComponents;
use crate::fixed_string::StringCapacityError;
use crate::heartbeat::HeartbeatSlot;
use crate::mempool_manager::{MemPoolError, MemPoolManager};
use crate::platform::{monotonic_now_ns, process_id, NamedSemaphore, TransportError, UdsSocket};
use crate::shm::{SegmentConfig, SharedMemorySegment, ShmError};
use crate::wire::{ProtocolError, Reply, Request, RuntimeName, MAX_DATAGRAM_SIZE};

/// Request/reply attempts before a transport failure is surfaced.
const REQUEST_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime name invalid: {0}")]
    Name(#[from] StringCapacityError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Shm(#[from] ShmError),
    #[error(transparent)]
    MemPool(#[from] MemPoolError),
    #[error("daemon did not become ready within the attach timeout")]
    AttachTimeout,
    #[error("daemon rejected the request: {0}")]
    Rejected(ProtocolError),
    #[error("daemon reply not understood: {0:?}")]
    MalformedReply(String),
    #[error("publisher has not offered its service")]
    NotOffered,
    #[error("subscriber is not subscribed")]
    NotSubscribed,
    #[error("receive queue offset did not resolve to a queue")]
    QueueUnavailable,
}

/// A process's registered connection to the fabric.
///
/// Not `Sync`: request/reply interleaves datagrams on one socket, so a
/// runtime belongs to one thread (the heartbeat thread it spawns touches
/// only the heartbeat slot).
pub struct Runtime {
    name: RuntimeName,
    config: RouterConfig,
    socket: UdsSocket,
    slot: u32,
    registered: bool,
    heartbeat_run: Arc<AtomicBool>,
    heartbeat_thread: Option<JoinHandle<()>>,
    manager: *mut MemPoolManager,
    components: *mut RouterComponents,
    // Segments drop last: every pointer above aims into them.
    _memory_segment: SharedMemorySegment,
    _components_segment: SharedMemorySegment,
}

impl Runtime {
    /// Connect to the daemon described by `config` and register as `name`.
    pub fn connect(name: &str, config: &RouterConfig) -> Result<Self, RuntimeError> {
        let runtime_name = RuntimeName::try_from_str(name)?;

        Self::wait_for_daemon(config)?;

        let memory_segment = SharedMemorySegment::open(
            &SegmentConfig::attach(&config.memory_segment_name),
            config.memory_segment_id,
        )?;
        let components_segment = SharedMemorySegment::open(
            &SegmentConfig::attach(&config.components_segment_name),
            config.components_segment_id,
        )?;
        let manager = unsafe { MemPoolManager::attach_at(memory_segment.base_ptr()) };
        let components = components_segment.base_ptr() as *mut RouterComponents;

        let socket = UdsSocket::bind(&client_socket_path(name)).map_err(ShmError::Io)?;
        socket.set_recv_timeout(config.reply_timeout).map_err(ShmError::Io)?;

        let mut runtime = Self {
            name: runtime_name,
            config: config.clone(),
            socket,
            slot: 0,
            registered: false,
            heartbeat_run: Arc::new(AtomicBool::new(true)),
            heartbeat_thread: None,
            manager,
            components,
            _memory_segment: memory_segment,
            _components_segment: components_segment,
        };

        let request = Request::Register {
            name: runtime.name,
            pid: process_id(),
            monitored: true,
        };
        runtime.slot = match runtime.request_reply(&request)? {
            Reply::Registered { slot } => slot,
            Reply::Error(kind) => return Err(RuntimeError::Rejected(kind)),
            other => return Err(RuntimeError::MalformedReply(other.encode())),
        };
        runtime.registered = true;
        log::info!("runtime {} registered on heartbeat slot {}", runtime.name, runtime.slot);

        runtime.start_heartbeat_thread();
        Ok(runtime)
    }

    /// Block until the daemon has posted its init semaphore. The semaphore
    /// is re-posted immediately so later attachers pass the gate too.
    fn wait_for_daemon(config: &RouterConfig) -> Result<(), RuntimeError> {
        let deadline = Instant::now() + config.attach_timeout;
        let sem = loop {
            match NamedSemaphore::open(&config.init_semaphore_name) {
                Ok(sem) => break sem,
                Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {
                    if Instant::now() >= deadline {
                        return Err(RuntimeError::AttachTimeout);
                    }
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
                Err(err) => return Err(RuntimeError::Shm(ShmError::Io(err))),
            }
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !sem.wait_timeout(remaining).map_err(|e| RuntimeError::Shm(ShmError::Io(e)))? {
            return Err(RuntimeError::AttachTimeout);
        }
        sem.post().map_err(|e| RuntimeError::Shm(ShmError::Io(e)))?;
        Ok(())
    }

    fn start_heartbeat_thread(&mut self) {
        let Some(slot_ref) = self.components().heartbeat_pool().slot(self.slot as usize) else {
            log::error!("heartbeat slot {} not allocated, no heartbeat thread", self.slot);
            return;
        };
        let slot_addr = slot_ref as *const HeartbeatSlot as usize;
        let run = Arc::clone(&self.heartbeat_run);
        let interval = self.config.heartbeat_interval;

        let handle = std::thread::Builder::new()
            .name("zerocp-heartbeat".to_string())
            .spawn(move || {
                // The slot lives in the components segment, which outlives
                // this thread: the runtime joins it before unmapping.
                let slot = unsafe { &*(slot_addr as *const HeartbeatSlot) };
                while run.load(Ordering::Acquire) {
                    slot.touch(monotonic_now_ns());
                    std::thread::sleep(interval);
                }
            });
        match handle {
            Ok(handle) => self.heartbeat_thread = Some(handle),
            Err(err) => log::error!("failed to spawn heartbeat thread: {err}"),
        }
    }

    /// Send `request` and wait for its reply, retrying transport failures
    /// a bounded number of times.
    pub fn request_reply(&self, request: &Request) -> Result<Reply, RuntimeError> {
        let encoded = request.encode();
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let mut last_error = None;

        for _ in 0..REQUEST_ATTEMPTS {
            if let Err(err) = self.socket.send_to(encoded.as_bytes(), &self.config.socket_path) {
                // The daemon's socket may not be bound yet (or was rebound);
                // give it a moment before the next attempt.
                log::warn!("send of {encoded:?} failed: {err}");
                last_error = Some(err);
                std::thread::sleep(std::time::Duration::from_millis(50));
                continue;
            }
            match self.socket.recv_from(&mut buf) {
                Ok((len, _sender)) => {
                    let text = std::str::from_utf8(&buf[..len])
                        .map_err(|_| RuntimeError::MalformedReply(String::from("<non-utf8>")))?;
                    return Reply::parse(text)
                        .ok_or_else(|| RuntimeError::MalformedReply(text.to_string()));
                }
                Err(err @ TransportError::Timeout) => {
                    log::warn!("no reply to {encoded:?} yet, retrying");
                    last_error = Some(err);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(last_error.unwrap_or(TransportError::Timeout).into())
    }

    pub fn name(&self) -> &RuntimeName {
        &self.name
    }

    /// This process's heartbeat-slot index.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The attached chunk-pool manager.
    pub fn manager(&self) -> &MemPoolManager {
        unsafe { &*self.manager }
    }

    /// The attached daemon components segment.
    pub fn components(&self) -> &RouterComponents {
        unsafe { &*self.components }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.heartbeat_run.store(false, Ordering::Release);
        if let Some(handle) = self.heartbeat_thread.take() {
            let _ = handle.join();
        }
        if !self.registered {
            return;
        }
        // Best effort: a crashed process relies on eviction instead.
        let request = Request::Unregister { slot: self.slot };
        if let Err(err) = self.request_reply(&request) {
            log::warn!("unregister of slot {} failed: {err}", self.slot);
        }
    }
}

/// Per-process client socket path, derived from the runtime name and pid.
fn client_socket_path(name: &str) -> PathBuf {
    let sanitized: String = name
        .chars()
        .take(32)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    PathBuf::from(format!("/tmp/zerocp_{}_{}.sock", sanitized, process_id()))
}
