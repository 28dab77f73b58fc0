// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// The router: a message thread that serves the datagram socket and a
// monitor thread that supervises heartbeats. Both threads mutate daemon
// state under one mutex; everything crossing a process boundary goes
// through the lock-free shared structures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::RouterConfig;
use crate::daemon::components::MessageDescriptor;
use crate::daemon::memory::{DaemonError, RouterMemory};
use crate::platform::{monotonic_now_ns, TransportError, UdsSocket};
use crate::service::ServiceDescription;
use crate::shared_chunk::SharedChunk;
use crate::wire::{ProtocolError, Reply, Request, RuntimeName, MAX_DATAGRAM_SIZE};

/// How often the message thread re-checks the shutdown flag while idle.
const RECV_POLL_PERIOD: Duration = Duration::from_millis(100);

struct ProcessRecord {
    name: RuntimeName,
    pid: u32,
    monitored: bool,
}

struct PublisherRecord {
    name: RuntimeName,
    slot: u32,
}

struct SubscriberRecord {
    name: RuntimeName,
    slot: u32,
    queue_index: usize,
}

#[derive(Default)]
struct MatchEntry {
    publishers: Vec<PublisherRecord>,
    subscribers: Vec<SubscriberRecord>,
}

/// Daemon-private state. One mutex serves both the message and the monitor
/// thread.
#[derive(Default)]
struct RouterState {
    /// Registered processes, keyed by heartbeat-slot index.
    processes: HashMap<u32, ProcessRecord>,
    matches: HashMap<ServiceDescription, MatchEntry>,
}

/// The router daemon.
pub struct Router {
    memory: Arc<RouterMemory>,
    config: RouterConfig,
    state: Arc<Mutex<RouterState>>,
    run: Arc<AtomicBool>,
    message_thread: Option<JoinHandle<()>>,
    monitor_thread: Option<JoinHandle<()>>,
}

impl Router {
    pub fn new(memory: Arc<RouterMemory>, config: RouterConfig) -> Self {
        Self {
            memory,
            config,
            state: Arc::new(Mutex::new(RouterState::default())),
            run: Arc::new(AtomicBool::new(false)),
            message_thread: None,
            monitor_thread: None,
        }
    }

    /// Bind the socket and start the message and monitor threads.
    pub fn start(&mut self) -> Result<(), DaemonError> {
        let socket = UdsSocket::bind(&self.config.socket_path).map_err(DaemonError::Socket)?;
        socket.set_recv_timeout(RECV_POLL_PERIOD).map_err(DaemonError::Socket)?;
        log::info!("router serving {}", self.config.socket_path.display());

        self.run.store(true, Ordering::Release);

        let worker = RouterWorker {
            memory: Arc::clone(&self.memory),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            run: Arc::clone(&self.run),
        };

        let message_worker = worker.clone();
        self.message_thread = Some(
            std::thread::Builder::new()
                .name("zerocp-router-msg".to_string())
                .spawn(move || message_worker.message_loop(socket))
                .map_err(DaemonError::Socket)?,
        );

        let monitor_worker = worker;
        self.monitor_thread = Some(
            std::thread::Builder::new()
                .name("zerocp-router-mon".to_string())
                .spawn(move || monitor_worker.monitor_loop())
                .map_err(DaemonError::Socket)?,
        );
        Ok(())
    }

    /// Signal both threads and join them.
    pub fn stop(&mut self) {
        self.run.store(false, Ordering::Release);
        if let Some(handle) = self.message_thread.take() {
            let _ = handle.join();
            log::info!("message thread joined");
        }
        if let Some(handle) = self.monitor_thread.take() {
            let _ = handle.join();
            log::info!("monitor thread joined");
        }
    }

    /// Process one decoded request and produce the reply.
    ///
    /// The socket loop funnels through here; tests drive it directly.
    pub fn handle_request(&self, request: Request) -> Reply {
        RouterWorker {
            memory: Arc::clone(&self.memory),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            run: Arc::clone(&self.run),
        }
        .handle_request(request)
    }

    /// Number of currently registered processes.
    pub fn registered_process_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).processes.len()
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The shareable half of the router that the worker threads run on.
#[derive(Clone)]
struct RouterWorker {
    memory: Arc<RouterMemory>,
    config: RouterConfig,
    state: Arc<Mutex<RouterState>>,
    run: Arc<AtomicBool>,
}

impl RouterWorker {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------
    // Message thread
    // -----------------------------------------------------------------

    fn message_loop(&self, socket: UdsSocket) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        while self.run.load(Ordering::Acquire) {
            let (len, sender) = match socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(TransportError::Timeout) => continue,
                Err(err) => {
                    log::error!("receive failed: {err}");
                    continue;
                }
            };

            let reply = match std::str::from_utf8(&buf[..len]) {
                Err(_) => Reply::Error(ProtocolError::InvalidFormat),
                Ok(text) => {
                    log::debug!("request from {sender:?}: {text}");
                    match Request::parse(text) {
                        Ok(request) => self.handle_request(request),
                        Err(kind) => Reply::Error(kind),
                    }
                }
            };

            if let Err(err) = socket.send_to_addr(reply.encode().as_bytes(), &sender) {
                log::error!("reply to {sender:?} failed: {err}");
                // A registration whose reply never arrived must not occupy
                // a slot the client will never heartbeat.
                if let Reply::Registered { slot } = reply {
                    self.rollback_registration(slot);
                }
            }
        }
        log::info!("message thread stopped");
    }

    fn handle_request(&self, request: Request) -> Reply {
        match request {
            Request::Register { name, pid, monitored } => self.register(name, pid, monitored),
            Request::Unregister { slot } => self.unregister(slot),
            Request::OfferPublisher { name, pid, service } => {
                self.offer_publisher(name, pid, service)
            }
            Request::OfferSubscriber { name, pid, service } => {
                self.offer_subscriber(name, pid, service)
            }
            Request::Route { publisher_slot, service, pool_id, chunk_index } => {
                self.route(publisher_slot, service, pool_id, chunk_index)
            }
            Request::Ping => Reply::Pong,
            Request::Dump => Reply::Dump { report: self.build_dump() },
        }
    }

    // -----------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------

    fn register(&self, name: RuntimeName, pid: u32, monitored: bool) -> Reply {
        let heartbeats = self.memory.components().heartbeat_pool();
        let Some(slot) = heartbeats.acquire(monotonic_now_ns()) else {
            log::error!("heartbeat pool full, cannot register {name} (pid {pid})");
            return Reply::Error(ProtocolError::PoolFull);
        };
        let slot = slot as u32;

        let mut state = self.lock_state();
        state.processes.insert(slot, ProcessRecord { name, pid, monitored });
        log::info!("registered process {name} (pid {pid}) on heartbeat slot {slot}");
        Reply::Registered { slot }
    }

    fn rollback_registration(&self, slot: u32) {
        let mut state = self.lock_state();
        if state.processes.remove(&slot).is_some() {
            self.memory.components().heartbeat_pool().release(slot as usize);
            log::warn!("rolled back registration of slot {slot}");
        }
    }

    fn unregister(&self, slot: u32) -> Reply {
        let mut state = self.lock_state();
        let Some(record) = state.processes.remove(&slot) else {
            return Reply::Error(ProtocolError::NotRegistered);
        };
        self.remove_offers_of(&mut state, slot);
        self.memory.components().heartbeat_pool().release(slot as usize);
        log::info!("unregistered process {} (slot {slot})", record.name);
        Reply::Unregistered
    }

    // -----------------------------------------------------------------
    // Offers
    // -----------------------------------------------------------------

    fn slot_of_name(state: &RouterState, name: &RuntimeName) -> Option<u32> {
        state
            .processes
            .iter()
            .find(|(_, record)| record.name == *name)
            .map(|(&slot, _)| slot)
    }

    fn offer_publisher(&self, name: RuntimeName, pid: u32, service: ServiceDescription) -> Reply {
        let mut state = self.lock_state();
        let Some(slot) = Self::slot_of_name(&state, &name) else {
            log::warn!("publisher offer from unregistered process {name} (pid {pid})");
            return Reply::Error(ProtocolError::NotRegistered);
        };
        let entry = state.matches.entry(service).or_default();
        if entry.publishers.iter().any(|p| p.name == name) {
            return Reply::Error(ProtocolError::DuplicateOffer);
        }
        entry.publishers.push(PublisherRecord { name, slot });
        log::info!("publisher {name} offers {service}");
        Reply::PublisherAck
    }

    fn offer_subscriber(&self, name: RuntimeName, pid: u32, service: ServiceDescription) -> Reply {
        let mut state = self.lock_state();
        let Some(slot) = Self::slot_of_name(&state, &name) else {
            log::warn!("subscriber offer from unregistered process {name} (pid {pid})");
            return Reply::Error(ProtocolError::NotRegistered);
        };
        let components = self.memory.components();
        {
            let entry = state.matches.entry(service).or_default();
            if entry.subscribers.iter().any(|s| s.name == name) {
                return Reply::Error(ProtocolError::DuplicateOffer);
            }
        }
        let Some(queue_index) = components.acquire_queue() else {
            log::error!("receive-queue pool exhausted, rejecting subscriber {name}");
            return Reply::Error(ProtocolError::AllocationFailed);
        };
        let Some(queue_offset) = components.queue_offset(queue_index) else {
            components.release_queue(queue_index);
            return Reply::Error(ProtocolError::AllocationFailed);
        };
        state
            .matches
            .entry(service)
            .or_default()
            .subscribers
            .push(SubscriberRecord { name, slot, queue_index });
        log::info!("subscriber {name} on {service}, queue {queue_index} at offset {queue_offset}");
        Reply::SubscriberAck { queue_offset }
    }

    // -----------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------

    fn route(
        &self,
        publisher_slot: u32,
        service: ServiceDescription,
        pool_id: u64,
        chunk_index: u32,
    ) -> Reply {
        let state = self.lock_state();
        if !state.processes.contains_key(&publisher_slot) {
            return Reply::Error(ProtocolError::NotRegistered);
        }
        let manager = self.memory.manager();
        if pool_id != manager.segment_id() {
            log::warn!("route names pool {pool_id}, serving {}", manager.segment_id());
            return Reply::Error(ProtocolError::ParseFailed);
        }

        // Adopt the reference the publisher reserved with its
        // prepare-for-transfer; it is dropped when this scope ends, after
        // every subscriber got its own reference.
        let reserved = match SharedChunk::from_index(chunk_index, manager) {
            Ok(chunk) => chunk,
            Err(err) => {
                log::warn!("route with unusable chunk index {chunk_index}: {err}");
                return Reply::Error(ProtocolError::ParseFailed);
            }
        };

        let Some(entry) = state.matches.get(&service) else {
            return Reply::NoSubscribers;
        };
        if entry.subscribers.is_empty() {
            return Reply::NoSubscribers;
        }

        let header = reserved.header();
        let sequence_number = unsafe { (*header).sequence_number };
        let components = self.memory.components();
        let now_ns = monotonic_now_ns();

        for subscriber in &entry.subscribers {
            let Some(queue) = components.queue(subscriber.queue_index) else {
                continue;
            };
            // One reference per subscriber, reserved before the descriptor
            // becomes visible.
            let _ = reserved.prepare_for_transfer();
            match queue.begin_push() {
                Some(slot) => {
                    unsafe {
                        slot.write(MessageDescriptor {
                            service,
                            chunk_index,
                            publisher_slot,
                            sequence_number,
                            timestamp_ns: now_ns,
                        });
                    }
                    queue.commit_push();
                }
                None => {
                    // Full queue: drop the descriptor, count it, and take
                    // the reserved reference back so the chunk cannot leak.
                    components.count_drop(subscriber.queue_index);
                    reserved.release_reservation();
                    log::warn!(
                        "queue {} full, dropped seq {sequence_number} for {}",
                        subscriber.queue_index,
                        subscriber.name
                    );
                }
            }
        }
        Reply::Routed
    }

    // -----------------------------------------------------------------
    // Monitor thread
    // -----------------------------------------------------------------

    fn monitor_loop(&self) {
        let deadline_ns = self.config.heartbeat_deadline.as_nanos() as u64;
        let mut tick: u32 = 0;
        while self.run.load(Ordering::Acquire) {
            std::thread::sleep(self.config.monitor_period);
            self.evict_stale(deadline_ns);
            // Roughly once a second, show who is registered.
            if tick % 3 == 0 {
                self.dump_processes();
            }
            tick = tick.wrapping_add(1);
        }
        log::info!("monitor thread stopped");
    }

    fn evict_stale(&self, deadline_ns: u64) {
        let now_ns = monotonic_now_ns();
        let components = self.memory.components();
        let mut state = self.lock_state();

        let stale: Vec<u32> = state
            .processes
            .iter()
            .filter(|(&slot, record)| {
                record.monitored
                    && components
                        .heartbeat_pool()
                        .slot(slot as usize)
                        .map(|s| s.age_ns(now_ns) > deadline_ns)
                        .unwrap_or(true)
            })
            .map(|(&slot, _)| slot)
            .collect();

        for slot in stale {
            if let Some(record) = state.processes.remove(&slot) {
                log::warn!(
                    "process {} (pid {}, slot {slot}) missed its heartbeat deadline, evicting",
                    record.name,
                    record.pid
                );
                self.remove_offers_of(&mut state, slot);
                components.heartbeat_pool().release(slot as usize);
            }
        }
    }

    /// Remove all publisher/subscriber offers of the process on `slot`,
    /// returning subscriber queues to the pool. Descriptors still pending
    /// in a reclaimed queue carry references nobody will ever consume, so
    /// they are released here.
    fn remove_offers_of(&self, state: &mut RouterState, slot: u32) {
        let components = self.memory.components();
        let manager = self.memory.manager();
        state.matches.retain(|service, entry| {
            entry.publishers.retain(|p| p.slot != slot);
            entry.subscribers.retain(|s| {
                if s.slot == slot {
                    log::info!("releasing queue {} of {} on {service}", s.queue_index, s.name);
                    if let Some(queue) = components.queue(s.queue_index) {
                        let mut pending = 0u64;
                        while let Some(descriptor) = queue.begin_pop() {
                            let chunk_index = unsafe { (*descriptor).chunk_index };
                            queue.commit_pop();
                            match SharedChunk::from_index(chunk_index, manager) {
                                Ok(chunk) => drop(chunk),
                                Err(err) => log::error!(
                                    "pending descriptor names unusable chunk {chunk_index}: {err}"
                                ),
                            }
                            pending += 1;
                        }
                        if pending > 0 {
                            log::info!("released {pending} undelivered descriptors");
                        }
                    }
                    components.release_queue(s.queue_index);
                    false
                } else {
                    true
                }
            });
            !entry.publishers.is_empty() || !entry.subscribers.is_empty()
        });
    }

    // -----------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------

    fn dump_processes(&self) {
        let state = self.lock_state();
        log::debug!("registered processes: {}", state.processes.len());
        for (slot, record) in &state.processes {
            log::debug!("  [{slot}] {} (pid {})", record.name, record.pid);
        }
    }

    /// Occupancy report for the DUMP diagnostic: process count, per-pool
    /// usage, per-queue drop counts. Truncated to fit one datagram.
    fn build_dump(&self) -> String {
        let state = self.lock_state();
        let mut report = format!("processes={}", state.processes.len());
        for stats in self.memory.manager().pool_stats() {
            report.push_str(&format!(
                ";pool={}/{}/{}",
                stats.payload_capacity, stats.used, stats.free
            ));
        }
        let components = self.memory.components();
        for index in 0..crate::daemon::components::MAX_RECEIVE_QUEUES {
            if components.queue_in_use(index) {
                report.push_str(&format!(";queue={}:{}", index, components.dropped(index)));
            }
        }
        report.truncate(MAX_DATAGRAM_SIZE - "OK:DUMP:".len());
        report
    }
}
