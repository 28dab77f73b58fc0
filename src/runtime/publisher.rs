// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Publisher port: offers a service, loans chunks from the shared pools,
// and publishes them by handing a management index to the router.

use crate::platform::process_id;
use crate::runtime::client::{Runtime, RuntimeError};
use crate::service::ServiceDescription;
use crate::shared_chunk::SharedChunk;
use crate::wire::{Reply, Request};

/// A publisher of one service.
pub struct Publisher<'r> {
    runtime: &'r Runtime,
    service: ServiceDescription,
    offered: bool,
}

impl<'r> Publisher<'r> {
    pub fn new(runtime: &'r Runtime, service: ServiceDescription) -> Self {
        Self { runtime, service, offered: false }
    }

    /// Announce this publisher to the router. Idempotent.
    pub fn offer(&mut self) -> Result<(), RuntimeError> {
        if self.offered {
            return Ok(());
        }
        let request = Request::OfferPublisher {
            name: *self.runtime.name(),
            pid: process_id(),
            service: self.service,
        };
        match self.runtime.request_reply(&request)? {
            Reply::PublisherAck => {
                self.offered = true;
                log::info!("publisher offered {}", self.service);
                Ok(())
            }
            Reply::Error(kind) => Err(RuntimeError::Rejected(kind)),
            other => Err(RuntimeError::MalformedReply(other.encode())),
        }
    }

    /// Withdraw the offer locally. Chunks already routed stay valid.
    pub fn stop_offer(&mut self) {
        self.offered = false;
    }

    pub fn is_offered(&self) -> bool {
        self.offered
    }

    pub fn service(&self) -> &ServiceDescription {
        &self.service
    }

    /// Reserve a chunk able to carry `payload_size` bytes.
    ///
    /// The loaned sample owns the chunk's only reference until it is
    /// published or dropped.
    pub fn loan(&self, payload_size: u64) -> Result<LoanedSample<'r>, RuntimeError> {
        if !self.offered {
            return Err(RuntimeError::NotOffered);
        }
        let chunk = self.runtime.manager().get_chunk(payload_size)?;
        let header = chunk.header();
        unsafe { (*header).origin_id = self.runtime.slot() as u64 };
        Ok(LoanedSample {
            runtime: self.runtime,
            service: self.service,
            chunk,
        })
    }
}

/// A chunk on loan to the publisher: write the payload, then publish.
/// Dropping without publishing returns the chunk to its pool.
pub struct LoanedSample<'r> {
    runtime: &'r Runtime,
    service: ServiceDescription,
    chunk: SharedChunk,
}

impl LoanedSample<'_> {
    /// The writable payload region.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // Exclusive: this sample holds the only handle until publish.
        unsafe { self.chunk.payload_slice_mut() }
    }

    pub fn payload(&self) -> &[u8] {
        self.chunk.payload_slice()
    }

    pub fn payload_size(&self) -> u64 {
        self.chunk.payload_size()
    }

    /// Sequence number stamped at allocation time.
    pub fn sequence_number(&self) -> u64 {
        let header = self.chunk.header();
        if header.is_null() {
            return 0;
        }
        unsafe { (*header).sequence_number }
    }

    /// The management index this chunk travels under.
    pub fn management_index(&self) -> Option<u32> {
        self.chunk.management_index()
    }

    /// Hand the chunk to the router for fan-out.
    ///
    /// Reserves one reference for the transfer and sends `ROUTE`; the
    /// publisher's own reference is released when `self` drops on return.
    /// A rejected or undeliverable route takes the reservation back so
    /// nothing leaks.
    pub fn publish(self) -> Result<(), RuntimeError> {
        let Some(chunk_index) = self.chunk.prepare_for_transfer() else {
            return Err(RuntimeError::NotOffered);
        };
        let request = Request::Route {
            publisher_slot: self.runtime.slot(),
            service: self.service,
            pool_id: self.runtime.manager().segment_id(),
            chunk_index,
        };
        let reply = match self.runtime.request_reply(&request) {
            Ok(reply) => reply,
            Err(err) => {
                self.chunk.release_reservation();
                return Err(err);
            }
        };
        match reply {
            // No subscribers is a delivered-nowhere success; the daemon
            // already released the reservation.
            Reply::Routed | Reply::NoSubscribers => Ok(()),
            Reply::Error(kind) => {
                self.chunk.release_reservation();
                Err(RuntimeError::Rejected(kind))
            }
            other => {
                self.chunk.release_reservation();
                Err(RuntimeError::MalformedReply(other.encode()))
            }
        }
    }
}
