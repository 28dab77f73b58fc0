// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Subscriber port: subscribes to a service, polls its receive queue, and
// rematerializes chunk handles from the indices the router delivered.

use crate::daemon::{MessageDescriptor, ReceiveQueue};
use crate::platform::process_id;
use crate::runtime::client::{Runtime, RuntimeError};
use crate::service::ServiceDescription;
use crate::shared_chunk::SharedChunk;
use crate::wire::{Reply, Request};

/// A subscriber to one service.
pub struct Subscriber<'r> {
    runtime: &'r Runtime,
    service: ServiceDescription,
    queue: Option<&'r ReceiveQueue>,
    queue_index: Option<usize>,
    subscribed: bool,
}

impl<'r> Subscriber<'r> {
    pub fn new(runtime: &'r Runtime, service: ServiceDescription) -> Self {
        Self { runtime, service, queue: None, queue_index: None, subscribed: false }
    }

    /// Register this subscriber with the router and map its receive queue.
    /// Idempotent.
    pub fn subscribe(&mut self) -> Result<(), RuntimeError> {
        if self.subscribed {
            return Ok(());
        }
        let request = Request::OfferSubscriber {
            name: *self.runtime.name(),
            pid: process_id(),
            service: self.service,
        };
        let queue_offset = match self.runtime.request_reply(&request)? {
            Reply::SubscriberAck { queue_offset } => queue_offset,
            Reply::Error(kind) => return Err(RuntimeError::Rejected(kind)),
            other => return Err(RuntimeError::MalformedReply(other.encode())),
        };

        let components = self.runtime.components();
        self.queue = components.queue_at_offset(queue_offset);
        self.queue_index = components.queue_index_of_offset(queue_offset);
        if self.queue.is_none() {
            return Err(RuntimeError::QueueUnavailable);
        }
        self.subscribed = true;
        log::info!("subscribed to {} via queue offset {queue_offset}", self.service);
        Ok(())
    }

    /// Stop consuming locally. The router's record disappears on
    /// unregister or eviction.
    pub fn unsubscribe(&mut self) {
        self.subscribed = false;
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn service(&self) -> &ServiceDescription {
        &self.service
    }

    /// Poll the receive queue. `Ok(None)` when nothing is pending.
    ///
    /// Each returned sample owns the reference the router reserved when it
    /// enqueued the descriptor; dropping the sample releases it.
    pub fn take(&self) -> Result<Option<ReceivedSample>, RuntimeError> {
        if !self.subscribed {
            return Err(RuntimeError::NotSubscribed);
        }
        let queue = self.queue.ok_or(RuntimeError::QueueUnavailable)?;

        let mut descriptor = MessageDescriptor {
            service: self.service,
            chunk_index: 0,
            publisher_slot: 0,
            sequence_number: 0,
            timestamp_ns: 0,
        };
        loop {
            if !queue.try_pop(&mut descriptor) {
                return Ok(None);
            }
            let chunk = SharedChunk::from_index(descriptor.chunk_index, self.runtime.manager())?;
            if descriptor.service != self.service {
                // A descriptor for a foreign service should be impossible on
                // an exclusive queue; drop the reference and keep polling.
                log::warn!(
                    "queue delivered {} but this subscriber wants {}",
                    descriptor.service,
                    self.service
                );
                continue;
            }
            return Ok(Some(ReceivedSample { chunk, descriptor }));
        }
    }

    /// Descriptors the router had to drop because this queue was full.
    pub fn dropped(&self) -> u64 {
        match self.queue_index {
            Some(index) => self.runtime.components().dropped(index),
            None => 0,
        }
    }
}

/// A received chunk: read-only payload access plus the routing metadata.
pub struct ReceivedSample {
    chunk: SharedChunk,
    descriptor: MessageDescriptor,
}

impl ReceivedSample {
    pub fn payload(&self) -> &[u8] {
        self.chunk.payload_slice()
    }

    pub fn payload_size(&self) -> u64 {
        self.chunk.payload_size()
    }

    pub fn sequence_number(&self) -> u64 {
        self.descriptor.sequence_number
    }

    pub fn publisher_slot(&self) -> u32 {
        self.descriptor.publisher_slot
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.descriptor.timestamp_ns
    }

    pub fn service(&self) -> &ServiceDescription {
        &self.descriptor.service
    }

    /// The management index the chunk traveled under.
    pub fn management_index(&self) -> u32 {
        self.descriptor.chunk_index
    }

    /// Current reference count of the underlying chunk (diagnostics).
    pub fn use_count(&self) -> u64 {
        self.chunk.use_count()
    }
}
