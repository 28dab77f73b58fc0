// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Shared-memory segments with configurable access/open modes, tied into the
// relative-pointer segment registry. Opening a segment registers its id;
// dropping the handle unregisters it again.

use thiserror::Error;

use crate::platform::PosixSharedMemory;
use crate::relative_ptr::{self, SegmentId};

/// Mapping protection for a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Open mode for a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create exclusively; fail if the name exists.
    ExclusiveCreate,
    /// Remove any stale segment of the same name, then create.
    PurgeAndCreate,
    /// Create if missing, open otherwise.
    OpenOrCreate,
    /// Open an existing segment; fail if missing.
    OpenExisting,
}

/// Configuration for opening a shared-memory segment.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// POSIX name, with or without the leading '/'.
    pub name: String,
    /// Requested size in bytes. Ignored (taken from the segment) when
    /// opening an existing segment with size 0.
    pub size: usize,
    pub access_mode: AccessMode,
    pub open_mode: OpenMode,
    /// POSIX permission bits, e.g. 0o660.
    pub permissions: u32,
}

impl SegmentConfig {
    /// Read-write purge-and-create with 0o660 permissions.
    pub fn create(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            access_mode: AccessMode::ReadWrite,
            open_mode: OpenMode::PurgeAndCreate,
            permissions: 0o660,
        }
    }

    /// Read-write open-existing; the size is taken from the segment.
    pub fn attach(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            access_mode: AccessMode::ReadWrite,
            open_mode: OpenMode::OpenExisting,
            permissions: 0o660,
        }
    }
}

#[derive(Debug, Error)]
pub enum ShmError {
    #[error("invalid segment configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("segment id {0} is already registered in this process")]
    SegmentIdInUse(SegmentId),
    #[error("shared memory operation failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A mapped shared-memory segment registered under a process-wide segment
/// id, so relative pointers stored inside it resolve in this process.
///
/// Handles for the same name within one process share a single mapping, so
/// they all see the segment at one base address.
pub struct SharedMemorySegment {
    inner: std::sync::Arc<PosixSharedMemory>,
    segment_id: SegmentId,
}

impl SharedMemorySegment {
    /// Open a segment per `config` and register it as `segment_id`.
    ///
    /// The id must be nonzero (id 0 encodes the null relative pointer) and
    /// must match the id every other process uses for this segment.
    pub fn open(config: &SegmentConfig, segment_id: SegmentId) -> Result<Self, ShmError> {
        if segment_id == 0 {
            return Err(ShmError::InvalidConfig("segment id 0 is reserved for null"));
        }
        let access = match config.access_mode {
            AccessMode::ReadOnly => crate::platform::ShmAccess::ReadOnly,
            AccessMode::WriteOnly => crate::platform::ShmAccess::WriteOnly,
            AccessMode::ReadWrite => crate::platform::ShmAccess::ReadWrite,
        };
        let mode = match config.open_mode {
            OpenMode::ExclusiveCreate => crate::platform::ShmMode::ExclusiveCreate,
            OpenMode::PurgeAndCreate => crate::platform::ShmMode::PurgeAndCreate,
            OpenMode::OpenOrCreate => crate::platform::ShmMode::OpenOrCreate,
            OpenMode::OpenExisting => crate::platform::ShmMode::OpenExisting,
        };
        let inner =
            PosixSharedMemory::acquire(&config.name, config.size, access, mode, config.permissions)?;
        relative_ptr::register_segment(segment_id, inner.as_mut_ptr())
            .map_err(|_| ShmError::SegmentIdInUse(segment_id))?;
        Ok(Self { inner, segment_id })
    }

    /// Base address of the mapping in this process.
    pub fn base_ptr(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    /// Mapped size in bytes.
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// The registered segment id.
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Whether this handle created the segment.
    pub fn created(&self) -> bool {
        self.inner.created()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }
}

impl Drop for SharedMemorySegment {
    fn drop(&mut self) {
        relative_ptr::unregister_segment(self.segment_id);
    }
}
