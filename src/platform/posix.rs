// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// POSIX implementations: shm_open/mmap shared memory with the four open
// modes, sem_open named semaphores, AF_UNIX datagram sockets, the
// monotonic clock, and the process-global shutdown flag.

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

use thiserror::Error;

// ---------------------------------------------------------------------------
// Clock and process helpers
// ---------------------------------------------------------------------------

/// Current CLOCK_MONOTONIC time in nanoseconds.
///
/// Used for heartbeat timestamps so that wall-clock adjustments can never
/// make a live process look stale.
pub fn monotonic_now_ns() -> u64 {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}

/// The calling process id.
pub fn process_id() -> u32 {
    unsafe { libc::getpid() as u32 }
}

// ---------------------------------------------------------------------------
// Shutdown flag: SIGINT/SIGTERM set it, worker loops poll it
// ---------------------------------------------------------------------------

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn shutdown_signal_handler(_signum: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Release);
}

/// Install SIGINT and SIGTERM handlers that set the process-global
/// shutdown flag. Async-signal-safe: the handler only stores an atomic.
pub fn install_shutdown_handlers() -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = shutdown_signal_handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        for sig in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(sig, &action, ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

/// Whether a shutdown signal has been received.
pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::Acquire)
}

// ---------------------------------------------------------------------------
// Shared memory
// ---------------------------------------------------------------------------

/// Open mode for a shared memory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShmMode {
    /// Create exclusively; fail if the name already exists.
    ExclusiveCreate,
    /// Unlink any stale segment of the same name, then create exclusively.
    PurgeAndCreate,
    /// Create if missing, open if it already exists.
    OpenOrCreate,
    /// Open an existing segment; fail if it does not exist.
    OpenExisting,
}

/// Access protection for the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShmAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Validate a POSIX shm name and return it with the mandatory leading '/'.
fn shm_name(name: &str) -> io::Result<CString> {
    if name.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "shm name is empty"));
    }
    let full = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };
    // NAME_MAX applies to the name without the leading slash on Linux.
    if full.len() > 255 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "shm name too long"));
    }
    CString::new(full).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

// ---------------------------------------------------------------------------
// Process-local mapping cache.
//
// All handles within one process that open the same segment name share a
// single mmap. Without this, a daemon and a runtime client living in the
// same process would map the segment at two different base addresses, and
// the segment-id registry could only serve one of them.
// ---------------------------------------------------------------------------

fn mapping_cache() -> &'static Mutex<HashMap<String, Weak<PosixSharedMemory>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Weak<PosixSharedMemory>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A named POSIX shared memory mapping.
///
/// The segment is unlinked on drop only by the handle that created it, so
/// attachers cannot tear down a segment the owner still serves.
pub struct PosixSharedMemory {
    mem: *mut u8,
    size: usize,
    name: String,
    created: bool,
}

unsafe impl Send for PosixSharedMemory {}
unsafe impl Sync for PosixSharedMemory {}

impl PosixSharedMemory {
    /// Open (or create) a named segment and map it, reusing an existing
    /// mapping if this process already holds one for the same name.
    ///
    /// Create modes conflict with a live local mapping (the segment clearly
    /// exists) and fail with `AlreadyExists`.
    pub(crate) fn acquire(
        name: &str,
        size: usize,
        access: ShmAccess,
        mode: ShmMode,
        permissions: u32,
    ) -> io::Result<Arc<Self>> {
        let key = shm_name(name)?.into_string().unwrap_or_default();
        let mut cache = mapping_cache().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = cache.get(&key).and_then(Weak::upgrade) {
            return match mode {
                ShmMode::ExclusiveCreate | ShmMode::PurgeAndCreate => Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("segment {key} is already mapped in this process"),
                )),
                ShmMode::OpenOrCreate | ShmMode::OpenExisting => {
                    if size != 0 && existing.size() < size {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!(
                                "segment {key} is {} bytes, expected at least {size}",
                                existing.size()
                            ),
                        ));
                    }
                    Ok(existing)
                }
            };
        }
        let mapped = Arc::new(Self::open(name, size, access, mode, permissions)?);
        cache.insert(key, Arc::downgrade(&mapped));
        Ok(mapped)
    }

    /// Open (or create) a named segment of `size` bytes and map it.
    ///
    /// For `OpenExisting` the requested `size` may be zero; the actual
    /// segment size is taken from `fstat`.
    fn open(
        name: &str,
        size: usize,
        access: ShmAccess,
        mode: ShmMode,
        permissions: u32,
    ) -> io::Result<Self> {
        let c_name = shm_name(name)?;
        if size == 0 && mode != ShmMode::OpenExisting {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "shm size is 0"));
        }

        let oflag_access = match access {
            ShmAccess::ReadOnly => libc::O_RDONLY,
            // shm_open has no write-only mode; the mapping protection below
            // is what actually restricts access.
            ShmAccess::WriteOnly | ShmAccess::ReadWrite => libc::O_RDWR,
        };
        let perms = permissions as libc::mode_t;

        let (fd, created) = match mode {
            ShmMode::ExclusiveCreate => {
                let fd = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        oflag_access | libc::O_CREAT | libc::O_EXCL,
                        perms as libc::c_uint,
                    )
                };
                if fd == -1 {
                    return Err(io::Error::last_os_error());
                }
                (fd, true)
            }
            ShmMode::PurgeAndCreate => {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                let fd = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        oflag_access | libc::O_CREAT | libc::O_EXCL,
                        perms as libc::c_uint,
                    )
                };
                if fd == -1 {
                    return Err(io::Error::last_os_error());
                }
                (fd, true)
            }
            ShmMode::OpenOrCreate => {
                // Try exclusive create first so ftruncate only runs on a
                // segment we actually own.
                let fd = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        oflag_access | libc::O_CREAT | libc::O_EXCL,
                        perms as libc::c_uint,
                    )
                };
                if fd != -1 {
                    (fd, true)
                } else {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() != Some(libc::EEXIST) {
                        return Err(err);
                    }
                    let fd = unsafe {
                        libc::shm_open(c_name.as_ptr(), oflag_access, perms as libc::c_uint)
                    };
                    if fd == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    (fd, false)
                }
            }
            ShmMode::OpenExisting => {
                let fd =
                    unsafe { libc::shm_open(c_name.as_ptr(), oflag_access, perms as libc::c_uint) };
                if fd == -1 {
                    return Err(io::Error::last_os_error());
                }
                (fd, false)
            }
        };

        if created {
            unsafe { libc::fchmod(fd, perms) };
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(err);
            }
        }

        let map_size = if created {
            size
        } else {
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut st) } != 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err);
            }
            let actual = st.st_size as usize;
            if size != 0 && actual < size {
                unsafe { libc::close(fd) };
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("shm segment {name} is {actual} bytes, expected at least {size}"),
                ));
            }
            actual
        };

        let prot = match access {
            ShmAccess::ReadOnly => libc::PROT_READ,
            ShmAccess::WriteOnly => libc::PROT_WRITE,
            ShmAccess::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        };
        let mem = unsafe {
            libc::mmap(ptr::null_mut(), map_size, prot, libc::MAP_SHARED, fd, 0)
        };
        unsafe { libc::close(fd) };
        if mem == libc::MAP_FAILED {
            if created {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
            }
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            mem: mem as *mut u8,
            size: map_size,
            name: c_name.into_string().unwrap_or_default(),
            created,
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle created the segment (and thus owns its name).
    pub fn created(&self) -> bool {
        self.created
    }
}

impl Drop for PosixSharedMemory {
    fn drop(&mut self) {
        if self.mem.is_null() {
            return;
        }
        // Evict the (now dead) cache entry so a later open maps afresh.
        let mut cache = mapping_cache().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(weak) = cache.get(&self.name) {
            if weak.upgrade().is_none() {
                cache.remove(&self.name);
            }
        }
        drop(cache);

        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        if self.created {
            if let Ok(c_name) = CString::new(self.name.as_bytes()) {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Named semaphore: gates attach flows until construction has finished
// ---------------------------------------------------------------------------

/// A named POSIX semaphore.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: CString,
    owner: bool,
}

unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Purge any stale semaphore of the same name, then create one with
    /// `initial` as its value.
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        let c_name = shm_name(name)?;
        unsafe { libc::sem_unlink(c_name.as_ptr()) };
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o660 as libc::c_uint,
                initial,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { sem, name: c_name, owner: true })
    }

    /// Open an existing named semaphore.
    pub fn open(name: &str) -> io::Result<Self> {
        let c_name = shm_name(name)?;
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { sem, name: c_name, owner: false })
    }

    pub fn post(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block until the semaphore can be decremented. EINTR is retried.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }

    /// Wait with a deadline. Returns `Ok(true)` if acquired, `Ok(false)` on
    /// timeout. Implemented as a trywait poll so it works without
    /// `sem_timedwait` (and without CLOCK_REALTIME sensitivity).
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                _ => return Err(err),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe { libc::sem_close(self.sem) };
        if self.owner {
            unsafe { libc::sem_unlink(self.name.as_ptr()) };
        }
    }
}

// ---------------------------------------------------------------------------
// Unix-domain datagram socket
// ---------------------------------------------------------------------------

/// How often a failing `sendto` is retried before giving up.
const SEND_RETRY_LIMIT: u32 = 3;

/// Errors surfaced by the datagram transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("timed out waiting for a datagram")]
    Timeout,
    #[error("datagram of {len} bytes exceeds the {max}-byte limit")]
    MessageTooLarge { len: usize, max: usize },
    #[error("send failed after {attempts} attempts: {source}")]
    SendRetriesExhausted { attempts: u32, source: io::Error },
}

/// An opaque peer address, as captured by `recv_from`. Replies go back to
/// exactly this address.
#[derive(Clone, Copy)]
pub struct SocketAddress {
    addr: libc::sockaddr_un,
    len: libc::socklen_t,
}

impl std::fmt::Debug for SocketAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path: Vec<u8> = self
            .addr
            .sun_path
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        write!(f, "SocketAddress({})", String::from_utf8_lossy(&path))
    }
}

fn sockaddr_from_path(path: &Path) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    let bytes = path.as_os_str().as_encoded_bytes();
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path too long for sockaddr_un",
        ));
    }
    for (dst, &src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
        *dst = src as libc::c_char;
    }
    let len = (std::mem::size_of::<libc::sa_family_t>() + bytes.len() + 1) as libc::socklen_t;
    Ok((addr, len))
}

/// A bound AF_UNIX SOCK_DGRAM socket. One datagram per request, one per
/// reply; the bound path is unlinked on drop.
pub struct UdsSocket {
    fd: libc::c_int,
    path: PathBuf,
}

unsafe impl Send for UdsSocket {}
unsafe impl Sync for UdsSocket {}

impl UdsSocket {
    /// Create a datagram socket and bind it to `path`, replacing any stale
    /// socket file left behind by a crashed process.
    pub fn bind(path: &Path) -> io::Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_DGRAM, 0) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        let _ = std::fs::remove_file(path);
        let (addr, len) = match sockaddr_from_path(path) {
            Ok(pair) => pair,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };
        let rc = unsafe {
            libc::bind(fd, &addr as *const libc::sockaddr_un as *const libc::sockaddr, len)
        };
        if rc != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        Ok(Self { fd, path: path.to_path_buf() })
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a receive timeout; `recv_from` then reports `Timeout` instead
    /// of blocking forever.
    pub fn set_recv_timeout(&self, timeout: Duration) -> io::Result<()> {
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let rc = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Send one datagram to the socket bound at `dest`.
    pub fn send_to(&self, data: &[u8], dest: &Path) -> Result<(), TransportError> {
        let (addr, len) = sockaddr_from_path(dest).map_err(TransportError::Io)?;
        self.send_to_addr(data, &SocketAddress { addr, len })
    }

    /// Send one datagram to a previously captured peer address.
    pub fn send_to_addr(&self, data: &[u8], dest: &SocketAddress) -> Result<(), TransportError> {
        if data.len() > crate::wire::MAX_DATAGRAM_SIZE {
            return Err(TransportError::MessageTooLarge {
                len: data.len(),
                max: crate::wire::MAX_DATAGRAM_SIZE,
            });
        }
        let mut attempts = 0;
        loop {
            let rc = unsafe {
                libc::sendto(
                    self.fd,
                    data.as_ptr() as *const libc::c_void,
                    data.len(),
                    0,
                    &dest.addr as *const libc::sockaddr_un as *const libc::sockaddr,
                    dest.len,
                )
            };
            if rc >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                // EINTR is retried transparently and does not count.
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) | Some(libc::ENOBUFS) => {
                    attempts += 1;
                    if attempts >= SEND_RETRY_LIMIT {
                        return Err(TransportError::SendRetriesExhausted { attempts, source: err });
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                _ => return Err(TransportError::Io(err)),
            }
        }
    }

    /// Receive one datagram, returning the byte count and the sender address.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddress), TransportError> {
        loop {
            let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
            let mut addr_len = std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
            let rc = unsafe {
                libc::recvfrom(
                    self.fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                    &mut addr as *mut libc::sockaddr_un as *mut libc::sockaddr,
                    &mut addr_len,
                )
            };
            if rc >= 0 {
                return Ok((rc as usize, SocketAddress { addr, len: addr_len }));
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) => return Err(TransportError::Timeout),
                _ => return Err(TransportError::Io(err)),
            }
        }
    }
}

impl Drop for UdsSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
        let _ = std::fs::remove_file(&self.path);
    }
}
