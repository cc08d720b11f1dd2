//! Thin wrappers over the raw POSIX surface the port layer drives.
//!
//! Everything here is a direct, non-blocking syscall wrapper returning
//! errno-preserving results; policy (parking, retries, fan-out) lives in
//! the callers. Hard errors are reported as raw errno values so harvest
//! code can thread them into completion records unchanged.
//!
//! # Safety
//!
//! This module concentrates the crate's FFI. The unsafe operations are
//! plain libc calls with caller-checked preconditions:
//!
//! - buffer pointers are derived from live `&mut [u8]` borrows
//! - sockaddr storage is zero-initialized before the kernel writes it
//! - `siginfo_t` union fields are read only for the `si_code` class that
//!   populated them (see [`SigInfo`])
//! - AIO control blocks outlive their kernel ownership (enforced by the
//!   pool's doomed-list discipline, not here)

#![allow(unsafe_code)]

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::time::Duration;

/// Returns the calling thread's most recent errno.
pub fn errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// True for the "parked, will complete later" errno values.
pub fn would_block(code: i32) -> bool {
    code == libc::EAGAIN || code == libc::EWOULDBLOCK
}

/// Puts a descriptor into non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a caller-supplied fd; invalid fds fail with EBADF.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Closes a descriptor, ignoring errors.
pub fn close_fd(fd: RawFd) {
    // SAFETY: close is always safe to attempt; double-close is the
    // caller's bug and surfaces as EBADF, which we ignore.
    unsafe {
        let _ = libc::close(fd);
    }
}

// ---------------------------------------------------------------------------
// sockaddr conversion
// ---------------------------------------------------------------------------

fn sockaddr_from(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: zeroed sockaddr_storage is valid for every address family.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_in>();
            // SAFETY: storage is large and aligned enough for sockaddr_in.
            unsafe {
                (*sin).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sin).sin_port = v4.port().to_be();
                (*sin).sin_addr.s_addr = u32::from(*v4.ip()).to_be();
            }
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_in6>();
            // SAFETY: storage is large and aligned enough for sockaddr_in6.
            unsafe {
                (*sin6).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sin6).sin6_port = v6.port().to_be();
                (*sin6).sin6_flowinfo = v6.flowinfo();
                (*sin6).sin6_addr.s6_addr = v6.ip().octets();
                (*sin6).sin6_scope_id = v6.scope_id();
            }
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

fn sockaddr_to(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Option<SocketAddr> {
    match i32::from(storage.ss_family) {
        libc::AF_INET if len as usize >= mem::size_of::<libc::sockaddr_in>() => {
            // SAFETY: family and length checked; reading the in-bounds prefix.
            let sin = unsafe { std::ptr::addr_of!(*storage).cast::<libc::sockaddr_in>().read() };
            Some(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 if len as usize >= mem::size_of::<libc::sockaddr_in6>() => {
            // SAFETY: family and length checked; reading the in-bounds prefix.
            let sin6 =
                unsafe { std::ptr::addr_of!(*storage).cast::<libc::sockaddr_in6>().read() };
            Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// socket operations
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: libc::c_int = 0;

/// Starts a non-blocking connect. `Ok(())` means established immediately.
pub fn connect(fd: RawFd, addr: &SocketAddr) -> Result<(), i32> {
    let (storage, len) = sockaddr_from(addr);
    // SAFETY: storage/len describe a valid sockaddr for addr's family.
    let rc = unsafe {
        libc::connect(fd, std::ptr::addr_of!(storage).cast::<libc::sockaddr>(), len)
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(errno())
    }
}

/// Accepts one pending connection, returning the new descriptor and peer.
pub fn accept(fd: RawFd) -> Result<(RawFd, Option<SocketAddr>), i32> {
    // SAFETY: zeroed storage is a valid out-parameter for accept.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    // SAFETY: pointers reference the locals above for the call's duration.
    let rc = unsafe {
        libc::accept(
            fd,
            std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr>(),
            &mut len,
        )
    };
    if rc < 0 {
        return Err(errno());
    }
    Ok((rc, sockaddr_to(&storage, len)))
}

/// Receives into `buf`. Zero is a legitimate completion (EOF / empty datagram).
pub fn recv(fd: RawFd, buf: &mut [u8]) -> Result<usize, i32> {
    // SAFETY: buf is a live mutable borrow for the call's duration.
    let rc = unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
    if rc < 0 {
        Err(errno())
    } else {
        Ok(rc as usize)
    }
}

/// Receives one datagram into `buf`, returning the source address.
pub fn recv_from(fd: RawFd, buf: &mut [u8]) -> Result<(usize, Option<SocketAddr>), i32> {
    // SAFETY: zeroed storage is a valid out-parameter for recvfrom.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    // SAFETY: buf and the locals above are live for the call's duration.
    let rc = unsafe {
        libc::recvfrom(
            fd,
            buf.as_mut_ptr().cast(),
            buf.len(),
            0,
            std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr>(),
            &mut len,
        )
    };
    if rc < 0 {
        Err(errno())
    } else {
        Ok((rc as usize, sockaddr_to(&storage, len)))
    }
}

/// Sends from `buf`.
pub fn send(fd: RawFd, buf: &[u8]) -> Result<usize, i32> {
    // SAFETY: buf is a live borrow for the call's duration.
    let rc = unsafe { libc::send(fd, buf.as_ptr().cast(), buf.len(), SEND_FLAGS) };
    if rc < 0 {
        Err(errno())
    } else {
        Ok(rc as usize)
    }
}

/// Sends one datagram from `buf` to `addr`.
pub fn send_to(fd: RawFd, buf: &[u8], addr: &SocketAddr) -> Result<usize, i32> {
    let (storage, len) = sockaddr_from(addr);
    // SAFETY: buf and storage are live borrows for the call's duration.
    let rc = unsafe {
        libc::sendto(
            fd,
            buf.as_ptr().cast(),
            buf.len(),
            SEND_FLAGS,
            std::ptr::addr_of!(storage).cast::<libc::sockaddr>(),
            len,
        )
    };
    if rc < 0 {
        Err(errno())
    } else {
        Ok(rc as usize)
    }
}

/// Reads and clears the descriptor's pending socket error.
pub fn socket_error(fd: RawFd) -> i32 {
    let mut code: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: code/len reference the locals above.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            std::ptr::addr_of_mut!(code).cast(),
            &mut len,
        )
    };
    if rc < 0 {
        errno()
    } else {
        code
    }
}

// ---------------------------------------------------------------------------
// POSIX AIO
// ---------------------------------------------------------------------------

/// How a submitted AIO operation reports completion.
#[derive(Debug, Clone, Copy)]
pub enum AioNotify {
    /// Raise `signo` with the packed item key as the signal value.
    Signal {
        /// Realtime signal number to raise.
        signo: i32,
        /// Packed [`ItemKey`](crate::pool::ItemKey) bits.
        bits: u64,
    },
    /// No notification; completion is discovered by polling `aio_error`.
    Quiet,
}

/// Fills an AIO control block for submission.
///
/// `buf` must stay valid (and unmoved) until the operation leaves
/// `EINPROGRESS`; the pool's boxed items guarantee that.
pub fn aio_prepare(
    cb: &mut libc::aiocb,
    fd: RawFd,
    buf: *mut u8,
    len: usize,
    offset: u64,
    notify: AioNotify,
) {
    cb.aio_fildes = fd;
    cb.aio_buf = buf.cast();
    cb.aio_nbytes = len;
    cb.aio_offset = offset as libc::off_t;
    cb.aio_reqprio = 0;
    match notify {
        AioNotify::Signal { signo, bits } => {
            cb.aio_sigevent.sigev_notify = libc::SIGEV_SIGNAL;
            cb.aio_sigevent.sigev_signo = signo;
            cb.aio_sigevent.sigev_value = libc::sigval {
                sival_ptr: bits as usize as *mut libc::c_void,
            };
        }
        AioNotify::Quiet => {
            cb.aio_sigevent.sigev_notify = libc::SIGEV_NONE;
        }
    }
}

/// Submits a prepared control block to the kernel.
pub fn aio_submit(cb: *mut libc::aiocb, write: bool) -> Result<(), i32> {
    // SAFETY: cb points at a prepared, pool-pinned control block.
    let rc = unsafe {
        if write {
            libc::aio_write(cb)
        } else {
            libc::aio_read(cb)
        }
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(errno())
    }
}

/// Terminal or in-flight status of a submitted AIO operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AioStatus {
    /// Still owned by the kernel.
    InProgress,
    /// Completed with the given byte count.
    Done(usize),
    /// Completed with the given errno.
    Failed(i32),
}

/// Queries an operation's status, reaping its return value when finished.
///
/// `Done`/`Failed` are terminal: `aio_return` has been consumed and this
/// must not be called again for the same submission.
pub fn aio_status(cb: *mut libc::aiocb) -> AioStatus {
    // SAFETY: cb points at a pool-pinned control block.
    let err = unsafe { libc::aio_error(cb) };
    if err == libc::EINPROGRESS {
        return AioStatus::InProgress;
    }
    if err == 0 {
        // SAFETY: aio_error reported completion; aio_return reaps it once.
        let n = unsafe { libc::aio_return(cb) };
        if n < 0 {
            return AioStatus::Failed(errno());
        }
        return AioStatus::Done(n as usize);
    }
    if err < 0 {
        return AioStatus::Failed(errno());
    }
    // SAFETY: reap the failed submission so the kernel forgets it.
    unsafe {
        let _ = libc::aio_return(cb);
    }
    AioStatus::Failed(err)
}

/// True once the operation has left `EINPROGRESS`, without reaping it.
/// Follow up with [`aio_status`] to consume the result exactly once.
pub fn aio_done(cb: *mut libc::aiocb) -> bool {
    // SAFETY: cb points at a pool-pinned control block; aio_error does not
    // consume the result.
    unsafe { libc::aio_error(cb) != libc::EINPROGRESS }
}

/// Outcome of an `aio_cancel` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AioCancelOutcome {
    /// Cancelled; the control block is ours again.
    Canceled,
    /// Already completed; treat as success and reap normally.
    AllDone,
    /// Still in flight and uncancellable; the control block must stay
    /// pinned until `aio_error` leaves `EINPROGRESS`.
    NotCanceled,
}

/// Requests cancellation of one outstanding operation.
pub fn aio_cancel(fd: RawFd, cb: *mut libc::aiocb) -> AioCancelOutcome {
    // SAFETY: cb points at a pool-pinned control block for fd.
    let rc = unsafe { libc::aio_cancel(fd, cb) };
    match rc {
        libc::AIO_CANCELED => AioCancelOutcome::Canceled,
        libc::AIO_ALLDONE => AioCancelOutcome::AllDone,
        _ => AioCancelOutcome::NotCanceled,
    }
}

// ---------------------------------------------------------------------------
// realtime signals (Linux)
// ---------------------------------------------------------------------------

/// Decoded signal delivery from `sigtimedwait`.
///
/// Union fields are interpreted by `si_code` class: descriptor-driven
/// deliveries (`POLL_*` codes) carry `fd`/`band`; queued and AIO
/// deliveries (`SI_QUEUE`/`SI_ASYNCIO`) carry `bits`.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy)]
pub struct SigInfo {
    /// Signal number delivered.
    pub signo: i32,
    /// Kernel `si_code` classifying the delivery.
    pub code: i32,
    /// Signalling descriptor (`POLL_*` deliveries only).
    pub fd: RawFd,
    /// Poll band bits (`POLL_*` deliveries only).
    pub band: i64,
    /// Payload value (`SI_QUEUE`/`SI_ASYNCIO` deliveries only).
    pub bits: u64,
}

/// `si_code`: delivered by `sigqueue`.
#[cfg(target_os = "linux")]
pub const SI_QUEUE: i32 = -1;
/// `si_code`: delivered by AIO completion.
#[cfg(target_os = "linux")]
pub const SI_ASYNCIO: i32 = -4;

#[cfg(target_os = "linux")]
mod rt {
    use super::{RawFd, SigInfo};
    use std::io;
    use std::mem;
    use std::time::Duration;

    // The sifields union starts after si_signo/si_errno/si_code (plus
    // alignment padding on 64-bit); fixed by the Linux ABI.
    const SI_UNION_OFFSET: usize = if cfg!(target_pointer_width = "64") { 16 } else { 12 };

    // Not exported by libc on the gnu-linux target; fixed by the Linux ABI.
    const F_SETSIG: libc::c_int = 10;

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct SiPoll {
        band: libc::c_long,
        fd: libc::c_int,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct SiRt {
        pid: libc::pid_t,
        uid: libc::uid_t,
        value: usize,
    }

    /// Returns `SIGRTMIN + offset`.
    pub fn rt_signal(offset: i32) -> i32 {
        libc::SIGRTMIN() + offset
    }

    fn build_set(signals: &[i32]) -> libc::sigset_t {
        // SAFETY: sigemptyset initializes the zeroed set before use.
        unsafe {
            let mut set: libc::sigset_t = mem::zeroed();
            libc::sigemptyset(&mut set);
            for &signo in signals {
                libc::sigaddset(&mut set, signo);
            }
            set
        }
    }

    /// Blocks `signals` in the calling thread's mask.
    ///
    /// Call before spawning threads that must not steal deliveries; child
    /// threads inherit the mask.
    pub fn block_signals(signals: &[i32]) -> io::Result<()> {
        let set = build_set(signals);
        // SAFETY: set is initialized; a null oldset is allowed.
        let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(rc))
        }
    }

    /// Waits up to `timeout` for one of `signals`, decoding its siginfo.
    ///
    /// Returns `None` on timeout or interruption.
    pub fn sigtimedwait(signals: &[i32], timeout: Duration) -> Option<SigInfo> {
        let set = build_set(signals);
        let ts = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };
        // SAFETY: zeroed siginfo is a valid out-parameter.
        let mut info: libc::siginfo_t = unsafe { mem::zeroed() };
        // SAFETY: all pointers reference live locals.
        let rc = unsafe { libc::sigtimedwait(&set, &mut info, &ts) };
        if rc < 0 {
            return None;
        }
        // SAFETY: reading the sifields union at its ABI-fixed offset; the
        // caller gates on si_code before trusting either interpretation.
        let (poll, value) = unsafe {
            let base = std::ptr::addr_of!(info).cast::<u8>();
            let poll = base.add(SI_UNION_OFFSET).cast::<SiPoll>().read_unaligned();
            let rt = base.add(SI_UNION_OFFSET).cast::<SiRt>().read_unaligned();
            (poll, rt.value)
        };
        Some(SigInfo {
            signo: info.si_signo,
            code: info.si_code,
            fd: poll.fd,
            band: poll.band as i64,
            bits: value as u64,
        })
    }

    /// Routes a descriptor's readiness to `signo` for this process.
    pub fn arm_async_signal(fd: RawFd, signo: i32) -> io::Result<()> {
        // SAFETY: fcntl calls on a caller-supplied fd.
        unsafe {
            if libc::fcntl(fd, libc::F_SETOWN, libc::getpid()) < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::fcntl(fd, F_SETSIG, signo) < 0 {
                return Err(io::Error::last_os_error());
            }
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_ASYNC | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Stops readiness signalling for a descriptor. Best effort.
    pub fn disarm_async_signal(fd: RawFd) {
        // SAFETY: fcntl calls on a caller-supplied fd; failures ignored
        // because the fd may already be closed.
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags >= 0 {
                let _ = libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_ASYNC);
            }
        }
    }

    /// Queues `signo` to this process with a payload value.
    pub fn queue_signal(signo: i32, bits: u64) -> io::Result<()> {
        let value = libc::sigval {
            sival_ptr: bits as usize as *mut libc::c_void,
        };
        // SAFETY: sigqueue to our own pid with an initialized value.
        let rc = unsafe { libc::sigqueue(libc::getpid(), signo, value) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(target_os = "linux")]
pub use rt::{arm_async_signal, block_signals, disarm_async_signal, queue_signal, rt_signal,
             sigtimedwait};

// ---------------------------------------------------------------------------
// select()
// ---------------------------------------------------------------------------

/// Read/write descriptor sets for one `select` call.
pub struct FdSets {
    read: libc::fd_set,
    write: libc::fd_set,
    max: RawFd,
    any: bool,
}

impl FdSets {
    /// Creates empty sets.
    pub fn new() -> Self {
        // SAFETY: FD_ZERO initializes the zeroed sets before use.
        unsafe {
            let mut read: libc::fd_set = mem::zeroed();
            let mut write: libc::fd_set = mem::zeroed();
            libc::FD_ZERO(&mut read);
            libc::FD_ZERO(&mut write);
            Self {
                read,
                write,
                max: -1,
                any: false,
            }
        }
    }

    fn in_range(fd: RawFd) -> bool {
        fd >= 0 && (fd as usize) < libc::FD_SETSIZE as usize
    }

    /// Adds read interest. Returns false for out-of-range descriptors.
    pub fn add_read(&mut self, fd: RawFd) -> bool {
        if !Self::in_range(fd) {
            return false;
        }
        // SAFETY: fd range-checked against FD_SETSIZE above.
        unsafe { libc::FD_SET(fd, &mut self.read) };
        self.max = self.max.max(fd);
        self.any = true;
        true
    }

    /// Adds write interest. Returns false for out-of-range descriptors.
    pub fn add_write(&mut self, fd: RawFd) -> bool {
        if !Self::in_range(fd) {
            return false;
        }
        // SAFETY: fd range-checked against FD_SETSIZE above.
        unsafe { libc::FD_SET(fd, &mut self.write) };
        self.max = self.max.max(fd);
        self.any = true;
        true
    }

    /// True if any descriptor was added.
    pub fn any(&self) -> bool {
        self.any
    }

    /// Blocks up to `timeout` for readiness, consuming the sets in place.
    pub fn select(&mut self, timeout: Duration) -> Result<usize, i32> {
        let mut tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        // SAFETY: the sets and timeval are live locals/fields.
        let rc = unsafe {
            libc::select(
                self.max + 1,
                &mut self.read,
                &mut self.write,
                std::ptr::null_mut(),
                &mut tv,
            )
        };
        if rc < 0 {
            Err(errno())
        } else {
            Ok(rc as usize)
        }
    }

    /// True if `fd` was reported readable by the last `select`.
    pub fn readable(&self, fd: RawFd) -> bool {
        // SAFETY: FD_ISSET on an fd previously range-checked by add_read.
        Self::in_range(fd) && unsafe { libc::FD_ISSET(fd, &self.read) }
    }

    /// True if `fd` was reported writable by the last `select`.
    pub fn writable(&self, fd: RawFd) -> bool {
        // SAFETY: FD_ISSET on an fd previously range-checked by add_write.
        Self::in_range(fd) && unsafe { libc::FD_ISSET(fd, &self.write) }
    }
}

impl Default for FdSets {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a non-blocking self-pipe `(read_end, write_end)`.
pub fn make_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: fds is a live out-array of exactly two descriptors.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    for &fd in &fds {
        if let Err(err) = set_nonblocking(fd) {
            close_fd(fds[0]);
            close_fd(fds[1]);
            return Err(err);
        }
    }
    Ok((fds[0], fds[1]))
}

/// Drains every pending byte from the self-pipe's read end.
pub fn drain_pipe(fd: RawFd) {
    let mut sink = [0u8; 64];
    loop {
        // SAFETY: sink is a live mutable buffer.
        let rc = unsafe { libc::read(fd, sink.as_mut_ptr().cast(), sink.len()) };
        if rc <= 0 {
            break;
        }
    }
}

/// Writes one wakeup byte to the self-pipe's write end. Best effort: a
/// full pipe already guarantees a pending wakeup.
pub fn notify_pipe(fd: RawFd) {
    let byte = [1u8];
    // SAFETY: byte is a live buffer; short or failed writes are fine.
    unsafe {
        let _ = libc::write(fd, byte.as_ptr().cast(), 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockaddr_v4_round_trips() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let (storage, len) = sockaddr_from(&addr);
        assert_eq!(sockaddr_to(&storage, len), Some(addr));
    }

    #[test]
    fn sockaddr_v6_round_trips() {
        let addr: SocketAddr = "[::1]:9090".parse().unwrap();
        let (storage, len) = sockaddr_from(&addr);
        assert_eq!(sockaddr_to(&storage, len), Some(addr));
    }

    #[test]
    fn pipe_nudge_and_drain() {
        let (rd, wr) = make_pipe().expect("pipe");
        notify_pipe(wr);
        notify_pipe(wr);
        let mut sets = FdSets::new();
        assert!(sets.add_read(rd));
        let ready = sets.select(Duration::from_millis(100)).expect("select");
        assert_eq!(ready, 1);
        assert!(sets.readable(rd));
        drain_pipe(rd);
        let mut sets = FdSets::new();
        assert!(sets.add_read(rd));
        let ready = sets.select(Duration::from_millis(10)).expect("select");
        assert_eq!(ready, 0);
        close_fd(rd);
        close_fd(wr);
    }

    #[test]
    fn would_block_covers_both_spellings() {
        assert!(would_block(libc::EAGAIN));
        assert!(would_block(libc::EWOULDBLOCK));
        assert!(!would_block(libc::EBADF));
    }
}
