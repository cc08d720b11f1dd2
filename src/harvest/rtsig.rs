//! Realtime-signal readiness source (`F_SETSIG` + `sigtimedwait`).
//!
//! Sockets are armed with `O_ASYNC` routed to a dedicated realtime signal,
//! so the kernel queues one siginfo per readiness transition carrying the
//! descriptor and poll band. File operations notify on a second realtime
//! signal whose payload is the submitting item's packed pool key, giving
//! O(1) identification with no scan. Plain `SIGIO` arrives only when the
//! realtime queue saturates and triggers a best-effort full sweep.
//!
//! All three signals are blocked process-mask-wide at construction (before
//! the harvester spawns, so every later thread inherits the mask) and
//! consumed synchronously by the harvester's `sigtimedwait` loop. No work
//! ever happens in an asynchronous signal handler.

use smallvec::SmallVec;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::port::registry::SocketKind;
use crate::port::Shared;
use crate::sys::{self, AioNotify, SigInfo};

use super::{PollCode, ReadySource, Wakeup};

/// Upper bound on signals drained per `wait` call before dispatching.
const DRAIN_BATCH: usize = 32;

/// Readiness source backed by realtime signals.
#[derive(Debug)]
pub struct SignalSource {
    socket_sig: i32,
    file_sig: i32,
}

impl SignalSource {
    /// Creates the source and blocks its signals in the calling thread.
    ///
    /// Construct the subsystem before spawning worker threads: the signal
    /// mask is inherited, and an unblocked completion signal in any thread
    /// would kill the process with the default realtime disposition.
    pub fn new(socket_offset: i32, file_offset: i32) -> io::Result<Self> {
        let socket_sig = sys::rt_signal(socket_offset);
        let file_sig = sys::rt_signal(file_offset);
        sys::block_signals(&[socket_sig, file_sig, libc::SIGIO])?;
        Ok(Self {
            socket_sig,
            file_sig,
        })
    }

    fn decode(&self, info: SigInfo, out: &mut SmallVec<[Wakeup; 8]>) {
        if info.signo == libc::SIGIO {
            // Queue saturated; the kernel fell back to plain SIGIO. Use
            // whatever descriptor info survived, else sweep everything.
            if info.code > 0 && info.fd >= 0 {
                band_wakeups(info.fd, info.band, out);
            } else {
                out.push(Wakeup::Overflow);
            }
        } else if info.signo == self.file_sig {
            if info.code == sys::SI_ASYNCIO {
                out.push(Wakeup::File { bits: info.bits });
            }
        } else if info.signo == self.socket_sig {
            // SI_QUEUE deliveries are our own nudges; they carry no fd.
            if info.code != sys::SI_QUEUE {
                band_wakeups(info.fd, info.band, out);
            }
        }
    }
}

fn band_wakeups(fd: RawFd, band: i64, out: &mut SmallVec<[Wakeup; 8]>) {
    let band = band as libc::c_long;
    if band & libc::c_long::from(libc::POLLERR) != 0 {
        out.push(Wakeup::Socket {
            fd,
            code: PollCode::Err,
        });
        return;
    }
    if band & libc::c_long::from(libc::POLLHUP) != 0 {
        out.push(Wakeup::Socket {
            fd,
            code: PollCode::Hup,
        });
        return;
    }
    if band & libc::c_long::from(libc::POLLOUT | libc::POLLWRNORM) != 0 {
        out.push(Wakeup::Socket {
            fd,
            code: PollCode::Out,
        });
    }
    if band & libc::c_long::from(libc::POLLIN | libc::POLLRDNORM | libc::POLLPRI) != 0 {
        out.push(Wakeup::Socket {
            fd,
            code: PollCode::In,
        });
    }
}

impl ReadySource for SignalSource {
    fn arm(&self, fd: RawFd, kind: SocketKind) -> io::Result<()> {
        match kind {
            // File completions notify through the AIO sigevent directly.
            SocketKind::File => Ok(()),
            SocketKind::Tcp | SocketKind::Udp => sys::arm_async_signal(fd, self.socket_sig),
        }
    }

    fn disarm(&self, fd: RawFd) {
        sys::disarm_async_signal(fd);
    }

    fn nudge(&self) {
        if let Err(err) = sys::queue_signal(self.socket_sig, 0) {
            tracing::debug!(%err, "nudge sigqueue failed");
        }
    }

    fn aio_notify(&self, key_bits: u64) -> AioNotify {
        AioNotify::Signal {
            signo: self.file_sig,
            bits: key_bits,
        }
    }

    fn wait(&self, _shared: &Shared, max_wait: Duration) -> SmallVec<[Wakeup; 8]> {
        let signals = [self.socket_sig, self.file_sig, libc::SIGIO];
        let mut out = SmallVec::new();
        let Some(first) = sys::sigtimedwait(&signals, max_wait) else {
            return out;
        };
        self.decode(first, &mut out);
        // Drain whatever else is already queued so one dispatch pass
        // handles a burst, then let the caller take the lock once.
        for _ in 1..DRAIN_BATCH {
            match sys::sigtimedwait(&signals, Duration::ZERO) {
                Some(info) => self.decode(info, &mut out),
                None => break,
            }
        }
        out
    }
}
