//! `select()` polling readiness source with a self-pipe wakeup.
//!
//! Used where realtime-signal delivery is unavailable. Every pass rebuilds
//! the descriptor sets from the currently-pending initial-queue actions:
//! accepts and receives contribute read interest, connects and sends write
//! interest. Pending file operations cannot be selected on, so each pass
//! peeks their `aio_error` state instead; a finished one becomes a file
//! wakeup exactly like a signal delivery would.
//!
//! When socket or file work is pending, `select` runs with a short quantum;
//! with nothing outstanding the loop parks on the self-pipe for up to the
//! idle-park duration instead of spinning. Initiators nudge the pipe when
//! they park new work so interest is rebuilt promptly.

use smallvec::SmallVec;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::pool::{ItemKey, OpKind};
use crate::port::registry::SocketKind;
use crate::port::Shared;
use crate::sys::{self, AioNotify};

use super::{PollCode, ReadySource, Wakeup};

/// Readiness source backed by a `select()` loop.
#[derive(Debug)]
pub struct SelectSource {
    pipe_rd: RawFd,
    pipe_wr: RawFd,
}

impl SelectSource {
    /// Creates the source and its self-pipe.
    pub fn new() -> io::Result<Self> {
        let (pipe_rd, pipe_wr) = sys::make_pipe()?;
        Ok(Self { pipe_rd, pipe_wr })
    }
}

impl Drop for SelectSource {
    fn drop(&mut self) {
        sys::close_fd(self.pipe_rd);
        sys::close_fd(self.pipe_wr);
    }
}

impl ReadySource for SelectSource {
    fn arm(&self, fd: RawFd, kind: SocketKind) -> io::Result<()> {
        match kind {
            SocketKind::File => Ok(()),
            SocketKind::Tcp | SocketKind::Udp => sys::set_nonblocking(fd),
        }
    }

    fn disarm(&self, _fd: RawFd) {}

    fn nudge(&self) {
        sys::notify_pipe(self.pipe_wr);
    }

    fn work_added(&self) {
        sys::notify_pipe(self.pipe_wr);
    }

    fn aio_notify(&self, _key_bits: u64) -> AioNotify {
        AioNotify::Quiet
    }

    fn wait(&self, shared: &Shared, max_wait: Duration) -> SmallVec<[Wakeup; 8]> {
        let mut out = SmallVec::new();
        let mut sets = sys::FdSets::new();
        sets.add_read(self.pipe_rd);

        // (fd, pending connect) pairs whose readiness we asked for.
        let mut watched: Vec<(RawFd, bool)> = Vec::new();
        let mut have_sockets = false;
        let have_files;
        {
            let mut registry = shared.registry.lock();

            let file_bits: Vec<u64> = registry
                .fds
                .values()
                .filter(|assoc| assoc.kind == SocketKind::File)
                .flat_map(|assoc| assoc.initial.iter().map(|key| key.to_bits()))
                .collect();
            have_files = !file_bits.is_empty();
            for bits in file_bits {
                let key = ItemKey::from_bits(bits);
                let done = match registry.pool.get_mut(key) {
                    Some(item) if item.kind.is_file() => sys::aio_done(&mut item.aiocb),
                    _ => false,
                };
                if done {
                    out.push(Wakeup::File { bits });
                }
            }

            for (&fd, assoc) in &registry.fds {
                if assoc.kind == SocketKind::File || assoc.initial.is_empty() {
                    continue;
                }
                let mut read_interest = false;
                let mut write_interest = false;
                let mut has_connect = false;
                for &key in &assoc.initial {
                    if let Some(item) = registry.pool.get(key) {
                        read_interest |= item.kind.wants_read();
                        write_interest |= item.kind.wants_write();
                        has_connect |= item.kind == OpKind::Connect;
                    }
                }
                let mut added = false;
                if read_interest {
                    added |= sets.add_read(fd);
                }
                if write_interest {
                    added |= sets.add_write(fd);
                }
                if added {
                    watched.push((fd, has_connect));
                    have_sockets = true;
                } else if read_interest || write_interest {
                    tracing::warn!(fd, "descriptor exceeds FD_SETSIZE; not pollable");
                }
            }
        }

        let timeout = if !out.is_empty() {
            Duration::ZERO
        } else if have_sockets || have_files {
            shared.config.select_quantum.min(max_wait)
        } else {
            shared.config.idle_park.min(max_wait)
        };

        match sets.select(timeout) {
            Err(code) => {
                // EBADF means a watched fd was closed under us; the next
                // pass rebuilds from whatever associations remain.
                tracing::debug!(code, "select failed");
                out
            }
            Ok(0) => out,
            Ok(_) => {
                if sets.readable(self.pipe_rd) {
                    sys::drain_pipe(self.pipe_rd);
                }
                for (fd, has_connect) in watched {
                    if sets.readable(fd) {
                        out.push(Wakeup::Socket {
                            fd,
                            code: PollCode::In,
                        });
                    }
                    if sets.writable(fd) {
                        // A failed non-blocking connect also reports
                        // writable; SO_ERROR disambiguates. Reading it
                        // clears the error, so carry the code along.
                        if has_connect {
                            let error = sys::socket_error(fd);
                            if error != 0 {
                                out.push(Wakeup::SocketError { fd, error });
                                continue;
                            }
                        }
                        out.push(Wakeup::Socket {
                            fd,
                            code: PollCode::Out,
                        });
                    }
                }
                out
            }
        }
    }
}
