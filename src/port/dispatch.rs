//! Shared completion dispatch for both harvester backends.
//!
//! Readiness discovery is pluggable ([`ReadySource`](crate::harvest::ReadySource));
//! everything that happens after a wakeup — the initial-to-completion queue
//! move, the error fan-out, the batched event signal, the FIFO discipline —
//! lives here, once, and runs under the registry lock.
//!
//! Within one descriptor's drain, entries complete front-to-back and the
//! drain retries immediately after each success, collapsing multiple kernel
//! readiness notifications into one pass. A would-block stops the drain and
//! is not an error; an absent association means the descriptor raced with
//! cancellation or teardown and the wakeup is a no-op.

use std::os::fd::RawFd;
use std::sync::Arc;

use crate::diag::Counters;
use crate::harvest::PollCode;
use crate::pool::{ItemKey, OpKind};
use crate::sync::Event;
use crate::sys::{self, AioStatus};

use super::registry::{Registry, SocketKind};

/// Result of attempting one parked operation during a drain.
enum Step {
    Completed(usize),
    WouldBlock,
    HardError(i32),
    Skip,
}

/// Handles one socket readiness wakeup.
pub(crate) fn on_socket_event(reg: &mut Registry, counters: &Counters, fd: RawFd, code: PollCode) {
    let Some(assoc) = reg.fds.get(&fd) else {
        // Raced with cancel_io/close_handle; the socket is already gone.
        return;
    };
    let kind = assoc.kind;
    match code {
        PollCode::In => drain(reg, counters, fd, kind, false),
        PollCode::Out => drain(reg, counters, fd, kind, true),
        PollCode::Err | PollCode::Hup => {
            let mut error = sys::socket_error(fd);
            if error == 0 {
                error = libc::ECONNRESET;
            }
            fail_all(reg, counters, fd, error);
        }
    }
}

/// Completes parked operations for one readiness direction.
fn drain(reg: &mut Registry, counters: &Counters, fd: RawFd, sock: SocketKind, writable: bool) {
    let keys: Vec<ItemKey> = match reg.fds.get(&fd) {
        Some(assoc) => assoc.initial.iter().copied().collect(),
        None => return,
    };
    let mut wake: Option<Arc<Event>> = None;
    for key in keys {
        let (step, op) = {
            let Some(item) = reg.pool.get_mut(key) else {
                continue;
            };
            let op = item.kind;
            let matches = if writable {
                op.wants_write()
            } else {
                op.wants_read()
            };
            if !matches {
                (Step::Skip, op)
            } else {
                let step = match op {
                    OpKind::Accept => match sys::accept(fd) {
                        Ok((accepted, peer)) => {
                            if let Err(err) = sys::set_nonblocking(accepted) {
                                tracing::debug!(fd, accepted, %err, "accepted fd left blocking");
                            }
                            item.accepted = Some(accepted);
                            item.peer = peer;
                            Step::Completed(0)
                        }
                        Err(code) if sys::would_block(code) => Step::WouldBlock,
                        Err(code) => Step::HardError(code),
                    },
                    OpKind::Recv => {
                        let result = match sock {
                            SocketKind::Udp => match sys::recv_from(fd, &mut item.buffer) {
                                Ok((n, peer)) => {
                                    item.peer = peer;
                                    Ok(n)
                                }
                                Err(code) => Err(code),
                            },
                            _ => sys::recv(fd, &mut item.buffer),
                        };
                        match result {
                            Ok(n) => {
                                item.buffer.truncate(n);
                                Step::Completed(n)
                            }
                            Err(code) if sys::would_block(code) => Step::WouldBlock,
                            Err(code) => Step::HardError(code),
                        }
                    }
                    // Once the socket is writable the handshake has already
                    // finished; no further syscall is needed.
                    OpKind::Connect => Step::Completed(0),
                    OpKind::Send => {
                        let result = match sock {
                            SocketKind::Udp => match item.peer {
                                Some(peer) => sys::send_to(fd, &item.buffer, &peer),
                                None => Err(libc::EDESTADDRREQ),
                            },
                            _ => sys::send(fd, &item.buffer),
                        };
                        match result {
                            Ok(n) => Step::Completed(n),
                            Err(code) if sys::would_block(code) => Step::WouldBlock,
                            Err(code) => Step::HardError(code),
                        }
                    }
                    OpKind::Read | OpKind::Write | OpKind::UserData => Step::Skip,
                };
                (step, op)
            }
        };
        match step {
            Step::Skip => {}
            Step::Completed(bytes) => {
                if let Some(event) = reg.complete_item(key, bytes, 0) {
                    wake = Some(event);
                }
                counters.completed(op);
            }
            Step::WouldBlock => break,
            Step::HardError(code) => {
                if let Some(event) = wake.take() {
                    event.signal();
                }
                // A socket-level failure is not attributable to one
                // specific pending operation; fail everything outstanding.
                fail_all(reg, counters, fd, code);
                return;
            }
        }
    }
    if let Some(event) = wake {
        event.signal();
    }
}

/// Fails every pending operation on `fd` with the same error code.
pub(crate) fn fail_all(reg: &mut Registry, counters: &Counters, fd: RawFd, error: i32) {
    let keys: Vec<ItemKey> = match reg.fds.get(&fd) {
        Some(assoc) => assoc.initial.iter().copied().collect(),
        None => return,
    };
    tracing::debug!(fd, error, pending = keys.len(), "failing all pending operations");
    let mut wake: Option<Arc<Event>> = None;
    for key in keys {
        let op = match reg.pool.get(key) {
            Some(item) => item.kind,
            None => continue,
        };
        if let Some(event) = reg.complete_item(key, 0, error) {
            wake = Some(event);
        }
        counters.completed(op);
        counters.failed_out();
    }
    if let Some(event) = wake {
        event.signal();
    }
}

/// Handles one file (AIO) completion wakeup.
///
/// `bits` is the packed item key the kernel carried back through the
/// signal value; the generation check rejects stale deliveries after
/// cancellation.
pub(crate) fn on_file_event(reg: &mut Registry, counters: &Counters, bits: u64) {
    let key = ItemKey::from_bits(bits);
    let (status, op) = {
        let Some(item) = reg.pool.get_mut(key) else {
            return;
        };
        if !item.kind.is_file() {
            return;
        }
        (sys::aio_status(&mut item.aiocb), item.kind)
    };
    match status {
        // Spurious wakeup; leave the item parked.
        AioStatus::InProgress => {}
        AioStatus::Done(bytes) => {
            if op == OpKind::Read {
                if let Some(item) = reg.pool.get_mut(key) {
                    item.buffer.truncate(bytes);
                }
            }
            if let Some(event) = reg.complete_item(key, bytes, 0) {
                event.signal();
            }
            counters.completed(op);
        }
        AioStatus::Failed(error) => {
            if let Some(event) = reg.complete_item(key, 0, error) {
                event.signal();
            }
            counters.completed(op);
        }
    }
}

/// Best-effort sweep after a signal-queue overflow (`SIGIO` fallback):
/// re-checks every registered socket in both directions and every pending
/// file operation.
pub(crate) fn on_overflow(reg: &mut Registry, counters: &Counters) {
    tracing::warn!("realtime signal queue overflowed; sweeping all descriptors");
    let sockets: Vec<RawFd> = reg
        .fds
        .iter()
        .filter(|(_, assoc)| assoc.kind != SocketKind::File)
        .map(|(&fd, _)| fd)
        .collect();
    for fd in sockets {
        on_socket_event(reg, counters, fd, PollCode::Out);
        on_socket_event(reg, counters, fd, PollCode::In);
    }
    let files: Vec<u64> = reg
        .fds
        .values()
        .filter(|assoc| assoc.kind == SocketKind::File)
        .flat_map(|assoc| assoc.initial.iter().map(|key| key.to_bits()))
        .collect();
    for bits in files {
        on_file_event(reg, counters, bits);
    }
}

/// Reaps doomed items: cancelled file operations the kernel still owned at
/// cancel time. Freed once `aio_error` leaves `EINPROGRESS`.
pub(crate) fn reap_doomed(reg: &mut Registry) {
    if reg.doomed.is_empty() {
        return;
    }
    let keys = std::mem::take(&mut reg.doomed);
    for key in keys {
        let status = match reg.pool.get_mut(key) {
            Some(item) => sys::aio_status(&mut item.aiocb),
            None => continue,
        };
        match status {
            AioStatus::InProgress => reg.doomed.push(key),
            AioStatus::Done(_) | AioStatus::Failed(_) => reg.discard_item(key),
        }
    }
}
