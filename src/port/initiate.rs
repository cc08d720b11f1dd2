//! The action initiator: the synchronous fast path for every operation.
//!
//! Each initiator validates the caller contract, builds a queue item, and
//! parks it in the descriptor's initial queue *before* attempting the
//! syscall, so a completion racing in from the harvester always finds it.
//! Immediate socket success moves the item straight to the completion
//! queue; would-block leaves it parked; any other errno rolls the freshly
//! parked entry back so no phantom operation is left behind. File
//! operations hand the kernel an AIO control block and always park.
//!
//! Initiation never blocks.

use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;

use crate::error::{Error, ErrorKind, Result};
use crate::pool::{OpKind, QueueItem};
use crate::sys;

use super::registry::SocketKind;
use super::{Overlapped, Ports};

/// Fast-path outcome of the initiating syscall.
enum Fast {
    Done(usize),
    Pending,
    Fail(i32),
}

impl Ports {
    /// Initiates an asynchronous accept on a listening TCP socket.
    /// Mirrors `AcceptEx`; the accepted descriptor and peer address arrive
    /// in the overlapped context.
    pub fn accept_ex(&self, fd: RawFd, overlapped: &Arc<Overlapped>) -> Result<()> {
        self.initiate(OpKind::Accept, fd, overlapped, Vec::new(), None)
    }

    /// Initiates an asynchronous connect. Mirrors `ConnectEx`.
    pub fn connect_ex(
        &self,
        fd: RawFd,
        addr: SocketAddr,
        overlapped: &Arc<Overlapped>,
    ) -> Result<()> {
        self.initiate(OpKind::Connect, fd, overlapped, Vec::new(), Some(addr))
    }

    /// Initiates an asynchronous receive on a stream socket. Mirrors
    /// `WSARecv`; the filled buffer comes back through the overlapped
    /// context, truncated to the byte count.
    pub fn wsa_recv(&self, fd: RawFd, buffer: Vec<u8>, overlapped: &Arc<Overlapped>) -> Result<()> {
        self.initiate(OpKind::Recv, fd, overlapped, buffer, None)
    }

    /// Initiates an asynchronous datagram receive. Mirrors `WSARecvFrom`;
    /// the source address lands in the overlapped context's peer slot.
    pub fn wsa_recv_from(
        &self,
        fd: RawFd,
        buffer: Vec<u8>,
        overlapped: &Arc<Overlapped>,
    ) -> Result<()> {
        self.initiate(OpKind::Recv, fd, overlapped, buffer, None)
    }

    /// Initiates an asynchronous send on a stream socket. Mirrors `WSASend`.
    pub fn wsa_send(&self, fd: RawFd, buffer: Vec<u8>, overlapped: &Arc<Overlapped>) -> Result<()> {
        self.initiate(OpKind::Send, fd, overlapped, buffer, None)
    }

    /// Initiates an asynchronous datagram send to `peer`. Mirrors
    /// `WSASendTo`.
    pub fn wsa_send_to(
        &self,
        fd: RawFd,
        buffer: Vec<u8>,
        peer: SocketAddr,
        overlapped: &Arc<Overlapped>,
    ) -> Result<()> {
        self.initiate(OpKind::Send, fd, overlapped, buffer, Some(peer))
    }

    /// Initiates an asynchronous file read at the overlapped context's
    /// offset. Mirrors `ReadFile`; carried by POSIX AIO.
    pub fn read_file(&self, fd: RawFd, buffer: Vec<u8>, overlapped: &Arc<Overlapped>) -> Result<()> {
        self.initiate(OpKind::Read, fd, overlapped, buffer, None)
    }

    /// Initiates an asynchronous file write at the overlapped context's
    /// offset. Mirrors `WriteFile`; carried by POSIX AIO.
    pub fn write_file(
        &self,
        fd: RawFd,
        buffer: Vec<u8>,
        overlapped: &Arc<Overlapped>,
    ) -> Result<()> {
        self.initiate(OpKind::Write, fd, overlapped, buffer, None)
    }

    fn initiate(
        &self,
        kind: OpKind,
        fd: RawFd,
        overlapped: &Arc<Overlapped>,
        buffer: Vec<u8>,
        peer: Option<SocketAddr>,
    ) -> Result<()> {
        let mut registry = self.shared.registry.lock();
        let (sock, port, completion_key) = {
            let assoc = registry.fds.get(&fd).ok_or_else(|| {
                Error::not_found(format!("descriptor {fd} is not associated with a port"))
            })?;
            (assoc.kind, assoc.port, assoc.key)
        };
        if registry.ports.get(&port).map_or(true, |entry| entry.exit) {
            return Err(Error::new(ErrorKind::ShuttingDown));
        }
        validate_request(kind, sock, &buffer, peer)?;

        let mut item = QueueItem::new(kind, fd, completion_key, Arc::clone(overlapped));
        item.buffer = buffer;
        item.peer = peer;
        let key = registry
            .park_item(item)
            .ok_or_else(|| Error::new(ErrorKind::OutOfMemory))?;
        self.shared.counters.initiated(kind);

        let step = match kind {
            OpKind::Connect => match peer {
                Some(addr) => match sys::connect(fd, &addr) {
                    Ok(()) => Fast::Done(0),
                    Err(code) if code == libc::EINPROGRESS => Fast::Pending,
                    Err(code) => Fast::Fail(code),
                },
                // Unreachable: validation requires the peer.
                None => Fast::Fail(libc::EINVAL),
            },
            OpKind::Accept => match sys::accept(fd) {
                Ok((accepted, accepted_peer)) => {
                    if let Err(err) = sys::set_nonblocking(accepted) {
                        tracing::debug!(fd, accepted, %err, "accepted fd left blocking");
                    }
                    if let Some(item) = registry.pool.get_mut(key) {
                        item.accepted = Some(accepted);
                        item.peer = accepted_peer;
                    }
                    Fast::Done(0)
                }
                Err(code) if sys::would_block(code) => Fast::Pending,
                Err(code) => Fast::Fail(code),
            },
            OpKind::Recv => {
                let result = match registry.pool.get_mut(key) {
                    Some(item) => match sock {
                        SocketKind::Udp => match sys::recv_from(fd, &mut item.buffer) {
                            Ok((n, from)) => {
                                item.peer = from;
                                item.buffer.truncate(n);
                                Ok(n)
                            }
                            Err(code) => Err(code),
                        },
                        _ => match sys::recv(fd, &mut item.buffer) {
                            Ok(n) => {
                                item.buffer.truncate(n);
                                Ok(n)
                            }
                            Err(code) => Err(code),
                        },
                    },
                    None => Err(libc::EBADF),
                };
                match result {
                    Ok(n) => Fast::Done(n),
                    Err(code) if sys::would_block(code) => Fast::Pending,
                    Err(code) => Fast::Fail(code),
                }
            }
            OpKind::Send => {
                let result = match registry.pool.get(key) {
                    Some(item) => match sock {
                        SocketKind::Udp => match item.peer {
                            Some(to) => sys::send_to(fd, &item.buffer, &to),
                            None => Err(libc::EDESTADDRREQ),
                        },
                        _ => sys::send(fd, &item.buffer),
                    },
                    None => Err(libc::EBADF),
                };
                match result {
                    Ok(n) => Fast::Done(n),
                    Err(code) if sys::would_block(code) => Fast::Pending,
                    Err(code) => Fast::Fail(code),
                }
            }
            OpKind::Read | OpKind::Write => {
                // The kernel completes file operations asynchronously and
                // reports back through the readiness source; no queue move
                // happens at initiation time.
                let offset = overlapped.offset();
                let notify = self.shared.source.aio_notify(key.to_bits());
                let submit = match registry.pool.get_mut(key) {
                    Some(item) => {
                        let len = item.buffer.len();
                        let buf = item.buffer.as_mut_ptr();
                        sys::aio_prepare(&mut item.aiocb, fd, buf, len, offset, notify);
                        sys::aio_submit(&mut item.aiocb, kind == OpKind::Write)
                    }
                    None => Err(libc::EBADF),
                };
                match submit {
                    Ok(()) => Fast::Pending,
                    Err(code) => Fast::Fail(code),
                }
            }
            OpKind::UserData => Fast::Fail(libc::EINVAL),
        };

        match step {
            Fast::Done(bytes) => {
                let event = registry.complete_item(key, bytes, 0);
                self.shared.counters.completed(kind);
                drop(registry);
                if let Some(event) = event {
                    event.signal();
                }
                Ok(())
            }
            Fast::Pending => {
                drop(registry);
                self.shared.source.work_added();
                Ok(())
            }
            Fast::Fail(code) => {
                // Roll the just-parked entry back so no phantom operation
                // is left behind.
                registry.unlink_initial(fd, key);
                registry.discard_item(key);
                Err(Error::os(code)
                    .with_message(format!("{} on descriptor {fd}", kind.name())))
            }
        }
    }
}

fn validate_request(
    kind: OpKind,
    sock: SocketKind,
    buffer: &[u8],
    peer: Option<SocketAddr>,
) -> Result<()> {
    match kind {
        OpKind::Connect => {
            if sock != SocketKind::Tcp {
                return Err(Error::invalid_input("connect requires a stream socket"));
            }
            if peer.is_none() {
                return Err(Error::invalid_input("connect requires a peer address"));
            }
        }
        OpKind::Accept => {
            if sock != SocketKind::Tcp {
                return Err(Error::invalid_input("accept requires a stream socket"));
            }
        }
        OpKind::Recv | OpKind::Send => {
            if sock == SocketKind::File {
                return Err(Error::invalid_input(
                    "socket operation on a file descriptor; use read_file/write_file",
                ));
            }
            if buffer.is_empty() {
                return Err(Error::invalid_input("buffer must be non-empty"));
            }
            if kind == OpKind::Send && sock == SocketKind::Udp && peer.is_none() {
                return Err(Error::invalid_input(
                    "datagram send requires a peer address",
                ));
            }
        }
        OpKind::Read | OpKind::Write => {
            if sock != SocketKind::File {
                return Err(Error::invalid_input(
                    "file operation on a socket descriptor",
                ));
            }
            if buffer.is_empty() {
                return Err(Error::invalid_input("buffer must be non-empty"));
            }
        }
        OpKind::UserData => {
            return Err(Error::invalid_input("user data is posted, not initiated"));
        }
    }
    Ok(())
}
