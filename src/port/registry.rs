//! Association tables for descriptors and completion ports.
//!
//! One [`Registry`] holds every structural piece of the subsystem: the port
//! table, the descriptor table, the item pool, and the doomed list. It is
//! guarded by a single mutex in [`Shared`](super::Shared); every structural
//! mutation — insert or erase of a descriptor or port, queue pushes and
//! pops, pool touches — happens under that lock. Per-port events are
//! separate primitives so waits never hold it.
//!
//! # Pinning
//!
//! `loop_lock` counts the threads currently blocked inside
//! `get_queued_completion_status` for a port. While it is non-zero the
//! port's entry must not be erased out from under them; `close_handle`
//! cooperates by flagging `exit`, waking the waiters, and waiting (bounded)
//! for the count to drain.

use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;
use std::sync::Arc;

use crate::pool::{ItemKey, ItemPool, QueueItem};
use crate::sync::Event;

/// Handle identifying one completion port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub(crate) u64);

impl PortId {
    /// Creates a handle from a raw value. Primarily for tests; a handle
    /// fabricated this way is simply "not found" unless it matches a live
    /// port.
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// What kind of descriptor an association covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    /// Stream socket: connect/accept/recv/send.
    Tcp,
    /// Datagram socket: recv_from/send_to.
    Udp,
    /// Regular file: read/write through POSIX AIO.
    File,
}

/// One registered descriptor and its pending work.
#[derive(Debug)]
pub(crate) struct FdAssociation {
    pub kind: SocketKind,
    /// Opaque caller tag returned on every completion from this descriptor.
    pub key: usize,
    pub port: PortId,
    /// Operations submitted but not yet completed, in submission order.
    pub initial: VecDeque<ItemKey>,
}

/// One completion port's state.
#[derive(Debug)]
pub(crate) struct PortEntry {
    /// Finished operations awaiting consumption, strict FIFO.
    pub completion: VecDeque<ItemKey>,
    /// Signaled once per batch of completions.
    pub queue_event: Arc<Event>,
    /// Signaled when the last pinning consumer observes `exit`.
    pub exit_event: Arc<Event>,
    /// Consumers currently blocked in `get_queued_completion_status`.
    pub loop_lock: u32,
    /// Monotonic: set by teardown, never cleared while the entry lives.
    pub exit: bool,
    /// Claimed by the first `close_handle` caller.
    pub closing: bool,
}

impl PortEntry {
    pub fn new() -> Self {
        Self {
            completion: VecDeque::new(),
            queue_event: Arc::new(Event::new()),
            exit_event: Arc::new(Event::new()),
            loop_lock: 0,
            exit: false,
            closing: false,
        }
    }
}

/// All structural state, guarded by one mutex in `Shared`.
#[derive(Debug)]
pub(crate) struct Registry {
    pub ports: HashMap<PortId, PortEntry>,
    pub fds: HashMap<RawFd, FdAssociation>,
    pub pool: ItemPool,
    /// File items whose `aio_cancel` reported the kernel still owns the
    /// control block; reaped by the harvester once `aio_error` settles.
    pub doomed: Vec<ItemKey>,
}

impl Registry {
    pub fn new(pool_capacity: usize) -> Self {
        Self {
            ports: HashMap::new(),
            fds: HashMap::new(),
            pool: ItemPool::with_capacity(pool_capacity),
            doomed: Vec::new(),
        }
    }

    /// Removes `key` from its descriptor's initial queue, if parked there.
    pub fn unlink_initial(&mut self, fd: RawFd, key: ItemKey) {
        if let Some(assoc) = self.fds.get_mut(&fd) {
            if let Some(pos) = assoc.initial.iter().position(|&k| k == key) {
                assoc.initial.remove(pos);
            }
        }
    }

    /// Moves a finished item from its initial queue to its port's
    /// completion queue, recording the result.
    ///
    /// Returns the port's queue event for the caller to signal once per
    /// batch. The item is discarded if its descriptor or port vanished
    /// underneath it (a benign teardown race).
    pub fn complete_item(&mut self, key: ItemKey, bytes: usize, os_error: i32) -> Option<Arc<Event>> {
        let fd = self.pool.get(key)?.fd;
        let port = match self.fds.get(&fd) {
            Some(assoc) => assoc.port,
            None => {
                self.discard_item(key);
                return None;
            }
        };
        self.unlink_initial(fd, key);
        if !self.ports.contains_key(&port) {
            self.discard_item(key);
            return None;
        }
        if let Some(item) = self.pool.get_mut(key) {
            item.bytes = bytes;
            item.os_error = os_error;
        }
        let entry = self.ports.get_mut(&port)?;
        entry.completion.push_back(key);
        Some(Arc::clone(&entry.queue_event))
    }

    /// Frees an item outright, closing any unconsumed accepted descriptor.
    pub fn discard_item(&mut self, key: ItemKey) {
        if let Some(boxed) = self.pool.remove(key) {
            if let Some(fd) = boxed.accepted {
                crate::sys::close_fd(fd);
            }
            self.pool.recycle(boxed);
        }
    }

    /// Builds a pending item and parks it in the descriptor's initial
    /// queue, so it is discoverable if completion races the initiation.
    pub fn park_item(&mut self, item: QueueItem) -> Option<ItemKey> {
        let fd = item.fd;
        let key = self.pool.insert(item)?;
        match self.fds.get_mut(&fd) {
            Some(assoc) => {
                assoc.initial.push_back(key);
                Some(key)
            }
            None => {
                self.discard_item(key);
                None
            }
        }
    }

    /// True if the descriptor has a pending operation of the given kind.
    #[cfg(test)]
    pub fn has_pending(&self, fd: RawFd, kind: crate::pool::OpKind) -> bool {
        self.fds.get(&fd).is_some_and(|assoc| {
            assoc
                .initial
                .iter()
                .any(|&k| self.pool.get(k).is_some_and(|item| item.kind == kind))
        })
    }
}
