//! The completion port subsystem and its Win32-mirroring public surface.
//!
//! [`Ports`] is the explicitly-constructed process-wide subsystem: it owns
//! the port and descriptor tables, the pooled item arena, and the single
//! background harvester thread (started lazily on first port creation,
//! stopped when the last port closes). Construct it before the first port
//! and drop it after the last close; there is no hidden global.
//!
//! ```text
//! caller ──initiate──▶ [fd initial queue] ──harvester──▶ [port completion
//!    │                       ▲    (signal or select driven)     queue]
//!    │ immediate success ────┘                                    │
//!    └────────────── get_queued_completion_status ◀───────────────┘
//! ```
//!
//! # Locking
//!
//! One mutex guards all structural state (see [`registry`]); per-port
//! events live outside it. Consumers pin a port with its `loop_lock` count
//! while blocked, and teardown cooperates with that count instead of
//! erasing state out from under a waiter.

pub mod overlapped;
pub(crate) mod dispatch;
pub(crate) mod registry;
mod initiate;

pub use overlapped::Overlapped;
pub use registry::{PortId, SocketKind};

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{BackendKind, PortConfig};
use crate::diag::{Counters, DiagSink, DiagSnapshot, NullSink};
use crate::error::{Error, ErrorKind, Result};
use crate::harvest::{Harvester, ReadySource};
use crate::pool::{ItemKey, OpKind, QueueItem};
use crate::sys::{self, AioCancelOutcome};

use registry::{FdAssociation, PortEntry, Registry};

/// Chunk size for waits with no deadline; the loop simply re-waits.
const INDEFINITE_WAIT_CHUNK: Duration = Duration::from_secs(60);

/// One dequeued completion.
#[derive(Debug)]
pub struct Completion {
    /// Bytes transferred by the operation.
    pub bytes: usize,
    /// Completion key of the originating association (or the posted key).
    pub key: usize,
    /// The caller context supplied at initiation.
    pub overlapped: Arc<Overlapped>,
    /// OS error code for the operation; 0 = success.
    pub os_error: i32,
}

impl Completion {
    /// True if the operation completed without error.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.os_error == 0
    }

    /// The operation's failure as an `io::Error`, if any.
    #[must_use]
    pub fn error(&self) -> Option<std::io::Error> {
        (self.os_error != 0).then(|| std::io::Error::from_raw_os_error(self.os_error))
    }
}

/// Subsystem state shared with the harvester thread.
pub(crate) struct Shared {
    pub(crate) config: PortConfig,
    pub(crate) registry: Mutex<Registry>,
    pub(crate) counters: Counters,
    pub(crate) sink: RwLock<Arc<dyn DiagSink>>,
    pub(crate) source: Arc<dyn ReadySource>,
    harvester: Mutex<Option<Harvester>>,
    next_port: AtomicU64,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("config", &self.config)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// The completion port subsystem.
///
/// All methods are callable concurrently from any number of threads.
#[derive(Debug)]
pub struct Ports {
    shared: Arc<Shared>,
}

fn source_setup_error(err: &std::io::Error, what: &str) -> Error {
    Error::os(err.raw_os_error().unwrap_or(0)).with_message(format!("{what}: {err}"))
}

#[cfg(all(target_os = "linux", target_pointer_width = "64"))]
fn make_rtsig_source(config: &PortConfig) -> Result<Arc<dyn ReadySource>> {
    let source = crate::harvest::rtsig::SignalSource::new(
        config.socket_signal_offset,
        config.file_signal_offset,
    )
    .map_err(|err| source_setup_error(&err, "signal source setup"))?;
    Ok(Arc::new(source))
}

#[cfg(not(all(target_os = "linux", target_pointer_width = "64")))]
fn make_rtsig_source(_config: &PortConfig) -> Result<Arc<dyn ReadySource>> {
    Err(Error::invalid_input(
        "realtime-signal backend is not supported on this platform",
    ))
}

fn make_source(config: &PortConfig) -> Result<Arc<dyn ReadySource>> {
    match config.backend.resolve() {
        BackendKind::RealtimeSignals => make_rtsig_source(config),
        BackendKind::Auto | BackendKind::Select => {
            let source = crate::harvest::select_loop::SelectSource::new()
                .map_err(|err| source_setup_error(&err, "select source setup"))?;
            Ok(Arc::new(source))
        }
    }
}

impl Ports {
    /// Creates the subsystem with the given configuration.
    ///
    /// Construct before spawning worker threads when using the
    /// realtime-signal backend: the completion signal mask is inherited by
    /// threads created afterwards.
    pub fn new(config: PortConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|err| Error::invalid_input(err.to_string()))?;
        let source = make_source(&config)?;
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::new(config.initial_pool_capacity)),
            counters: Counters::new(),
            sink: RwLock::new(Arc::new(NullSink) as Arc<dyn DiagSink>),
            source,
            harvester: Mutex::new(None),
            next_port: AtomicU64::new(0),
            config,
        });
        Ok(Self { shared })
    }

    /// Creates the subsystem with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(PortConfig::default())
    }

    /// Creates a completion port, associates a descriptor, or both.
    ///
    /// Mirrors `CreateIoCompletionPort`:
    /// - `fd: None, existing: None` creates a fresh port;
    /// - `fd: Some, existing: Some` associates the descriptor with it;
    /// - `fd: Some, existing: None` does both in one call.
    ///
    /// Association puts the descriptor into non-blocking mode, records the
    /// completion `key` returned with its every completion, and arms the
    /// readiness backend. A descriptor can be associated with exactly one
    /// port for its lifetime; re-association requires cancellation first.
    pub fn create_io_completion_port(
        &self,
        fd: Option<RawFd>,
        existing: Option<PortId>,
        key: usize,
        kind: SocketKind,
    ) -> Result<PortId> {
        self.ensure_harvester()?;
        match (fd, existing) {
            (None, None) => self.create_port(),
            (Some(fd), Some(port)) => {
                self.associate(fd, port, key, kind)?;
                Ok(port)
            }
            (Some(fd), None) => {
                let port = self.create_port()?;
                if let Err(err) = self.associate(fd, port, key, kind) {
                    self.shared.registry.lock().ports.remove(&port);
                    return Err(err);
                }
                Ok(port)
            }
            (None, Some(_)) => Err(Error::invalid_input(
                "a descriptor is required when an existing port is supplied",
            )),
        }
    }

    fn create_port(&self) -> Result<PortId> {
        let id = PortId(self.shared.next_port.fetch_add(1, Ordering::Relaxed) + 1);
        self.shared.registry.lock().ports.insert(id, PortEntry::new());
        tracing::debug!(%id, "completion port created");
        Ok(id)
    }

    fn associate(&self, fd: RawFd, port: PortId, key: usize, kind: SocketKind) -> Result<()> {
        let mut registry = self.shared.registry.lock();
        match registry.ports.get(&port) {
            None => return Err(Error::not_found(port.to_string())),
            Some(entry) if entry.exit => return Err(Error::new(ErrorKind::ShuttingDown)),
            Some(_) => {}
        }
        if registry.fds.contains_key(&fd) {
            return Err(Error::already_associated(fd));
        }
        sys::set_nonblocking(fd)
            .and_then(|()| self.shared.source.arm(fd, kind))
            .map_err(|err| {
                Error::os(err.raw_os_error().unwrap_or(0))
                    .with_message(format!("arming descriptor {fd}"))
            })?;
        registry.fds.insert(
            fd,
            FdAssociation {
                kind,
                key,
                port,
                initial: VecDeque::new(),
            },
        );
        tracing::debug!(fd, %port, key, ?kind, "descriptor associated");
        Ok(())
    }

    /// Dequeues one completion from `port`, blocking up to `timeout`
    /// (`None` = indefinitely).
    ///
    /// Completions come back in strict FIFO order across every descriptor
    /// sharing the port. While blocked, the caller pins the port: a
    /// concurrent [`close_handle`](Self::close_handle) waits for pinned
    /// consumers to observe the exit flag before tearing state down.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::NotFound`]: the port does not exist (or was removed
    ///   mid-wait)
    /// - [`ErrorKind::ShuttingDown`]: the port is being torn down
    /// - [`ErrorKind::TimedOut`]: the deadline expired; retryable
    pub fn get_queued_completion_status(
        &self,
        port: PortId,
        timeout: Option<Duration>,
    ) -> Result<Completion> {
        let start = Instant::now();
        let mut registry = self.shared.registry.lock();
        let queue_event = {
            let entry = registry
                .ports
                .get_mut(&port)
                .ok_or_else(|| Error::not_found(port.to_string()))?;
            if entry.exit {
                return Err(Error::new(ErrorKind::ShuttingDown));
            }
            entry.loop_lock += 1;
            Arc::clone(&entry.queue_event)
        };

        let outcome = loop {
            let checked = match registry.ports.get_mut(&port) {
                Some(entry) => {
                    if let Some(key) = entry.completion.pop_front() {
                        Some(Ok(key))
                    } else if entry.exit {
                        Some(Err(Error::new(ErrorKind::ShuttingDown)))
                    } else {
                        None
                    }
                }
                None => Some(Err(Error::not_found("port removed during wait"))),
            };
            if let Some(result) = checked {
                break result;
            }
            // Re-measure wall-clock time every wake so spurious or early
            // wakes never shorten nor extend the deadline.
            let remaining = match timeout {
                Some(limit) => match limit.checked_sub(start.elapsed()) {
                    Some(rem) if !rem.is_zero() => rem,
                    _ => break Err(Error::new(ErrorKind::TimedOut)),
                },
                None => INDEFINITE_WAIT_CHUNK,
            };
            // Capture the epoch under the lock, then release it while
            // waiting so producers and other consumers stay unblocked.
            let since = queue_event.epoch();
            drop(registry);
            queue_event.wait_from(since, remaining);
            registry = self.shared.registry.lock();
        };

        let mut exit_event = None;
        if let Some(entry) = registry.ports.get_mut(&port) {
            entry.loop_lock = entry.loop_lock.saturating_sub(1);
            if entry.loop_lock == 0 && entry.exit {
                exit_event = Some(Arc::clone(&entry.exit_event));
            }
        }

        let result = match outcome {
            Ok(key) => Ok(Self::consume(&mut registry, key)?),
            Err(err) => Err(err),
        };
        drop(registry);
        if let Some(event) = exit_event {
            event.signal();
        }
        result
    }

    /// Pops the dequeued item out of the pool and into a `Completion`.
    fn consume(registry: &mut Registry, key: ItemKey) -> Result<Completion> {
        let mut boxed = registry
            .pool
            .remove(key)
            .ok_or_else(|| Error::not_found("completed item vanished"))?;
        let kind = boxed.kind;
        let overlapped = Arc::clone(&boxed.overlapped);
        let buffer = matches!(
            kind,
            OpKind::Recv | OpKind::Send | OpKind::Read | OpKind::Write
        )
        .then(|| std::mem::take(&mut boxed.buffer));
        overlapped.record_completion(boxed.accepted.take(), boxed.peer.take(), buffer);
        let completion = Completion {
            bytes: boxed.bytes,
            key: boxed.key,
            overlapped,
            os_error: boxed.os_error,
        };
        registry.pool.recycle(boxed);
        Ok(completion)
    }

    /// Injects a synthetic user-data completion directly into the queue,
    /// bypassing any actual I/O. Mirrors `PostQueuedCompletionStatus`.
    pub fn post_queued_completion_status(
        &self,
        port: PortId,
        bytes: usize,
        key: usize,
        overlapped: &Arc<Overlapped>,
    ) -> Result<()> {
        let mut registry = self.shared.registry.lock();
        match registry.ports.get(&port) {
            None => return Err(Error::not_found(port.to_string())),
            Some(entry) if entry.exit => return Err(Error::new(ErrorKind::ShuttingDown)),
            Some(_) => {}
        }
        let mut item = QueueItem::new(OpKind::UserData, -1, key, Arc::clone(overlapped));
        item.bytes = bytes;
        let item_key = registry
            .pool
            .insert(item)
            .ok_or_else(|| Error::new(ErrorKind::OutOfMemory))?;
        let event = {
            let entry = registry
                .ports
                .get_mut(&port)
                .ok_or_else(|| Error::not_found(port.to_string()))?;
            entry.completion.push_back(item_key);
            Arc::clone(&entry.queue_event)
        };
        self.shared.counters.posted();
        drop(registry);
        event.signal();
        Ok(())
    }

    /// Tears down one port and everything associated with it.
    ///
    /// The first caller claims the teardown; a concurrent second caller
    /// gets [`ErrorKind::AlreadyClosing`] instead of a double free. Pinned
    /// consumers are woken and given `drain_timeout` to observe the exit
    /// flag; hitting that timeout is non-fatal and teardown proceeds.
    /// Closing the last port resets the item pool and stops the harvester.
    pub fn close_handle(&self, port: PortId) -> Result<()> {
        let mut registry = self.shared.registry.lock();
        let (queue_event, exit_event, pinned) = {
            let entry = registry
                .ports
                .get_mut(&port)
                .ok_or_else(|| Error::not_found(port.to_string()))?;
            if entry.closing {
                return Err(Error::new(ErrorKind::AlreadyClosing));
            }
            entry.closing = true;
            entry.exit = true;
            (
                Arc::clone(&entry.queue_event),
                Arc::clone(&entry.exit_event),
                entry.loop_lock > 0,
            )
        };

        if pinned {
            let since = exit_event.epoch();
            queue_event.signal();
            drop(registry);
            if !exit_event.wait_from(since, self.shared.config.drain_timeout) {
                tracing::warn!(%port, "pinned consumers did not drain in time; tearing down anyway");
            }
            registry = self.shared.registry.lock();
        }

        let completed: Vec<ItemKey> = registry
            .ports
            .get_mut(&port)
            .map(|entry| entry.completion.drain(..).collect())
            .unwrap_or_default();
        for key in completed {
            registry.discard_item(key);
        }

        let fds: Vec<RawFd> = registry
            .fds
            .iter()
            .filter(|(_, assoc)| assoc.port == port)
            .map(|(&fd, _)| fd)
            .collect();
        for fd in fds {
            self.remove_association(&mut registry, fd);
        }
        registry.ports.remove(&port);

        let last = registry.ports.is_empty();
        if last {
            if registry.doomed.is_empty() {
                registry.pool.reset();
            } else {
                tracing::warn!(
                    pending = registry.doomed.len(),
                    "kernel-owned AIO items outstanding; pool reset skipped"
                );
            }
        }
        drop(registry);
        // Kick any consumer still parked on the queue event so it
        // re-validates and observes the missing port promptly.
        queue_event.signal();
        if last {
            self.stop_harvester();
        }
        tracing::debug!(%port, "completion port closed");
        Ok(())
    }

    /// Cancels outstanding operations on a descriptor. Mirrors `CancelIo`.
    ///
    /// With an `overlapped` target, only entries matching that context (by
    /// identity) are cancelled — in the initial queue and among completed
    /// but not-yet-consumed entries — and the association survives. With
    /// `None`, everything outstanding is cancelled and the descriptor is
    /// fully unregistered.
    pub fn cancel_io(&self, fd: RawFd, overlapped: Option<&Arc<Overlapped>>) -> Result<()> {
        let mut registry = self.shared.registry.lock();
        let port = registry
            .fds
            .get(&fd)
            .ok_or_else(|| Error::not_found(format!("descriptor {fd}")))?
            .port;
        match overlapped {
            None => {
                self.sweep_completion(&mut registry, port, fd, None);
                self.remove_association(&mut registry, fd);
            }
            Some(target) => {
                let keys: Vec<ItemKey> = registry
                    .fds
                    .get(&fd)
                    .map(|assoc| assoc.initial.iter().copied().collect())
                    .unwrap_or_default();
                for key in keys {
                    let matched = registry
                        .pool
                        .get(key)
                        .is_some_and(|item| Arc::ptr_eq(&item.overlapped, target));
                    if matched {
                        self.cancel_one(&mut registry, fd, key);
                    }
                }
                self.sweep_completion(&mut registry, port, fd, Some(target));
            }
        }
        Ok(())
    }

    /// Cancels one parked item, dooming kernel-owned AIO control blocks.
    fn cancel_one(&self, registry: &mut Registry, fd: RawFd, key: ItemKey) {
        let doomed = match registry.pool.get_mut(key) {
            Some(item) if item.kind.is_file() => matches!(
                sys::aio_cancel(fd, &mut item.aiocb),
                AioCancelOutcome::NotCanceled
            ),
            Some(_) => false,
            None => return,
        };
        registry.unlink_initial(fd, key);
        if doomed {
            registry.doomed.push(key);
        } else {
            registry.discard_item(key);
        }
        self.shared.counters.cancelled();
    }

    /// Removes an association and cancels everything parked on it.
    fn remove_association(&self, registry: &mut Registry, fd: RawFd) {
        let Some(assoc) = registry.fds.remove(&fd) else {
            return;
        };
        self.shared.source.disarm(fd);
        for key in assoc.initial {
            let doomed = match registry.pool.get_mut(key) {
                Some(item) if item.kind.is_file() => matches!(
                    sys::aio_cancel(fd, &mut item.aiocb),
                    AioCancelOutcome::NotCanceled
                ),
                Some(_) => false,
                None => continue,
            };
            if doomed {
                registry.doomed.push(key);
            } else {
                registry.discard_item(key);
            }
            self.shared.counters.cancelled();
        }
        tracing::debug!(fd, "descriptor unregistered");
    }

    /// Removes completed-but-unconsumed entries for `fd` from the port's
    /// completion queue, optionally filtered by overlapped identity.
    fn sweep_completion(
        &self,
        registry: &mut Registry,
        port: PortId,
        fd: RawFd,
        target: Option<&Arc<Overlapped>>,
    ) {
        let keys: Vec<ItemKey> = match registry.ports.get(&port) {
            Some(entry) => entry.completion.iter().copied().collect(),
            None => return,
        };
        for key in keys {
            let matched = registry.pool.get(key).is_some_and(|item| {
                item.fd == fd && target.map_or(true, |t| Arc::ptr_eq(&item.overlapped, t))
            });
            if !matched {
                continue;
            }
            if let Some(entry) = registry.ports.get_mut(&port) {
                if let Some(pos) = entry.completion.iter().position(|&k| k == key) {
                    entry.completion.remove(pos);
                }
            }
            registry.discard_item(key);
            self.shared.counters.cancelled();
        }
    }

    /// Replaces the diagnostic sink.
    pub fn set_diag_sink(&self, sink: Arc<dyn DiagSink>) {
        *self.shared.sink.write() = sink;
    }

    /// Builds a snapshot of the operation counters, emits it through the
    /// configured sink, and returns it.
    pub fn diag_snapshot(&self) -> DiagSnapshot {
        let snapshot = {
            let registry = self.shared.registry.lock();
            self.shared.counters.snapshot(
                registry.ports.len(),
                registry.fds.len(),
                registry.pool.len(),
            )
        };
        self.shared.sink.read().emit(&snapshot);
        snapshot
    }

    fn ensure_harvester(&self) -> Result<()> {
        let mut guard = self.shared.harvester.lock();
        if guard.is_none() {
            *guard = Some(Harvester::spawn(Arc::clone(&self.shared))?);
        }
        Ok(())
    }

    fn stop_harvester(&self) {
        let harvester = self.shared.harvester.lock().take();
        if let Some(harvester) = harvester {
            harvester.stop(&*self.shared.source, self.shared.config.harvester_tick);
        }
    }
}

impl Drop for Ports {
    fn drop(&mut self) {
        let ports: Vec<PortId> = self.shared.registry.lock().ports.keys().copied().collect();
        for port in ports {
            if let Err(err) = self.close_handle(port) {
                tracing::debug!(%port, %err, "close during drop failed");
            }
        }
        self.stop_harvester();
    }
}
