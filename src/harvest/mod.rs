//! Background event harvester and its pluggable readiness sources.
//!
//! One dedicated OS thread per subsystem discovers kernel-level readiness
//! and completion events and funnels them into the shared dispatch logic
//! ([`port::dispatch`](crate::port)), which moves finished operations from
//! initial queues to completion queues and wakes waiters.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Harvester thread                         │
//! │   loop:                                                          │
//! │     wakeups = source.wait(tick)      ← SignalSource | SelectSource│
//! │     lock registry                                                │
//! │       dispatch each wakeup (queue moves, batched event signal)   │
//! │       reap doomed AIO items                                      │
//! │     unlock                                                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The "how do I learn a descriptor is ready" mechanism is the only part
//! that differs between platforms, so it is isolated behind [`ReadySource`];
//! the hot shared logic lives once in the dispatch module.
//!
//! # Lifecycle
//!
//! Startup is transactional: the thread signals an activation event and the
//! spawner blocks on it, so the first port is only considered ready once
//! the harvester is actually running. Shutdown is symmetric: set the stop
//! flag, nudge the source out of its blocking wait, and wait (bounded) for
//! the deactivation event before joining.

#[cfg(all(target_os = "linux", target_pointer_width = "64"))]
pub mod rtsig;
pub mod select_loop;

use smallvec::SmallVec;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::port::registry::SocketKind;
use crate::port::{dispatch, Shared};
use crate::sync::Event;
use crate::sys::AioNotify;

/// Readiness classification for one socket wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollCode {
    /// Readable: pending accepts and receives can make progress.
    In,
    /// Writable: pending connects and sends can make progress.
    Out,
    /// Socket-level error; fail everything outstanding.
    Err,
    /// Peer hangup; fail everything outstanding.
    Hup,
}

/// One event discovered by a readiness source.
#[derive(Debug, Clone, Copy)]
pub enum Wakeup {
    /// A socket descriptor became ready.
    Socket {
        /// The signalling descriptor.
        fd: RawFd,
        /// Direction or failure classification.
        code: PollCode,
    },
    /// A file (AIO) operation finished; carries packed item-key bits.
    File {
        /// [`ItemKey`](crate::pool::ItemKey) bits from the signal payload.
        bits: u64,
    },
    /// A socket failed and the source already consumed `SO_ERROR`.
    SocketError {
        /// The failing descriptor.
        fd: RawFd,
        /// The consumed socket error code.
        error: i32,
    },
    /// The signal queue overflowed; sweep every registered descriptor.
    Overflow,
}

/// How the harvester learns that descriptors are ready.
///
/// Implementations must be cheap to `nudge` from any thread and must bound
/// every `wait` by the given duration so the stop flag is observed promptly.
pub trait ReadySource: Send + Sync + std::fmt::Debug {
    /// Per-association setup when a descriptor is bound to a port.
    fn arm(&self, fd: RawFd, kind: SocketKind) -> io::Result<()>;

    /// Best-effort teardown when a descriptor is unbound.
    fn disarm(&self, fd: RawFd);

    /// Breaks the harvester out of a blocking wait (stop, port teardown).
    fn nudge(&self);

    /// Hint that new work was parked; sources that poll a snapshot of the
    /// registry use this to rebuild interest promptly. Default: no-op.
    fn work_added(&self) {}

    /// How a submitted AIO operation should report completion.
    fn aio_notify(&self, key_bits: u64) -> AioNotify;

    /// Blocks up to `max_wait` and returns the discovered wakeups.
    /// An empty result is a tick: nothing happened.
    fn wait(&self, shared: &Shared, max_wait: Duration) -> SmallVec<[Wakeup; 8]>;
}

/// Handle to the running harvester thread.
#[derive(Debug)]
pub(crate) struct Harvester {
    stop: Arc<AtomicBool>,
    deactivated: Arc<Event>,
    thread: Option<JoinHandle<()>>,
}

/// How long `spawn` waits for the activation handshake.
const ACTIVATION_TIMEOUT: Duration = Duration::from_secs(5);

impl Harvester {
    /// Spawns the harvester and blocks until it is actually running.
    pub fn spawn(shared: Arc<Shared>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let activated = Arc::new(Event::new());
        let deactivated = Arc::new(Event::new());

        let since = activated.epoch();
        let thread = {
            let stop = Arc::clone(&stop);
            let activated = Arc::clone(&activated);
            let deactivated = Arc::clone(&deactivated);
            std::thread::Builder::new()
                .name("asyncport-harvester".into())
                .spawn(move || run(&shared, &stop, &activated, &deactivated))
                .map_err(|err| {
                    Error::new(ErrorKind::HarvesterUnavailable)
                        .with_message(format!("spawn failed: {err}"))
                })?
        };

        if !activated.wait_from(since, ACTIVATION_TIMEOUT) {
            stop.store(true, Ordering::Release);
            return Err(Error::new(ErrorKind::HarvesterUnavailable)
                .with_message("harvester did not activate"));
        }
        tracing::debug!("harvester activated");
        Ok(Self {
            stop,
            deactivated,
            thread: Some(thread),
        })
    }

    /// Stops the harvester: flag, nudge, bounded deactivation wait, join.
    pub fn stop(mut self, source: &dyn ReadySource, tick: Duration) {
        let since = self.deactivated.epoch();
        self.stop.store(true, Ordering::Release);
        source.nudge();
        if !self.deactivated.wait_from(since, tick.saturating_mul(2)) {
            tracing::warn!("harvester deactivation wait timed out; joining anyway");
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!("harvester stopped");
    }
}

fn run(shared: &Shared, stop: &AtomicBool, activated: &Event, deactivated: &Event) {
    activated.signal();
    let source = Arc::clone(&shared.source);
    let tick = shared.config.harvester_tick;
    while !stop.load(Ordering::Acquire) {
        let wakeups = source.wait(shared, tick);
        let mut registry = shared.registry.lock();
        for wakeup in wakeups {
            match wakeup {
                Wakeup::Socket { fd, code } => {
                    dispatch::on_socket_event(&mut registry, &shared.counters, fd, code);
                }
                Wakeup::File { bits } => {
                    dispatch::on_file_event(&mut registry, &shared.counters, bits);
                }
                Wakeup::SocketError { fd, error } => {
                    dispatch::fail_all(&mut registry, &shared.counters, fd, error);
                }
                Wakeup::Overflow => {
                    dispatch::on_overflow(&mut registry, &shared.counters);
                }
            }
        }
        dispatch::reap_doomed(&mut registry);
    }
    deactivated.signal();
}
