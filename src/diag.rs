//! Diagnostic sink and operation counters for operational introspection.
//!
//! The port subsystem counts every initiated and completed operation and
//! can emit a structured [`DiagSnapshot`] through a pluggable [`DiagSink`].
//!
//! # Backends
//!
//! - [`NullSink`]: No-op (zero overhead when diagnostics are disabled).
//! - [`TracingSink`]: Emits snapshots as `tracing` info events.
//! - [`CollectorSink`]: In-memory collection for testing.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::pool::OpKind;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Sink for diagnostic snapshots.
///
/// Implementations must be `Send + Sync` so the sink can be shared with the
/// harvester thread via `Arc<dyn DiagSink>`.
pub trait DiagSink: Send + Sync + fmt::Debug {
    /// Emit one snapshot.
    ///
    /// Implementations should not panic. If emission fails the snapshot is
    /// dropped; the counters themselves are unaffected.
    fn emit(&self, snapshot: &DiagSnapshot);
}

// ---------------------------------------------------------------------------
// NullSink
// ---------------------------------------------------------------------------

/// No-op diagnostic sink. All snapshots are discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagSink for NullSink {
    fn emit(&self, _snapshot: &DiagSnapshot) {}
}

// ---------------------------------------------------------------------------
// TracingSink
// ---------------------------------------------------------------------------

/// Emits snapshots as `tracing` info events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagSink for TracingSink {
    fn emit(&self, snapshot: &DiagSnapshot) {
        tracing::info!(target: "asyncport::diag", %snapshot, "port diagnostics");
    }
}

// ---------------------------------------------------------------------------
// CollectorSink
// ---------------------------------------------------------------------------

/// Collects snapshots in memory for test assertions.
#[derive(Debug, Default)]
pub struct CollectorSink {
    snapshots: Mutex<Vec<DiagSnapshot>>,
}

impl CollectorSink {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every collected snapshot.
    #[must_use]
    pub fn snapshots(&self) -> Vec<DiagSnapshot> {
        self.snapshots.lock().clone()
    }

    /// Returns the number of collected snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl DiagSink for CollectorSink {
    fn emit(&self, snapshot: &DiagSnapshot) {
        self.snapshots.lock().push(snapshot.clone());
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Per-operation initiated/completed tallies plus subsystem gauges.
///
/// Counters are relaxed atomics: they order nothing and exist purely for
/// introspection.
#[derive(Debug, Default)]
pub struct Counters {
    initiated: [AtomicU64; 7],
    completed: [AtomicU64; 7],
    posted: AtomicU64,
    cancelled: AtomicU64,
    failed_out: AtomicU64,
}

const fn slot(kind: OpKind) -> usize {
    match kind {
        OpKind::Connect => 0,
        OpKind::Accept => 1,
        OpKind::Recv => 2,
        OpKind::Send => 3,
        OpKind::Read => 4,
        OpKind::Write => 5,
        OpKind::UserData => 6,
    }
}

impl Counters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one initiated operation.
    pub fn initiated(&self, kind: OpKind) {
        self.initiated[slot(kind)].fetch_add(1, Ordering::Relaxed);
    }

    /// Records one completed operation.
    pub fn completed(&self, kind: OpKind) {
        self.completed[slot(kind)].fetch_add(1, Ordering::Relaxed);
    }

    /// Records one posted user-data completion.
    pub fn posted(&self) {
        self.posted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one cancelled operation.
    pub fn cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one operation failed by socket-error fan-out.
    pub fn failed_out(&self) {
        self.failed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Builds a snapshot of the current tallies.
    #[must_use]
    pub fn snapshot(&self, ports_open: usize, fds_registered: usize, items_live: usize) -> DiagSnapshot {
        let load = |arr: &[AtomicU64; 7], kind: OpKind| arr[slot(kind)].load(Ordering::Relaxed);
        DiagSnapshot {
            initiated_connect: load(&self.initiated, OpKind::Connect),
            initiated_accept: load(&self.initiated, OpKind::Accept),
            initiated_recv: load(&self.initiated, OpKind::Recv),
            initiated_send: load(&self.initiated, OpKind::Send),
            initiated_read: load(&self.initiated, OpKind::Read),
            initiated_write: load(&self.initiated, OpKind::Write),
            completed_connect: load(&self.completed, OpKind::Connect),
            completed_accept: load(&self.completed, OpKind::Accept),
            completed_recv: load(&self.completed, OpKind::Recv),
            completed_send: load(&self.completed, OpKind::Send),
            completed_read: load(&self.completed, OpKind::Read),
            completed_write: load(&self.completed, OpKind::Write),
            posted: self.posted.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failed_out: self.failed_out.load(Ordering::Relaxed),
            ports_open,
            fds_registered,
            items_live,
        }
    }
}

// ---------------------------------------------------------------------------
// DiagSnapshot
// ---------------------------------------------------------------------------

/// A structured snapshot of the subsystem's operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct DiagSnapshot {
    pub initiated_connect: u64,
    pub initiated_accept: u64,
    pub initiated_recv: u64,
    pub initiated_send: u64,
    pub initiated_read: u64,
    pub initiated_write: u64,
    pub completed_connect: u64,
    pub completed_accept: u64,
    pub completed_recv: u64,
    pub completed_send: u64,
    pub completed_read: u64,
    pub completed_write: u64,
    pub posted: u64,
    pub cancelled: u64,
    pub failed_out: u64,
    pub ports_open: usize,
    pub fds_registered: usize,
    pub items_live: usize,
}

impl fmt::Display for DiagSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connect {}/{} accept {}/{} recv {}/{} send {}/{} read {}/{} write {}/{} \
             posted={} cancelled={} failed_out={} ports={} fds={} items={}",
            self.completed_connect,
            self.initiated_connect,
            self.completed_accept,
            self.initiated_accept,
            self.completed_recv,
            self.initiated_recv,
            self.completed_send,
            self.initiated_send,
            self.completed_read,
            self.initiated_read,
            self.completed_write,
            self.initiated_write,
            self.posted,
            self.cancelled,
            self.failed_out,
            self.ports_open,
            self.fds_registered,
            self.items_live,
        )
    }
}
