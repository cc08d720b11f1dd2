//! Windows-style I/O completion ports for POSIX sockets and files.
//!
//! Asyncport reproduces the I/O Completion Port model — create a port,
//! associate descriptors with it, initiate overlapped operations, and
//! dequeue their completions from any thread — on top of non-blocking
//! sockets, POSIX realtime signals, POSIX AIO for files, and a `select()`
//! fallback loop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐ initiate  ┌─────────────────┐  harvest   ┌─────────────────┐
//! │ caller   │──────────▶│ fd initial queue │───────────▶│ port completion │
//! │ threads  │           └─────────────────┘  (signal / │      queue      │
//! │          │◀──── get_queued_completion_status select) └─────────────────┘
//! └──────────┘
//! ```
//!
//! Operations attempted non-blockingly at initiation either complete on
//! the spot, park in the descriptor's initial queue for the background
//! harvester to finish, or fail synchronously with a typed error. A
//! port's completion queue is strict FIFO across all its descriptors.
//!
//! # Example
//!
//! ```no_run
//! use asyncport::{Overlapped, PortConfig, Ports, SocketKind};
//!
//! # fn main() -> asyncport::Result<()> {
//! let ports = Ports::new(PortConfig::default())?;
//! let port = ports.create_io_completion_port(None, None, 0, SocketKind::Tcp)?;
//!
//! // Synthetic completions round-trip untouched.
//! let ctx = Overlapped::new();
//! ports.post_queued_completion_status(port, 42, 7, &ctx)?;
//! let done = ports.get_queued_completion_status(port, None)?;
//! assert_eq!((done.bytes, done.key), (42, 7));
//!
//! ports.close_handle(port)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Threading
//!
//! One background harvester thread per [`Ports`] instance discovers
//! readiness and completion events; any number of caller threads may
//! initiate operations and consume completions concurrently. See the
//! [`port`] module for the locking and pinning discipline.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod diag;
pub mod error;
pub(crate) mod harvest;
pub mod pool;
pub mod port;
pub mod sync;
pub(crate) mod sys;
pub mod test_utils;

// Re-exported for the test macros, which expand in dependent crates.
#[doc(hidden)]
pub use tracing;

pub use config::{BackendKind, ConfigError, PortConfig};
pub use diag::{CollectorSink, DiagSink, DiagSnapshot, NullSink, TracingSink};
pub use error::{Error, ErrorKind, Result};
pub use port::{Completion, Overlapped, PortId, Ports, SocketKind};
