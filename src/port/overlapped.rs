//! Caller-owned request context threaded through submission and completion.
//!
//! An [`Overlapped`] identifies one asynchronous request and carries its
//! result slots, mirroring the Win32 `OVERLAPPED` structure. The same
//! `Arc<Overlapped>` handed to an initiation call comes back from
//! [`get_queued_completion_status`](crate::Ports::get_queued_completion_status),
//! and pointer identity (`Arc::ptr_eq`) is the match key for selective
//! [`cancel_io`](crate::Ports::cancel_io).

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Result slots for one asynchronous request.
#[derive(Debug, Default)]
struct OverlappedState {
    /// Byte offset for file reads and writes (caller input).
    offset: u64,
    /// Descriptor produced by a completed accept.
    accepted: Option<RawFd>,
    /// Peer address from a completed connect or datagram receive.
    peer: Option<SocketAddr>,
    /// Buffer handed back after the operation completed.
    buffer: Option<Vec<u8>>,
}

/// Caller-owned identity and result slots for one asynchronous request.
///
/// Create one per outstanding operation; reusing an `Overlapped` across two
/// in-flight operations makes selective cancellation ambiguous (both match).
#[derive(Debug, Default)]
pub struct Overlapped {
    state: Mutex<OverlappedState>,
}

impl Overlapped {
    /// Creates a fresh context with a zero file offset.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a context carrying a file offset for `read_file`/`write_file`.
    #[must_use]
    pub fn with_offset(offset: u64) -> Arc<Self> {
        let overlapped = Self::default();
        overlapped.state.lock().offset = offset;
        Arc::new(overlapped)
    }

    /// Returns the file offset for the next file operation.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.state.lock().offset
    }

    /// Sets the file offset for the next file operation.
    pub fn set_offset(&self, offset: u64) {
        self.state.lock().offset = offset;
    }

    /// Returns the descriptor produced by a completed accept, if any.
    #[must_use]
    pub fn accepted(&self) -> Option<RawFd> {
        self.state.lock().accepted
    }

    /// Takes ownership of the accepted descriptor.
    ///
    /// The caller becomes responsible for closing it.
    #[must_use]
    pub fn take_accepted(&self) -> Option<RawFd> {
        self.state.lock().accepted.take()
    }

    /// Returns the peer address recorded by the completed operation.
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.state.lock().peer
    }

    /// Takes the buffer handed back by the completed operation.
    ///
    /// For receives this holds the filled data (truncated to the byte
    /// count); for sends it returns the original buffer.
    #[must_use]
    pub fn take_buffer(&self) -> Option<Vec<u8>> {
        self.state.lock().buffer.take()
    }

    pub(crate) fn record_completion(
        &self,
        accepted: Option<RawFd>,
        peer: Option<SocketAddr>,
        buffer: Option<Vec<u8>>,
    ) {
        let mut state = self.state.lock();
        if accepted.is_some() {
            state.accepted = accepted;
        }
        if peer.is_some() {
            state.peer = peer;
        }
        if buffer.is_some() {
            state.buffer = buffer;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_round_trips() {
        let overlapped = Overlapped::with_offset(4096);
        assert_eq!(overlapped.offset(), 4096);
        overlapped.set_offset(8192);
        assert_eq!(overlapped.offset(), 8192);
    }

    #[test]
    fn completion_fills_slots_once() {
        let overlapped = Overlapped::new();
        overlapped.record_completion(Some(7), None, Some(vec![1, 2, 3]));
        assert_eq!(overlapped.accepted(), Some(7));
        assert_eq!(overlapped.take_buffer(), Some(vec![1, 2, 3]));
        assert_eq!(overlapped.take_buffer(), None);
        assert_eq!(overlapped.take_accepted(), Some(7));
        assert_eq!(overlapped.accepted(), None);
    }

    #[test]
    fn identity_is_the_match_key() {
        let a = Overlapped::new();
        let b = Overlapped::new();
        assert!(Arc::ptr_eq(&a, &Arc::clone(&a)));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
