//! Wait/signal event primitive with epoch-based lost-wakeup protection.
//!
//! [`Event`] is the blocking condition used by the completion port layer:
//! consumers wait on a port's queue event, `close_handle` waits on a port's
//! exit event, and the harvester handshake waits on activation and
//! deactivation events.
//!
//! # Lost wakeups
//!
//! The waiting side always releases the structural lock before blocking
//! (the unlock-wait-relock discipline the pinning protocol depends on), so
//! a signal can land in the window between "checked the queue" and "started
//! waiting". To make that window harmless, signals advance a generation
//! counter and waiters pass in the epoch they observed *while still holding
//! the structural lock*:
//!
//! ```ignore
//! let since = event.epoch();   // read under the registry lock
//! drop(registry_guard);
//! event.wait_from(since, timeout);  // wakes even if signal already landed
//! ```
//!
//! Waits are spurious-wake tolerant by construction: callers must re-acquire
//! the structural lock and re-validate state after every wake, since the
//! world may have changed.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A wait/signal event.
///
/// Each [`signal`](Event::signal) advances an epoch counter and wakes every
/// current waiter. Waiters block until the epoch moves past a previously
/// observed value or a timeout expires.
#[derive(Debug, Default)]
pub struct Event {
    epoch: Mutex<u64>,
    cond: Condvar,
}

impl Event {
    /// Creates a new event with no pending signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current epoch.
    ///
    /// Capture this while holding the structural lock that guards the state
    /// being waited on, then pass it to [`wait_from`](Event::wait_from).
    #[must_use]
    pub fn epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    /// Signals the event, waking all current waiters.
    ///
    /// Signals are never lost: a waiter that captured its epoch before this
    /// call returns immediately from [`wait_from`](Event::wait_from).
    pub fn signal(&self) {
        let mut epoch = self.epoch.lock();
        *epoch = epoch.wrapping_add(1);
        drop(epoch);
        self.cond.notify_all();
    }

    /// Blocks until the epoch moves past `since` or `timeout` expires.
    ///
    /// Returns `true` if a signal was observed, `false` on timeout. A
    /// `true` return does not imply the awaited condition holds; callers
    /// must re-validate under their structural lock.
    pub fn wait_from(&self, since: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut epoch = self.epoch.lock();
        while *epoch == since {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let timed_out = self.cond.wait_for(&mut epoch, deadline - now).timed_out();
            if timed_out && *epoch == since {
                return false;
            }
        }
        true
    }

    /// Blocks for a signal arriving after this call starts.
    ///
    /// Shorthand for capturing the epoch and waiting; only suitable where a
    /// signal racing ahead of the wait is acceptable (idle parking).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let since = self.epoch();
        self.wait_from(since, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_before_wait_is_not_lost() {
        let event = Event::new();
        let since = event.epoch();
        event.signal();
        // The signal landed between epoch capture and wait.
        assert!(event.wait_from(since, Duration::from_millis(1)));
    }

    #[test]
    fn wait_times_out_without_signal() {
        let event = Event::new();
        let start = Instant::now();
        assert!(!event.wait_timeout(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn signal_wakes_concurrent_waiter() {
        let event = Arc::new(Event::new());
        let since = event.epoch();
        let waiter = {
            let event = Arc::clone(&event);
            thread::spawn(move || event.wait_from(since, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        event.signal();
        assert!(waiter.join().expect("waiter panicked"));
    }

    #[test]
    fn signal_wakes_all_waiters() {
        let event = Arc::new(Event::new());
        let since = event.epoch();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let event = Arc::clone(&event);
                thread::spawn(move || event.wait_from(since, Duration::from_secs(5)))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        event.signal();
        for waiter in waiters {
            assert!(waiter.join().expect("waiter panicked"));
        }
    }

    #[test]
    fn stale_epoch_returns_immediately() {
        let event = Event::new();
        event.signal();
        event.signal();
        // An epoch two signals old is already satisfied.
        assert!(event.wait_from(0, Duration::ZERO));
    }
}
