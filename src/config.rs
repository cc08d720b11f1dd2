//! Configuration and tuning for the completion port subsystem.
//!
//! This module provides:
//! - [`PortConfig`]: the subsystem-wide tuning knobs
//! - [`BackendKind`]: selection of the readiness backend
//! - Validation for guardrail invariants
//!
//! Note: all knobs have conservative defaults; most deployments only ever
//! set [`PortConfig::backend`].

use std::time::Duration;

/// How the background harvester learns that a descriptor is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Pick the best backend the platform supports.
    ///
    /// Resolves to [`RealtimeSignals`](Self::RealtimeSignals) on 64-bit
    /// Linux and to [`Select`](Self::Select) everywhere else.
    #[default]
    Auto,
    /// Realtime-signal delivery (`F_SETSIG` + `O_ASYNC`, `sigtimedwait`).
    RealtimeSignals,
    /// A `select()` polling loop with a self-pipe wakeup.
    Select,
}

impl BackendKind {
    /// Resolves `Auto` to the concrete backend for this platform.
    #[must_use]
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto => {
                if cfg!(all(target_os = "linux", target_pointer_width = "64")) {
                    Self::RealtimeSignals
                } else {
                    Self::Select
                }
            }
            other => other,
        }
    }
}

/// Configuration for a [`Ports`](crate::Ports) subsystem instance.
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Readiness backend selection.
    pub backend: BackendKind,
    /// Offset from `SIGRTMIN` for socket completion signals.
    ///
    /// Offsets 0..=2 are left clear of other realtime-signal users in the
    /// process; the default is 3.
    pub socket_signal_offset: i32,
    /// Offset from `SIGRTMIN` for file (AIO) completion signals.
    ///
    /// Must differ from [`socket_signal_offset`](Self::socket_signal_offset).
    pub file_signal_offset: i32,
    /// Upper bound on one blocking wait inside the harvester loop.
    ///
    /// The harvester re-checks its stop flag at least this often.
    pub harvester_tick: Duration,
    /// `select()` timeout while socket operations are pending.
    pub select_quantum: Duration,
    /// Park duration when no descriptor has pending work.
    pub idle_park: Duration,
    /// How long `close_handle` waits for pinned consumer threads to drain.
    ///
    /// Hitting this timeout is non-fatal; teardown proceeds regardless.
    pub drain_timeout: Duration,
    /// Number of queue items pre-allocated in the pool.
    pub initial_pool_capacity: usize,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            socket_signal_offset: 3,
            file_signal_offset: 4,
            harvester_tick: Duration::from_secs(1),
            select_quantum: Duration::from_millis(16),
            idle_park: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(3),
            initial_pool_capacity: 64,
        }
    }
}

impl PortConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the readiness backend.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Validates the configuration for basic sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket_signal_offset == self.file_signal_offset {
            return Err(ConfigError::SignalOffsetsCollide(self.socket_signal_offset));
        }
        if self.socket_signal_offset < 0 || self.file_signal_offset < 0 {
            return Err(ConfigError::SignalOffsetNegative);
        }
        // SIGRTMIN..SIGRTMAX spans at least 8 signals on every supported
        // libc; offsets past that risk landing outside the realtime range.
        if self.socket_signal_offset > 7 || self.file_signal_offset > 7 {
            return Err(ConfigError::SignalOffsetTooLarge);
        }
        if self.harvester_tick.is_zero() || self.idle_park.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        if self.select_quantum.is_zero() || self.select_quantum >= self.harvester_tick {
            return Err(ConfigError::QuantumOutOfRange);
        }
        if self.initial_pool_capacity == 0 {
            return Err(ConfigError::EmptyPool);
        }
        Ok(())
    }
}

/// Validation errors for [`PortConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Socket and file signal offsets are the same value.
    SignalOffsetsCollide(i32),
    /// A signal offset is negative.
    SignalOffsetNegative,
    /// A signal offset exceeds the guaranteed realtime range.
    SignalOffsetTooLarge,
    /// A duration knob is zero.
    ZeroDuration,
    /// The select quantum is zero or not below the harvester tick.
    QuantumOutOfRange,
    /// The initial pool capacity is zero.
    EmptyPool,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignalOffsetsCollide(off) => {
                write!(f, "socket and file signal offsets collide at SIGRTMIN+{off}")
            }
            Self::SignalOffsetNegative => write!(f, "signal offsets must be non-negative"),
            Self::SignalOffsetTooLarge => {
                write!(f, "signal offsets above SIGRTMIN+7 are not portable")
            }
            Self::ZeroDuration => write!(f, "duration knobs must be non-zero"),
            Self::QuantumOutOfRange => {
                write!(f, "select quantum must be non-zero and below the harvester tick")
            }
            Self::EmptyPool => write!(f, "initial pool capacity must be non-zero"),
        }
    }
}

impl std::error::Error for ConfigError {}
