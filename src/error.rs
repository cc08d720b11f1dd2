//! Error types and error handling strategy for asyncport.
//!
//! This module defines the typed errors returned by the public completion
//! port API. Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Transient OS unreadiness (`EWOULDBLOCK`, `EAGAIN`, `EINPROGRESS`) is
//!   never an error: it means "parked, will complete later"
//! - Per-operation completion failures travel inside the completion record
//!   as a raw OS error code, not through this type
//! - Nothing panics on ordinary I/O failure
//!
//! # Error Categories
//!
//! - **Contract**: caller-contract violations rejected synchronously at the
//!   API boundary (unregistered descriptor, empty buffer, missing peer)
//! - **Lifecycle**: a port or descriptor disappeared between lookup and use,
//!   or is being torn down
//! - **Resource**: the pooled item arena refused to grow
//! - **Os**: a hard syscall failure with its errno

use core::fmt;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Contract ===
    /// The descriptor is not registered with any completion port.
    NotFound,
    /// The descriptor is already associated with a completion port.
    AlreadyAssociated,
    /// A caller-supplied argument violates the operation's contract.
    InvalidInput,

    // === Lifecycle ===
    /// Another thread is already tearing this port down.
    AlreadyClosing,
    /// The port's exit flag is set; no new waits or submissions are accepted.
    ShuttingDown,
    /// The wait deadline expired with no completion available.
    TimedOut,
    /// The background harvester failed to start.
    HarvesterUnavailable,

    // === Resource ===
    /// The pooled item arena could not satisfy an allocation.
    OutOfMemory,

    // === OS ===
    /// A hard syscall failure, carrying the raw errno.
    Os(i32),
}

impl ErrorKind {
    /// Returns a human-readable name for the kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::AlreadyAssociated => "already associated",
            Self::InvalidInput => "invalid input",
            Self::AlreadyClosing => "already closing",
            Self::ShuttingDown => "shutting down",
            Self::TimedOut => "timed out",
            Self::HarvesterUnavailable => "harvester unavailable",
            Self::OutOfMemory => "out of memory",
            Self::Os(_) => "os error",
        }
    }

    /// Returns true if the failed operation may succeed if retried later.
    ///
    /// `TimedOut` is the only transiently-failing kind: the caller can wait
    /// again. Everything else reflects a contract violation or a state that
    /// will not clear on its own.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// An error returned by the completion port API.
///
/// Carries an [`ErrorKind`] plus an optional message with call-site detail.
/// Construct through the named helpers ([`Error::not_found`],
/// [`Error::os`], ...) so messages stay uniform.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
}

impl Error {
    /// Creates an error of the given kind with no message.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the raw errno for [`ErrorKind::Os`] errors.
    #[must_use]
    pub const fn raw_os_error(&self) -> Option<i32> {
        match self.kind {
            ErrorKind::Os(code) => Some(code),
            _ => None,
        }
    }

    /// Returns true if the failed operation may succeed if retried later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns true if this error reports the wait deadline expiring.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::TimedOut)
    }

    /// Creates a "descriptor or port not registered" error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound).with_message(what)
    }

    /// Creates an "already associated" error for a descriptor.
    #[must_use]
    pub fn already_associated(fd: i32) -> Self {
        Self::new(ErrorKind::AlreadyAssociated)
            .with_message(format!("descriptor {fd} is already associated with a port"))
    }

    /// Creates a caller-contract violation error.
    #[must_use]
    pub fn invalid_input(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput).with_message(detail)
    }

    /// Creates an error from a raw errno.
    #[must_use]
    pub fn os(errno: i32) -> Self {
        Self::new(ErrorKind::Os(errno))
    }

    /// Creates an error from the most recent syscall failure.
    #[must_use]
    pub fn last_os_error() -> Self {
        Self::os(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.message) {
            (ErrorKind::Os(code), Some(msg)) => {
                write!(f, "{msg}: {}", std::io::Error::from_raw_os_error(*code))
            }
            (ErrorKind::Os(code), None) => {
                write!(f, "{}", std::io::Error::from_raw_os_error(*code))
            }
            (kind, Some(msg)) => write!(f, "{}: {msg}", kind.name()),
            (kind, None) => write!(f, "{}", kind.name()),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err.kind {
            ErrorKind::Os(code) => Self::from_raw_os_error(code),
            ErrorKind::NotFound => Self::new(std::io::ErrorKind::NotFound, err),
            ErrorKind::TimedOut => Self::new(std::io::ErrorKind::TimedOut, err),
            ErrorKind::InvalidInput => Self::new(std::io::ErrorKind::InvalidInput, err),
            ErrorKind::OutOfMemory => Self::new(std::io::ErrorKind::OutOfMemory, err),
            _ => Self::other(err),
        }
    }
}

/// Convenience alias for results returned by the completion port API.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(ErrorKind::NotFound.name(), "not found");
        assert_eq!(ErrorKind::Os(libc::EPIPE).name(), "os error");
    }

    #[test]
    fn os_error_round_trips_errno() {
        let err = Error::os(libc::ECONNRESET);
        assert_eq!(err.raw_os_error(), Some(libc::ECONNRESET));
        let io: std::io::Error = err.into();
        assert_eq!(io.raw_os_error(), Some(libc::ECONNRESET));
    }

    #[test]
    fn only_timeout_is_retryable() {
        assert!(Error::new(ErrorKind::TimedOut).is_retryable());
        assert!(!Error::not_found("port").is_retryable());
        assert!(!Error::os(libc::EBADF).is_retryable());
    }

    #[test]
    fn display_includes_message() {
        let err = Error::invalid_input("buffer must be non-empty");
        let text = err.to_string();
        assert!(text.contains("invalid input"));
        assert!(text.contains("buffer must be non-empty"));
    }
}
