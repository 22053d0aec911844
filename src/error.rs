//! Errors reported by buffer operations.
//!
//! Every OS-facing failure is detected at the call site and surfaced as a
//! value rather than terminating the process, so callers decide whether to
//! retry, degrade, or propagate. A failed operation never leaves a buffer
//! half-transitioned: its mode only changes once the OS call has succeeded.

use crate::buffer::Mode;
use std::io;

/// A convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by [`ExecBuffer`](crate::ExecBuffer) operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The OS refused to allocate the backing mapping.
    #[error("failed to allocate a {size:#x} byte mapping")]
    Allocation {
        /// The mapping size that was requested from the OS, in bytes.
        size: usize,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The OS refused to change the mapping's protection.
    ///
    /// The buffer keeps the mode it had before the call; the transition is
    /// not considered to have occurred.
    #[error("failed to make the buffer {mode}")]
    Protection {
        /// The mode the buffer was being transitioned to.
        mode: Mode,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// `execute` was invoked on a host CPU family for which no
    /// control-transfer mechanism is implemented.
    #[error("cannot execute generated code on {arch}")]
    UnsupportedArchitecture {
        /// The host architecture, as named by `std::env::consts::ARCH`.
        arch: &'static str,
    },
}

impl Error {
    /// A requested size that overflows when rounded or multiplied out can
    /// never be mapped; report it as an allocation failure.
    pub(crate) fn allocation_overflow(size: usize) -> Error {
        Error::Allocation {
            size,
            source: io::Error::from(io::ErrorKind::OutOfMemory),
        }
    }
}
