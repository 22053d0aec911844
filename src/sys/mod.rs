//! OS-specific primitives behind the buffer abstraction.
//!
//! This module is the single place that talks to the operating system:
//! creating and releasing the anonymous mapping, changing its protection,
//! querying the page size, and reading the process CPU-time clock. Porting
//! to a new platform means adding a block below and filling out the same
//! small function surface.

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod windows;
        pub(crate) use windows::*;
    } else if #[cfg(unix)] {
        mod unix;
        pub(crate) use unix::*;
    } else {
        compile_error!("execbuf supports unix and windows hosts");
    }
}
