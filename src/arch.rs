//! Per-architecture control transfer into generated code.
//!
//! "Jump to the first byte of the buffer and come back when the code there
//! returns" assumes the host's call/return convention: a plain C-ABI call
//! with no arguments must land on the buffer's first instruction, and the
//! generated code must hand control back with the architecture's return
//! instruction. The hosts where that holds are enumerated here at build
//! time; on anything else the invoker is reported as unavailable instead
//! of jumping blindly.

use crate::error::Result;

/// Transfers control to `entry` and returns when the code there does.
pub(crate) type Invoker = unsafe fn(entry: *const u8);

cfg_if::cfg_if! {
    if #[cfg(any(
        target_arch = "x86_64",
        target_arch = "x86",
        target_arch = "aarch64",
        target_arch = "riscv64",
    ))] {
        pub(crate) fn invoker() -> Result<Invoker> {
            Ok(invoke)
        }

        unsafe fn invoke(entry: *const u8) {
            let code: unsafe extern "C" fn() = unsafe { core::mem::transmute(entry) };
            unsafe { code() }
        }
    } else {
        pub(crate) fn invoker() -> Result<Invoker> {
            Err(crate::error::Error::UnsupportedArchitecture {
                arch: std::env::consts::ARCH,
            })
        }
    }
}
