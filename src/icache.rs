//! Instruction cache maintenance for freshly written code.
//!
//! On fully coherent architectures (x86, s390x) the data cache and the
//! instruction cache are always in sync and nothing needs to happen here.
//! On architectures such as AArch64 or RISC-V the two are not coherent:
//! after new code is written there may still be an instruction-cache entry
//! for the same address, and the processor would execute whatever is in
//! the cache instead of the new bytes. The affected range has to be
//! invalidated explicitly before the new code runs.
//!
//! Buffers are single-owner and single-threaded, so no cross-CPU pipeline
//! flush is issued here; the invalidation alone is what a single thread
//! needs between writing code and executing it.

use std::io;

/// Flushes the instruction cache for `len` bytes of code starting at `ptr`.
///
/// Does nothing on architectures whose instruction cache is coherent with
/// the data cache.
pub(crate) fn clear_cache(ptr: *const u8, len: usize) -> io::Result<()> {
    imp(ptr, len)
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "windows")] {
        fn imp(ptr: *const u8, len: usize) -> io::Result<()> {
            use windows_sys::Win32::System::Diagnostics::Debug::FlushInstructionCache;
            use windows_sys::Win32::System::Threading::GetCurrentProcess;

            // See:
            //   * https://learn.microsoft.com/en-us/windows/win32/api/processthreadsapi/nf-processthreadsapi-flushinstructioncache
            //   * https://devblogs.microsoft.com/oldnewthing/20190902-00/?p=102828
            if cfg!(target_arch = "aarch64") {
                unsafe {
                    if FlushInstructionCache(GetCurrentProcess(), ptr.cast(), len) == 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
            }
            Ok(())
        }
    } else if #[cfg(target_vendor = "apple")] {
        fn imp(ptr: *const u8, len: usize) -> io::Result<()> {
            extern "C" {
                // libSystem's cache maintenance entry point, declared in
                // <libkern/OSCacheControl.h>.
                fn sys_icache_invalidate(start: *mut core::ffi::c_void, len: usize);
            }

            if cfg!(any(target_arch = "aarch64", target_arch = "arm")) {
                unsafe { sys_icache_invalidate(ptr.cast_mut().cast(), len) };
            }
            Ok(())
        }
    } else if #[cfg(any(
        target_arch = "aarch64",
        target_arch = "arm",
        target_arch = "riscv64",
    ))] {
        fn imp(ptr: *const u8, len: usize) -> io::Result<()> {
            extern "C" {
                // The compiler-rt/libgcc routine behind the compiler's
                // `__builtin___clear_cache`.
                fn __clear_cache(start: *mut core::ffi::c_char, end: *mut core::ffi::c_char);
            }

            unsafe {
                __clear_cache(
                    ptr.cast_mut().cast(),
                    ptr.wrapping_add(len).cast_mut().cast(),
                );
            }
            Ok(())
        }
    } else {
        fn imp(_ptr: *const u8, _len: usize) -> io::Result<()> {
            Ok(())
        }
    }
}
