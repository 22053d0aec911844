use std::io;
use std::mem::MaybeUninit;
use std::ptr;
use std::time::Duration;
use windows_sys::Win32::Foundation::FILETIME;
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
    PAGE_EXECUTE_READ, PAGE_PROTECTION_FLAGS, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, GetProcessTimes};

/// Map `len` bytes of zeroed, page-aligned, process-private memory with
/// read+write protection. `len` must be a positive page-size multiple.
pub(crate) fn map_anonymous(len: usize) -> io::Result<*mut u8> {
    let ptr = unsafe { VirtualAlloc(ptr::null(), len, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE) };
    if ptr.is_null() {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr.cast())
}

unsafe fn protect(ptr: *mut u8, len: usize, flags: PAGE_PROTECTION_FLAGS) -> io::Result<()> {
    let mut previous = 0;
    if unsafe { VirtualProtect(ptr.cast(), len, flags, &mut previous) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) unsafe fn protect_read_write(ptr: *mut u8, len: usize) -> io::Result<()> {
    unsafe { protect(ptr, len, PAGE_READWRITE) }
}

pub(crate) unsafe fn protect_read_exec(ptr: *mut u8, len: usize) -> io::Result<()> {
    unsafe { protect(ptr, len, PAGE_EXECUTE_READ) }
}

pub(crate) unsafe fn unmap(ptr: *mut u8, _len: usize) -> io::Result<()> {
    // The whole reservation is released at once; `VirtualFree` requires a
    // zero size with `MEM_RELEASE`.
    if unsafe { VirtualFree(ptr.cast(), 0, MEM_RELEASE) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn get_page_size() -> usize {
    unsafe {
        let mut info = MaybeUninit::<SYSTEM_INFO>::uninit();
        GetSystemInfo(info.as_mut_ptr());
        info.assume_init_ref().dwPageSize as usize
    }
}

/// CPU time consumed by the process so far, kernel and user combined.
///
/// `GetProcessTimes` reports both in 100-nanosecond ticks.
pub(crate) fn process_cpu_time() -> Duration {
    fn ticks(ft: FILETIME) -> u64 {
        (u64::from(ft.dwHighDateTime) << 32) | u64::from(ft.dwLowDateTime)
    }

    unsafe {
        let mut creation = MaybeUninit::<FILETIME>::uninit();
        let mut exit = MaybeUninit::<FILETIME>::uninit();
        let mut kernel = MaybeUninit::<FILETIME>::uninit();
        let mut user = MaybeUninit::<FILETIME>::uninit();
        let ok = GetProcessTimes(
            GetCurrentProcess(),
            creation.as_mut_ptr(),
            exit.as_mut_ptr(),
            kernel.as_mut_ptr(),
            user.as_mut_ptr(),
        );
        // Cannot fail for the current-process pseudo handle.
        debug_assert_ne!(ok, 0);
        let total = ticks(kernel.assume_init()) + ticks(user.assume_init());
        Duration::from_nanos(total * 100)
    }
}
