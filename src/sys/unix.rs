use rustix::mm::{mmap_anonymous, mprotect, munmap, MapFlags, MprotectFlags, ProtFlags};
use std::io;
use std::ptr;
use std::time::Duration;

/// Map `len` bytes of zeroed, page-aligned, process-private memory with
/// read+write protection. `len` must be a positive page-size multiple.
pub(crate) fn map_anonymous(len: usize) -> io::Result<*mut u8> {
    let ptr = unsafe {
        mmap_anonymous(
            ptr::null_mut(),
            len,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::PRIVATE,
        )?
    };
    Ok(ptr.cast())
}

pub(crate) unsafe fn protect_read_write(ptr: *mut u8, len: usize) -> io::Result<()> {
    unsafe { mprotect(ptr.cast(), len, MprotectFlags::READ | MprotectFlags::WRITE) }?;
    Ok(())
}

pub(crate) unsafe fn protect_read_exec(ptr: *mut u8, len: usize) -> io::Result<()> {
    unsafe { mprotect(ptr.cast(), len, MprotectFlags::READ | MprotectFlags::EXEC) }?;
    Ok(())
}

pub(crate) unsafe fn unmap(ptr: *mut u8, len: usize) -> io::Result<()> {
    unsafe { munmap(ptr.cast(), len) }?;
    Ok(())
}

pub(crate) fn get_page_size() -> usize {
    rustix::param::page_size()
}

/// CPU time consumed by the process so far, kernel and user combined.
///
/// Reads `CLOCK_PROCESS_CPUTIME_ID`, which is monotonic and has nanosecond
/// resolution.
pub(crate) fn process_cpu_time() -> Duration {
    let ts = rustix::time::clock_gettime(rustix::time::ClockId::ProcessCPUTime);
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}
