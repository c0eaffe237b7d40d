//! Process termination that cannot re-enter the tracer.

use std::ptr;

use libc::c_int;

use crate::sink::TraceSink;

/// Close `sink`, flush C stdio buffers and terminate immediately with `status`.
///
/// Exit handlers and library destructors are not run.  Allocator calls made by the stdio
/// flush find the sink closed and are passed through untraced.
pub fn close_and_exit(sink: &dyn TraceSink, status: c_int) -> ! {
    sink.close();
    unsafe {
        libc::fflush(ptr::null_mut());
    }
    exit_now(status)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn exit_now(status: c_int) -> ! {
    unsafe {
        libc::syscall(libc::SYS_exit_group, status as libc::c_long);
        libc::_exit(status)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn exit_now(status: c_int) -> ! {
    unsafe { libc::_exit(status) }
}
