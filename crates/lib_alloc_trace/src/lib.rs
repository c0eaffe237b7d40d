//! Companion crate to [`alloc_trace`].  This crate compiles into a dynamic library that can be
//! loaded via `LD_PRELOAD` to intercept the allocator calls issued by a program and record them
//! in the trace file before invoking the original C library functions.

use alloc_trace::{logger, NextSymbol, Resolver, TraceSink, TracedFunction, Tracer, TRACE_FILE};
use libc::{c_char, c_int, c_void, size_t};
use std::{ffi::CStr, str};

static TRACER: Tracer<Resolver<NextSymbol>> =
    Tracer::new(Resolver::new(NextSymbol), &TRACE_FILE);

// `reallocarray` is missing from older C libraries and is only looked up on first use.
const EAGER: [TracedFunction; 4] = [
    TracedFunction::Malloc,
    TracedFunction::Calloc,
    TracedFunction::Realloc,
    TracedFunction::Free,
];

/// Library constructor, runs before `main`.
#[used]
#[cfg_attr(target_os = "linux", link_section = ".init_array")]
#[cfg_attr(target_os = "macos", link_section = "__DATA,__mod_init_func")]
static CTOR: extern "C" fn() = {
    extern "C" fn init() {
        logger::init();
        TRACER.real().prepare(&EAGER);
        log::debug!("tracing allocator calls to {:?}", TRACE_FILE.path());
    }
    init
};

/// Library destructor.  Covers a return from `main`, where the C library terminates the process
/// without going through the exported `exit`.
#[used]
#[cfg_attr(target_os = "linux", link_section = ".fini_array")]
#[cfg_attr(target_os = "macos", link_section = "__DATA,__mod_term_func")]
static DTOR: extern "C" fn() = {
    extern "C" fn fini() {
        TRACE_FILE.close();
    }
    fini
};

/// Traced `malloc`.
///
/// # Safety
///
/// Same contract as C `malloc`.
#[no_mangle]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    TRACER.malloc(size)
}

/// Traced `calloc`.
///
/// # Safety
///
/// Same contract as C `calloc`.
#[no_mangle]
pub unsafe extern "C" fn calloc(nmemb: size_t, size: size_t) -> *mut c_void {
    TRACER.calloc(nmemb, size)
}

/// Traced `realloc`.
///
/// # Safety
///
/// Same contract as C `realloc`.
#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    TRACER.realloc(ptr, size)
}

/// Traced `reallocarray`.
///
/// # Safety
///
/// Same contract as C `reallocarray`.
#[no_mangle]
pub unsafe extern "C" fn reallocarray(
    ptr: *mut c_void,
    nmemb: size_t,
    size: size_t,
) -> *mut c_void {
    TRACER.reallocarray(ptr, nmemb, size)
}

/// Traced `free`.
///
/// # Safety
///
/// Same contract as C `free`.
#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    TRACER.free(ptr)
}

/// Write `text` into the trace as `@villoc(<text>) = <void>`, for programs that want to mark
/// points of interest between allocator calls.  Invalid UTF-8 ends the text.
///
/// # Safety
///
/// `text` must be null or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn alloc_trace_annotate(text: *const c_char) {
    if text.is_null() {
        return;
    }
    let bytes = CStr::from_ptr(text).to_bytes();
    let text = match str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
    };
    TRACER.annotate(text)
}

/// Replacement for C `exit`: closes the trace, flushes C stdio and terminates the process with
/// `status`.  Handlers registered with `atexit` are not run, since they could call back into the
/// allocator while the trace is being closed.
#[no_mangle]
pub extern "C" fn exit(status: c_int) -> ! {
    TRACER.terminate(status)
}
