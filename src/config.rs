//! Environment configuration.
//!
//! Values are read with `libc::getenv`, which neither allocates nor takes locks the
//! allocator could be waiting on, so this is safe to call from inside an interposed
//! allocator entry point.

use std::{ffi::CStr, str::FromStr};

use libc::c_char;
use log::LevelFilter;

/// Path of the trace output file.
pub const OUTPUT_VAR: &[u8] = b"ALLOC_TRACE_OUT\0";
/// Verbosity of the tracer's own diagnostics.
pub const LOG_VAR: &[u8] = b"ALLOC_TRACE_LOG\0";

const DEFAULT_OUTPUT: &[u8] = b"alloc_trace.out\0";
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Warn;

/// Look up an environment variable.  `key` must be NUL-terminated.
///
/// The returned string points into the process environment and stays valid as long as
/// nobody modifies that variable.
fn getenv(key: &[u8]) -> Option<&'static CStr> {
    debug_assert_eq!(key.last(), Some(&0));
    let val = unsafe { libc::getenv(key.as_ptr() as *const c_char) };
    if val.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(val) })
    }
}

pub fn default_output_path() -> &'static CStr {
    unsafe { CStr::from_bytes_with_nul_unchecked(DEFAULT_OUTPUT) }
}

/// Trace output path: `ALLOC_TRACE_OUT`, or `alloc_trace.out` in the working directory.
pub fn output_path() -> &'static CStr {
    match getenv(OUTPUT_VAR) {
        Some(path) if !path.to_bytes().is_empty() => path,
        _ => default_output_path(),
    }
}

/// Diagnostic verbosity from `ALLOC_TRACE_LOG`.  Unset or unparsable values mean `warn`.
pub fn log_level() -> LevelFilter {
    getenv(LOG_VAR)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| LevelFilter::from_str(val).ok())
        .unwrap_or(DEFAULT_LOG_LEVEL)
}
