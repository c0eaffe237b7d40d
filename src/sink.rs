//! Trace output destinations.

use std::{
    collections::VecDeque,
    ffi::CStr,
    io,
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Mutex, PoisonError,
    },
};

use libc::{c_char, c_int, c_void};
use once_cell::sync::OnceCell;

use crate::{config, guard};

/// Process-wide trace file shared by every tracing backend.
pub static TRACE_FILE: FileSink = FileSink::from_env();

/// A destination for trace lines.
///
/// `emit` may be called concurrently from any number of threads; the bytes of one call
/// must reach the destination as one contiguous unit.
pub trait TraceSink: Sync {
    /// Open the destination if that has not been attempted yet.  Returns whether lines
    /// can currently be emitted.
    fn ensure_open(&self) -> bool;

    fn emit(&self, line: &[u8]);

    /// Stop accepting lines.  Later calls are no-ops, and the sink never reopens.
    fn close(&self);
}

const NO_FD: c_int = -1;

/// Trace file, opened lazily on the first line and written with one `write(2)` per line.
pub struct FileSink {
    path: Option<&'static CStr>,
    // Outcome of the single open attempt.
    opened: OnceCell<bool>,
    fd: AtomicI32,
    closed: AtomicBool,
}

impl FileSink {
    /// Sink writing to the path named by `ALLOC_TRACE_OUT` (see [`config::output_path`]).
    pub const fn from_env() -> Self {
        FileSink {
            path: None,
            opened: OnceCell::new(),
            fd: AtomicI32::new(NO_FD),
            closed: AtomicBool::new(false),
        }
    }

    pub const fn with_path(path: &'static CStr) -> Self {
        FileSink {
            path: Some(path),
            opened: OnceCell::new(),
            fd: AtomicI32::new(NO_FD),
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &'static CStr {
        self.path.unwrap_or_else(config::output_path)
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.fd.load(Ordering::Acquire) != NO_FD
    }

    fn open_file(&self) -> bool {
        let path = self.path();
        let flags =
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_APPEND | libc::O_CLOEXEC;
        let fd = unsafe { libc::open(path.as_ptr(), flags, 0o666 as libc::c_uint) };
        if fd < 0 {
            log::error!(
                "failed to open trace output {}: {}; allocator calls will not be traced",
                path.to_string_lossy(),
                io::Error::last_os_error()
            );
            return false;
        }
        self.fd.store(fd, Ordering::Release);
        log::debug!("tracing allocator calls to {}", path.to_string_lossy());
        true
    }
}

impl TraceSink for FileSink {
    fn ensure_open(&self) -> bool {
        *self.opened.get_or_init(|| self.open_file()) && self.is_open()
    }

    fn emit(&self, line: &[u8]) {
        if !self.ensure_open() {
            return;
        }
        let fd = self.fd.load(Ordering::Acquire);
        if fd != NO_FD {
            write_all(fd, line);
        }
    }

    /// Stops the sink and releases the trace file.  The descriptor number itself stays
    /// allocated, pointing at `/dev/null`, so an `emit` racing with `close` can never write
    /// into a file opened later under the same number.
    fn close(&self) {
        // A sink closed before its first line must not open afterwards.
        let _ = self.opened.set(false);
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let fd = self.fd.load(Ordering::Acquire);
        if fd != NO_FD {
            retire(fd);
        }
    }
}

// Replace the file behind `fd` with `/dev/null`.
fn retire(fd: c_int) {
    let null = unsafe {
        libc::open(
            b"/dev/null\0".as_ptr() as *const c_char,
            libc::O_WRONLY | libc::O_CLOEXEC,
        )
    };
    if null < 0 {
        log::warn!(
            "cannot open /dev/null: {}; trace output stays open until exit",
            io::Error::last_os_error()
        );
        return;
    }
    unsafe {
        libc::dup2(null, fd);
        libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        libc::close(null);
    }
}

// Not using `std::io::Write` because `File` would take ownership of the descriptor.
fn write_all(fd: c_int, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        let done = unsafe { libc::write(fd, bytes.as_ptr() as *const c_void, bytes.len()) };
        if done < 0 {
            if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return;
        }
        bytes = &bytes[done as usize..];
    }
}

/// Bounded in-memory ring of trace lines.  When full, the oldest line is dropped.
pub struct MemorySink {
    capacity: usize,
    lines: Mutex<VecDeque<Vec<u8>>>,
    closed: AtomicBool,
}

impl MemorySink {
    pub const fn new(capacity: usize) -> Self {
        MemorySink {
            capacity,
            lines: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Snapshot of the buffered lines, without their trailing newlines.
    pub fn lines(&self) -> Vec<String> {
        // Tracing is suppressed so that the allocations made here cannot re-enter `emit`
        // while the lock is held.
        guard::untraced(|| {
            let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
            lines
                .iter()
                .map(|line| {
                    let line = line.strip_suffix(b"\n").unwrap_or(&line[..]);
                    String::from_utf8_lossy(line).into_owned()
                })
                .collect()
        })
    }

    pub fn clear(&self) {
        guard::untraced(|| {
            self.lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear()
        })
    }
}

impl TraceSink for MemorySink {
    fn ensure_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn emit(&self, line: &[u8]) {
        if !self.ensure_open() || self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.to_vec());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
