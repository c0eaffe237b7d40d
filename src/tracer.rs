use std::fmt;

use libc::{c_int, c_void};

use crate::{hooks::Hooks, record::CallRecord, sink::TraceSink, termination};

/// The allocator the tracer delegates to.
///
/// Implementations must behave exactly like the C allocator functions of the same name; the
/// tracer passes arguments through and hands results back untouched.
pub trait RealAllocator: Sync {
    /// # Safety
    ///
    /// Same contract as C `malloc`.
    unsafe fn malloc(&self, size: usize) -> *mut c_void;

    /// # Safety
    ///
    /// Same contract as C `calloc`.
    unsafe fn calloc(&self, nmemb: usize, size: usize) -> *mut c_void;

    /// # Safety
    ///
    /// Same contract as C `realloc`.
    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void;

    /// # Safety
    ///
    /// Same contract as C `reallocarray`.
    unsafe fn reallocarray(&self, ptr: *mut c_void, nmemb: usize, size: usize) -> *mut c_void;

    /// # Safety
    ///
    /// Same contract as C `free`.
    unsafe fn free(&self, ptr: *mut c_void);
}

/// Traced versions of the C allocator entry points, for backends that replace the exported
/// symbols themselves (see the `lib_alloc_trace` crate).
pub struct Tracer<A> {
    real: A,
    hooks: Hooks,
}

impl<A> Tracer<A> {
    pub const fn new(real: A, sink: &'static dyn TraceSink) -> Self {
        Tracer {
            real,
            hooks: Hooks::new(sink),
        }
    }

    pub fn real(&self) -> &A {
        &self.real
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Write `text` into the trace as an annotation line.
    pub fn annotate(&self, text: &str) {
        self.hooks.annotate(text)
    }

    /// Close the trace and terminate the process without running exit handlers.
    ///
    /// Exit handlers may call the traced functions and would then write into a sink that
    /// is being torn down, so the sink is closed first.
    pub fn terminate(&self, status: c_int) -> ! {
        termination::close_and_exit(self.hooks.sink(), status)
    }
}

impl<A: RealAllocator> Tracer<A> {
    /// # Safety
    ///
    /// Same contract as C `malloc`.
    pub unsafe fn malloc(&self, size: usize) -> *mut c_void {
        let real = &self.real;
        self.hooks
            .record(CallRecord::malloc(size), || real.malloc(size))
    }

    /// # Safety
    ///
    /// Same contract as C `calloc`.
    pub unsafe fn calloc(&self, nmemb: usize, size: usize) -> *mut c_void {
        let real = &self.real;
        self.hooks
            .record(CallRecord::calloc(nmemb, size), || real.calloc(nmemb, size))
    }

    /// # Safety
    ///
    /// Same contract as C `realloc`.  If the real call fails, `ptr` stays valid and owned by
    /// the caller.
    pub unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        let real = &self.real;
        self.hooks
            .record(CallRecord::realloc(ptr, size), || real.realloc(ptr, size))
    }

    /// # Safety
    ///
    /// Same contract as C `reallocarray`.
    pub unsafe fn reallocarray(&self, ptr: *mut c_void, nmemb: usize, size: usize) -> *mut c_void {
        let real = &self.real;
        self.hooks.record(CallRecord::reallocarray(ptr, nmemb, size), || {
            real.reallocarray(ptr, nmemb, size)
        })
    }

    /// # Safety
    ///
    /// Same contract as C `free`.
    pub unsafe fn free(&self, ptr: *mut c_void) {
        let real = &self.real;
        self.hooks.record(CallRecord::free(ptr), || real.free(ptr))
    }
}

impl<A> fmt::Debug for Tracer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").finish()
    }
}
