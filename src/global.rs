use std::alloc::{GlobalAlloc, Layout, System};

use crate::{hooks::Hooks, record::CallRecord, sink::TraceSink};

/// Global allocator that traces every allocation made by a Rust program and forwards it to
/// [`System`].
///
/// Rust allocations are reported in terms of the C functions they correspond to: `alloc` as
/// `malloc(size)`, `alloc_zeroed` as `calloc(1, size)`, `realloc` as `realloc(ptr, size)` and
/// `dealloc` as `free(ptr)`.
///
/// ```no_run
/// use alloc_trace::{TraceAllocator, TRACE_FILE};
///
/// #[global_allocator]
/// static GLOBAL: TraceAllocator = TraceAllocator::new(&TRACE_FILE);
///
/// fn main() {}
/// ```
pub struct TraceAllocator {
    hooks: Hooks,
}

impl TraceAllocator {
    pub const fn new(sink: &'static dyn TraceSink) -> Self {
        TraceAllocator {
            hooks: Hooks::new(sink),
        }
    }

    /// Write `text` into the trace as an annotation line, e.g. to mark program phases.
    pub fn annotate(&self, text: &str) {
        self.hooks.annotate(text)
    }
}

unsafe impl GlobalAlloc for TraceAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.hooks
            .record(CallRecord::malloc(layout.size()), || System.alloc(layout))
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.hooks.record(CallRecord::calloc(1, layout.size()), || {
            System.alloc_zeroed(layout)
        })
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.hooks
            .record(CallRecord::free(ptr), || System.dealloc(ptr, layout))
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.hooks.record(CallRecord::realloc(ptr, new_size), || {
            System.realloc(ptr, layout, new_size)
        })
    }
}
