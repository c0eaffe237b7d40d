//! `alloc_trace` records every call a program makes to the C allocator entry points `malloc`,
//! `calloc`, `realloc`, `reallocarray` and `free`, one line per call, together with the
//! arguments and the value returned:
//!
//! ```text
//! malloc(64) = 0x55d0c0a4e2a0
//! calloc(8, 32) = 0x55d0c0a4e2f0
//! realloc(0x55d0c0a4e2f0, 128) = 0
//! free(0) = <void>
//! ```
//!
//! Sizes are printed in decimal, pointers in lowercase hexadecimal, and null pointers as `0`.
//! A call whose thread ended before it returned is written as `name(args <no return ...>`.
//! Lines from different threads never interleave; lines from one thread appear in the order
//! the calls completed.
//!
//! The tracer passes arguments and results through untouched and adds no behavior of its own
//! to the traced program.  Allocator calls made by the tracer itself (and calls nested inside
//! a traced call on the same thread) run untraced.
//!
//! ## Tracing any program via `LD_PRELOAD`
//!
//! The companion `lib_alloc_trace` crate builds a shared object that replaces the allocator
//! symbols of the process and forwards every call to the next definition in the dynamic
//! linker's search order:
//!
//! ```bash
//! LD_PRELOAD=liballoc_trace_preload.so ./my_program
//! ```
//!
//! The trace is written to `alloc_trace.out` in the working directory of the program, or to
//! the path in the `ALLOC_TRACE_OUT` environment variable.  The file is truncated when the first
//! call is traced.  Diagnostics go to stderr; their verbosity is set with `ALLOC_TRACE_LOG`
//! (`off`, `error`, `warn`, `info`, `debug` or `trace`; default `warn`).
//!
//! ## Annotations
//!
//! A traced program can mark points of interest in the trace.  Under `LD_PRELOAD` it calls the
//! exported `void alloc_trace_annotate(const char *text)`; a Rust program calls
//! [`TraceAllocator::annotate`].  The text is written on a line of its own:
//!
//! ```text
//! @villoc(request 42 done) = <void>
//! ```
//!
//! Line breaks in the text are replaced by spaces and long texts are truncated.
//!
//! ## Tracing a Rust program
//!
//! A Rust program can trace its own allocations by installing [`TraceAllocator`] as the global
//! allocator instead of [`std::alloc::System`]:
//!
//! ```no_run
//! use alloc_trace::{TraceAllocator, TRACE_FILE};
//!
//! #[global_allocator]
//! static GLOBAL: TraceAllocator = TraceAllocator::new(&TRACE_FILE);
//!
//! fn main() {}
//! ```
//!
//! ## Checking traces
//!
//! The `trace_check` tool from this crate validates trace files against the line grammar and
//! prints per-function totals, e.g.:
//!
//! ```bash
//! trace_check --trace 'alloc_trace*.out'
//! ```

pub mod bootstrap;
pub mod buf;
pub mod config;
mod function;
mod global;
mod guard;
mod hooks;
pub mod logger;
mod parse;
pub mod record;
mod resolver;
mod sink;
mod summary;
pub mod termination;
mod tracer;

pub use function::{TracedFunction, UnknownFunction};
pub use global::TraceAllocator;
pub use guard::untraced;
pub use hooks::{Hooks, InFlight};
pub use parse::{parse_entry, parse_line, EventResult, ParseError, TraceEntry, TraceEvent};
pub use record::{format, CallRecord, Outcome, Ptr, Traced};
pub use resolver::{NextSymbol, Resolver, SymbolSource};
pub use sink::{FileSink, MemorySink, TraceSink, TRACE_FILE};
pub use summary::{CallStats, TraceSummary};
pub use tracer::{RealAllocator, Tracer};
