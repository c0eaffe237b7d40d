//! Backend-independent tracing engine.
//!
//! An interception backend reports each allocator call in two phases.  [`Hooks::before`] runs
//! on entry: it takes the thread's reentrancy guard and renders `name(args` into the thread's
//! scratch line.  [`Hooks::after`] runs once the real call has returned: it appends the result,
//! emits the finished line and releases the guard.  [`Hooks::record`] wraps both around a
//! closure performing the real call.
//!
//! If a thread goes away between the two phases, the half-built line is flushed with a
//! `<no return ...>` marker when the thread's scratch is destroyed.

use std::{cell::RefCell, fmt};

use crate::{
    function::TracedFunction,
    guard::{self, Entered},
    record::{self, CallRecord, LineBuf, Outcome, Traced},
    sink::TraceSink,
};

struct Scratch {
    line: LineBuf,
    sink: Option<&'static dyn TraceSink>,
}

impl Scratch {
    const fn new() -> Self {
        Scratch {
            line: LineBuf::new(),
            sink: None,
        }
    }

    fn begin(&mut self, call: &CallRecord, sink: &'static dyn TraceSink) -> bool {
        if !self.line.is_empty() {
            return false;
        }
        if record::write_prefix(&mut self.line, call).is_err() {
            self.line.clear();
            return false;
        }
        self.sink = Some(sink);
        true
    }

    fn finish(&mut self, outcome: Outcome) {
        let complete = record::write_suffix(&mut self.line, outcome).is_ok();
        if let Some(sink) = self.sink.take() {
            if complete && sink.ensure_open() {
                sink.emit(self.line.as_bytes());
            }
        }
        self.line.clear();
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let sink = match self.sink.take() {
            Some(sink) if !self.line.is_empty() => sink,
            _ => return,
        };
        let _entered = guard::try_enter();
        if record::write_unterminated(&mut self.line).is_ok() && sink.ensure_open() {
            sink.emit(self.line.as_bytes());
        }
        self.line.clear();
    }
}

thread_local! {
    static SCRATCH: RefCell<Scratch> = const { RefCell::new(Scratch::new()) };
}

/// A call whose entry has been recorded and whose result is pending.
///
/// Holds the thread's reentrancy guard until passed to [`Hooks::after`].
#[must_use]
pub struct InFlight {
    entered: Entered,
    function: TracedFunction,
}

impl InFlight {
    pub fn function(&self) -> TracedFunction {
        self.function
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("function", &self.function)
            .finish()
    }
}

#[derive(Clone, Copy)]
pub struct Hooks {
    sink: &'static dyn TraceSink,
}

impl Hooks {
    pub const fn new(sink: &'static dyn TraceSink) -> Self {
        Hooks { sink }
    }

    pub fn sink(&self) -> &'static dyn TraceSink {
        self.sink
    }

    /// Entry phase.  `None` means the call must not be traced: this thread already has a
    /// record in flight, or its thread-local state is gone.
    pub fn before(&self, call: &CallRecord) -> Option<InFlight> {
        let entered = guard::try_enter()?;
        // First use of the scratch on a thread may allocate (destructor registration); the
        // guard is already held, so those calls pass through untraced.
        let begun = SCRATCH
            .try_with(|scratch| match scratch.try_borrow_mut() {
                Ok(mut scratch) => scratch.begin(call, self.sink),
                Err(_) => false,
            })
            .unwrap_or(false);
        if begun {
            Some(InFlight {
                entered,
                function: call.function(),
            })
        } else {
            None
        }
    }

    /// Exit phase: complete and emit the line started by [`before`](Hooks::before).
    pub fn after(&self, in_flight: InFlight, outcome: Outcome) {
        let _ = SCRATCH.try_with(|scratch| {
            if let Ok(mut scratch) = scratch.try_borrow_mut() {
                scratch.finish(outcome);
            }
        });
        guard::leave(in_flight.entered);
    }

    /// Emit an annotation line on behalf of the traced program.  Dropped if this thread has
    /// a record in flight.
    pub fn annotate(&self, text: &str) {
        let _entered = match guard::try_enter() {
            Some(entered) => entered,
            None => return,
        };
        if self.sink.ensure_open() {
            self.sink.emit(record::annotation(text).as_bytes());
        }
    }

    /// Trace one call to `real` and return its result unchanged.
    pub fn record<R: Traced, F: FnOnce() -> R>(&self, call: CallRecord, real: F) -> R {
        match self.before(&call) {
            Some(in_flight) => {
                let ret = real();
                self.after(in_flight, ret.outcome());
                ret
            }
            None => real(),
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish()
    }
}
