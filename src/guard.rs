//! Per-thread reentrancy guard.
//!
//! The flag lives in a `const`-initialized thread local without a destructor, so reading or
//! setting it never allocates and never fails, even while the thread is being torn down.
//! Everything the tracer does for a record (symbol lookup, thread-local scratch setup, sink
//! open, diagnostics) runs with the flag set; allocator calls made from there are passed
//! straight to the real allocator and are not recorded.

use std::{cell::Cell, marker::PhantomData};

thread_local! {
    // Set while this thread has a record in flight.
    static IN_FLIGHT: Cell<bool> = const { Cell::new(false) };
}

/// Proof that the current thread holds the guard.  Dropping it leaves the guard.
#[must_use]
pub struct Entered {
    // The flag belongs to the thread that set it.
    _not_send: PhantomData<*const ()>,
}

impl Drop for Entered {
    fn drop(&mut self) {
        let _ = IN_FLIGHT.try_with(|flag| flag.set(false));
    }
}

/// Engage the guard, or return `None` if this thread already has a record in flight.
pub fn try_enter() -> Option<Entered> {
    IN_FLIGHT
        .try_with(|flag| {
            if flag.replace(true) {
                None
            } else {
                Some(Entered {
                    _not_send: PhantomData,
                })
            }
        })
        .ok()
        .flatten()
}

/// Release the guard taken by [`try_enter`].
pub fn leave(entered: Entered) {
    drop(entered);
}

/// Whether the current thread has a record in flight.
pub fn is_engaged() -> bool {
    IN_FLIGHT.try_with(Cell::get).unwrap_or(true)
}

/// Run `f` with tracing suppressed on the current thread.
///
/// Allocator calls made by `f` still reach the real allocator but produce no trace lines.
pub fn untraced<R, F: FnOnce() -> R>(f: F) -> R {
    let _entered = try_enter();
    f()
}
