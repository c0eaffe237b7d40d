//! Call records and the trace line grammar.
//!
//! One traced call renders as a single ASCII line:
//!
//! ```text
//! malloc(64) = 0x55d0c1a2b2a0
//! calloc(8, 32) = 0x55d0c1a2b2f0
//! realloc(0x55d0c1a2b2f0, 128) = 0
//! reallocarray(0, 4, 16) = 0x55d0c1a2b3a0
//! free(0) = <void>
//! ```
//!
//! Sizes and counts are unsigned decimal, pointers are `0x`-prefixed lowercase hex and a null
//! pointer is the literal `0`.  A call whose return was never observed (the thread went away
//! while it was in flight) renders as `malloc(64 <no return ...>`.
//!
//! Formatting only ever writes into a caller-supplied [`FixedBuf`], so it is safe to run
//! while the reentrancy guard is engaged.

use std::{
    ffi::c_void,
    fmt::{self, Write},
};

use crate::{buf::FixedBuf, function::TracedFunction};

/// Capacity of a single rendered trace line.
pub const LINE_CAPACITY: usize = 256;

/// Marker written instead of a result when a call never returned.
pub const NO_RETURN: &str = " <no return ...>";

/// Rendering of the missing return value of `free`.
pub const VOID: &str = "<void>";

/// Tag opening an annotation line, `@villoc(<text>) = <void>`.
pub const ANNOTATION_TAG: &str = "@villoc";

pub type LineBuf = FixedBuf<LINE_CAPACITY>;

/// Pointer as it appears in a trace line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ptr(pub usize);

impl Ptr {
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl<T> From<*const T> for Ptr {
    fn from(ptr: *const T) -> Self {
        Ptr(ptr as usize)
    }
}

impl<T> From<*mut T> for Ptr {
    fn from(ptr: *mut T) -> Self {
        Ptr(ptr as usize)
    }
}

impl fmt::Display for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("0")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arg {
    Size(usize),
    Ptr(Ptr),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Size(size) => write!(f, "{}", size),
            Arg::Ptr(ptr) => ptr.fmt(f),
        }
    }
}

/// Result of a real allocator call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Pointer(Ptr),
    Void,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pointer(ptr) => ptr.fmt(f),
            Outcome::Void => f.write_str(VOID),
        }
    }
}

/// Converts the return value of a real allocator call into an [`Outcome`].
pub trait Traced {
    fn outcome(&self) -> Outcome;
}

impl Traced for *mut c_void {
    fn outcome(&self) -> Outcome {
        Outcome::Pointer(Ptr::from(*self))
    }
}

impl Traced for *mut u8 {
    fn outcome(&self) -> Outcome {
        Outcome::Pointer(Ptr::from(*self))
    }
}

impl Traced for () {
    fn outcome(&self) -> Outcome {
        Outcome::Void
    }
}

/// One allocator call: the function, its arguments and, once known, its result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallRecord {
    function: TracedFunction,
    args: [Arg; 3],
    result: Option<Outcome>,
}

impl CallRecord {
    fn new(function: TracedFunction, args: [Arg; 3]) -> Self {
        CallRecord {
            function,
            args,
            result: None,
        }
    }

    pub fn malloc(size: usize) -> Self {
        Self::new(
            TracedFunction::Malloc,
            [Arg::Size(size), Arg::Size(0), Arg::Size(0)],
        )
    }

    pub fn calloc(nmemb: usize, size: usize) -> Self {
        Self::new(
            TracedFunction::Calloc,
            [Arg::Size(nmemb), Arg::Size(size), Arg::Size(0)],
        )
    }

    pub fn realloc(ptr: impl Into<Ptr>, size: usize) -> Self {
        Self::new(
            TracedFunction::Realloc,
            [Arg::Ptr(ptr.into()), Arg::Size(size), Arg::Size(0)],
        )
    }

    pub fn reallocarray(ptr: impl Into<Ptr>, nmemb: usize, size: usize) -> Self {
        Self::new(
            TracedFunction::Reallocarray,
            [Arg::Ptr(ptr.into()), Arg::Size(nmemb), Arg::Size(size)],
        )
    }

    pub fn free(ptr: impl Into<Ptr>) -> Self {
        Self::new(
            TracedFunction::Free,
            [Arg::Ptr(ptr.into()), Arg::Size(0), Arg::Size(0)],
        )
    }

    pub fn function(&self) -> TracedFunction {
        self.function
    }

    pub fn args(&self) -> &[Arg] {
        &self.args[..self.function.arity()]
    }

    pub fn result(&self) -> Option<Outcome> {
        self.result
    }

    pub fn with_result(mut self, outcome: Outcome) -> Self {
        self.result = Some(outcome);
        self
    }
}

/// Write the part of a line known before the real call: `name(arg, arg`.
pub fn write_prefix<W: Write>(out: &mut W, record: &CallRecord) -> fmt::Result {
    out.write_str(record.function.name())?;
    out.write_char('(')?;
    for (pos, arg) in record.args().iter().enumerate() {
        if pos > 0 {
            out.write_str(", ")?;
        }
        write!(out, "{}", arg)?;
    }
    Ok(())
}

/// Write the part of a line known after the real call: `) = result\n`.
pub fn write_suffix<W: Write>(out: &mut W, outcome: Outcome) -> fmt::Result {
    writeln!(out, ") = {}", outcome)
}

/// Render a complete record.  A record without a result renders as unterminated.
pub fn format(record: &CallRecord) -> LineBuf {
    let mut line = LineBuf::new();
    // Lines are bounded well below LINE_CAPACITY, so these writes cannot fail.
    let _ = write_prefix(&mut line, record);
    let _ = match record.result {
        Some(outcome) => write_suffix(&mut line, outcome),
        None => write_unterminated(&mut line),
    };
    line
}

/// Render a free-form annotation supplied by the traced program.
///
/// Line breaks in `text` become spaces, and text too long for one line is cut at a character
/// boundary.
pub fn annotation(text: &str) -> LineBuf {
    const SUFFIX_LEN: usize = ") = ".len() + VOID.len() + 1;
    let room = LINE_CAPACITY - ANNOTATION_TAG.len() - 1 - SUFFIX_LEN;

    let mut line = LineBuf::new();
    let _ = line.write_str(ANNOTATION_TAG);
    let _ = line.write_char('(');
    let mut used = 0;
    for ch in text.chars() {
        let ch = if ch == '\n' || ch == '\r' { ' ' } else { ch };
        used += ch.len_utf8();
        if used > room {
            break;
        }
        let _ = line.write_char(ch);
    }
    let _ = write_suffix(&mut line, Outcome::Void);
    line
}

/// Close off a prefix whose call never returned.
pub fn write_unterminated<W: Write>(out: &mut W) -> fmt::Result {
    out.write_str(NO_RETURN)?;
    out.write_char('\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    fn render(record: CallRecord) -> String {
        String::from_utf8(format(&record).as_bytes().to_vec()).unwrap()
    }

    fn at(addr: usize) -> *const c_void {
        addr as *const c_void
    }

    #[test]
    fn renders_each_function() {
        assert_eq!(
            render(CallRecord::malloc(64).with_result(Outcome::Pointer(Ptr(0xaaaa)))),
            "malloc(64) = 0xaaaa\n"
        );
        assert_eq!(
            render(CallRecord::calloc(8, 32).with_result(Outcome::Pointer(Ptr(0xbbbb)))),
            "calloc(8, 32) = 0xbbbb\n"
        );
        assert_eq!(
            render(CallRecord::realloc(at(0xbbbb), 128).with_result(Outcome::Pointer(Ptr(0)))),
            "realloc(0xbbbb, 128) = 0\n"
        );
        assert_eq!(
            render(
                CallRecord::reallocarray(at(0xcccc), 4, 16)
                    .with_result(Outcome::Pointer(Ptr(0xdddd)))
            ),
            "reallocarray(0xcccc, 4, 16) = 0xdddd\n"
        );
        assert_eq!(
            render(CallRecord::free(ptr::null::<c_void>()).with_result(Outcome::Void)),
            "free(0) = <void>\n"
        );
    }

    #[test]
    fn null_is_never_hex() {
        let null = ptr::null::<c_void>();
        let lines = [
            render(CallRecord::malloc(1).with_result(Outcome::Pointer(Ptr(0)))),
            render(CallRecord::calloc(1, 1).with_result(Outcome::Pointer(Ptr(0)))),
            render(CallRecord::realloc(null, 1).with_result(Outcome::Pointer(Ptr(0)))),
            render(CallRecord::reallocarray(null, 1, 1).with_result(Outcome::Pointer(Ptr(0)))),
            render(CallRecord::free(null).with_result(Outcome::Void)),
        ];
        for line in lines.iter() {
            assert!(!line.contains("0x0"), "{}", line);
        }
        assert_eq!(lines[3], "reallocarray(0, 1, 1) = 0\n");
    }

    #[test]
    fn missing_result_renders_sentinel() {
        assert_eq!(
            render(CallRecord::calloc(3, 7)),
            "calloc(3, 7 <no return ...>\n"
        );
    }

    #[test]
    fn annotations_stay_on_one_line() {
        let line = annotation("phase 2\nstarts");
        assert_eq!(line.as_bytes(), &b"@villoc(phase 2 starts) = <void>\n"[..]);

        let long = "\u{e9}".repeat(LINE_CAPACITY);
        let line = String::from_utf8(annotation(&long).as_bytes().to_vec()).unwrap();
        assert!(line.len() <= LINE_CAPACITY);
        assert!(line.ends_with(") = <void>\n"), "{}", line);
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn widest_line_fits() {
        let record = CallRecord::reallocarray(at(usize::MAX), usize::MAX, usize::MAX)
            .with_result(Outcome::Pointer(Ptr(usize::MAX)));
        let line = render(record);
        assert!(line.ends_with('\n'));
        assert!(line.len() < LINE_CAPACITY);
    }
}
