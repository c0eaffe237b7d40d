use std::{ffi::CStr, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Allocator entry points recorded by the tracer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracedFunction {
    Malloc,
    Calloc,
    Realloc,
    Reallocarray,
    Free,
}

impl TracedFunction {
    pub const ALL: [TracedFunction; 5] = [
        TracedFunction::Malloc,
        TracedFunction::Calloc,
        TracedFunction::Realloc,
        TracedFunction::Reallocarray,
        TracedFunction::Free,
    ];

    /// Name used both in trace lines and for symbol lookup.
    pub fn name(self) -> &'static str {
        match self {
            TracedFunction::Malloc => "malloc",
            TracedFunction::Calloc => "calloc",
            TracedFunction::Realloc => "realloc",
            TracedFunction::Reallocarray => "reallocarray",
            TracedFunction::Free => "free",
        }
    }

    /// NUL-terminated symbol name of the real implementation.
    pub fn symbol(self) -> &'static CStr {
        let bytes: &'static [u8] = match self {
            TracedFunction::Malloc => b"malloc\0",
            TracedFunction::Calloc => b"calloc\0",
            TracedFunction::Realloc => b"realloc\0",
            TracedFunction::Reallocarray => b"reallocarray\0",
            TracedFunction::Free => b"free\0",
        };
        // All literals above carry exactly one trailing NUL.
        unsafe { CStr::from_bytes_with_nul_unchecked(bytes) }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Number of arguments in the trace grammar.
    pub fn arity(self) -> usize {
        match self {
            TracedFunction::Malloc | TracedFunction::Free => 1,
            TracedFunction::Calloc | TracedFunction::Realloc => 2,
            TracedFunction::Reallocarray => 3,
        }
    }

    /// Whether argument `pos` is a pointer (as opposed to a size or count).
    pub fn is_pointer_arg(self, pos: usize) -> bool {
        pos == 0
            && matches!(
                self,
                TracedFunction::Realloc | TracedFunction::Reallocarray | TracedFunction::Free
            )
    }

    /// `free` is the only traced function without a return value.
    pub fn returns_pointer(self) -> bool {
        self != TracedFunction::Free
    }
}

impl fmt::Display for TracedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFunction(pub String);

impl fmt::Display for UnknownFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown allocator function `{}`", self.0)
    }
}

impl std::error::Error for UnknownFunction {}

impl FromStr for TracedFunction {
    type Err = UnknownFunction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TracedFunction::ALL
            .iter()
            .copied()
            .find(|function| function.name() == s)
            .ok_or_else(|| UnknownFunction(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::TracedFunction;

    #[test]
    fn symbols_match_names() {
        for function in TracedFunction::ALL.iter() {
            assert_eq!(function.symbol().to_str().unwrap(), function.name());
            assert_eq!(function.name().parse::<TracedFunction>(), Ok(*function));
        }
    }

    #[test]
    fn indices_are_dense() {
        for (idx, function) in TracedFunction::ALL.iter().enumerate() {
            assert_eq!(function.index(), idx);
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!("valloc".parse::<TracedFunction>().is_err());
        assert!("Malloc".parse::<TracedFunction>().is_err());
    }
}
