//! Parser for trace lines, the inverse of [`crate::record::format`].

use std::{error, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    function::TracedFunction,
    record::{ANNOTATION_TAG, NO_RETURN, VOID},
};

const RESULT_SEPARATOR: &str = ") = ";
const ARG_SEPARATOR: &str = ", ";

/// One parsed trace line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub function: TracedFunction,
    pub args: Vec<u64>,
    /// `None` for a call that never returned.
    pub result: Option<EventResult>,
}

/// Any line of a trace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceEntry {
    Call(TraceEvent),
    /// Text the traced program asked to have written, `@villoc(<text>) = <void>`.
    Annotation(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventResult {
    Pointer(u64),
    Void,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    MissingParen,
    UnknownFunction(String),
    MissingResult,
    Arity {
        function: TracedFunction,
        expected: usize,
        found: usize,
    },
    BadSize(String),
    BadPointer(String),
    /// A null pointer written as `0x0` instead of `0`.
    HexNull,
    BadResult(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingParen => f.write_str("missing `(` after function name"),
            ParseError::UnknownFunction(name) => write!(f, "unknown function `{}`", name),
            ParseError::MissingResult => f.write_str("missing `) = <result>`"),
            ParseError::Arity {
                function,
                expected,
                found,
            } => write!(
                f,
                "{} takes {} argument(s), found {}",
                function, expected, found
            ),
            ParseError::BadSize(s) => write!(f, "`{}` is not an unsigned decimal", s),
            ParseError::BadPointer(s) => write!(f, "`{}` is not a pointer", s),
            ParseError::HexNull => f.write_str("null pointer must be written as `0`"),
            ParseError::BadResult(s) => write!(f, "unexpected result `{}`", s),
        }
    }
}

impl error::Error for ParseError {}

fn parse_size(s: &str) -> Result<u64, ParseError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::BadSize(s.to_string()));
    }
    s.parse().map_err(|_| ParseError::BadSize(s.to_string()))
}

fn parse_ptr(s: &str) -> Result<u64, ParseError> {
    if s == "0" {
        return Ok(0);
    }
    let digits = match s.strip_prefix("0x") {
        Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit()) => {
            digits
        }
        _ => return Err(ParseError::BadPointer(s.to_string())),
    };
    match u64::from_str_radix(digits, 16) {
        Ok(0) => Err(ParseError::HexNull),
        Ok(addr) => Ok(addr),
        Err(_) => Err(ParseError::BadPointer(s.to_string())),
    }
}

/// Parse one line that may be either a call or an annotation.
pub fn parse_entry(line: &str) -> Result<TraceEntry, ParseError> {
    let trimmed = line.strip_suffix('\n').unwrap_or(line);
    let body = match trimmed
        .strip_prefix(ANNOTATION_TAG)
        .and_then(|rest| rest.strip_prefix('('))
    {
        Some(body) => body,
        None => return parse_line(line).map(TraceEntry::Call),
    };
    body.strip_suffix(VOID)
        .and_then(|body| body.strip_suffix(RESULT_SEPARATOR))
        .map(|text| TraceEntry::Annotation(text.to_string()))
        .ok_or(ParseError::MissingResult)
}

/// Parse one call line.  A trailing newline is accepted.
pub fn parse_line(line: &str) -> Result<TraceEvent, ParseError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let open = line.find('(').ok_or(ParseError::MissingParen)?;
    let function: TracedFunction = line[..open]
        .parse()
        .map_err(|_| ParseError::UnknownFunction(line[..open].to_string()))?;
    let rest = &line[open + 1..];

    let (args, result) = match rest.strip_suffix(NO_RETURN) {
        Some(args) => (args, None),
        None => {
            let sep = rest
                .find(RESULT_SEPARATOR)
                .ok_or(ParseError::MissingResult)?;
            (&rest[..sep], Some(&rest[sep + RESULT_SEPARATOR.len()..]))
        }
    };

    let args: Vec<&str> = if args.is_empty() {
        Vec::new()
    } else {
        args.split(ARG_SEPARATOR).collect()
    };
    if args.len() != function.arity() {
        return Err(ParseError::Arity {
            function,
            expected: function.arity(),
            found: args.len(),
        });
    }
    let args = args
        .iter()
        .enumerate()
        .map(|(pos, arg)| {
            if function.is_pointer_arg(pos) {
                parse_ptr(arg)
            } else {
                parse_size(arg)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let result = match result {
        None => None,
        Some(VOID) if !function.returns_pointer() => Some(EventResult::Void),
        Some(s) if function.returns_pointer() => Some(EventResult::Pointer(
            parse_ptr(s).map_err(|e| match e {
                ParseError::BadPointer(s) => ParseError::BadResult(s),
                e => e,
            })?,
        )),
        Some(s) => return Err(ParseError::BadResult(s.to_string())),
    };

    Ok(TraceEvent {
        function,
        args,
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{format, CallRecord, Outcome, Ptr};

    #[test]
    fn parses_every_function() {
        assert_eq!(
            parse_line("malloc(64) = 0xaaaa\n").unwrap(),
            TraceEvent {
                function: TracedFunction::Malloc,
                args: vec![64],
                result: Some(EventResult::Pointer(0xaaaa)),
            }
        );
        assert_eq!(
            parse_line("calloc(8, 32) = 0").unwrap().args,
            vec![8, 32]
        );
        assert_eq!(
            parse_line("realloc(0xbbbb, 128) = 0").unwrap().result,
            Some(EventResult::Pointer(0))
        );
        assert_eq!(
            parse_line("reallocarray(0, 4, 16) = 0x100").unwrap().args,
            vec![0, 4, 16]
        );
        assert_eq!(
            parse_line("free(0) = <void>").unwrap().result,
            Some(EventResult::Void)
        );
    }

    #[test]
    fn parses_unterminated_calls() {
        let event = parse_line("realloc(0x10, 99 <no return ...>").unwrap();
        assert_eq!(event.function, TracedFunction::Realloc);
        assert_eq!(event.args, vec![0x10, 99]);
        assert_eq!(event.result, None);
    }

    #[test]
    fn accepts_what_the_formatter_writes() {
        let record = CallRecord::reallocarray(0x7f00_dead_beef as *const u8, 3, 1 << 40)
            .with_result(Outcome::Pointer(Ptr(0x7f00_0000_1000)));
        let line = format(&record);
        let event = parse_line(std::str::from_utf8(line.as_bytes()).unwrap()).unwrap();
        assert_eq!(event.args, vec![0x7f00_dead_beef, 3, 1 << 40]);
        assert_eq!(event.result, Some(EventResult::Pointer(0x7f00_0000_1000)));
    }

    #[test]
    fn parses_annotations() {
        assert_eq!(
            parse_entry("@villoc(phase 2) = <void>\n"),
            Ok(TraceEntry::Annotation("phase 2".to_string()))
        );
        // The text is free-form and may look like a call.
        assert_eq!(
            parse_entry("@villoc(x) = 1) = <void>"),
            Ok(TraceEntry::Annotation("x) = 1".to_string()))
        );
        assert_eq!(
            parse_entry("free(0) = <void>").unwrap(),
            TraceEntry::Call(parse_line("free(0) = <void>").unwrap())
        );
        assert_eq!(parse_entry("@villoc(open"), Err(ParseError::MissingResult));
        assert!(matches!(
            parse_line("@villoc(x) = <void>"),
            Err(ParseError::UnknownFunction(_))
        ));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_line("malloc(64) = 0x0"), Err(ParseError::HexNull));
        assert_eq!(parse_line("free(0x0) = <void>"), Err(ParseError::HexNull));
        assert_eq!(
            parse_line("valloc(64) = 0x10"),
            Err(ParseError::UnknownFunction("valloc".to_string()))
        );
        assert_eq!(parse_line("malloc 64"), Err(ParseError::MissingParen));
        assert_eq!(parse_line("malloc(64)"), Err(ParseError::MissingResult));
        assert!(matches!(
            parse_line("calloc(8) = 0x10"),
            Err(ParseError::Arity { expected: 2, found: 1, .. })
        ));
        assert!(matches!(parse_line("malloc(-1) = 0"), Err(ParseError::BadSize(_))));
        assert!(matches!(parse_line("free(64) = <void>"), Err(ParseError::BadPointer(_))));
        assert!(matches!(parse_line("free(0) = 0"), Err(ParseError::BadResult(_))));
        assert!(matches!(parse_line("malloc(1) = <void>"), Err(ParseError::BadResult(_))));
        assert!(matches!(parse_line("malloc(1) = 0x10 junk"), Err(ParseError::BadResult(_))));
    }
}
