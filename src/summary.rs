//! Aggregate statistics over one or more trace files.

use std::{
    collections::BTreeMap,
    fmt,
    fmt::{Display, Formatter},
    io::{self, BufRead},
};

use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

use crate::{
    function::TracedFunction,
    parse::{parse_entry, EventResult, ParseError, TraceEntry, TraceEvent},
};

/// Per-function totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStats {
    pub calls: u64,
    /// Calls that returned a null pointer.
    pub failed: u64,
}

impl CallStats {
    fn merge(&mut self, other: &CallStats) {
        self.calls += other.calls;
        self.failed += other.failed;
    }

    fn format_totals<W: fmt::Write>(&self, f: &mut W) -> Result<(), fmt::Error> {
        write!(f, "{} calls", self.calls.to_formatted_string(&Locale::en))?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed.to_formatted_string(&Locale::en))?;
        }
        Ok(())
    }
}

/// Summary of a trace, produced by `trace_check`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    functions: BTreeMap<TracedFunction, CallStats>,
    lines: u64,
    #[serde(default)]
    annotations: u64,
    unterminated: u64,
    malformed: u64,
}

impl TraceSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a whole trace.  `on_error` is called with the 1-based line number of every line
    /// that does not parse; such lines are counted as malformed and otherwise skipped.
    pub fn scan<R, F>(reader: R, mut on_error: F) -> io::Result<Self>
    where
        R: BufRead,
        F: FnMut(usize, &str, &ParseError),
    {
        let mut summary = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            match parse_entry(&line) {
                Ok(TraceEntry::Call(event)) => summary.record(&event),
                Ok(TraceEntry::Annotation(_)) => summary.record_annotation(),
                Err(e) => {
                    on_error(idx + 1, &line, &e);
                    summary.record_malformed();
                }
            }
        }
        Ok(summary)
    }

    pub fn record(&mut self, event: &TraceEvent) {
        self.lines += 1;
        let stats = self.functions.entry(event.function).or_default();
        stats.calls += 1;
        match event.result {
            None => self.unterminated += 1,
            Some(EventResult::Pointer(0)) => stats.failed += 1,
            Some(_) => (),
        }
    }

    pub fn record_annotation(&mut self) {
        self.lines += 1;
        self.annotations += 1;
    }

    pub fn record_malformed(&mut self) {
        self.lines += 1;
        self.malformed += 1;
    }

    /// Merge two summaries.
    pub fn merge(&mut self, other: &TraceSummary) {
        for (function, stats) in other.functions.iter() {
            self.functions.entry(*function).or_default().merge(stats);
        }
        self.lines += other.lines;
        self.annotations += other.annotations;
        self.unterminated += other.unterminated;
        self.malformed += other.malformed;
    }

    pub fn stats(&self, function: TracedFunction) -> CallStats {
        self.functions.get(&function).copied().unwrap_or_default()
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn annotations(&self) -> u64 {
        self.annotations
    }

    pub fn unterminated(&self) -> u64 {
        self.unterminated
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// True if every line parsed.
    pub fn is_well_formed(&self) -> bool {
        self.malformed == 0
    }
}

impl Display for TraceSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        for (function, stats) in self.functions.iter() {
            write!(f, "{:>12}: ", function.name())?;
            stats.format_totals(f)?;
            f.write_str("\n")?;
        }
        write!(
            f,
            "{} lines, {} annotations, {} without return, {} malformed",
            self.lines.to_formatted_string(&Locale::en),
            self.annotations.to_formatted_string(&Locale::en),
            self.unterminated.to_formatted_string(&Locale::en),
            self.malformed.to_formatted_string(&Locale::en)
        )
    }
}
