//! `log` backend for the preloaded tracer.
//!
//! Messages are rendered into a stack buffer and written to file descriptor 2 with a single
//! `write(2)`, so logging never allocates and never touches the trace output.

use std::{
    fmt::{self, Write},
    sync::atomic::{AtomicUsize, Ordering},
};

use log::{LevelFilter, Log, Metadata, Record};

use crate::{buf::FixedBuf, config};

const MESSAGE_CAPACITY: usize = 512;
const TRUNCATED: &str = "...\n";

pub struct StderrLogger {
    level: AtomicUsize,
}

static LOGGER: StderrLogger = StderrLogger {
    level: AtomicUsize::new(LevelFilter::Warn as usize),
};

impl StderrLogger {
    fn level(&self) -> LevelFilter {
        match self.level.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        write_stderr(format_args!(
            "[alloc_trace {}] {}",
            record.level(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

/// Install [`StderrLogger`] as the `log` backend, at the level named by `ALLOC_TRACE_LOG`.
///
/// Does nothing if the process already has a logger.
pub fn init() {
    let level = config::log_level();
    LOGGER.level.store(level as usize, Ordering::Relaxed);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Write one diagnostic line to stderr, bypassing any logger.
pub fn write_stderr(args: fmt::Arguments<'_>) {
    let mut msg = FixedBuf::<MESSAGE_CAPACITY>::new();
    if msg.write_fmt(args).is_err() || msg.write_char('\n').is_err() {
        msg.truncate(MESSAGE_CAPACITY - TRUNCATED.len());
        let _ = msg.write_str(TRUNCATED);
    }
    let bytes = msg.as_bytes();
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            bytes.as_ptr() as *const libc::c_void,
            bytes.len(),
        )
    };
}
