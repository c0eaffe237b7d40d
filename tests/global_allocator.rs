//! Rust programs tracing their own allocations through `TraceAllocator`.

use alloc_trace::{
    parse_entry, parse_line, EventResult, MemorySink, TraceAllocator, TraceEntry, TracedFunction,
};
use std::{hint::black_box, thread};

static SINK: MemorySink = MemorySink::new(1 << 20);

#[global_allocator]
static GLOBAL: TraceAllocator = TraceAllocator::new(&SINK);

// Returns the address in the first line starting with `prefix`.
fn find_result(lines: &[String], prefix: &str) -> Option<(usize, u64)> {
    lines.iter().enumerate().find_map(|(idx, line)| {
        if !line.starts_with(prefix) {
            return None;
        }
        match parse_line(line).ok()?.result? {
            EventResult::Pointer(addr) => Some((idx, addr)),
            EventResult::Void => None,
        }
    })
}

#[test]
fn allocation_and_release_are_traced_in_order() {
    let v: Vec<u8> = Vec::with_capacity(123_457);
    let addr = black_box(v.as_ptr()) as u64;
    drop(v);

    let lines = SINK.lines();
    let (alloc_idx, traced) =
        find_result(&lines, "malloc(123457) = ").expect("allocation was not traced");
    assert_eq!(traced, addr);

    let free_line = format!("free({:#x}) = <void>", addr);
    assert!(lines[alloc_idx..].iter().any(|line| *line == free_line));
}

#[test]
fn zeroed_allocations_are_traced_as_calloc() {
    let v = black_box(vec![0u8; 33_333]);
    let addr = v.as_ptr() as u64;

    let lines = SINK.lines();
    let (_, traced) =
        find_result(&lines, "calloc(1, 33333) = ").expect("allocation was not traced");
    assert_eq!(traced, addr);
}

#[test]
fn growth_is_traced_as_realloc() {
    let mut v: Vec<u8> = Vec::with_capacity(70_001);
    let old = black_box(v.as_ptr()) as u64;
    v.reserve_exact(140_003);
    let new = black_box(v.as_ptr()) as u64;

    let lines = SINK.lines();
    let (_, traced) = find_result(&lines, &format!("realloc({:#x}, 140003) = ", old))
        .expect("reallocation was not traced");
    assert_eq!(traced, new);
}

#[test]
fn annotations_mark_the_trace() {
    GLOBAL.annotate("before\nthe big one");
    let v: Vec<u8> = black_box(Vec::with_capacity(98_765));
    drop(v);

    let lines = SINK.lines();
    let mark = lines
        .iter()
        .position(|line| line == "@villoc(before the big one) = <void>")
        .expect("annotation was not traced");
    let (alloc_idx, _) =
        find_result(&lines, "malloc(98765) = ").expect("allocation was not traced");
    assert!(mark < alloc_idx);
}

#[test]
fn lines_from_many_threads_are_well_formed() {
    let handles: Vec<_> = (0..4usize)
        .map(|t| {
            thread::spawn(move || {
                for i in 0..100usize {
                    black_box(vec![t as u8; 50_000 + t * 1000 + i]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let lines = SINK.lines();
    for line in lines.iter() {
        match parse_entry(line).unwrap_or_else(|e| panic!("{:?}: {}", line, e)) {
            TraceEntry::Call(event) => assert_eq!(event.args.len(), event.function.arity()),
            TraceEntry::Annotation(_) => (),
        }
    }
    for t in 0..4usize {
        let size = 50_000 + t * 1000 + 99;
        // `vec![0; n]` asks for zeroed memory, any other fill value does not.
        let prefix = if t == 0 {
            format!("calloc(1, {}) = ", size)
        } else {
            format!("malloc({}) = ", size)
        };
        assert!(
            lines.iter().any(|line| line.starts_with(&prefix)),
            "missing the last allocation of thread {}",
            t
        );
    }
    assert!(lines.iter().any(|line| {
        matches!(parse_line(line), Ok(event) if event.function == TracedFunction::Free)
    }));
}
