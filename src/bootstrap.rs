//! Static bump arena serving allocations made while a real allocator symbol is being looked
//! up.  `dlsym` may call `malloc`/`calloc` itself, and at that point there is no real
//! implementation to delegate to yet.
//!
//! Blocks are never reused, so the memory they hand out is always zero-filled.  Each block is
//! preceded by a header holding its requested size, which `realloc` needs to migrate it.

use std::{
    cell::UnsafeCell,
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

use libc::c_void;

const ARENA_SIZE: usize = 64 * 1024;
const ALIGN: usize = 16;
const HEADER: usize = ALIGN;

#[repr(C, align(16))]
struct Arena(UnsafeCell<[u8; ARENA_SIZE]>);

// Disjoint ranges are handed out by the atomic bump pointer.
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena(UnsafeCell::new([0; ARENA_SIZE]));
static USED: AtomicUsize = AtomicUsize::new(0);

fn base() -> *mut u8 {
    ARENA.0.get() as *mut u8
}

/// Whether `ptr` was handed out by this arena.
pub fn contains(ptr: *const c_void) -> bool {
    let start = base() as usize;
    let addr = ptr as usize;
    addr >= start && addr < start + ARENA_SIZE
}

pub fn malloc(size: usize) -> *mut c_void {
    let total = match size.checked_add(HEADER + ALIGN - 1) {
        Some(total) => total & !(ALIGN - 1),
        None => return ptr::null_mut(),
    };
    let mut offset = USED.load(Ordering::Relaxed);
    loop {
        if total > ARENA_SIZE - offset {
            return ptr::null_mut();
        }
        match USED.compare_exchange_weak(
            offset,
            offset + total,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(current) => offset = current,
        }
    }
    unsafe {
        let block = base().add(offset);
        (block as *mut usize).write(size);
        block.add(HEADER) as *mut c_void
    }
}

pub fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    match nmemb.checked_mul(size) {
        Some(total) => malloc(total),
        None => ptr::null_mut(),
    }
}

/// Requested size of an arena block.
///
/// # Safety
///
/// `ptr` must have been returned by [`malloc`] or [`calloc`].
pub unsafe fn block_size(ptr: *const c_void) -> usize {
    ((ptr as *const u8).sub(HEADER) as *const usize).read()
}
