//! Lookup of the real allocator functions shadowed by the tracer.
//!
//! Each function is looked up at most once per [`Resolver`] and the address is cached for
//! the rest of the process.  Concurrent first uses are serialized by a [`OnceCell`] per
//! function; later calls only read the cell.

use std::{
    cell::Cell,
    cmp,
    ffi::CStr,
    mem, ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

use libc::{c_void, size_t};
use once_cell::sync::OnceCell;

use crate::{bootstrap, function::TracedFunction, guard, logger, tracer::RealAllocator};

type MallocFunc = unsafe extern "C" fn(size: size_t) -> *mut c_void;
type CallocFunc = unsafe extern "C" fn(nmemb: size_t, size: size_t) -> *mut c_void;
type ReallocFunc = unsafe extern "C" fn(ptr: *mut c_void, size: size_t) -> *mut c_void;
type ReallocarrayFunc =
    unsafe extern "C" fn(ptr: *mut c_void, nmemb: size_t, size: size_t) -> *mut c_void;
type FreeFunc = unsafe extern "C" fn(ptr: *mut c_void);

/// Where the real implementations are found.
pub trait SymbolSource: Sync {
    /// Address of `symbol`, or `None` if it does not exist.
    fn lookup(&self, symbol: &CStr) -> Option<usize>;
}

/// The next definition of a symbol after the tracer in the dynamic linker's search order,
/// i.e. the one that would run had the tracer not been loaded.
pub struct NextSymbol;

impl SymbolSource for NextSymbol {
    fn lookup(&self, symbol: &CStr) -> Option<usize> {
        let addr = unsafe { libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr()) };
        if addr.is_null() {
            None
        } else {
            Some(addr as usize)
        }
    }
}

thread_local! {
    // Set while this thread is inside `SymbolSource::lookup`.
    static RESOLVING: Cell<bool> = const { Cell::new(false) };
}

fn resolving() -> bool {
    RESOLVING.try_with(Cell::get).unwrap_or(false)
}

#[allow(clippy::declare_interior_mutable_const)]
const UNRESOLVED: OnceCell<usize> = OnceCell::new();

pub struct Resolver<S> {
    source: S,
    symbols: [OnceCell<usize>; 5],
    lookups: AtomicUsize,
}

impl<S> Resolver<S> {
    pub const fn new(source: S) -> Self {
        Resolver {
            source,
            symbols: [UNRESOLVED; 5],
            lookups: AtomicUsize::new(0),
        }
    }

    /// Number of symbol lookups performed so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn is_resolved(&self, function: TracedFunction) -> bool {
        self.symbols[function.index()].get().is_some()
    }
}

impl<S: SymbolSource> Resolver<S> {
    /// Address of the real `function`.
    ///
    /// Returns `None` only when called from inside a lookup on the same thread; the caller
    /// must then serve the request without the real allocator.  A symbol that cannot be found
    /// aborts the process: without it every call would loop back into the tracer.
    pub fn resolve(&self, function: TracedFunction) -> Option<usize> {
        let slot = &self.symbols[function.index()];
        if let Some(addr) = slot.get() {
            return Some(*addr);
        }
        if resolving() {
            return None;
        }
        Some(*slot.get_or_init(|| self.lookup(function)))
    }

    /// Resolve `functions` ahead of their first use.
    ///
    /// Allocator calls made by the lookup itself are not traced.
    pub fn prepare(&self, functions: &[TracedFunction]) {
        guard::untraced(|| {
            for function in functions {
                let _ = self.resolve(*function);
            }
        })
    }

    fn lookup(&self, function: TracedFunction) -> usize {
        let _ = RESOLVING.try_with(|flag| flag.set(true));
        let addr = self.source.lookup(function.symbol());
        let _ = RESOLVING.try_with(|flag| flag.set(false));
        self.lookups.fetch_add(1, Ordering::Relaxed);
        match addr {
            Some(addr) => {
                log::trace!("resolved real {} at {:#x}", function, addr);
                addr
            }
            None => missing(function),
        }
    }
}

#[cold]
fn missing(function: TracedFunction) -> ! {
    logger::write_stderr(format_args!(
        "[alloc_trace] fatal: cannot locate the real `{}`, aborting",
        function
    ));
    unsafe { libc::abort() }
}

// Moves an arena block into memory owned by the real allocator.
unsafe fn migrate<S: SymbolSource>(
    resolver: &Resolver<S>,
    old: *mut c_void,
    size: usize,
) -> *mut c_void {
    let new = resolver.malloc(size);
    if !new.is_null() {
        let len = cmp::min(bootstrap::block_size(old), size);
        ptr::copy_nonoverlapping(old as *const u8, new as *mut u8, len);
    }
    new
}

impl<S: SymbolSource> RealAllocator for Resolver<S> {
    unsafe fn malloc(&self, size: usize) -> *mut c_void {
        match self.resolve(TracedFunction::Malloc) {
            Some(addr) => mem::transmute::<usize, MallocFunc>(addr)(size),
            None => bootstrap::malloc(size),
        }
    }

    unsafe fn calloc(&self, nmemb: usize, size: usize) -> *mut c_void {
        match self.resolve(TracedFunction::Calloc) {
            Some(addr) => mem::transmute::<usize, CallocFunc>(addr)(nmemb, size),
            None => bootstrap::calloc(nmemb, size),
        }
    }

    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        if bootstrap::contains(ptr) {
            return migrate(self, ptr, size);
        }
        match self.resolve(TracedFunction::Realloc) {
            Some(addr) => mem::transmute::<usize, ReallocFunc>(addr)(ptr, size),
            None if ptr.is_null() => bootstrap::malloc(size),
            // Cannot grow real memory without the real allocator.
            None => ptr::null_mut(),
        }
    }

    unsafe fn reallocarray(&self, ptr: *mut c_void, nmemb: usize, size: usize) -> *mut c_void {
        if bootstrap::contains(ptr) {
            return match nmemb.checked_mul(size) {
                Some(total) => migrate(self, ptr, total),
                None => ptr::null_mut(),
            };
        }
        match self.resolve(TracedFunction::Reallocarray) {
            Some(addr) => mem::transmute::<usize, ReallocarrayFunc>(addr)(ptr, nmemb, size),
            None if ptr.is_null() => bootstrap::calloc(nmemb, size),
            None => ptr::null_mut(),
        }
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        if bootstrap::contains(ptr) {
            return;
        }
        if let Some(addr) = self.resolve(TracedFunction::Free) {
            mem::transmute::<usize, FreeFunc>(addr)(ptr)
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted allocator used in place of the C library in tests.

    use super::*;
    use std::sync::Mutex;

    pub const MALLOC_RESULT: usize = 0xaaaa;
    pub const CALLOC_RESULT: usize = 0xbbbb;
    pub const REALLOCARRAY_OFFSET: usize = 0x100;

    pub static FREED: Mutex<Vec<usize>> = Mutex::new(Vec::new());

    unsafe extern "C" fn fake_malloc(_size: size_t) -> *mut c_void {
        MALLOC_RESULT as *mut c_void
    }

    unsafe extern "C" fn fake_calloc(_nmemb: size_t, _size: size_t) -> *mut c_void {
        CALLOC_RESULT as *mut c_void
    }

    // Every resize fails.
    unsafe extern "C" fn fake_realloc(_ptr: *mut c_void, _size: size_t) -> *mut c_void {
        ptr::null_mut()
    }

    unsafe extern "C" fn fake_reallocarray(
        ptr: *mut c_void,
        _nmemb: size_t,
        _size: size_t,
    ) -> *mut c_void {
        (ptr as usize + REALLOCARRAY_OFFSET) as *mut c_void
    }

    unsafe extern "C" fn fake_free(ptr: *mut c_void) {
        FREED.lock().unwrap().push(ptr as usize);
    }

    /// Counts lookups per function.
    #[derive(Default)]
    pub struct FakeSymbols {
        pub lookups: [AtomicUsize; 5],
    }

    /// Address of the scripted stand-in for `function`.
    pub fn address(function: TracedFunction) -> usize {
        match function {
            TracedFunction::Malloc => fake_malloc as usize,
            TracedFunction::Calloc => fake_calloc as usize,
            TracedFunction::Realloc => fake_realloc as usize,
            TracedFunction::Reallocarray => fake_reallocarray as usize,
            TracedFunction::Free => fake_free as usize,
        }
    }

    impl SymbolSource for FakeSymbols {
        fn lookup(&self, symbol: &CStr) -> Option<usize> {
            let function: TracedFunction = symbol.to_str().ok()?.parse().ok()?;
            self.lookups[function.index()].fetch_add(1, Ordering::SeqCst);
            Some(address(function))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use std::thread;

    #[test]
    fn resolves_each_function_once() {
        let resolver = Resolver::new(FakeSymbols::default());
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        for function in TracedFunction::ALL.iter() {
                            assert!(resolver.resolve(*function).is_some());
                        }
                    }
                });
            }
        });
        assert_eq!(resolver.lookups(), TracedFunction::ALL.len());
        for count in resolver.source.lookups.iter() {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn prepare_resolves_only_requested() {
        let resolver = Resolver::new(FakeSymbols::default());
        resolver.prepare(&[TracedFunction::Malloc, TracedFunction::Free]);
        assert!(resolver.is_resolved(TracedFunction::Malloc));
        assert!(resolver.is_resolved(TracedFunction::Free));
        assert!(!resolver.is_resolved(TracedFunction::Reallocarray));
        assert_eq!(resolver.lookups(), 2);
    }

    #[test]
    fn calls_during_lookup_use_the_arena() {
        let resolver = Resolver::new(FakeSymbols::default());
        RESOLVING.with(|flag| flag.set(true));
        let p = unsafe { resolver.malloc(40) };
        RESOLVING.with(|flag| flag.set(false));
        assert!(bootstrap::contains(p));
        assert_eq!(resolver.lookups(), 0);

        // Freeing an arena block never reaches the real free.
        unsafe { resolver.free(p) };
        assert!(!FREED.lock().unwrap().contains(&(p as usize)));
    }

    #[test]
    fn arena_blocks_migrate_on_resize() {
        let resolver = Resolver::new(NextSymbol);
        RESOLVING.with(|flag| flag.set(true));
        let p = unsafe { resolver.calloc(4, 8) };
        RESOLVING.with(|flag| flag.set(false));
        assert!(bootstrap::contains(p));

        unsafe {
            ptr::write_bytes(p as *mut u8, 0x5a, 32);
            let moved = resolver.realloc(p, 64);
            assert!(!moved.is_null());
            assert!(!bootstrap::contains(moved));
            let bytes = std::slice::from_raw_parts(moved as *const u8, 32);
            assert!(bytes.iter().all(|byte| *byte == 0x5a));
            resolver.free(moved);
        }
    }

    #[test]
    fn delegates_to_real_functions() {
        let resolver = Resolver::new(FakeSymbols::default());
        unsafe {
            assert_eq!(resolver.malloc(1) as usize, MALLOC_RESULT);
            assert_eq!(resolver.calloc(1, 1) as usize, CALLOC_RESULT);
            assert!(resolver.realloc(0x1230 as *mut c_void, 1).is_null());
            assert_eq!(
                resolver.reallocarray(0x2000 as *mut c_void, 2, 2) as usize,
                0x2000 + REALLOCARRAY_OFFSET
            );
            resolver.free(0x4560 as *mut c_void);
        }
        assert!(FREED.lock().unwrap().contains(&0x4560));
    }
}
