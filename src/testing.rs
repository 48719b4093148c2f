// Shared fixtures for the unit tests: drop tracking and instrumented allocators

use allocator_api2::alloc::{ AllocError, Allocator, Global };
use std::{
    alloc::Layout,
    ptr::NonNull,
    sync::{
        atomic::{ AtomicUsize, Ordering },
        Arc,
        Mutex
    }
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Records the id of every Tracked value as it is dropped
#[derive(Clone, Default)]
pub struct DropTracker {
    log: Arc<Mutex<Vec<usize>>>
}

impl DropTracker {
    pub fn new() -> Self { Self::default() }

    pub fn item(&self, id: usize) -> Tracked {
        Tracked { id, log: self.log.clone() }
    }

    pub fn dropped(&self) -> Vec<usize> {
        self.log.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize { self.dropped().len() }
}

#[derive(Debug)]
pub struct Tracked {
    pub id: usize,
    log: Arc<Mutex<Vec<usize>>>
}

impl Drop for Tracked {
    fn drop(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.push(self.id);
        }
    }
}

#[derive(Default)]
pub struct AllocStats {
    allocs: AtomicUsize,
    deallocs: AtomicUsize
}

// Forwards to Global and counts block allocations
#[derive(Clone, Default)]
pub struct CountingAlloc {
    stats: Arc<AllocStats>
}

impl CountingAlloc {
    pub fn new() -> Self { Self::default() }
    pub fn allocs(&self) -> usize { self.stats.allocs.load(Ordering::SeqCst) }
    pub fn deallocs(&self) -> usize { self.stats.deallocs.load(Ordering::SeqCst) }
    pub fn live(&self) -> usize { self.allocs() - self.deallocs() }
}

unsafe impl Allocator for CountingAlloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let out = Global.allocate(layout)?;
        self.stats.allocs.fetch_add(1, Ordering::SeqCst);
        Ok(out)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.stats.deallocs.fetch_add(1, Ordering::SeqCst);
        Global.deallocate(ptr, layout)
    }
}

// Never hands out memory
#[derive(Clone, Copy, Default)]
pub struct FailingAlloc;

unsafe impl Allocator for FailingAlloc {
    fn allocate(&self, _layout: Layout) -> Result<NonNull<[u8]>, AllocError> { Err(AllocError) }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        unreachable!("FailingAlloc never allocates")
    }
}

// Deterministic linear congruential generator, so randomized sequences replay the same way
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self { Self(seed) }

    // n must be non-zero
    pub fn below(&mut self, n: usize) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as usize % n
    }
}
