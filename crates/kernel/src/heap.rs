//! Heap allocator.
//!
//! Backs both the global Rust allocator and the `mm_alloc`/`mm_free` syscall
//! pair with a single `linked_list_allocator` heap carved out of a static
//! array. The underlying page-granularity allocation strategy is explicitly
//! out of scope for this core (see the external memory-allocator contract);
//! this module is deliberately the simplest thing that honours it.

use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use linked_list_allocator::LockedHeap;
use spin::Mutex;

const HEAP_SIZE: usize = 64 * 1024;

#[repr(align(8))]
struct HeapArea([u8; HEAP_SIZE]);
static mut HEAP_MEMORY: HeapArea = HeapArea([0; HEAP_SIZE]);

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

static HEAP_READY: AtomicBool = AtomicBool::new(false);

/// Upper bound on allocations outstanding at once through [`alloc_region`]
/// that still need a size recorded for them. Sized generously relative to
/// the 64 KiB arena; a table miss only affects the `mm_free` syscall path
/// (see [`track_alloc`]), not `alloc_region`/`free_region` themselves.
const ALLOC_TABLE_CAPACITY: usize = 128;

/// `ptr -> size` side table for allocations that may later be freed through
/// the `mm_free` syscall, which receives only a pointer. Kernel-internal
/// callers that already know their own size (thread-stack teardown, USB
/// descriptor-arena teardown) go straight to `free_region` and never touch
/// this table.
static ALLOC_TABLE: Mutex<heapless::Vec<(usize, usize), ALLOC_TABLE_CAPACITY>> =
    Mutex::new(heapless::Vec::new());

/// Record `ptr -> size` so a later `mm_free(ptr)` can recover the `Layout`
/// needed to deallocate it. Silently drops the record if the table is full;
/// the allocation itself still succeeds; that pointer just becomes
/// unreclaimable through the syscall path until the kernel is rebooted.
fn track_alloc(ptr: *mut u8, size: usize) {
    let mut table = ALLOC_TABLE.lock();
    if table.push((ptr as usize, size)).is_err() {
        crate::warn!("heap: allocation-tracking table full, {:p} will leak if freed via syscall", ptr);
    }
}

/// Look up and remove a previously tracked allocation's size. Returns
/// `None` for a pointer this table never recorded (untracked
/// kernel-internal allocation, already freed, or evicted by a full table).
fn untrack_alloc(ptr: *mut u8) -> Option<usize> {
    let mut table = ALLOC_TABLE.lock();
    let key = ptr as usize;
    let pos = table.iter().position(|(p, _)| *p == key)?;
    let (_, size) = table.swap_remove(pos);
    Some(size)
}

/// Free a pointer previously returned by [`alloc_region`], recovering its
/// size from the tracking table `alloc_region` populated. This is the path
/// the `mm_free` syscall uses, since the syscall ABI only passes a pointer.
/// Returns `false` (and frees nothing) if `ptr` is not in the table.
pub fn free_tracked(ptr: *mut u8) -> bool {
    if ptr.is_null() {
        return false;
    }
    match untrack_alloc(ptr) {
        Some(size) => {
            unsafe { free_region(ptr, size) };
            true
        }
        None => false,
    }
}

/// Region tag an allocation is made for; exposed through `mm_alloc` so
/// callers (and the statistics below) can distinguish general kernel
/// allocations from the USB enumeration engine's descriptor buffers without
/// requiring two separate pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Region {
    General = 0,
    UsbDescriptor = 1,
}

impl Region {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Region::General),
            1 => Some(Region::UsbDescriptor),
            _ => None,
        }
    }
}

#[derive(Default)]
struct HeapStats {
    allocations: usize,
    deallocations: usize,
    bytes_in_use: usize,
    peak_bytes_in_use: usize,
}

static STATS: Mutex<HeapStats> = Mutex::new(HeapStats {
    allocations: 0,
    deallocations: 0,
    bytes_in_use: 0,
    peak_bytes_in_use: 0,
});
static ALLOC_FAILURES: AtomicUsize = AtomicUsize::new(0);

/// Initialize the kernel heap. Must run exactly once, before any
/// allocation, after the stack is live.
///
/// # Safety
/// Caller must guarantee single-threaded execution up to this point and
/// that this function has not already run.
pub unsafe fn init_heap() {
    if HEAP_READY.swap(true, Ordering::SeqCst) {
        return;
    }
    let base = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
    ALLOCATOR.lock().init(base, HEAP_SIZE);
    crate::info!("heap: {} bytes at {:p}", HEAP_SIZE, base);
}

/// Allocate `size` bytes tagged for `region`. Returns `None` on exhaustion;
/// never panics, matching the "OutOfMemory is recoverable at the call site"
/// contract thread creation and `mm_alloc` both rely on.
pub fn alloc_region(size: usize, _region: Region) -> Option<*mut u8> {
    if size == 0 {
        return None;
    }
    let layout = Layout::from_size_align(size, core::mem::align_of::<usize>()).ok()?;
    let ptr = unsafe { ALLOCATOR.alloc(layout) };
    if ptr.is_null() {
        ALLOC_FAILURES.fetch_add(1, Ordering::Relaxed);
        return None;
    }
    let mut stats = STATS.lock();
    stats.allocations += 1;
    stats.bytes_in_use += size;
    if stats.bytes_in_use > stats.peak_bytes_in_use {
        stats.peak_bytes_in_use = stats.bytes_in_use;
    }
    drop(stats);
    track_alloc(ptr, size);
    Some(ptr)
}

/// Free a pointer previously returned by [`alloc_region`] for the same size.
///
/// # Safety
/// `ptr` must have come from `alloc_region(size, _)` and not have been freed
/// already.
pub unsafe fn free_region(ptr: *mut u8, size: usize) {
    if ptr.is_null() || size == 0 {
        return;
    }
    // `alloc_region` tracks every allocation unconditionally; clear this
    // one out regardless of which path frees it, so a stale entry can never
    // outlive its pointer and collide with the tracking table's next use
    // of the same address.
    let _ = untrack_alloc(ptr);
    let layout = match Layout::from_size_align(size, core::mem::align_of::<usize>()) {
        Ok(l) => l,
        Err(_) => return,
    };
    ALLOCATOR.dealloc(ptr, layout);
    let mut stats = STATS.lock();
    stats.deallocations += 1;
    stats.bytes_in_use = stats.bytes_in_use.saturating_sub(size);
}

pub fn allocation_failures() -> usize {
    ALLOC_FAILURES.load(Ordering::Relaxed)
}

pub fn bytes_in_use() -> usize {
    STATS.lock().bytes_in_use
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_round_trip() {
        assert_eq!(Region::from_u32(0), Some(Region::General));
        assert_eq!(Region::from_u32(1), Some(Region::UsbDescriptor));
        assert_eq!(Region::from_u32(2), None);
    }

    #[test]
    fn tracked_allocation_round_trips_through_the_size_table() {
        let ptr = 0x2000_1000 as *mut u8;
        track_alloc(ptr, 42);
        assert_eq!(untrack_alloc(ptr), Some(42));
        assert_eq!(untrack_alloc(ptr), None);
    }

    #[test]
    fn untracked_pointer_is_not_found() {
        let ptr = 0x2000_2000 as *mut u8;
        assert_eq!(untrack_alloc(ptr), None);
    }
}
