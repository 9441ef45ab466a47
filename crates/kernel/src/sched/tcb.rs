//! Thread control block and thread creation.
//!
//! Mirrors the process table this codebase already keeps for its process
//! model, but sized for a small fixed population of cooperating threads
//! rather than a dynamic process tree: threads are created once at boot
//! and never reaped, so the TCB carries no reference count, just the two
//! list memberships that determine whether it is still reachable.

use super::queue::SchedClass;
use crate::heap::Region;
use crate::lib::error::{KernelError, Result};
use crate::lib::list::Link;
use core::cell::Cell;
use core::sync::atomic::{AtomicU64, Ordering};

pub const MAX_NAME_LEN: usize = 16;

/// A thread's saved stack pointer, stack bounds, identity and scheduling
/// placement. `sp` is the first field so the context-switch trampoline can
/// load/store it with a single offset-zero access.
pub struct Tcb {
    pub(super) sp: Cell<*mut usize>,
    stack_base: *mut u8,
    stack_size: usize,
    name: [u8; MAX_NAME_LEN],
    name_len: u8,
    pub(super) queue_link: Link<Tcb>,
    pub(super) all_link: Link<Tcb>,
    pub(super) class: &'static SchedClass,
    /// Valid only while the thread is linked into the sleep queue.
    pub(super) wake_tick: Cell<u64>,
    ticks_committed: AtomicU64,
    ticks_in_progress: AtomicU64,
}

unsafe impl Sync for Tcb {}
unsafe impl Send for Tcb {}

impl Tcb {
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }

    pub fn class(&self) -> &'static SchedClass {
        self.class
    }

    /// Stack region, for the not-yet-exercised thread-teardown path the
    /// all-threads-list removal would drive.
    pub fn stack_region(&self) -> (*mut u8, usize) {
        (self.stack_base, self.stack_size)
    }

    pub(super) fn record_tick(&self) {
        self.ticks_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stack_pointer(&self) -> *mut usize {
        self.sp.get()
    }

    /// # Safety
    /// Caller (the context-switch trampoline only) must supply a value
    /// that points inside this thread's own stack.
    pub unsafe fn set_stack_pointer(&self, sp: *mut usize) {
        self.sp.set(sp);
    }

    /// Build a bare TCB with no backing stack, for scheduler-policy unit
    /// tests that only care about queue membership and wake ticks.
    #[cfg(test)]
    pub(crate) fn test_stub(class: &'static SchedClass) -> Tcb {
        Tcb {
            sp: Cell::new(core::ptr::null_mut()),
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            name: [0u8; MAX_NAME_LEN],
            name_len: 0,
            queue_link: Link::new(),
            all_link: Link::new(),
            class,
            wake_tick: Cell::new(0),
            ticks_committed: AtomicU64::new(0),
            ticks_in_progress: AtomicU64::new(0),
        }
    }
}

/// Everything needed to create a thread, analogous to the `exec` argument
/// record the process model used for a new process image.
pub struct ThreadInfo {
    pub name: &'static str,
    pub stack_words: usize,
    pub entry: fn(usize),
    pub arg: usize,
    pub class: &'static SchedClass,
}

/// Allocate a TCB and its stack, prime the stack so it looks like a thread
/// that has just been preempted, and link it onto the all-threads list and
/// its class run queue. The returned reference is `'static`: a TCB is never
/// freed individually, only ever removed from the all-threads list (the
/// sole deletion event the data model specifies), which this core does not
/// yet exercise since threads here are created once at boot.
pub fn thread_create(info: &ThreadInfo) -> Result<&'static Tcb> {
    let stack_size = info.stack_words * core::mem::size_of::<usize>();
    let stack_base = crate::heap::alloc_region(stack_size, Region::General)
        .ok_or(KernelError::OutOfMemory)?;

    let mut name = [0u8; MAX_NAME_LEN];
    let bytes = info.name.as_bytes();
    let len = core::cmp::min(bytes.len(), MAX_NAME_LEN);
    name[..len].copy_from_slice(&bytes[..len]);

    let tcb = Tcb {
        sp: Cell::new(core::ptr::null_mut()),
        stack_base,
        stack_size,
        name,
        name_len: len as u8,
        queue_link: Link::new(),
        all_link: Link::new(),
        class: info.class,
        wake_tick: Cell::new(0),
        ticks_committed: AtomicU64::new(0),
        ticks_in_progress: AtomicU64::new(0),
    };

    let leaked: &'static Tcb = alloc::boxed::Box::leak(alloc::boxed::Box::new(tcb));

    let stack_top = unsafe { stack_base.add(stack_size) } as *mut usize;
    let initial_sp = unsafe { crate::arch::init_stack_frame(stack_top, info.entry, info.arg) };
    unsafe { leaked.set_stack_pointer(initial_sp) };

    super::scheduler::register_thread(leaked);
    Ok(leaked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::queue::CLASS_APPLICATION;

    #[test]
    fn name_is_truncated_not_overrun() {
        let long = "a-name-that-is-much-longer-than-sixteen-bytes";
        let mut name = [0u8; MAX_NAME_LEN];
        let bytes = long.as_bytes();
        let len = core::cmp::min(bytes.len(), MAX_NAME_LEN);
        name[..len].copy_from_slice(&bytes[..len]);
        let tcb = Tcb {
            sp: Cell::new(core::ptr::null_mut()),
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            name,
            name_len: len as u8,
            queue_link: Link::new(),
            all_link: Link::new(),
            class: &CLASS_APPLICATION,
            wake_tick: Cell::new(0),
            ticks_committed: AtomicU64::new(0),
            ticks_in_progress: AtomicU64::new(0),
        };
        assert_eq!(tcb.name().len(), MAX_NAME_LEN);
    }
}
