//! Memory management: the `mm_alloc` / `mm_free` syscall surface over the
//! heap allocator in [`crate::heap`]. The underlying allocation algorithm is
//! an external-collaborator concern (see the memory allocator contract);
//! this module only adds the region-tag API syscalls are dispatched onto.

pub use crate::heap::Region;
use crate::lib::error::{KernelError, Result};

/// `mm_alloc(size, region)` body. `region` is whatever tag value arrived in
/// the syscall argument register; an unrecognised tag falls back to
/// `Region::General` rather than erroring, consistent with this core's
/// general policy of treating unknown enum encodings permissively rather
/// than faulting (see the syscall gate's unknown-selector behaviour).
pub fn mm_alloc(size: u32, region: u32) -> Result<*mut u8> {
    let region = Region::from_u32(region).unwrap_or(Region::General);
    crate::heap::alloc_region(size as usize, region).ok_or(KernelError::OutOfMemory)
}

/// `mm_free(ptr)` body. The syscall ABI passes only the pointer, not the
/// original allocation size, so this recovers it from the `ptr -> size`
/// table `heap::alloc_region` populates rather than needing a `Layout`
/// passed in. Kernel-internal callers that already know their own sizes
/// (thread-stack teardown, USB descriptor-buffer teardown) call
/// [`crate::heap::free_region`] directly instead of going through this path.
pub fn mm_free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    if !crate::heap::free_tracked(ptr) {
        crate::warn!("mm_free: {:p} is not a tracked allocation, ignoring", ptr);
    }
}
