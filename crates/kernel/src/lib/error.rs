// Kernel error handling
//
// Trimmed from a larger POSIX-flavoured errno set down to the kinds this
// core can actually produce: there is no VFS, no signal delivery and no
// process model here, so file-descriptor and signal errors have no home.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The external memory allocator could not satisfy a request.
    OutOfMemory,
    /// A caller passed a value outside its accepted domain.
    InvalidArgument,
    /// A singleton subsystem was used before its `init()` ran.
    NotInitialized,
    /// A run queue, sleep queue, or thread-list invariant was violated.
    QueueCorruption,
    /// The address bitmap has no free bit in `[1, MAX_PIPES)`.
    NoFreeAddress,
    /// A URB completed with a non-OK status during enumeration.
    TransferFailed,
    /// A descriptor field failed the verify pass (bad `bLength`, truncated
    /// walk, or short transfer on a fixed-size request).
    MalformedDescriptor,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::OutOfMemory => "out of memory",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::NotInitialized => "subsystem not initialized",
            KernelError::QueueCorruption => "queue invariant violated",
            KernelError::NoFreeAddress => "no free USB address",
            KernelError::TransferFailed => "URB transfer failed",
            KernelError::MalformedDescriptor => "malformed USB descriptor",
        };
        f.write_str(msg)
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;
