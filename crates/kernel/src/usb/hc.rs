//! The USB host controller (USBHC) contract: the external collaborator
//! this engine depends on for the actual wire transfers. Concrete
//! register-level controllers (xHCI, DWC2, ...) implement this trait; the
//! enumeration engine only ever talks to it through here.

use crate::lib::error::KernelError;
use core::cell::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeType {
    Control,
    Bulk,
    Interrupt,
    Isochronous,
}

/// Everything needed to (re)configure a host-side pipe: which device and
/// endpoint it talks to, the transfer type, and the negotiated packet size.
#[derive(Debug, Clone, Copy)]
pub struct PipeConfig {
    pub dev_addr: u8,
    pub ep_addr: u8,
    pub max_packet_size: u16,
    pub kind: PipeType,
}

/// Opaque handle to a host-controller pipe (one of its banks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootHubEvent {
    Connection,
    Disconnection,
    ResetSent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrbStatus {
    Pending,
    Ok,
    Error,
}

/// One unit of host-controller work. Owned by the submitter until
/// `submit()` returns, then owned by the controller until it invokes
/// `complete` from its completion interrupt — at which point ownership
/// reverts to the submitter. The enumeration engine keeps exactly one of
/// these alive per device and re-arms it for every step.
pub struct Urb {
    pub setup: Cell<[u8; 8]>,
    pub buffer: Cell<*mut u8>,
    pub buffer_len: Cell<usize>,
    pub status: Cell<UrbStatus>,
    pub actual_length: Cell<usize>,
    pub complete: Cell<Option<fn(&'static Urb)>>,
    /// Caller-supplied identifier threaded through to `complete`; the
    /// enumeration engine stores its device index here since a `Urb` has
    /// no type parameter to carry a typed context pointer across the
    /// controller boundary.
    pub context: Cell<usize>,
}

unsafe impl Sync for Urb {}

impl Urb {
    pub const fn new() -> Self {
        Self {
            setup: Cell::new([0u8; 8]),
            buffer: Cell::new(core::ptr::null_mut()),
            buffer_len: Cell::new(0),
            status: Cell::new(UrbStatus::Pending),
            actual_length: Cell::new(0),
            complete: Cell::new(None),
            context: Cell::new(0),
        }
    }

    pub fn arm(
        &self,
        setup: [u8; 8],
        buffer: *mut u8,
        buffer_len: usize,
        complete: fn(&'static Urb),
        context: usize,
    ) {
        self.setup.set(setup);
        self.buffer.set(buffer);
        self.buffer_len.set(buffer_len);
        self.status.set(UrbStatus::Pending);
        self.actual_length.set(0);
        self.complete.set(Some(complete));
        self.context.set(context);
    }
}

/// The host-controller contract. A board bring-up layer installs exactly
/// one implementation via [`crate::usb::install_controller`].
pub trait UsbHostController: Sync {
    fn alloc_pipe(&self, config: PipeConfig) -> Option<PipeHandle>;
    fn configure_pipe(&self, pipe: PipeHandle, config: PipeConfig);
    fn submit(&self, pipe: PipeHandle, urb: &'static Urb) -> Result<(), KernelError>;
    fn register_root_hub_callback(&self, callback: fn(RootHubEvent));
    fn register_sof_callback(&self, callback: fn());
    /// Drive the root-hub reset signalling. The enumeration engine calls
    /// this once, in response to a CONNECTION event, and waits for the
    /// resulting RESET_SENT callback before it submits anything.
    fn send_reset(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_an_urb_resets_status_and_length() {
        let urb = Urb::new();
        urb.status.set(UrbStatus::Error);
        urb.actual_length.set(42);
        fn noop(_: &'static Urb) {}
        urb.arm([0u8; 8], core::ptr::null_mut(), 0, noop, 7);
        assert_eq!(urb.status.get(), UrbStatus::Pending);
        assert_eq!(urb.actual_length.get(), 0);
        assert_eq!(urb.context.get(), 7);
    }
}
