//! The USB core singleton — the data model's "USB core state": the device
//! list, the driver registry, the address bitmap, the default control
//! pipe, a reference to the host controller, and the one enumeration in
//! flight at a time.
//!
//! Generalises this codebase's existing single-instance kernel-context
//! pattern: the original `usbc_private` was a bare global pointer set up
//! once at boot (see `usbc_init` in the original source); here it is an
//! explicit `Mutex<CoreState>` behind accessor functions, so the engine
//! stays testable against a fake controller instead of reaching for a
//! hidden global (see the design notes on process-wide singletons).

pub mod descriptor;
pub mod device;
pub mod driver;
pub mod enumeration;
pub mod hc;

use crate::lib::error::{KernelError, Result};
use crate::lib::list::List;
use device::{UsbDevice, MAX_PIPES};
use driver::DriverRegistry;
use enumeration::{EnumState, Enumeration};
use hc::{PipeConfig, PipeHandle, PipeType, RootHubEvent, Urb, UsbHostController};
use spin::{Mutex, Once};

/// Bounded enumeration buffer the `GET_DESCRIPTORS` step reads its wire
/// payload into. Sized generously above any real device's descriptor tree;
/// `GET_DESC_LENGTH` rejects a `wTotalLength` that would overrun it before
/// ever submitting the follow-up transfer.
const ENUM_BUFFER_SIZE: usize = 512;

fn device_accessor(d: &UsbDevice) -> &crate::lib::list::Link<UsbDevice> {
    &d.list_link
}

struct CoreState {
    devices: List<UsbDevice>,
    drivers: DriverRegistry,
    /// Bit 0 is permanently reserved (address 0 means "not yet assigned");
    /// addresses `1..MAX_PIPES` are allocatable.
    address_bitmap: u32,
    control_pipe: Option<PipeHandle>,
    enum_state: EnumState,
    enumerating: Option<&'static UsbDevice>,
}

impl CoreState {
    const fn new() -> Self {
        Self {
            devices: List::new(device_accessor),
            drivers: DriverRegistry::new(),
            address_bitmap: 1,
            control_pipe: None,
            enum_state: EnumState::Idle,
            enumerating: None,
        }
    }
}

static CORE: Mutex<CoreState> = Mutex::new(CoreState::new());
static CONTROLLER: Once<&'static dyn UsbHostController> = Once::new();
static ENUM_URB: Urb = Urb::new();
static mut ENUM_BUFFER: [u8; ENUM_BUFFER_SIZE] = [0u8; ENUM_BUFFER_SIZE];
static ENUMERATION: Mutex<Option<Enumeration>> = Mutex::new(None);

/// Install the board's host-controller implementation, register this
/// core's root-hub and start-of-frame callbacks, and claim the default
/// control pipe at its power-on-reset configuration (address 0, 64-byte
/// transfers). Call once during bring-up, after the controller's own
/// register-level init has run.
pub fn install_controller(hc: &'static dyn UsbHostController) {
    CONTROLLER.call_once(|| hc);
    hc.register_root_hub_callback(root_hub_event);
    hc.register_sof_callback(sof_event);

    let cfg = PipeConfig {
        dev_addr: 0,
        ep_addr: 0,
        max_packet_size: 64,
        kind: PipeType::Control,
    };
    if let Some(pipe) = hc.alloc_pipe(cfg) {
        CORE.lock().control_pipe = Some(pipe);
    } else {
        crate::error!("usb: failed to allocate the default control pipe");
    }
    crate::info!("usb: host controller installed");
}

/// Register a class driver. Mirrors `usbc_add_driver`; order of
/// registration is the order drivers are tried against a matching
/// interface.
pub fn register_driver(driver: &'static dyn driver::UsbDriver) -> Result<()> {
    CORE.lock().drivers.register(driver)
}

pub fn enum_state() -> EnumState {
    CORE.lock().enum_state
}

pub fn device_count() -> usize {
    CORE.lock().devices.len()
}

pub(crate) fn controller() -> Result<&'static dyn UsbHostController> {
    CONTROLLER.get().copied().ok_or(KernelError::NotInitialized)
}

pub(crate) fn control_pipe(_device: &UsbDevice) -> PipeHandle {
    CORE.lock()
        .control_pipe
        .expect("control pipe requested before install_controller")
}

/// Reprogram the default pipe's transfer size once `bMaxPacketSize0` is
/// known, per `GET_EP0_SIZE`'s completion step.
pub(crate) fn reconfigure_control_pipe(device: &UsbDevice, max_packet_size: u16) {
    let pipe = match CORE.lock().control_pipe {
        Some(p) => p,
        None => return,
    };
    if let Ok(hc) = controller() {
        hc.configure_pipe(
            pipe,
            PipeConfig {
                dev_addr: device.address.get(),
                ep_addr: 0,
                max_packet_size,
                kind: PipeType::Control,
            },
        );
    }
}

/// Reprogram the default pipe to the device's newly assigned address, per
/// `SET_ADDRESS`'s completion step.
pub(crate) fn reconfigure_control_pipe_address(device: &UsbDevice, address: u8) {
    let pipe = match CORE.lock().control_pipe {
        Some(p) => p,
        None => return,
    };
    if let Ok(hc) = controller() {
        hc.configure_pipe(
            pipe,
            PipeConfig {
                dev_addr: address,
                ep_addr: 0,
                max_packet_size: device.ep0_max_packet_size.get(),
                kind: PipeType::Control,
            },
        );
    }
}

/// `SET_ADDRESS`'s address allocation: lowest clear bit in `[1, MAX_PIPES)`,
/// set before the request is even issued so a failed enumeration does not
/// leave the bitmap able to hand the same address to a different device.
pub(crate) fn alloc_address() -> Option<u8> {
    let mut core = CORE.lock();
    for bit in 1..MAX_PIPES as u32 {
        if core.address_bitmap & (1 << bit) == 0 {
            core.address_bitmap |= 1 << bit;
            return Some(bit as u8);
        }
    }
    None
}

/// Binds every interface on `device` to whichever registered driver claims
/// it. Called once, after the manufacturer-name step completes.
pub(crate) fn bind_drivers(device: &'static UsbDevice) {
    let core = CORE.lock();
    let any = core.drivers.bind_device(device);
    if !any {
        crate::info!("usb: '{}' enumerated with no bound driver", device.product());
    }
}

/// The URB completion callback the enumeration engine arms on every step.
/// Invoked from the host controller's completion interrupt; advances the
/// state machine and, on success or fatal failure, tears down the
/// in-progress `Enumeration`.
fn on_urb_complete(urb: &'static Urb) {
    let _ = urb;
    let mut slot = ENUMERATION.lock();
    let Some(enumeration) = slot.as_mut() else {
        return;
    };

    match enumeration.on_complete() {
        Ok(false) => {
            CORE.lock().enum_state = enumeration.state;
        }
        Ok(true) => {
            crate::info!("usb: enumeration complete");
            let mut core = CORE.lock();
            core.enum_state = EnumState::Idle;
            core.enumerating = None;
            *slot = None;
        }
        Err(e) => {
            crate::error!("usb: enumeration aborted: {}", e);
            let mut core = CORE.lock();
            core.enum_state = EnumState::Idle;
            core.enumerating = None;
            // The address allocated for this device, if any, is not
            // released here — see the design notes' open question on
            // whether a retried enumeration of the same physical device
            // should keep it. This core preserves the current behaviour.
            *slot = None;
        }
    }
}

fn sof_event() {}

fn root_hub_event(event: RootHubEvent) {
    match event {
        RootHubEvent::Connection => {
            crate::info!("usb: device connected, sending bus reset");
            if let Ok(hc) = controller() {
                hc.send_reset();
            }
        }
        RootHubEvent::Disconnection => {
            crate::info!("usb: device disconnected");
        }
        RootHubEvent::ResetSent => start_enumeration(),
    }
}

/// `usbc_start_enum`: claim the control pipe at the post-reset default
/// configuration, add the new device record, and kick off `GET_EP0_SIZE`.
/// Only one device enumerates at a time; a reset signalled while another
/// enumeration is already running is ignored rather than interleaved.
fn start_enumeration() {
    let mut core = CORE.lock();
    if core.enumerating.is_some() {
        crate::warn!("usb: reset sent while a device is already enumerating, ignoring");
        return;
    }

    let device: &'static UsbDevice = alloc::boxed::Box::leak(alloc::boxed::Box::new(UsbDevice::new()));
    core.devices.push_back(device);
    core.enumerating = Some(device);
    core.enum_state = EnumState::GetEp0Size;
    let pipe = core.control_pipe;
    drop(core);

    let Some(pipe) = pipe else {
        crate::error!("usb: cannot start enumeration, no control pipe");
        return;
    };
    let Ok(hc) = controller() else {
        crate::error!("usb: cannot start enumeration, no host controller installed");
        return;
    };
    hc.configure_pipe(
        pipe,
        PipeConfig {
            dev_addr: 0,
            ep_addr: 0,
            max_packet_size: 64,
            kind: PipeType::Control,
        },
    );

    let buffer = unsafe { core::ptr::addr_of_mut!(ENUM_BUFFER) as *mut u8 };
    let mut enumeration = Enumeration::new(device, &ENUM_URB, buffer, ENUM_BUFFER_SIZE);
    if let Err(e) = enumeration.start() {
        crate::error!("usb: failed to start enumeration: {}", e);
        CORE.lock().enumerating = None;
        return;
    }
    *ENUMERATION.lock() = Some(enumeration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use hc::UrbStatus;

    #[test]
    fn address_allocation_starts_at_one_and_sets_the_bitmap() {
        let mut core = CoreState::new();
        assert_eq!(core.address_bitmap, 1);
        core.address_bitmap |= 1 << 1;
        assert_ne!(core.address_bitmap & (1 << 1), 0);
    }

    #[test]
    fn alloc_address_skips_already_set_bits() {
        // Exercised against the real global state; reset it back to the
        // single reserved bit afterwards so other tests in this module are
        // unaffected by ordering.
        let mut core = CORE.lock();
        core.address_bitmap = 1 | (1 << 1);
        drop(core);
        let addr = alloc_address().unwrap();
        assert_eq!(addr, 2);
        CORE.lock().address_bitmap = 1;
    }

    /// A host controller test double. `submit` fills the URB's buffer from
    /// a fixed response script, indexed by call order, and returns without
    /// invoking the completion callback — matching real hardware, where
    /// completion fires later from an interrupt rather than synchronously
    /// inside `submit`. The test drives completions itself by calling
    /// [`on_urb_complete`] directly, one step at a time.
    struct FakeController {
        root_hub_cb: Mutex<Option<fn(RootHubEvent)>>,
        step: AtomicUsize,
        script: &'static [&'static [u8]],
    }

    impl FakeController {
        const fn new(script: &'static [&'static [u8]]) -> Self {
            Self {
                root_hub_cb: Mutex::new(None),
                step: AtomicUsize::new(0),
                script,
            }
        }
    }

    impl UsbHostController for FakeController {
        fn alloc_pipe(&self, _config: PipeConfig) -> Option<PipeHandle> {
            Some(PipeHandle(0))
        }
        fn configure_pipe(&self, _pipe: PipeHandle, _config: PipeConfig) {}
        fn submit(&self, _pipe: PipeHandle, urb: &'static Urb) -> core::result::Result<(), KernelError> {
            let step = self.step.fetch_add(1, Ordering::Relaxed);
            let payload = self.script[step];
            let dest = urb.buffer.get();
            if !dest.is_null() && !payload.is_empty() {
                let n = core::cmp::min(payload.len(), urb.buffer_len.get());
                unsafe { core::ptr::copy_nonoverlapping(payload.as_ptr(), dest, n) };
                urb.actual_length.set(n);
            } else {
                urb.actual_length.set(0);
            }
            urb.status.set(UrbStatus::Ok);
            Ok(())
        }
        fn register_root_hub_callback(&self, callback: fn(RootHubEvent)) {
            *self.root_hub_cb.lock() = Some(callback);
        }
        fn register_sof_callback(&self, _callback: fn()) {}
        fn send_reset(&self) {
            if let Some(cb) = *self.root_hub_cb.lock() {
                cb(RootHubEvent::ResetSent);
            }
        }
    }

    const DEV_DESC_EP0: [u8; 8] = [18, 1, 0x00, 0x02, 0, 0, 0, 64];
    const DEV_DESC: [u8; 18] = [
        18, 1, 0x00, 0x02, 0, 0, 0, 64, 0x34, 0x12, 0x78, 0x56, 0x00, 0x01, 0, 0, 0, 1,
    ];
    const CFG9: [u8; 9] = [9, 2, 25, 0, 1, 1, 0, 0x80, 50];
    const IFACE9: [u8; 9] = [9, 4, 0, 0, 1, 3, 1, 1, 0];
    const EP7: [u8; 7] = [7, 5, 0x81, 3, 8, 0, 10];

    struct CountingHidDriver {
        called: AtomicUsize,
    }

    impl driver::UsbDriver for CountingHidDriver {
        fn id(&self) -> driver::DeviceId {
            driver::DeviceId {
                flags: driver::MatchFlags::IFACE_CLASS
                    | driver::MatchFlags::IFACE_SUBCLASS
                    | driver::MatchFlags::IFACE_PROTOCOL,
                vendor_id: 0,
                product_id: 0,
                device_class: 0,
                device_subclass: 0,
                device_protocol: 0,
                iface_class: 3,
                iface_subclass: 1,
                iface_protocol: 1,
            }
        }
        fn name(&self) -> &'static str {
            "hid-boot-keyboard"
        }
        fn connect(&self, _iface: &'static descriptor::Interface) -> bool {
            self.called.fetch_add(1, Ordering::Relaxed);
            true
        }
    }

    /// End-to-end: a CONNECTION event through a full enumeration of a
    /// single-configuration, single-interface HID boot keyboard device
    /// with one interrupt-in endpoint and no string descriptors, ending in
    /// exactly one driver `connect` call. Grounds the enumeration scenario
    /// from the testable-properties section.
    #[test]
    fn full_enumeration_binds_the_matching_driver_exactly_once() {
        static CFG_TREE: [u8; 25] = concat_descriptors();
        const fn concat_descriptors() -> [u8; 25] {
            let mut out = [0u8; 25];
            let mut i = 0;
            while i < 9 {
                out[i] = CFG9[i];
                i += 1;
            }
            let mut j = 0;
            while j < 9 {
                out[9 + j] = IFACE9[j];
                j += 1;
            }
            let mut k = 0;
            while k < 7 {
                out[18 + k] = EP7[k];
                k += 1;
            }
            out
        }

        static CONTROLLER: FakeController = FakeController::new(&[
            &DEV_DESC_EP0,
            &DEV_DESC,
            &[],
            &CFG9,
            &CFG_TREE,
        ]);
        static DRIVER: CountingHidDriver = CountingHidDriver { called: AtomicUsize::new(0) };

        install_controller(&CONTROLLER);
        register_driver(&DRIVER).unwrap();

        root_hub_event(RootHubEvent::Connection);
        for _ in 0..5 {
            on_urb_complete(&ENUM_URB);
        }

        assert_eq!(DRIVER.called.load(Ordering::Relaxed), 1);
        assert_eq!(enum_state(), EnumState::Idle);
    }
}
