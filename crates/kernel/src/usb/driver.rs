//! Driver matching and binding, generalising this codebase's existing
//! `DeviceId`/`DriverRegistry` pattern (vendor/device/class match flags,
//! a bounded registry, `probe`-then-bind) to the interface-level matching
//! USB class drivers need.

use super::descriptor::Interface;
use super::device::UsbDevice;
use bitflags::bitflags;
use heapless::Vec;

bitflags! {
    /// Which fields of a [`DeviceId`] must match for a driver to claim an
    /// interface. An unset flag means "don't care" for that field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MatchFlags: u16 {
        const VENDOR            = 1 << 0;
        const PRODUCT           = 1 << 1;
        const DEVICE_CLASS      = 1 << 2;
        const DEVICE_SUBCLASS   = 1 << 3;
        const DEVICE_PROTOCOL   = 1 << 4;
        const IFACE_CLASS       = 1 << 5;
        const IFACE_SUBCLASS    = 1 << 6;
        const IFACE_PROTOCOL    = 1 << 7;
    }
}

/// A driver's match criteria: the fields named in `flags` are compared
/// against the enumerating device/interface; everything else is ignored.
#[derive(Debug, Clone, Copy)]
pub struct DeviceId {
    pub flags: MatchFlags,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub iface_class: u8,
    pub iface_subclass: u8,
    pub iface_protocol: u8,
}

impl DeviceId {
    /// Does this device/interface pair satisfy every flagged field?
    pub fn matches(&self, device: &UsbDevice, iface: &Interface) -> bool {
        let dev_desc = device.device_descriptor.get();
        if self.flags.contains(MatchFlags::VENDOR) && dev_desc.vendor_id != self.vendor_id {
            return false;
        }
        if self.flags.contains(MatchFlags::PRODUCT) && dev_desc.product_id != self.product_id {
            return false;
        }
        if self.flags.contains(MatchFlags::DEVICE_CLASS) && dev_desc.device_class != self.device_class {
            return false;
        }
        if self.flags.contains(MatchFlags::DEVICE_SUBCLASS)
            && dev_desc.device_sub_class != self.device_subclass
        {
            return false;
        }
        if self.flags.contains(MatchFlags::DEVICE_PROTOCOL)
            && dev_desc.device_protocol != self.device_protocol
        {
            return false;
        }
        if self.flags.contains(MatchFlags::IFACE_CLASS) && iface.interface_class != self.iface_class {
            return false;
        }
        if self.flags.contains(MatchFlags::IFACE_SUBCLASS)
            && iface.interface_sub_class != self.iface_subclass
        {
            return false;
        }
        if self.flags.contains(MatchFlags::IFACE_PROTOCOL)
            && iface.interface_protocol != self.iface_protocol
        {
            return false;
        }
        true
    }
}

/// A class driver. `connect` claims an interface; returning `false` means
/// "I matched, but I decline this instance" and the engine tries the next
/// candidate driver rather than treating it as an error.
pub trait UsbDriver: Sync {
    fn id(&self) -> DeviceId;
    fn name(&self) -> &'static str;
    fn connect(&self, iface: &'static Interface) -> bool;
}

const MAX_DRIVERS: usize = 16;

pub struct DriverRegistry {
    drivers: Vec<&'static dyn UsbDriver, MAX_DRIVERS>,
}

impl DriverRegistry {
    pub const fn new() -> Self {
        Self { drivers: Vec::new() }
    }

    pub fn register(&mut self, driver: &'static dyn UsbDriver) -> Result<(), crate::lib::error::KernelError> {
        self.drivers
            .push(driver)
            .map_err(|_| crate::lib::error::KernelError::InvalidArgument)?;
        crate::info!("usb: registered driver '{}'", driver.name());
        Ok(())
    }

    /// For one interface, try each registered driver in registration
    /// order; the first whose `DeviceId` matches *and* whose `connect`
    /// returns true claims it. A driver that matches but declines does not
    /// stop the search.
    fn bind_interface(&self, device: &UsbDevice, iface: &'static Interface) -> bool {
        for driver in self.drivers.iter() {
            if driver.id().matches(device, iface) && driver.connect(iface) {
                iface.assigned.set(true);
                crate::info!("usb: interface {} bound to '{}'", iface.interface_number, driver.name());
                return true;
            }
        }
        false
    }

    /// Binds every interface on `device` to whichever driver claims it.
    /// Returns whether at least one interface was bound — the explicit
    /// resolution for `usbc_assign_driver`'s ambiguous return value.
    pub fn bind_device(&self, device: &'static UsbDevice) -> bool {
        let mut any_bound = false;
        for iface in device.interfaces().iter() {
            if self.bind_interface(device, iface) {
                any_bound = true;
            }
        }
        any_bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::list::Link;
    use core::cell::Cell;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn test_iface(class: u8, subclass: u8, protocol: u8) -> Interface {
        Interface {
            interface_number: 0,
            alternate_setting: 0,
            interface_class: class,
            interface_sub_class: subclass,
            interface_protocol: protocol,
            num_eps: 0,
            eps: core::ptr::null(),
            parent_dev: core::ptr::null(),
            assigned: Cell::new(false),
            list_link: Link::new(),
        }
    }

    struct CountingDriver {
        calls: AtomicUsize,
        accept: bool,
        id: DeviceId,
    }

    impl UsbDriver for CountingDriver {
        fn id(&self) -> DeviceId {
            self.id
        }
        fn name(&self) -> &'static str {
            "counting"
        }
        fn connect(&self, _iface: &'static Interface) -> bool {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.accept
        }
    }

    #[test]
    fn first_matching_driver_that_accepts_wins() {
        static D1: CountingDriver = CountingDriver {
            calls: AtomicUsize::new(0),
            accept: true,
            id: DeviceId {
                flags: MatchFlags::IFACE_CLASS,
                vendor_id: 0,
                product_id: 0,
                device_class: 0,
                device_subclass: 0,
                device_protocol: 0,
                iface_class: 3,
                iface_subclass: 0,
                iface_protocol: 0,
            },
        };
        static D2: CountingDriver = CountingDriver {
            calls: AtomicUsize::new(0),
            accept: true,
            id: D1.id,
        };

        let mut registry = DriverRegistry::new();
        registry.register(&D1).unwrap();
        registry.register(&D2).unwrap();

        let device = UsbDevice::new();
        let iface: &'static Interface = alloc::boxed::Box::leak(alloc::boxed::Box::new(test_iface(3, 0, 0)));

        assert!(registry.bind_interface(&device, iface));
        assert_eq!(D1.calls.load(Ordering::Relaxed), 1);
        assert_eq!(D2.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn declining_driver_falls_through_to_next_candidate() {
        static D1: CountingDriver = CountingDriver {
            calls: AtomicUsize::new(0),
            accept: false,
            id: DeviceId {
                flags: MatchFlags::IFACE_CLASS,
                vendor_id: 0,
                product_id: 0,
                device_class: 0,
                device_subclass: 0,
                device_protocol: 0,
                iface_class: 3,
                iface_subclass: 0,
                iface_protocol: 0,
            },
        };
        static D2: CountingDriver = CountingDriver {
            calls: AtomicUsize::new(0),
            accept: true,
            id: D1.id,
        };

        let mut registry = DriverRegistry::new();
        registry.register(&D1).unwrap();
        registry.register(&D2).unwrap();

        let device = UsbDevice::new();
        let iface: &'static Interface = alloc::boxed::Box::leak(alloc::boxed::Box::new(test_iface(3, 0, 0)));

        assert!(registry.bind_interface(&device, iface));
        assert_eq!(D1.calls.load(Ordering::Relaxed), 1);
        assert_eq!(D2.calls.load(Ordering::Relaxed), 1);
    }
}
