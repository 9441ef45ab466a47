//! USB device record and the per-device pipe table.

use super::descriptor::{Config, DeviceDescriptor, Interface};
use super::hc::PipeHandle;
use crate::lib::list::{Link, List};
use core::cell::Cell;

pub const MAX_NAME_LEN: usize = 32;
/// Mirrors `MAX_PIPES`: the device-address space is `1..MAX_PIPES-1`,
/// address 0 reserved for the default pipe during enumeration.
pub const MAX_PIPES: usize = 16;

fn name_buf(s: &str) -> ([u8; MAX_NAME_LEN], u8) {
    let mut buf = [0u8; MAX_NAME_LEN];
    let bytes = s.as_bytes();
    let len = core::cmp::min(bytes.len(), MAX_NAME_LEN);
    buf[..len].copy_from_slice(&bytes[..len]);
    (buf, len as u8)
}

fn iface_accessor(i: &Interface) -> &Link<Interface> {
    &i.list_link
}

/// One attached device. `address` is `0` until `SET_ADDRESS` completes;
/// once assigned it is never reused for a different physical device until
/// disconnect, regardless of later enumeration failures on this one.
pub struct UsbDevice {
    pub address: Cell<u8>,
    pub ep0_max_packet_size: Cell<u16>,
    pub device_descriptor: Cell<DeviceDescriptor>,
    product: Cell<[u8; MAX_NAME_LEN]>,
    product_len: Cell<u8>,
    manufacturer: Cell<[u8; MAX_NAME_LEN]>,
    manufacturer_len: Cell<u8>,
    pub num_configs: Cell<usize>,
    pub configs: Cell<*const Config>,
    interfaces: List<Interface>,
    pipe_table: [Cell<Option<PipeHandle>>; MAX_PIPES],
    pipe_bitmap: Cell<u32>,
    pub(crate) list_link: Link<UsbDevice>,
}

unsafe impl Sync for UsbDevice {}
unsafe impl Send for UsbDevice {}

const DEFAULT_NAME: &str = "None";

impl UsbDevice {
    pub fn new() -> Self {
        let (product, product_len) = name_buf(DEFAULT_NAME);
        let (manufacturer, manufacturer_len) = name_buf(DEFAULT_NAME);
        Self {
            address: Cell::new(0),
            ep0_max_packet_size: Cell::new(0),
            device_descriptor: Cell::new(DeviceDescriptor::default()),
            product: Cell::new(product),
            product_len: Cell::new(product_len),
            manufacturer: Cell::new(manufacturer),
            manufacturer_len: Cell::new(manufacturer_len),
            num_configs: Cell::new(0),
            configs: Cell::new(core::ptr::null()),
            interfaces: List::new(iface_accessor),
            pipe_table: [const { Cell::new(None) }; MAX_PIPES],
            pipe_bitmap: Cell::new(0),
            list_link: Link::new(),
        }
    }

    pub fn product(&self) -> alloc::string::String {
        self.read_name(&self.product, self.product_len.get())
    }

    pub fn manufacturer(&self) -> alloc::string::String {
        self.read_name(&self.manufacturer, self.manufacturer_len.get())
    }

    fn read_name(&self, cell: &Cell<[u8; MAX_NAME_LEN]>, len: u8) -> alloc::string::String {
        let buf = cell.get();
        core::str::from_utf8(&buf[..len as usize])
            .unwrap_or(DEFAULT_NAME)
            .into()
    }

    pub fn set_product(&self, ascii: &[u8]) {
        let mut buf = [0u8; MAX_NAME_LEN];
        let len = core::cmp::min(ascii.len(), MAX_NAME_LEN);
        buf[..len].copy_from_slice(&ascii[..len]);
        self.product.set(buf);
        self.product_len.set(len as u8);
    }

    pub fn set_manufacturer(&self, ascii: &[u8]) {
        let mut buf = [0u8; MAX_NAME_LEN];
        let len = core::cmp::min(ascii.len(), MAX_NAME_LEN);
        buf[..len].copy_from_slice(&ascii[..len]);
        self.manufacturer.set(buf);
        self.manufacturer_len.set(len as u8);
    }

    pub fn push_interface(&'static self, iface: &'static Interface) {
        // `List` is built for a `&mut self` API befitting a privileged
        // single-writer context; the enumeration engine is exactly that,
        // so this cast is the one place a device's interface list is
        // mutated without Rust-visible exclusivity.
        let list = &self.interfaces as *const List<Interface> as *mut List<Interface>;
        unsafe { (*list).push_back(iface) };
    }

    pub fn interfaces(&self) -> &List<Interface> {
        &self.interfaces
    }

    pub fn alloc_pipe(&self, handle: PipeHandle) -> Option<u8> {
        let bitmap = self.pipe_bitmap.get();
        for i in 1..MAX_PIPES as u32 {
            if bitmap & (1 << i) == 0 {
                self.pipe_bitmap.set(bitmap | (1 << i));
                self.pipe_table[i as usize].set(Some(handle));
                return Some(i as u8);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_device_defaults_product_and_manufacturer_to_none() {
        let device = UsbDevice::new();
        assert_eq!(device.product(), "None");
        assert_eq!(device.manufacturer(), "None");
        assert_eq!(device.address.get(), 0);
    }

    #[test]
    fn set_product_from_down_converted_ascii() {
        let device = UsbDevice::new();
        device.set_product(b"Widget");
        assert_eq!(device.product(), "Widget");
    }
}
