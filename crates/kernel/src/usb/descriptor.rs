//! USB descriptor wire structs and the three-pass configuration-buffer
//! pipeline (verify, allocate, parse). Adapted from this codebase's
//! existing descriptor parsing — same `repr(C, packed)` + `read_unaligned`
//! approach — generalised to build the contiguous config/iface/endpoint
//! arena the enumeration engine's `GET_DESCRIPTORS` step needs.

use crate::heap::Region;
use crate::lib::error::{KernelError, Result};
use crate::lib::list::Link;

pub const DEVICE_DESCRIPTOR_TYPE: u8 = 1;
pub const CONFIGURATION_DESCRIPTOR_TYPE: u8 = 2;
pub const STRING_DESCRIPTOR_TYPE: u8 = 3;
pub const INTERFACE_DESCRIPTOR_TYPE: u8 = 4;
pub const ENDPOINT_DESCRIPTOR_TYPE: u8 = 5;

pub const DEVICE_DESCRIPTOR_LEN: usize = 18;
pub const CONFIG_DESCRIPTOR_LEN: usize = 9;
pub const IFACE_DESCRIPTOR_LEN: usize = 9;
pub const ENDPOINT_DESCRIPTOR_LEN: usize = 7;

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub usb_version: u16,
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < DEVICE_DESCRIPTOR_LEN || data[1] != DEVICE_DESCRIPTOR_TYPE {
            return None;
        }
        Some(unsafe { core::ptr::read_unaligned(data.as_ptr() as *const Self) })
    }
}

/// A parsed configuration record inside the flat arena. `ifaces` points at
/// the first interface belonging to this configuration, resolved by the
/// parse pass from [`offset`].
pub struct Config {
    pub configuration_value: u8,
    pub attributes: u8,
    pub max_power: u8,
    pub num_ifaces: usize,
    pub ifaces: *const Interface,
}

/// A parsed interface record. `parent_dev` always points back at the
/// enumerating device; `eps` points at this interface's first endpoint.
pub struct Interface {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub interface_class: u8,
    pub interface_sub_class: u8,
    pub interface_protocol: u8,
    pub num_eps: usize,
    pub eps: *const Endpoint,
    pub parent_dev: *const crate::usb::device::UsbDevice,
    pub assigned: core::cell::Cell<bool>,
    pub(crate) list_link: Link<Interface>,
}

pub struct Endpoint {
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

/// Which region of the arena a raw record index falls in, and the byte
/// offset of that record's start within the allocated buffer. Mirrors the
/// layout contract: C configs, then I interfaces, then E endpoints, laid
/// out contiguously in that order.
pub fn offset(kind: RecordKind, k: usize, num_configs: usize, num_ifaces: usize) -> usize {
    match kind {
        RecordKind::Config => k * core::mem::size_of::<Config>(),
        RecordKind::Iface => {
            num_configs * core::mem::size_of::<Config>() + k * core::mem::size_of::<Interface>()
        }
        RecordKind::Endpoint => {
            num_configs * core::mem::size_of::<Config>()
                + num_ifaces * core::mem::size_of::<Interface>()
                + k * core::mem::size_of::<Endpoint>()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Config,
    Iface,
    Endpoint,
}

/// Counts produced by [`verify`]: how many configuration, interface and
/// endpoint descriptors the wire buffer actually contains.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorCounts {
    pub configs: usize,
    pub ifaces: usize,
    pub endpoints: usize,
}

/// Verify pass: walk `raw` using each descriptor's `bLength` as stride,
/// checking that every CONFIGURATION/INTERFACE/ENDPOINT descriptor has the
/// length its type mandates, and that the walk lands exactly on the end of
/// the buffer. Other descriptor types are skipped by their own `bLength`
/// but not counted.
pub fn verify(raw: &[u8]) -> Result<DescriptorCounts> {
    let mut counts = DescriptorCounts::default();
    let mut off = 0usize;

    while off < raw.len() {
        if off + 2 > raw.len() {
            return Err(KernelError::MalformedDescriptor);
        }
        let b_length = raw[off] as usize;
        let b_type = raw[off + 1];
        if b_length == 0 || off + b_length > raw.len() {
            return Err(KernelError::MalformedDescriptor);
        }

        match b_type {
            CONFIGURATION_DESCRIPTOR_TYPE => {
                if b_length != CONFIG_DESCRIPTOR_LEN {
                    return Err(KernelError::MalformedDescriptor);
                }
                counts.configs += 1;
            }
            INTERFACE_DESCRIPTOR_TYPE => {
                if b_length != IFACE_DESCRIPTOR_LEN {
                    return Err(KernelError::MalformedDescriptor);
                }
                counts.ifaces += 1;
            }
            ENDPOINT_DESCRIPTOR_TYPE => {
                if b_length != ENDPOINT_DESCRIPTOR_LEN {
                    return Err(KernelError::MalformedDescriptor);
                }
                counts.endpoints += 1;
            }
            _ => {}
        }

        off += b_length;
    }

    if off != raw.len() {
        return Err(KernelError::MalformedDescriptor);
    }
    Ok(counts)
}

/// Allocate pass: one buffer sized exactly for `counts`.
pub fn allocate(counts: DescriptorCounts) -> Result<*mut u8> {
    let size = counts.configs * core::mem::size_of::<Config>()
        + counts.ifaces * core::mem::size_of::<Interface>()
        + counts.endpoints * core::mem::size_of::<Endpoint>();
    crate::heap::alloc_region(size, Region::UsbDescriptor).ok_or(KernelError::OutOfMemory)
}

/// Parse pass: walk `raw` again, this time copying each recognised
/// descriptor into its slot in `arena` and resolving the three pointer
/// fields (`Interface::parent_dev`, `Config::ifaces`, `Interface::eps`).
/// Also pushes every interface record onto `device.interfaces`.
///
/// # Safety
/// `arena` must point at a buffer at least as large as [`allocate`] would
/// compute for `counts`, and must not be aliased elsewhere.
pub unsafe fn parse(
    raw: &[u8],
    arena: *mut u8,
    counts: DescriptorCounts,
    device: &'static crate::usb::device::UsbDevice,
) -> Result<()> {
    let mut off = 0usize;
    let mut config_idx = 0usize;
    let mut iface_idx = 0usize;
    let mut endpoint_idx = 0usize;

    let mut current_config: Option<*mut Config> = None;
    let mut ifaces_in_config = 0usize;
    let mut current_iface: Option<*mut Interface> = None;
    let mut eps_in_iface = 0usize;

    while off < raw.len() {
        let b_length = raw[off] as usize;
        let b_type = raw[off + 1];

        match b_type {
            CONFIGURATION_DESCRIPTOR_TYPE => {
                if let Some(prev) = current_config.take() {
                    (*prev).num_ifaces = ifaces_in_config;
                }
                let slot = arena.add(offset(RecordKind::Config, config_idx, counts.configs, counts.ifaces)) as *mut Config;
                let cfg_desc = &raw[off..off + b_length];
                slot.write(Config {
                    configuration_value: cfg_desc[5],
                    attributes: cfg_desc[7],
                    max_power: cfg_desc[8],
                    num_ifaces: 0,
                    ifaces: arena.add(offset(RecordKind::Iface, iface_idx, counts.configs, counts.ifaces)) as *const Interface,
                });
                current_config = Some(slot);
                ifaces_in_config = 0;
                config_idx += 1;
            }
            INTERFACE_DESCRIPTOR_TYPE => {
                if let Some(prev) = current_iface.take() {
                    (*prev).num_eps = eps_in_iface;
                }
                let slot = arena.add(offset(RecordKind::Iface, iface_idx, counts.configs, counts.ifaces)) as *mut Interface;
                let iface_desc = &raw[off..off + b_length];
                slot.write(Interface {
                    interface_number: iface_desc[2],
                    alternate_setting: iface_desc[3],
                    interface_class: iface_desc[5],
                    interface_sub_class: iface_desc[6],
                    interface_protocol: iface_desc[7],
                    num_eps: 0,
                    eps: arena.add(offset(RecordKind::Endpoint, endpoint_idx, counts.configs, counts.ifaces)) as *const Endpoint,
                    parent_dev: device as *const _,
                    assigned: core::cell::Cell::new(false),
                    list_link: Link::new(),
                });
                device.push_interface(&*slot);
                current_iface = Some(slot);
                eps_in_iface = 0;
                ifaces_in_config += 1;
                iface_idx += 1;
            }
            ENDPOINT_DESCRIPTOR_TYPE => {
                let slot = arena.add(offset(RecordKind::Endpoint, endpoint_idx, counts.configs, counts.ifaces)) as *mut Endpoint;
                let ep_desc = &raw[off..off + b_length];
                slot.write(Endpoint {
                    endpoint_address: ep_desc[2],
                    attributes: ep_desc[3],
                    max_packet_size: u16::from_le_bytes([ep_desc[4], ep_desc[5]]),
                    interval: ep_desc[6],
                });
                eps_in_iface += 1;
                endpoint_idx += 1;
            }
            _ => {}
        }

        off += b_length;
    }

    if let Some(prev) = current_iface.take() {
        (*prev).num_eps = eps_in_iface;
    }
    if let Some(prev) = current_config.take() {
        (*prev).num_ifaces = ifaces_in_config;
    }

    Ok(())
}

/// 2-byte header + UTF-16LE payload → bounded ASCII, taking every second
/// byte and stopping at `dest`'s capacity. Matches the down-conversion the
/// string-descriptor step performs.
pub fn string_descriptor_to_ascii(raw: &[u8], dest: &mut [u8]) -> usize {
    if raw.len() < 2 {
        return 0;
    }
    let len = core::cmp::min(raw[0] as usize, raw.len());
    let payload = &raw[2..len];
    let mut n = 0;
    let mut i = 0;
    while i + 1 < payload.len() && n < dest.len() {
        dest[n] = payload[i];
        n += 1;
        i += 2;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_desc(total_len: u16, num_ifaces: u8) -> [u8; CONFIG_DESCRIPTOR_LEN] {
        let tl = total_len.to_le_bytes();
        [9, CONFIGURATION_DESCRIPTOR_TYPE, tl[0], tl[1], num_ifaces, 1, 0, 0x80, 50]
    }

    fn iface_desc(num: u8) -> [u8; IFACE_DESCRIPTOR_LEN] {
        [9, INTERFACE_DESCRIPTOR_TYPE, num, 0, 1, 3, 1, 1, 0]
    }

    fn ep_desc() -> [u8; ENDPOINT_DESCRIPTOR_LEN] {
        [7, ENDPOINT_DESCRIPTOR_TYPE, 0x81, 3, 8, 0, 10]
    }

    #[test]
    fn verify_counts_one_config_one_iface_one_endpoint() {
        let mut raw = alloc::vec::Vec::new();
        raw.extend_from_slice(&config_desc(9 + 9 + 7, 1));
        raw.extend_from_slice(&iface_desc(0));
        raw.extend_from_slice(&ep_desc());

        let counts = verify(&raw).unwrap();
        assert_eq!(counts.configs, 1);
        assert_eq!(counts.ifaces, 1);
        assert_eq!(counts.endpoints, 1);
    }

    #[test]
    fn verify_rejects_when_summed_length_overruns_buffer() {
        let mut raw = alloc::vec::Vec::new();
        raw.extend_from_slice(&config_desc(9 + 9, 1));
        raw.extend_from_slice(&iface_desc(0));
        // Truncate one byte short of a full interface descriptor, simulating
        // bLengths that sum past the true buffer end.
        raw.pop();

        assert_eq!(verify(&raw), Err(KernelError::MalformedDescriptor));
    }

    #[test]
    fn verify_rejects_wrong_length_for_recognised_type() {
        let mut bad_iface = iface_desc(0);
        bad_iface[0] = 8; // wrong bLength for an INTERFACE descriptor
        let mut raw = alloc::vec::Vec::new();
        raw.extend_from_slice(&config_desc(9 + 8, 1));
        raw.extend_from_slice(&bad_iface);

        assert_eq!(verify(&raw), Err(KernelError::MalformedDescriptor));
    }

    #[test]
    fn offsets_are_laid_out_configs_then_ifaces_then_endpoints() {
        assert_eq!(offset(RecordKind::Config, 0, 2, 3), 0);
        assert_eq!(offset(RecordKind::Config, 1, 2, 3), core::mem::size_of::<Config>());
        assert_eq!(
            offset(RecordKind::Iface, 0, 2, 3),
            2 * core::mem::size_of::<Config>()
        );
        assert_eq!(
            offset(RecordKind::Endpoint, 0, 2, 3),
            2 * core::mem::size_of::<Config>() + 3 * core::mem::size_of::<Interface>()
        );
    }

    #[test]
    fn string_descriptor_down_converts_utf16le_to_ascii() {
        // "Hi" as UTF-16LE string descriptor: header + H\0 i\0
        let raw = [6u8, STRING_DESCRIPTOR_TYPE, b'H', 0, b'i', 0];
        let mut dest = [0u8; 8];
        let n = string_descriptor_to_ascii(&raw, &mut dest);
        assert_eq!(&dest[..n], b"Hi");
    }
}
