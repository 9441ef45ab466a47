//! The enumeration state machine: one URB in flight at a time, driven
//! entirely by the host controller's completion callback. Each state's
//! completion handler re-arms and re-submits the shared URB for the next
//! step rather than returning up a call stack, per the re-entrant-callback
//! design this core keeps instead of a coroutine.

use super::descriptor::{self, DescriptorCounts};
use super::device::UsbDevice;
use super::hc::{PipeConfig, PipeType, Urb, UrbStatus};
use crate::lib::error::KernelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumState {
    Idle,
    GetEp0Size,
    GetDevDesc,
    SetAddress,
    GetDescLength,
    GetDescriptors,
    GetProductName,
    GetManufacturerName,
}

const GET_DESCRIPTOR: u8 = 6;
const SET_ADDRESS: u8 = 5;
const DEVICE_REQUEST_IN: u8 = 0x80;
const DEVICE_REQUEST_OUT: u8 = 0x00;

fn setup_get_descriptor(desc_type: u8, index: u8, lang: u16, length: u16) -> [u8; 8] {
    let value = ((desc_type as u16) << 8) | index as u16;
    [
        DEVICE_REQUEST_IN,
        GET_DESCRIPTOR,
        (value & 0xff) as u8,
        (value >> 8) as u8,
        (lang & 0xff) as u8,
        (lang >> 8) as u8,
        (length & 0xff) as u8,
        (length >> 8) as u8,
    ]
}

fn setup_set_address(address: u8) -> [u8; 8] {
    [DEVICE_REQUEST_OUT, SET_ADDRESS, address, 0, 0, 0, 0, 0]
}

/// A device whose discovery the engine is actively tracking. Created when
/// a CONNECTION root-hub event arrives, dropped on fatal enumeration
/// failure or on successful driver binding.
pub struct Enumeration {
    pub device: &'static UsbDevice,
    pub state: EnumState,
    pub urb: &'static Urb,
    buffer: *mut u8,
    buffer_len: usize,
    pending_counts: DescriptorCounts,
}

impl Enumeration {
    pub fn new(device: &'static UsbDevice, urb: &'static Urb, buffer: *mut u8, buffer_len: usize) -> Self {
        Self {
            device,
            state: EnumState::Idle,
            urb,
            buffer,
            buffer_len,
            pending_counts: DescriptorCounts::default(),
        }
    }

    /// Kick off enumeration after the host controller reports a bus reset
    /// has completed. Requests the first 8 bytes of the device descriptor
    /// over the default pipe, pre-configured to 64-byte transfers.
    pub fn start(&mut self) -> Result<(), KernelError> {
        self.state = EnumState::GetEp0Size;
        let setup = setup_get_descriptor(descriptor::DEVICE_DESCRIPTOR_TYPE, 0, 0, 8);
        self.submit(setup, self.buffer, 8)
    }

    fn submit(&self, setup: [u8; 8], buffer: *mut u8, len: usize) -> Result<(), KernelError> {
        self.urb.arm(setup, buffer, len, super::on_urb_complete, self.device as *const _ as usize);
        super::controller()?.submit(super::control_pipe(self.device), self.urb)
    }

    /// Advance the state machine on a URB completion. Returns `Err` on a
    /// fatal enumeration error (that device's enumeration is abandoned);
    /// `Ok(true)` when enumeration has finished (driver binding included).
    pub fn on_complete(&mut self) -> Result<bool, KernelError> {
        if self.urb.status.get() != UrbStatus::Ok {
            return Err(KernelError::TransferFailed);
        }

        match self.state {
            EnumState::GetEp0Size => self.handle_ep0_size(),
            EnumState::GetDevDesc => self.handle_dev_desc(),
            EnumState::SetAddress => self.handle_set_address(),
            EnumState::GetDescLength => self.handle_desc_length(),
            EnumState::GetDescriptors => self.handle_descriptors(),
            EnumState::GetProductName => self.handle_product_name(),
            EnumState::GetManufacturerName => self.handle_manufacturer_name(),
            EnumState::Idle => Ok(true),
        }
    }

    fn handle_ep0_size(&mut self) -> Result<bool, KernelError> {
        let raw = unsafe { core::slice::from_raw_parts(self.buffer, 8) };
        let max_packet_size0 = raw[7];
        if !(8..=1024).contains(&(max_packet_size0 as u16)) {
            return Err(KernelError::TransferFailed);
        }
        self.device.ep0_max_packet_size.set(max_packet_size0 as u16);
        super::reconfigure_control_pipe(self.device, max_packet_size0 as u16);

        self.state = EnumState::GetDevDesc;
        let setup = setup_get_descriptor(descriptor::DEVICE_DESCRIPTOR_TYPE, 0, 0, descriptor::DEVICE_DESCRIPTOR_LEN as u16);
        self.submit(setup, self.buffer, descriptor::DEVICE_DESCRIPTOR_LEN)?;
        Ok(false)
    }

    fn handle_dev_desc(&mut self) -> Result<bool, KernelError> {
        let raw = unsafe { core::slice::from_raw_parts(self.buffer, descriptor::DEVICE_DESCRIPTOR_LEN) };
        let desc = descriptor::DeviceDescriptor::parse(raw).ok_or(KernelError::MalformedDescriptor)?;
        self.device.device_descriptor.set(desc);

        self.state = EnumState::SetAddress;
        let address = super::alloc_address().ok_or(KernelError::NoFreeAddress)?;
        self.device.address.set(address);
        let setup = setup_set_address(address);
        self.submit(setup, core::ptr::null_mut(), 0)?;
        Ok(false)
    }

    fn handle_set_address(&mut self) -> Result<bool, KernelError> {
        super::reconfigure_control_pipe_address(self.device, self.device.address.get());

        self.state = EnumState::GetDescLength;
        let setup = setup_get_descriptor(descriptor::CONFIGURATION_DESCRIPTOR_TYPE, 0, 0, descriptor::CONFIG_DESCRIPTOR_LEN as u16);
        self.submit(setup, self.buffer, descriptor::CONFIG_DESCRIPTOR_LEN)?;
        Ok(false)
    }

    fn handle_desc_length(&mut self) -> Result<bool, KernelError> {
        if self.urb.actual_length.get() != descriptor::CONFIG_DESCRIPTOR_LEN {
            return Err(KernelError::MalformedDescriptor);
        }
        let raw = unsafe { core::slice::from_raw_parts(self.buffer, descriptor::CONFIG_DESCRIPTOR_LEN) };
        let total_length = u16::from_le_bytes([raw[2], raw[3]]) as usize;
        if total_length > self.buffer_len {
            return Err(KernelError::MalformedDescriptor);
        }

        self.state = EnumState::GetDescriptors;
        let setup = setup_get_descriptor(descriptor::CONFIGURATION_DESCRIPTOR_TYPE, 0, 0, total_length as u16);
        self.submit(setup, self.buffer, total_length)?;
        Ok(false)
    }

    fn handle_descriptors(&mut self) -> Result<bool, KernelError> {
        let raw = unsafe { core::slice::from_raw_parts(self.buffer, self.urb.actual_length.get()) };
        let counts = descriptor::verify(raw)?;
        let arena = descriptor::allocate(counts)?;
        unsafe { descriptor::parse(raw, arena, counts, self.device)? };
        self.device.num_configs.set(counts.configs);
        self.device.configs.set(arena as *const _);
        self.pending_counts = counts;

        let dev_desc = self.device.device_descriptor.get();
        if dev_desc.product_index != 0 {
            self.state = EnumState::GetProductName;
            let setup = setup_get_descriptor(descriptor::STRING_DESCRIPTOR_TYPE, dev_desc.product_index, 0, 255);
            self.submit(setup, self.buffer, 255)?;
            Ok(false)
        } else if dev_desc.manufacturer_index != 0 {
            self.state = EnumState::GetManufacturerName;
            let setup = setup_get_descriptor(descriptor::STRING_DESCRIPTOR_TYPE, dev_desc.manufacturer_index, 0, 255);
            self.submit(setup, self.buffer, 255)?;
            Ok(false)
        } else {
            self.finish()
        }
    }

    fn handle_product_name(&mut self) -> Result<bool, KernelError> {
        let len = self.urb.actual_length.get();
        let raw = unsafe { core::slice::from_raw_parts(self.buffer, len) };
        let mut ascii = [0u8; super::device::MAX_NAME_LEN];
        let n = descriptor::string_descriptor_to_ascii(raw, &mut ascii);
        self.device.set_product(&ascii[..n]);

        let dev_desc = self.device.device_descriptor.get();
        if dev_desc.manufacturer_index != 0 {
            self.state = EnumState::GetManufacturerName;
            let setup = setup_get_descriptor(descriptor::STRING_DESCRIPTOR_TYPE, dev_desc.manufacturer_index, 0, 255);
            self.submit(setup, self.buffer, 255)?;
            Ok(false)
        } else {
            self.finish()
        }
    }

    fn handle_manufacturer_name(&mut self) -> Result<bool, KernelError> {
        let len = self.urb.actual_length.get();
        let raw = unsafe { core::slice::from_raw_parts(self.buffer, len) };
        let mut ascii = [0u8; super::device::MAX_NAME_LEN];
        let n = descriptor::string_descriptor_to_ascii(raw, &mut ascii);
        self.device.set_manufacturer(&ascii[..n]);
        self.finish()
    }

    fn finish(&mut self) -> Result<bool, KernelError> {
        self.state = EnumState::Idle;
        super::bind_drivers(self.device);
        Ok(true)
    }
}

#[allow(dead_code)]
fn _pipe_type_marker(_: PipeType, _: PipeConfig) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_get_descriptor_encodes_wvalue_as_type_high_index_low() {
        let setup = setup_get_descriptor(descriptor::DEVICE_DESCRIPTOR_TYPE, 0, 0, 18);
        assert_eq!(setup[0], DEVICE_REQUEST_IN);
        assert_eq!(setup[1], GET_DESCRIPTOR);
        assert_eq!(setup[2], 0); // descriptor index
        assert_eq!(setup[3], descriptor::DEVICE_DESCRIPTOR_TYPE);
        assert_eq!(u16::from_le_bytes([setup[6], setup[7]]), 18);
    }

    #[test]
    fn setup_set_address_carries_address_in_wvalue() {
        let setup = setup_set_address(5);
        assert_eq!(setup[1], SET_ADDRESS);
        assert_eq!(setup[2], 5);
    }
}
