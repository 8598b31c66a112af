//! USB host access boundary
//!
//! The transport never talks to libusb directly. It goes through these traits
//! so that enumeration and transfer behaviour can be driven by a scripted
//! backend in tests (see `test_utils`) and by `rusb` in production
//! (see [`crate::libusb`]).

use rusb::TransferType;
use std::time::Duration;

/// Identity fields read from a device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    /// String descriptor index of the serial number, if the device has one
    pub serial_number_index: Option<u8>,
}

/// One endpoint of an interface's first alternate setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLayout {
    /// bEndpointAddress; bit 7 set means IN (device to host)
    pub address: u8,
    pub transfer_type: TransferType,
}

impl EndpointLayout {
    pub fn is_in(&self) -> bool {
        self.address & 0x80 != 0
    }

    pub fn is_bulk(&self) -> bool {
        self.transfer_type == TransferType::Bulk
    }
}

/// First alternate setting of one interface in the active configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceLayout {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointLayout>,
}

/// Something that can list the USB devices currently attached
pub trait UsbHost {
    type Device: UsbDevice;

    /// All attached devices, in the order the host reports them
    fn devices(&self) -> Result<Vec<Self::Device>, rusb::Error>;
}

/// A reference to an attached device
///
/// Cloning takes another reference on the underlying device object and
/// dropping releases it.
pub trait UsbDevice: Clone {
    type Handle: UsbDeviceHandle;

    fn open(&self) -> Result<Self::Handle, rusb::Error>;

    fn device_descriptor(&self) -> Result<DeviceIdentity, rusb::Error>;

    /// Interfaces of the active configuration, in ascending index order
    fn active_interfaces(&self) -> Result<Vec<InterfaceLayout>, rusb::Error>;

    /// Short human-readable location used in log messages
    fn describe(&self) -> String {
        String::from("usb device")
    }
}

/// An open device; dropping it closes the native handle
pub trait UsbDeviceHandle {
    fn claim_interface(&mut self, interface: u8) -> Result<(), rusb::Error>;

    fn release_interface(&mut self, interface: u8) -> Result<(), rusb::Error>;

    fn read_serial_number(&self, index: u8) -> Result<String, rusb::Error>;

    /// A zero timeout blocks until the transfer completes or fails
    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;

    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration)
    -> Result<usize, rusb::Error>;
}
