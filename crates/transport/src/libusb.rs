//! libusb-backed host access via `rusb`

use crate::backend::{
    DeviceIdentity, EndpointLayout, InterfaceLayout, UsbDevice, UsbDeviceHandle, UsbHost,
};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Process-wide libusb context, created on first use and never torn down
static CONTEXT: OnceLock<Context> = OnceLock::new();

/// Get the shared libusb context, creating it if needed
pub fn global_context() -> Result<&'static Context, rusb::Error> {
    if let Some(context) = CONTEXT.get() {
        return Ok(context);
    }

    let context = Context::new()?;
    debug!("Created libusb context");
    Ok(CONTEXT.get_or_init(|| context))
}

/// Host access through the shared libusb context
#[derive(Clone)]
pub struct LibusbHost {
    context: Context,
}

impl LibusbHost {
    /// Create a host bound to the process-wide context
    pub fn new() -> Result<Self, rusb::Error> {
        Ok(Self {
            context: global_context()?.clone(),
        })
    }
}

impl UsbHost for LibusbHost {
    type Device = Device<Context>;

    fn devices(&self) -> Result<Vec<Self::Device>, rusb::Error> {
        let list = self.context.devices()?;
        Ok(list.iter().collect())
    }
}

impl UsbDevice for Device<Context> {
    type Handle = DeviceHandle<Context>;

    fn open(&self) -> Result<Self::Handle, rusb::Error> {
        Device::open(self)
    }

    fn device_descriptor(&self) -> Result<DeviceIdentity, rusb::Error> {
        let desc = Device::device_descriptor(self)?;

        Ok(DeviceIdentity {
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            class: desc.class_code(),
            subclass: desc.sub_class_code(),
            protocol: desc.protocol_code(),
            serial_number_index: desc.serial_number_string_index(),
        })
    }

    fn active_interfaces(&self) -> Result<Vec<InterfaceLayout>, rusb::Error> {
        let config = self.active_config_descriptor()?;

        // Interfaces without any alternate setting have nothing to probe
        let interfaces = config
            .interfaces()
            .filter_map(|interface| {
                let alt = interface.descriptors().next()?;
                Some(InterfaceLayout {
                    number: alt.interface_number(),
                    class: alt.class_code(),
                    subclass: alt.sub_class_code(),
                    protocol: alt.protocol_code(),
                    endpoints: alt
                        .endpoint_descriptors()
                        .map(|ep| EndpointLayout {
                            address: ep.address(),
                            transfer_type: ep.transfer_type(),
                        })
                        .collect(),
                })
            })
            .collect();

        Ok(interfaces)
    }

    fn describe(&self) -> String {
        format!("bus {:03} address {:03}", self.bus_number(), self.address())
    }
}

impl UsbDeviceHandle for DeviceHandle<Context> {
    fn claim_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        DeviceHandle::claim_interface(self, interface)
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        DeviceHandle::release_interface(self, interface)
    }

    fn read_serial_number(&self, index: u8) -> Result<String, rusb::Error> {
        self.read_string_descriptor_ascii(index)
    }

    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        DeviceHandle::read_bulk(self, endpoint, buf, timeout)
    }

    fn write_bulk(
        &self,
        endpoint: u8,
        buf: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        DeviceHandle::write_bulk(self, endpoint, buf, timeout)
    }
}
