//! Interface descriptor info handed to match predicates

use crate::backend::{DeviceIdentity, InterfaceLayout};
use serde::Serialize;

/// Bulk endpoint pair and interface number resolved for one interface
///
/// An address of zero means the interface has no bulk endpoint in that
/// direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkEndpoints {
    pub bulk_in: u8,
    pub bulk_out: u8,
    pub interface: u8,
}

impl BulkEndpoints {
    /// Pick the bulk endpoints of an interface's first alternate setting
    ///
    /// The first bulk endpoint seen in each direction wins; later ones in the
    /// same direction are ignored.
    pub fn resolve(layout: &InterfaceLayout) -> Self {
        let mut endpoints = Self {
            interface: layout.number,
            ..Self::default()
        };

        for ep in layout.endpoints.iter().filter(|ep| ep.is_bulk()) {
            if ep.is_in() {
                if endpoints.bulk_in == 0 {
                    endpoints.bulk_in = ep.address;
                }
            } else if endpoints.bulk_out == 0 {
                endpoints.bulk_out = ep.address;
            }
        }

        endpoints
    }

    pub fn has_bulk_in(&self) -> bool {
        self.bulk_in != 0
    }

    pub fn has_bulk_out(&self) -> bool {
        self.bulk_out != 0
    }
}

/// Everything a predicate gets to see about one candidate interface
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InterfaceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    /// Empty when the device has no serial string or it could not be read
    pub serial_number: String,
    pub has_bulk_in: bool,
    pub has_bulk_out: bool,
}

impl InterfaceInfo {
    pub fn new(
        device: &DeviceIdentity,
        serial_number: &str,
        layout: &InterfaceLayout,
        endpoints: &BulkEndpoints,
    ) -> Self {
        Self {
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            device_class: device.class,
            device_subclass: device.subclass,
            device_protocol: device.protocol,
            interface_class: layout.class,
            interface_subclass: layout.subclass,
            interface_protocol: layout.protocol,
            serial_number: serial_number.to_string(),
            has_bulk_in: endpoints.has_bulk_in(),
            has_bulk_out: endpoints.has_bulk_out(),
        }
    }

    /// Interface class/subclass/protocol triple
    pub fn interface_triple(&self) -> (u8, u8, u8) {
        (
            self.interface_class,
            self.interface_subclass,
            self.interface_protocol,
        )
    }
}
