//! Interface matchers
//!
//! Ready-made predicates for [`UsbTransport::open`](crate::UsbTransport::open):
//! protocol presets (fastboot, adb), VID:PID filters and serial selection.

use crate::descriptor::InterfaceInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vendor-specific class shared by the Android USB protocols
pub const ANDROID_CLASS: u8 = 0xff;
pub const ANDROID_SUBCLASS: u8 = 0x42;
pub const FASTBOOT_PROTOCOL: u8 = 0x03;
pub const ADB_PROTOCOL: u8 = 0x01;

/// Which interface protocol to look for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    #[default]
    Fastboot,
    Adb,
}

impl ProtocolKind {
    /// Interface class/subclass/protocol this protocol is exposed on
    pub fn interface_triple(self) -> (u8, u8, u8) {
        match self {
            Self::Fastboot => (ANDROID_CLASS, ANDROID_SUBCLASS, FASTBOOT_PROTOCOL),
            Self::Adb => (ANDROID_CLASS, ANDROID_SUBCLASS, ADB_PROTOCOL),
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fastboot => write!(f, "fastboot"),
            Self::Adb => write!(f, "adb"),
        }
    }
}

impl FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fastboot" => Ok(Self::Fastboot),
            "adb" => Ok(Self::Adb),
            other => Err(format!("Unknown protocol: {}", other)),
        }
    }
}

/// A "VID:PID" pattern where either side may be `*`
///
/// Accepts `0x18d1:0x4ee0`, `18d1:4ee0`, `18d1:*` and `*:*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VidPidFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl VidPidFilter {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.is_none_or(|v| v == vendor_id)
            && self.product_id.is_none_or(|p| p == product_id)
    }
}

fn parse_id(part: &str) -> Result<Option<u16>, String> {
    let part = part.trim();
    if part == "*" {
        return Ok(None);
    }

    let digits = part
        .strip_prefix("0x")
        .or_else(|| part.strip_prefix("0X"))
        .unwrap_or(part);
    u16::from_str_radix(digits, 16)
        .map(Some)
        .map_err(|_| format!("Invalid USB id: {}", part))
}

impl FromStr for VidPidFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid, pid) = s
            .split_once(':')
            .ok_or_else(|| format!("Filter must be VID:PID, got {}", s))?;

        Ok(Self {
            vendor_id: parse_id(vid)?,
            product_id: parse_id(pid)?,
        })
    }
}

impl fmt::Display for VidPidFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vendor_id {
            Some(v) => write!(f, "0x{:04x}:", v)?,
            None => write!(f, "*:")?,
        }
        match self.product_id {
            Some(p) => write!(f, "0x{:04x}", p),
            None => write!(f, "*"),
        }
    }
}

/// Accept/reject rules for candidate interfaces
#[derive(Debug, Clone, Default)]
pub struct InterfaceMatcher {
    interface: Option<(u8, u8, u8)>,
    filters: Vec<VidPidFilter>,
    serial: Option<String>,
    require_bulk_pair: bool,
}

impl InterfaceMatcher {
    /// Matches any claimable interface
    pub fn any() -> Self {
        Self::default()
    }

    /// Interfaces speaking the given protocol with a bulk IN/OUT pair
    pub fn for_protocol(kind: ProtocolKind) -> Self {
        Self {
            interface: Some(kind.interface_triple()),
            require_bulk_pair: true,
            ..Self::default()
        }
    }

    pub fn fastboot() -> Self {
        Self::for_protocol(ProtocolKind::Fastboot)
    }

    pub fn adb() -> Self {
        Self::for_protocol(ProtocolKind::Adb)
    }

    /// Only accept devices matching one of these filters (empty = all)
    pub fn with_filters(mut self, filters: Vec<VidPidFilter>) -> Self {
        self.filters = filters;
        self
    }

    /// Only accept the device with this serial number
    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial = serial.filter(|s| !s.is_empty());
        self
    }

    pub fn require_bulk_pair(mut self, required: bool) -> Self {
        self.require_bulk_pair = required;
        self
    }

    pub fn matches(&self, info: &InterfaceInfo) -> bool {
        if let Some(triple) = self.interface
            && info.interface_triple() != triple
        {
            return false;
        }

        if self.require_bulk_pair && !(info.has_bulk_in && info.has_bulk_out) {
            return false;
        }

        if !self.filters.is_empty()
            && !self
                .filters
                .iter()
                .any(|f| f.matches(info.vendor_id, info.product_id))
        {
            return false;
        }

        match &self.serial {
            Some(serial) => info.serial_number == *serial,
            None => true,
        }
    }

    /// Borrow as a predicate for [`UsbTransport::open`](crate::UsbTransport::open)
    pub fn predicate(&self) -> impl FnMut(&InterfaceInfo) -> bool + '_ {
        move |info| self.matches(info)
    }
}
