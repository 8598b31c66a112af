//! USB transport for Android device-flashing clients
//!
//! Finds a USB interface accepted by a caller-supplied predicate (usually an
//! [`InterfaceMatcher`] for fastboot or adb), claims it, and exposes blocking
//! bulk read/write over its endpoints plus a coarse disconnect wait.
//!
//! All operations block the calling thread. Host access goes through the
//! [`backend`] traits, implemented for `rusb` in [`libusb`] and by a scripted
//! mock in `test_utils` (behind the `test-utils` feature).

pub mod backend;
pub mod clock;
pub mod descriptor;
pub mod error;
pub mod libusb;
pub mod matcher;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use backend::{
    DeviceIdentity, EndpointLayout, InterfaceLayout, UsbDevice, UsbDeviceHandle, UsbHost,
};
pub use clock::{Clock, SystemClock};
pub use descriptor::{BulkEndpoints, InterfaceInfo};
pub use error::{Result, TransportError};
pub use libusb::LibusbHost;
pub use matcher::{InterfaceMatcher, ProtocolKind, VidPidFilter};
pub use transport::{DISCONNECT_POLL_INTERVAL, DISCONNECT_TIMEOUT, UsbHandle, UsbTransport};
