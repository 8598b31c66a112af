//! USB transport
//!
//! Finds a device interface accepted by a caller-supplied predicate, claims
//! it, and exposes blocking bulk read/write over its endpoints.
//!
//! Probing a device goes: open, read the device descriptor, read the serial
//! string, read the active configuration, then for each interface in index
//! order resolve its bulk endpoints, claim it and ask the predicate. The first
//! accepted interface stays claimed and its device is returned as a
//! [`UsbHandle`]. Anything that fails on one device only skips that device.

use crate::backend::{UsbDevice, UsbDeviceHandle, UsbHost};
use crate::clock::{Clock, SystemClock};
use crate::descriptor::{BulkEndpoints, InterfaceInfo};
use crate::error::{Result, TransportError};
use crate::libusb::LibusbHost;
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long [`UsbHandle::wait_for_disconnect`] waits before giving up
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Delay between re-open attempts while waiting for a disconnect
pub const DISCONNECT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// libusb treats a zero timeout as "wait forever"
const NO_TIMEOUT: Duration = Duration::ZERO;

/// Entry point for finding and opening devices
pub struct UsbTransport<H: UsbHost, C: Clock + Clone = SystemClock> {
    host: H,
    clock: C,
}

impl UsbTransport<LibusbHost> {
    /// Create a transport backed by the process-wide libusb context
    pub fn new() -> Result<Self> {
        let host = LibusbHost::new().map_err(TransportError::Context)?;
        Ok(Self::with_host(host))
    }
}

impl<H: UsbHost> UsbTransport<H> {
    pub fn with_host(host: H) -> Self {
        Self::with_clock(host, SystemClock)
    }
}

impl<H: UsbHost, C: Clock + Clone> UsbTransport<H, C> {
    pub fn with_clock(host: H, clock: C) -> Self {
        Self { host, clock }
    }

    /// Open the first interface the predicate accepts
    ///
    /// Devices are probed in listing order and interfaces in index order.
    /// The predicate only sees interfaces that could be claimed. Returns
    /// [`TransportError::NoMatch`] when nothing was accepted, in which case
    /// every probed device has been released and closed again.
    pub fn open<F>(&self, mut predicate: F) -> Result<UsbHandle<H::Device, C>>
    where
        F: FnMut(&InterfaceInfo) -> bool,
    {
        let devices = self.host.devices().map_err(TransportError::Enumerate)?;
        debug!("Probing {} USB devices", devices.len());

        for device in &devices {
            if let Some(matched) = probe(device, &mut predicate) {
                info!(
                    "Opened {} ({:04x}:{:04x}) interface {}: in={:#04x} out={:#04x}",
                    device.describe(),
                    matched.info.vendor_id,
                    matched.info.product_id,
                    matched.endpoints.interface,
                    matched.endpoints.bulk_in,
                    matched.endpoints.bulk_out
                );

                return Ok(UsbHandle {
                    handle: matched.handle,
                    // The handle keeps its own device reference alive past the list
                    device: device.clone(),
                    endpoints: matched.endpoints,
                    info: matched.info,
                    clock: self.clock.clone(),
                });
            }
        }

        debug!("No matching interface on any of {} devices", devices.len());
        Err(TransportError::NoMatch)
    }

    /// Report every claimable interface the filter accepts
    ///
    /// Runs the same probe as [`open`](Self::open) but rejects every
    /// interface, so nothing is left claimed or open afterwards.
    pub fn list<F>(&self, mut filter: F) -> Result<Vec<InterfaceInfo>>
    where
        F: FnMut(&InterfaceInfo) -> bool,
    {
        let mut found = Vec::new();

        let outcome = self.open(|info| {
            if filter(info) {
                found.push(info.clone());
            }
            false
        });

        match outcome {
            Ok(handle) => handle.close(),
            Err(TransportError::NoMatch) => {}
            Err(e) => return Err(e),
        }

        Ok(found)
    }
}

struct Matched<H> {
    handle: H,
    endpoints: BulkEndpoints,
    info: InterfaceInfo,
}

/// Probe one device; on a miss the native handle is dropped (closed) here
fn probe<D, F>(device: &D, predicate: &mut F) -> Option<Matched<D::Handle>>
where
    D: UsbDevice,
    F: FnMut(&InterfaceInfo) -> bool,
{
    let mut handle = match device.open() {
        Ok(handle) => handle,
        Err(e) => {
            debug!("Skipping {}: open failed: {}", device.describe(), e);
            return None;
        }
    };

    let identity = match device.device_descriptor() {
        Ok(identity) => identity,
        Err(e) => {
            debug!(
                "Skipping {}: device descriptor unavailable: {}",
                device.describe(),
                e
            );
            return None;
        }
    };

    let serial_number = match identity.serial_number_index {
        Some(index) => handle.read_serial_number(index).unwrap_or_else(|e| {
            debug!("Could not read serial of {}: {}", device.describe(), e);
            String::new()
        }),
        None => String::new(),
    };

    let interfaces = match device.active_interfaces() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            debug!(
                "Skipping {}: active configuration unavailable: {}",
                device.describe(),
                e
            );
            return None;
        }
    };

    for layout in &interfaces {
        let endpoints = BulkEndpoints::resolve(layout);
        let info = InterfaceInfo::new(&identity, &serial_number, layout, &endpoints);

        if let Err(e) = handle.claim_interface(endpoints.interface) {
            debug!(
                "Could not claim interface {} on {}: {}",
                endpoints.interface,
                device.describe(),
                e
            );
            continue;
        }

        if predicate(&info) {
            return Some(Matched {
                handle,
                endpoints,
                info,
            });
        }

        if let Err(e) = handle.release_interface(endpoints.interface) {
            warn!(
                "Failed to release interface {} on {}: {}",
                endpoints.interface,
                device.describe(),
                e
            );
        }
    }

    None
}

/// An opened device with one claimed bulk interface
///
/// Owns the native handle and one reference on the device. Both are released
/// by [`close`](Self::close), or on drop.
pub struct UsbHandle<D: UsbDevice, C: Clock = SystemClock> {
    // Declared before `device` so the native handle closes first
    handle: D::Handle,
    device: D,
    endpoints: BulkEndpoints,
    info: InterfaceInfo,
    clock: C,
}

impl<D: UsbDevice, C: Clock> UsbHandle<D, C> {
    pub fn endpoints(&self) -> BulkEndpoints {
        self.endpoints
    }

    /// Descriptor info of the interface that was accepted
    pub fn info(&self) -> &InterfaceInfo {
        &self.info
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Blocking bulk read from the IN endpoint, without timeout
    ///
    /// Returns the byte count the device actually sent.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let endpoint = self.endpoints.bulk_in;

        self.handle
            .read_bulk(endpoint, buf, NO_TIMEOUT)
            .map_err(|source| {
                debug!("Bulk read on {:#04x} failed: {}", endpoint, source);
                TransportError::Transfer { endpoint, source }
            })
    }

    /// Blocking bulk write to the OUT endpoint, without timeout
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let endpoint = self.endpoints.bulk_out;

        self.handle
            .write_bulk(endpoint, buf, NO_TIMEOUT)
            .map_err(|source| {
                debug!("Bulk write on {:#04x} failed: {}", endpoint, source);
                TransportError::Transfer { endpoint, source }
            })
    }

    /// Close the native handle and drop the device reference
    pub fn close(self) {
        debug!("Closing {}", self.device.describe());

        let Self { handle, device, .. } = self;
        drop(handle);
        drop(device);
    }

    /// Wait until the device can no longer be opened
    ///
    /// Polls by re-opening the device every [`DISCONNECT_POLL_INTERVAL`].
    /// A device that re-enumerates under a new identity within the window is
    /// not noticed. Fails with [`TransportError::DisconnectTimeout`] after
    /// [`DISCONNECT_TIMEOUT`].
    pub fn wait_for_disconnect(&self) -> Result<()> {
        let deadline = self.clock.now() + DISCONNECT_TIMEOUT;

        while self.clock.now() < deadline {
            match self.device.open() {
                Ok(probe) => drop(probe),
                Err(e) => {
                    debug!("{} disconnected ({})", self.device.describe(), e);
                    return Ok(());
                }
            }
            self.clock.sleep(DISCONNECT_POLL_INTERVAL);
        }

        warn!(
            "{} still present after {:?}",
            self.device.describe(),
            DISCONNECT_TIMEOUT
        );
        Err(TransportError::DisconnectTimeout(DISCONNECT_TIMEOUT))
    }
}

impl<D: UsbDevice, C: Clock> io::Read for UsbHandle<D, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        UsbHandle::read(self, buf).map_err(Into::into)
    }
}

impl<D: UsbDevice, C: Clock> io::Write for UsbHandle<D, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        UsbHandle::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
