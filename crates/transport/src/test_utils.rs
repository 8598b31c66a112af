//! Test utilities for the USB transport
//!
//! A scripted in-memory USB host. Every mock device shares its state with a
//! [`DeviceProbe`] so tests can inspect call counts (opens vs closes, claims
//! vs releases, live device references) after driving the transport.
//!
//! # Example
//!
//! ```
//! use transport::test_utils::{MockDeviceSpec, MockHost};
//! use transport::{InterfaceMatcher, UsbTransport};
//!
//! let mut host = MockHost::new();
//! let probe = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "SERIAL1"));
//!
//! let transport = UsbTransport::with_host(host);
//! let handle = transport.open(InterfaceMatcher::fastboot().predicate()).unwrap();
//! assert_eq!(handle.info().serial_number, "SERIAL1");
//! assert_eq!(probe.counts().claims, 1);
//! handle.close();
//! assert_eq!(probe.counts().live_refs, 0);
//! ```

use crate::backend::{
    DeviceIdentity, EndpointLayout, InterfaceLayout, UsbDevice, UsbDeviceHandle, UsbHost,
};
use crate::clock::Clock;
use rusb::TransferType;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Counters for every native call a mock device received
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub opens: u32,
    pub closes: u32,
    pub claims: u32,
    pub releases: u32,
    /// Device references currently held outside the host
    pub live_refs: i32,
    pub reads: u32,
    pub writes: u32,
}

/// Recorded bulk transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub endpoint: u8,
    pub len: usize,
    pub timeout: Duration,
}

/// Description of a mock device, consumed by [`MockHost::add_device`]
#[derive(Debug, Clone)]
pub struct MockDeviceSpec {
    pub identity: DeviceIdentity,
    pub serial_number: String,
    pub interfaces: Vec<InterfaceLayout>,
    pub open_error: Option<rusb::Error>,
    pub descriptor_error: Option<rusb::Error>,
    pub config_error: Option<rusb::Error>,
    pub serial_error: Option<rusb::Error>,
    pub claim_failures: Vec<u8>,
}

impl MockDeviceSpec {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            identity: DeviceIdentity {
                vendor_id,
                product_id,
                ..DeviceIdentity::default()
            },
            serial_number: String::new(),
            interfaces: Vec::new(),
            open_error: None,
            descriptor_error: None,
            config_error: None,
            serial_error: None,
            claim_failures: Vec::new(),
        }
    }

    /// A device with a single fastboot interface (0xff/0x42/0x03, 0x81/0x01)
    pub fn fastboot(vendor_id: u16, product_id: u16, serial: &str) -> Self {
        Self::new(vendor_id, product_id)
            .with_serial(serial)
            .with_interface(bulk_interface(0, (0xff, 0x42, 0x03), 0x81, 0x01))
    }

    pub fn with_serial(mut self, serial: &str) -> Self {
        self.serial_number = serial.to_string();
        self.identity.serial_number_index = (!serial.is_empty()).then_some(3);
        self
    }

    pub fn with_interface(mut self, layout: InterfaceLayout) -> Self {
        self.interfaces.push(layout);
        self
    }

    pub fn with_open_error(mut self, err: rusb::Error) -> Self {
        self.open_error = Some(err);
        self
    }

    pub fn with_descriptor_error(mut self, err: rusb::Error) -> Self {
        self.descriptor_error = Some(err);
        self
    }

    pub fn with_config_error(mut self, err: rusb::Error) -> Self {
        self.config_error = Some(err);
        self
    }

    pub fn with_serial_error(mut self, err: rusb::Error) -> Self {
        self.serial_error = Some(err);
        self
    }

    pub fn with_claim_failure(mut self, interface: u8) -> Self {
        self.claim_failures.push(interface);
        self
    }
}

/// Build an interface layout from a class triple and raw endpoints
pub fn interface(
    number: u8,
    (class, subclass, protocol): (u8, u8, u8),
    endpoints: &[(u8, TransferType)],
) -> InterfaceLayout {
    InterfaceLayout {
        number,
        class,
        subclass,
        protocol,
        endpoints: endpoints
            .iter()
            .map(|&(address, transfer_type)| EndpointLayout {
                address,
                transfer_type,
            })
            .collect(),
    }
}

/// Interface with exactly one bulk IN and one bulk OUT endpoint
pub fn bulk_interface(
    number: u8,
    triple: (u8, u8, u8),
    ep_in: u8,
    ep_out: u8,
) -> InterfaceLayout {
    interface(
        number,
        triple,
        &[(ep_in, TransferType::Bulk), (ep_out, TransferType::Bulk)],
    )
}

#[derive(Debug)]
struct DeviceState {
    spec: MockDeviceSpec,
    counts: CallCounts,
    /// (handle id, interface) for every claim held by an open handle
    claimed: Vec<(u32, u8)>,
    next_handle_id: u32,
    /// Successful opens left before the device disappears (None = forever)
    opens_until_gone: Option<u32>,
    read_queue: VecDeque<Result<Vec<u8>, rusb::Error>>,
    write_queue: VecDeque<Result<usize, rusb::Error>>,
    reads: Vec<TransferRecord>,
    written: Vec<(u8, Vec<u8>)>,
    write_timeouts: Vec<Duration>,
}

type SharedState = Rc<RefCell<DeviceState>>;

/// Observer for one mock device's state
#[derive(Clone)]
pub struct DeviceProbe {
    state: SharedState,
}

impl DeviceProbe {
    pub fn counts(&self) -> CallCounts {
        self.state.borrow().counts
    }

    /// Interfaces currently claimed through an open handle
    pub fn claimed(&self) -> Vec<u8> {
        self.state
            .borrow()
            .claimed
            .iter()
            .map(|&(_, interface)| interface)
            .collect()
    }

    /// Let `opens` more opens succeed, then fail every open with NoDevice
    pub fn disconnect_after_opens(&self, opens: u32) {
        self.state.borrow_mut().opens_until_gone = Some(opens);
    }

    /// Queue data returned by the next bulk read
    pub fn push_read(&self, data: &[u8]) {
        self.state.borrow_mut().read_queue.push_back(Ok(data.to_vec()));
    }

    pub fn push_read_error(&self, err: rusb::Error) {
        self.state.borrow_mut().read_queue.push_back(Err(err));
    }

    /// Override the result of the next bulk write (default: full length)
    pub fn push_write_result(&self, result: Result<usize, rusb::Error>) {
        self.state.borrow_mut().write_queue.push_back(result);
    }

    pub fn reads(&self) -> Vec<TransferRecord> {
        self.state.borrow().reads.clone()
    }

    /// Payloads written, with the endpoint each went to
    pub fn written(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.borrow().written.clone()
    }

    pub fn write_timeouts(&self) -> Vec<Duration> {
        self.state.borrow().write_timeouts.clone()
    }
}

/// Scripted host holding mock devices in listing order
#[derive(Default)]
pub struct MockHost {
    devices: Vec<SharedState>,
    list_error: Option<rusb::Error>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&mut self, spec: MockDeviceSpec) -> DeviceProbe {
        let state = Rc::new(RefCell::new(DeviceState {
            spec,
            counts: CallCounts::default(),
            claimed: Vec::new(),
            next_handle_id: 0,
            opens_until_gone: None,
            read_queue: VecDeque::new(),
            write_queue: VecDeque::new(),
            reads: Vec::new(),
            written: Vec::new(),
            write_timeouts: Vec::new(),
        }));
        self.devices.push(Rc::clone(&state));
        DeviceProbe { state }
    }

    /// Make device listing itself fail
    pub fn with_list_error(mut self, err: rusb::Error) -> Self {
        self.list_error = Some(err);
        self
    }
}

impl UsbHost for MockHost {
    type Device = MockDevice;

    fn devices(&self) -> Result<Vec<MockDevice>, rusb::Error> {
        if let Some(err) = self.list_error {
            return Err(err);
        }

        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(index, state)| MockDevice::take_ref(index, Rc::clone(state)))
            .collect())
    }
}

/// Reference-counted handle on a mock device
pub struct MockDevice {
    index: usize,
    state: SharedState,
}

impl MockDevice {
    fn take_ref(index: usize, state: SharedState) -> Self {
        state.borrow_mut().counts.live_refs += 1;
        Self { index, state }
    }
}

impl Clone for MockDevice {
    fn clone(&self) -> Self {
        Self::take_ref(self.index, Rc::clone(&self.state))
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.state.borrow_mut().counts.live_refs -= 1;
    }
}

impl UsbDevice for MockDevice {
    type Handle = MockHandle;

    fn open(&self) -> Result<MockHandle, rusb::Error> {
        let mut state = self.state.borrow_mut();

        if let Some(err) = state.spec.open_error {
            return Err(err);
        }
        if let Some(left) = state.opens_until_gone.as_mut() {
            if *left == 0 {
                return Err(rusb::Error::NoDevice);
            }
            *left -= 1;
        }

        state.counts.opens += 1;
        state.next_handle_id += 1;
        Ok(MockHandle {
            id: state.next_handle_id,
            state: Rc::clone(&self.state),
        })
    }

    fn device_descriptor(&self) -> Result<DeviceIdentity, rusb::Error> {
        let state = self.state.borrow();
        match state.spec.descriptor_error {
            Some(err) => Err(err),
            None => Ok(state.spec.identity),
        }
    }

    fn active_interfaces(&self) -> Result<Vec<InterfaceLayout>, rusb::Error> {
        let state = self.state.borrow();
        match state.spec.config_error {
            Some(err) => Err(err),
            None => Ok(state.spec.interfaces.clone()),
        }
    }

    fn describe(&self) -> String {
        format!("mock device {}", self.index)
    }
}

/// Open mock device; dropping it counts as a close
pub struct MockHandle {
    id: u32,
    state: SharedState,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.counts.closes += 1;
        // Closing a native handle gives up its own claims only
        let id = self.id;
        state.claimed.retain(|&(owner, _)| owner != id);
    }
}

impl UsbDeviceHandle for MockHandle {
    fn claim_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        let mut state = self.state.borrow_mut();
        if state.spec.claim_failures.contains(&interface) {
            return Err(rusb::Error::Busy);
        }

        state.counts.claims += 1;
        state.claimed.push((self.id, interface));
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        let mut state = self.state.borrow_mut();
        let position = state
            .claimed
            .iter()
            .position(|&claim| claim == (self.id, interface))
            .ok_or(rusb::Error::NotFound)?;

        state.claimed.remove(position);
        state.counts.releases += 1;
        Ok(())
    }

    fn read_serial_number(&self, _index: u8) -> Result<String, rusb::Error> {
        let state = self.state.borrow();
        match state.spec.serial_error {
            Some(err) => Err(err),
            None => Ok(state.spec.serial_number.clone()),
        }
    }

    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        let mut state = self.state.borrow_mut();
        state.counts.reads += 1;
        state.reads.push(TransferRecord {
            endpoint,
            len: buf.len(),
            timeout,
        });

        // An empty script stands in for a transfer that never completes
        let data = state
            .read_queue
            .pop_front()
            .unwrap_or(Err(rusb::Error::Timeout))?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn write_bulk(
        &self,
        endpoint: u8,
        buf: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        let mut state = self.state.borrow_mut();
        state.counts.writes += 1;
        state.write_timeouts.push(timeout);

        let written = state.write_queue.pop_front().unwrap_or(Ok(buf.len()))?;
        state.written.push((endpoint, buf[..written.min(buf.len())].to_vec()));
        Ok(written)
    }
}

/// Clock that only moves when slept on
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Rc<Cell<Duration>>,
    sleeps: Rc<Cell<u32>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Rc::new(Cell::new(Duration::ZERO)),
            sleeps: Rc::new(Cell::new(0)),
        }
    }

    /// Total simulated time slept so far
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }

    pub fn sleeps(&self) -> u32 {
        self.sleeps.get()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
        self.sleeps.set(self.sleeps.get() + 1);
    }
}
