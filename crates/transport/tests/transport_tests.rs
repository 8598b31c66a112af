//! Integration tests for the USB transport
//!
//! Drives the transport against the scripted mock host, covering:
//! - Device and interface probing order
//! - Claim/release and open/close balance on rejected devices
//! - Device reference ownership across open and close
//! - Bulk read/write result passthrough
//! - Disconnect polling with a simulated clock

use rusb::TransferType;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::time::Duration;
use transport::test_utils::{
    DeviceProbe, MockClock, MockDeviceSpec, MockHost, bulk_interface, interface,
};
use transport::{
    DISCONNECT_POLL_INTERVAL, DISCONNECT_TIMEOUT, InterfaceInfo, InterfaceMatcher,
    TransportError, UsbTransport,
};

const FASTBOOT: (u8, u8, u8) = (0xff, 0x42, 0x03);
const ADB: (u8, u8, u8) = (0xff, 0x42, 0x01);
const MASS_STORAGE: (u8, u8, u8) = (0x08, 0x06, 0x50);

fn accept_all(_: &InterfaceInfo) -> bool {
    true
}

fn reject_all(_: &InterfaceInfo) -> bool {
    false
}

mod open {
    use super::*;

    #[test]
    fn test_open_matches_fastboot_interface() {
        let mut host = MockHost::new();
        let probe = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "FB01"));

        let transport = UsbTransport::with_host(host);
        let handle = transport
            .open(InterfaceMatcher::fastboot().predicate())
            .unwrap();

        let endpoints = handle.endpoints();
        assert_eq!(endpoints.bulk_in, 0x81);
        assert_eq!(endpoints.bulk_out, 0x01);
        assert_eq!(endpoints.interface, 0);
        assert_eq!(handle.info().serial_number, "FB01");
        assert_eq!(handle.info().vendor_id, 0x18d1);

        assert_eq!(probe.claimed(), vec![0]);
        let counts = probe.counts();
        assert_eq!(counts.opens, 1);
        assert_eq!(counts.closes, 0);
        assert_eq!(counts.claims, 1);
        assert_eq!(counts.releases, 0);
    }

    #[test]
    fn test_first_bulk_endpoint_wins_per_direction() {
        let mut host = MockHost::new();
        host.add_device(MockDeviceSpec::new(0x18d1, 0x4ee0).with_interface(interface(
            0,
            FASTBOOT,
            &[
                (0x81, TransferType::Bulk),
                (0x82, TransferType::Bulk),
                (0x01, TransferType::Bulk),
            ],
        )));

        let handle = UsbTransport::with_host(host).open(accept_all).unwrap();
        assert_eq!(handle.endpoints().bulk_in, 0x81);
        assert_eq!(handle.endpoints().bulk_out, 0x01);
    }

    #[test]
    fn test_accepted_bulk_pair_is_nonzero() {
        let mut host = MockHost::new();
        host.add_device(MockDeviceSpec::new(0x18d1, 0x4ee0).with_interface(interface(
            3,
            FASTBOOT,
            &[
                (0x83, TransferType::Interrupt),
                (0x85, TransferType::Bulk),
                (0x06, TransferType::Bulk),
            ],
        )));

        let handle = UsbTransport::with_host(host)
            .open(|info: &InterfaceInfo| info.has_bulk_in && info.has_bulk_out)
            .unwrap();

        assert_ne!(handle.endpoints().bulk_in, 0);
        assert_ne!(handle.endpoints().bulk_out, 0);
        assert_eq!(handle.endpoints().bulk_in, 0x85);
        assert_eq!(handle.endpoints().interface, 3);
    }

    #[test]
    fn test_claim_failure_skips_predicate() {
        let mut host = MockHost::new();
        let probe = host.add_device(
            MockDeviceSpec::new(0x18d1, 0x4ee0)
                .with_interface(bulk_interface(0, FASTBOOT, 0x81, 0x01))
                .with_interface(bulk_interface(1, FASTBOOT, 0x82, 0x02))
                .with_claim_failure(0),
        );

        let seen = RefCell::new(Vec::new());
        let handle = UsbTransport::with_host(host)
            .open(|info: &InterfaceInfo| {
                seen.borrow_mut().push(info.clone());
                true
            })
            .unwrap();

        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(handle.endpoints().interface, 1);
        assert_eq!(handle.endpoints().bulk_in, 0x82);
        assert_eq!(probe.claimed(), vec![1]);
    }

    #[test]
    fn test_never_returns_unclaimed_interface() {
        let mut host = MockHost::new();
        let probe = host.add_device(
            MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "").with_claim_failure(0),
        );

        let calls = RefCell::new(0);
        let result = UsbTransport::with_host(host).open(|_: &InterfaceInfo| {
            *calls.borrow_mut() += 1;
            true
        });

        assert!(matches!(result, Err(TransportError::NoMatch)));
        assert_eq!(*calls.borrow(), 0);
        let counts = probe.counts();
        assert_eq!(counts.opens, counts.closes);
        assert_eq!(counts.live_refs, 0);
    }

    #[test]
    fn test_reject_all_leaves_nothing_claimed_or_open() {
        let mut host = MockHost::new();
        let probes = vec![
            host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "A")),
            host.add_device(
                MockDeviceSpec::new(0x0781, 0x5581)
                    .with_interface(bulk_interface(0, MASS_STORAGE, 0x81, 0x02))
                    .with_interface(bulk_interface(1, ADB, 0x83, 0x04)),
            ),
            host.add_device(
                MockDeviceSpec::fastboot(0x18d1, 0x4ee7, "B").with_claim_failure(0),
            ),
        ];

        let result = UsbTransport::with_host(host).open(reject_all);
        assert!(matches!(result, Err(TransportError::NoMatch)));

        for probe in &probes {
            let counts = probe.counts();
            assert_eq!(counts.claims, counts.releases);
            assert_eq!(counts.opens, counts.closes);
            assert_eq!(counts.live_refs, 0);
            assert!(probe.claimed().is_empty());
        }
        assert_eq!(probes[1].counts().claims, 2);
    }

    #[test]
    fn test_accept_holds_exactly_one_reference() {
        let mut host = MockHost::new();
        let storage = host.add_device(
            MockDeviceSpec::new(0x0781, 0x5581)
                .with_interface(bulk_interface(0, MASS_STORAGE, 0x81, 0x02)),
        );
        let phone = host.add_device(
            MockDeviceSpec::new(0x18d1, 0x4ee0)
                .with_interface(bulk_interface(0, ADB, 0x81, 0x01))
                .with_interface(bulk_interface(1, FASTBOOT, 0x82, 0x02)),
        );

        let handle = UsbTransport::with_host(host)
            .open(InterfaceMatcher::fastboot().predicate())
            .unwrap();

        // Device list has been released; only the handle's reference remains
        assert_eq!(phone.counts().live_refs, 1);
        assert_eq!(phone.claimed(), vec![1]);
        assert_eq!(phone.counts().claims, 2);
        assert_eq!(phone.counts().releases, 1);

        let storage_counts = storage.counts();
        assert_eq!(storage_counts.live_refs, 0);
        assert_eq!(storage_counts.opens, storage_counts.closes);
        assert_eq!(storage_counts.claims, storage_counts.releases);

        drop(handle);
        assert_eq!(phone.counts().live_refs, 0);
    }

    #[test]
    fn test_devices_probed_in_listing_order() {
        let mut host = MockHost::new();
        let first = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "FIRST"));
        let second = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "SECOND"));

        let handle = UsbTransport::with_host(host).open(accept_all).unwrap();
        assert_eq!(handle.info().serial_number, "FIRST");
        assert_eq!(first.counts().opens, 1);
        assert_eq!(second.counts().opens, 0);
    }

    #[test]
    fn test_interfaces_probed_in_index_order() {
        let mut host = MockHost::new();
        host.add_device(
            MockDeviceSpec::new(0x18d1, 0x4ee0)
                .with_interface(bulk_interface(0, ADB, 0x81, 0x01))
                .with_interface(bulk_interface(1, FASTBOOT, 0x82, 0x02)),
        );

        let handle = UsbTransport::with_host(host).open(accept_all).unwrap();
        assert_eq!(handle.endpoints().interface, 0);
        assert_eq!(handle.info().interface_triple(), ADB);
    }

    #[test]
    fn test_descriptor_failure_skips_device() {
        let mut host = MockHost::new();
        let broken = host.add_device(
            MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "X")
                .with_descriptor_error(rusb::Error::Io),
        );
        host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "OK"));

        let handle = UsbTransport::with_host(host).open(accept_all).unwrap();
        assert_eq!(handle.info().serial_number, "OK");

        let counts = broken.counts();
        assert_eq!(counts.opens, 1);
        assert_eq!(counts.closes, 1);
        assert_eq!(counts.claims, 0);
    }

    #[test]
    fn test_config_failure_skips_device() {
        let mut host = MockHost::new();
        let broken = host.add_device(
            MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "X").with_config_error(rusb::Error::NotFound),
        );
        host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "OK"));

        let handle = UsbTransport::with_host(host).open(accept_all).unwrap();
        assert_eq!(handle.info().serial_number, "OK");
        assert_eq!(broken.counts().opens, broken.counts().closes);
        assert_eq!(broken.counts().claims, 0);
    }

    #[test]
    fn test_open_failure_skips_device() {
        let mut host = MockHost::new();
        let denied = host.add_device(
            MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "X").with_open_error(rusb::Error::Access),
        );
        host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "OK"));

        let handle = UsbTransport::with_host(host).open(accept_all).unwrap();
        assert_eq!(handle.info().serial_number, "OK");
        assert_eq!(denied.counts().opens, 0);
        assert_eq!(denied.counts().live_refs, 0);
    }

    #[test]
    fn test_serial_read_failure_reports_empty_serial() {
        let mut host = MockHost::new();
        host.add_device(
            MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "HIDDEN").with_serial_error(rusb::Error::Pipe),
        );

        let handle = UsbTransport::with_host(host).open(accept_all).unwrap();
        assert_eq!(handle.info().serial_number, "");
    }

    #[test]
    fn test_serial_selects_device() {
        let mut host = MockHost::new();
        host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "AAA"));
        host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "BBB"));

        let matcher = InterfaceMatcher::fastboot().with_serial(Some("BBB".to_string()));
        let handle = UsbTransport::with_host(host)
            .open(matcher.predicate())
            .unwrap();
        assert_eq!(handle.info().serial_number, "BBB");
    }

    #[test]
    fn test_enumeration_failure_is_surfaced() {
        let host = MockHost::new().with_list_error(rusb::Error::NoMem);

        let result = UsbTransport::with_host(host).open(accept_all);
        assert!(matches!(
            result,
            Err(TransportError::Enumerate(rusb::Error::NoMem))
        ));
    }

    #[test]
    fn test_no_devices_is_no_match() {
        let result = UsbTransport::with_host(MockHost::new()).open(accept_all);
        assert!(matches!(result, Err(TransportError::NoMatch)));
    }
}

mod list {
    use super::*;

    #[test]
    fn test_list_reports_presence_flags() {
        let mut host = MockHost::new();
        host.add_device(
            MockDeviceSpec::new(0x18d1, 0x4ee0)
                .with_serial("S1")
                .with_interface(interface(0, FASTBOOT, &[(0x81, TransferType::Bulk)]))
                .with_interface(bulk_interface(1, FASTBOOT, 0x82, 0x02)),
        );

        let found = UsbTransport::with_host(host).list(accept_all).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].has_bulk_in);
        assert!(!found[0].has_bulk_out);
        assert!(found[1].has_bulk_in && found[1].has_bulk_out);
        assert_eq!(found[1].serial_number, "S1");
    }

    #[test]
    fn test_list_filters_and_releases() {
        let mut host = MockHost::new();
        let probes = vec![
            host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, "A")),
            host.add_device(
                MockDeviceSpec::new(0x0781, 0x5581)
                    .with_interface(bulk_interface(0, MASS_STORAGE, 0x81, 0x02)),
            ),
            host.add_device(MockDeviceSpec::fastboot(0x22b8, 0x2e80, "B")),
        ];

        let matcher = InterfaceMatcher::fastboot();
        let found = UsbTransport::with_host(host)
            .list(matcher.predicate())
            .unwrap();

        let serials: Vec<_> = found.iter().map(|i| i.serial_number.as_str()).collect();
        assert_eq!(serials, vec!["A", "B"]);

        for probe in &probes {
            let counts = probe.counts();
            assert_eq!(counts.claims, counts.releases);
            assert_eq!(counts.opens, counts.closes);
            assert_eq!(counts.live_refs, 0);
        }
    }
}

mod transfers {
    use super::*;

    #[test]
    fn test_read_returns_native_count() {
        let mut host = MockHost::new();
        let probe = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, ""));
        let mut handle = UsbTransport::with_host(host).open(accept_all).unwrap();

        probe.push_read(b"OKAY0.4");
        let mut buf = [0u8; 64];
        let n = handle.read(&mut buf).unwrap();

        assert_eq!(n, 7);
        assert_eq!(&buf[..n], b"OKAY0.4");

        let reads = probe.reads();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].endpoint, 0x81);
        assert_eq!(reads[0].len, 64);
        assert_eq!(reads[0].timeout, Duration::ZERO);
    }

    #[test]
    fn test_read_failure_is_distinguished() {
        let mut host = MockHost::new();
        let probe = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, ""));
        let mut handle = UsbTransport::with_host(host).open(accept_all).unwrap();

        probe.push_read_error(rusb::Error::Pipe);
        let mut buf = [0u8; 16];
        let err = handle.read(&mut buf).unwrap_err();

        assert!(matches!(
            err,
            TransportError::Transfer {
                endpoint: 0x81,
                source: rusb::Error::Pipe
            }
        ));
        // No retry
        assert_eq!(probe.counts().reads, 1);
    }

    #[test]
    fn test_write_returns_native_count() {
        let mut host = MockHost::new();
        let probe = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, ""));
        let mut handle = UsbTransport::with_host(host).open(accept_all).unwrap();

        assert_eq!(handle.write(b"getvar:version").unwrap(), 14);

        // Short writes are passed through untouched
        probe.push_write_result(Ok(3));
        assert_eq!(handle.write(b"reboot").unwrap(), 3);

        let written = probe.written();
        assert_eq!(written[0], (0x01, b"getvar:version".to_vec()));
        assert_eq!(written[1], (0x01, b"reb".to_vec()));
        assert!(probe.write_timeouts().iter().all(|t| t.is_zero()));
    }

    #[test]
    fn test_write_failure_is_distinguished() {
        let mut host = MockHost::new();
        let probe = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, ""));
        let mut handle = UsbTransport::with_host(host).open(accept_all).unwrap();

        probe.push_write_result(Err(rusb::Error::NoDevice));
        let err = handle.write(b"download:00001000").unwrap_err();

        assert!(matches!(
            err,
            TransportError::Transfer {
                endpoint: 0x01,
                source: rusb::Error::NoDevice
            }
        ));
        assert_eq!(probe.counts().writes, 1);
    }

    #[test]
    fn test_io_traits() {
        let mut host = MockHost::new();
        let probe = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, ""));
        let mut handle = UsbTransport::with_host(host).open(accept_all).unwrap();

        probe.push_write_result(Ok(4));
        Write::write_all(&mut handle, b"getvar:all").unwrap();
        let chunks: Vec<_> = probe.written().into_iter().map(|(_, d)| d).collect();
        assert_eq!(chunks, vec![b"getv".to_vec(), b"ar:all".to_vec()]);

        probe.push_read_error(rusb::Error::NoDevice);
        let mut buf = [0u8; 8];
        let err = Read::read(&mut handle, &mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
    }
}

mod close {
    use super::*;

    #[test]
    fn test_close_releases_handle_and_reference() {
        let mut host = MockHost::new();
        let probe = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, ""));
        let handle = UsbTransport::with_host(host).open(accept_all).unwrap();

        handle.close();

        let counts = probe.counts();
        assert_eq!(counts.opens, 1);
        assert_eq!(counts.closes, 1);
        assert_eq!(counts.live_refs, 0);
        assert!(probe.claimed().is_empty());
    }

    #[test]
    fn test_drop_behaves_like_close() {
        let mut host = MockHost::new();
        let probe = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, ""));

        {
            let _handle = UsbTransport::with_host(host).open(accept_all).unwrap();
            assert_eq!(probe.counts().live_refs, 1);
        }

        assert_eq!(probe.counts().closes, 1);
        assert_eq!(probe.counts().live_refs, 0);
    }

    #[test]
    fn test_closing_other_handle_keeps_claim() {
        use transport::{UsbDevice, UsbDeviceHandle};

        let mut host = MockHost::new();
        let probe = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, ""));
        let handle = UsbTransport::with_host(host).open(accept_all).unwrap();

        let mut other = handle.device().open().unwrap();
        other.claim_interface(1).unwrap();
        assert_eq!(probe.claimed(), vec![0, 1]);
        drop(other);

        assert_eq!(probe.claimed(), vec![0]);
        handle.close();
        assert!(probe.claimed().is_empty());
    }
}

mod disconnect {
    use super::*;

    fn fastboot_host() -> (DeviceProbe, MockHost) {
        let mut host = MockHost::new();
        let probe = host.add_device(MockDeviceSpec::fastboot(0x18d1, 0x4ee0, ""));
        (probe, host)
    }

    #[test]
    fn test_disconnect_detected_when_reopen_fails() {
        let clock = MockClock::new();
        let (probe, host) = fastboot_host();
        let handle = UsbTransport::with_clock(host, clock.clone())
            .open(accept_all)
            .unwrap();

        probe.disconnect_after_opens(2);
        handle.wait_for_disconnect().unwrap();

        assert_eq!(clock.sleeps(), 2);
        assert_eq!(clock.elapsed(), DISCONNECT_POLL_INTERVAL * 2);
        // The original open plus two successful re-opens, each closed again
        assert_eq!(probe.counts().opens, 3);
        assert_eq!(probe.counts().closes, 2);
    }

    #[test]
    fn test_immediate_disconnect() {
        let clock = MockClock::new();
        let (probe, host) = fastboot_host();
        let handle = UsbTransport::with_clock(host, clock.clone())
            .open(accept_all)
            .unwrap();

        probe.disconnect_after_opens(0);
        handle.wait_for_disconnect().unwrap();

        assert_eq!(clock.sleeps(), 0);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_timeout_when_device_stays() {
        let clock = MockClock::new();
        let (probe, host) = fastboot_host();
        let handle = UsbTransport::with_clock(host, clock.clone())
            .open(accept_all)
            .unwrap();

        let err = handle.wait_for_disconnect().unwrap_err();
        assert!(matches!(err, TransportError::DisconnectTimeout(d) if d == DISCONNECT_TIMEOUT));

        let polls = (DISCONNECT_TIMEOUT.as_millis() / DISCONNECT_POLL_INTERVAL.as_millis()) as u32;
        assert_eq!(clock.sleeps(), polls);
        assert_eq!(clock.elapsed(), DISCONNECT_TIMEOUT);
        assert_eq!(probe.counts().opens, 1 + polls);
        assert_eq!(probe.counts().closes, polls);

        // Waiting does not disturb the claimed handle
        assert_eq!(probe.claimed(), vec![0]);
        handle.close();
        assert_eq!(probe.counts().live_refs, 0);
    }
}
