//! fastboot-usb
//!
//! Command-line front end for the USB transport: lists Android fastboot/adb
//! interfaces, exchanges raw bulk payloads, and waits for devices to drop off
//! the bus (for example after a reboot command).

mod config;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use common::setup_logging;
use config::ToolConfig;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, info};
use transport::{InterfaceInfo, InterfaceMatcher, LibusbHost, ProtocolKind, UsbTransport};

#[derive(Parser, Debug)]
#[command(name = "fastboot-usb")]
#[command(author, version, about = "Find and talk to Android bootloader USB interfaces")]
#[command(long_about = "
Finds USB interfaces exposing the fastboot (0xff/0x42/0x03) or adb
(0xff/0x42/0x01) protocol, claims one, and moves raw bytes over its bulk
endpoints.

EXAMPLES:
    # List fastboot devices
    fastboot-usb devices

    # List adb interfaces with descriptor details
    fastboot-usb --protocol adb devices --long

    # Ask a specific device for its bootloader version
    fastboot-usb -s HT4CJJT00001 send getvar:version-bootloader --read 64

    # Reboot and wait for the device to leave the bus
    fastboot-usb send reboot --read 64 && fastboot-usb wait-for-disconnect

CONFIGURATION:
    Defaults are read from ~/.config/fastboot-usb/config.toml when present.
    Command-line options override the file.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level or filter directives (e.g. debug, warn,transport=trace)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Only use the device with this serial number
    #[arg(short, long, value_name = "SERIAL", global = true)]
    serial: Option<String>,

    /// Interface protocol to match (fastboot, adb)
    #[arg(short, long, value_name = "PROTOCOL", global = true)]
    protocol: Option<ProtocolKind>,

    /// Restrict to VID:PID (repeatable, e.g. 0x18d1:*)
    #[arg(short, long = "filter", value_name = "VID:PID", global = true)]
    filters: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List matching interfaces
    Devices {
        /// Show vendor/product ids and interface codes
        #[arg(long)]
        long: bool,

        /// Print JSON instead of a table
        #[arg(long, conflicts_with = "long")]
        json: bool,
    },

    /// Write a payload to the bulk OUT endpoint, optionally reading a reply
    Send {
        /// Payload to send (text, or hex with --hex)
        payload: String,

        /// Treat the payload as hex bytes
        #[arg(long)]
        hex: bool,

        /// Read up to this many bytes back from the bulk IN endpoint
        #[arg(short, long, value_name = "BYTES", default_value_t = 0)]
        read: usize,
    },

    /// Wait until the matching device disconnects
    WaitForDisconnect,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ToolConfig::default();
        let path = ToolConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = match args.config {
        Some(ref path) => {
            ToolConfig::load(Some(path.clone())).context("Failed to load configuration")?
        }
        None => ToolConfig::load_or_default(),
    };

    // Command-line selections override the file
    if let Some(ref level) = args.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(protocol) = args.protocol {
        config.usb.protocol = protocol;
    }
    if args.serial.is_some() {
        config.usb.serial = args.serial.clone();
    }
    if !args.filters.is_empty() {
        config.usb.filters = args.filters.clone();
    }
    config.validate()?;

    setup_logging(&config.general.log_level).context("Failed to setup logging")?;
    debug!("fastboot-usb v{}", env!("CARGO_PKG_VERSION"));

    let matcher = config.usb.matcher()?;
    let usb = UsbTransport::new().context("Failed to initialize USB")?;

    match args.command.unwrap_or(Command::Devices {
        long: false,
        json: false,
    }) {
        Command::Devices { long, json } => {
            list_devices(&usb, &matcher, config.usb.protocol, long, json)
                .context("Failed to list devices")
        }
        Command::Send { payload, hex, read } => {
            let data = if hex {
                decode_hex(&payload)?
            } else {
                payload.into_bytes()
            };
            send(&usb, &matcher, &data, read).context("Send failed")
        }
        Command::WaitForDisconnect => {
            wait_for_disconnect(&usb, &matcher).context("Wait for disconnect failed")
        }
    }
}

fn list_devices(
    usb: &UsbTransport<LibusbHost>,
    matcher: &InterfaceMatcher,
    protocol: ProtocolKind,
    long: bool,
    json: bool,
) -> common::Result<()> {
    let found = usb.list(matcher.predicate())?;

    if json {
        let text = serde_json::to_string_pretty(&found)
            .map_err(|e| common::Error::Other(format!("JSON encoding failed: {}", e)))?;
        println!("{}", text);
        return Ok(());
    }

    for info in &found {
        println!("{}", format_device_line(info, protocol, long));
    }
    Ok(())
}

fn format_device_line(info: &InterfaceInfo, protocol: ProtocolKind, long: bool) -> String {
    let serial = if info.serial_number.is_empty() {
        "????????"
    } else {
        info.serial_number.as_str()
    };

    if long {
        format!(
            "{}\t{}\t{:04x}:{:04x}\tifc {:02x}/{:02x}/{:02x}\tin={} out={}",
            serial,
            protocol,
            info.vendor_id,
            info.product_id,
            info.interface_class,
            info.interface_subclass,
            info.interface_protocol,
            info.has_bulk_in,
            info.has_bulk_out
        )
    } else {
        format!("{}\t{}", serial, protocol)
    }
}

fn send(
    usb: &UsbTransport<LibusbHost>,
    matcher: &InterfaceMatcher,
    data: &[u8],
    read: usize,
) -> common::Result<()> {
    let mut handle = usb.open(matcher.predicate())?;

    let written = handle.write(data)?;
    info!("Wrote {} of {} bytes", written, data.len());

    if read > 0 {
        let mut buf = vec![0u8; read];
        let n = handle.read(&mut buf)?;
        buf.truncate(n);

        let mut out = io::stdout().lock();
        out.write_all(&buf)?;
        out.write_all(b"\n")?;
        out.flush()?;
    }

    handle.close();
    Ok(())
}

fn wait_for_disconnect(
    usb: &UsbTransport<LibusbHost>,
    matcher: &InterfaceMatcher,
) -> common::Result<()> {
    let handle = usb.open(matcher.predicate())?;
    let serial = handle.info().serial_number.clone();

    let outcome = handle.wait_for_disconnect();
    handle.close();
    outcome?;

    println!("{} disconnected", serial);
    Ok(())
}

fn decode_hex(input: &str) -> Result<Vec<u8>> {
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);

    if digits.len() % 2 != 0 {
        return Err(anyhow!("Hex payload has an odd number of digits"));
    }

    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let text = String::from_utf8_lossy(pair);
            if !pair.iter().all(u8::is_ascii_hexdigit) {
                return Err(anyhow!("Invalid hex byte '{text}'"));
            }
            u8::from_str_radix(&text, 16).map_err(|_| anyhow!("Invalid hex byte '{text}'"))
        })
        .collect()
}
