//! Transport error types

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the USB transport
///
/// Probing failures on individual devices or interfaces never show up here;
/// they are logged and the search moves on.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The process-wide libusb context could not be created
    #[error("Failed to initialize USB context: {0}")]
    Context(#[source] rusb::Error),

    /// Listing attached devices failed
    #[error("Failed to enumerate USB devices: {0}")]
    Enumerate(#[source] rusb::Error),

    /// No interface on any attached device was accepted
    #[error("No matching USB interface found")]
    NoMatch,

    /// A bulk transfer failed
    #[error("Bulk transfer on endpoint {endpoint:#04x} failed: {source}")]
    Transfer {
        endpoint: u8,
        #[source]
        source: rusb::Error,
    },

    /// The device was still reachable when the deadline passed
    #[error("Device still connected after {0:?}")]
    DisconnectTimeout(Duration),
}

impl TransportError {
    /// The native error behind this failure, if there is one
    pub fn usb_error(&self) -> Option<rusb::Error> {
        match self {
            Self::Context(e) | Self::Enumerate(e) => Some(*e),
            Self::Transfer { source, .. } => Some(*source),
            Self::NoMatch | Self::DisconnectTimeout(_) => None,
        }
    }
}

impl From<TransportError> for std::io::Error {
    fn from(err: TransportError) -> Self {
        use std::io::ErrorKind;

        let kind = match err.usb_error() {
            Some(rusb::Error::Timeout) => ErrorKind::TimedOut,
            Some(rusb::Error::NoDevice) => ErrorKind::NotConnected,
            Some(rusb::Error::Access) => ErrorKind::PermissionDenied,
            Some(rusb::Error::Interrupted) => ErrorKind::Interrupted,
            Some(rusb::Error::Pipe) => ErrorKind::BrokenPipe,
            _ => match &err {
                TransportError::NoMatch => ErrorKind::NotFound,
                TransportError::DisconnectTimeout(_) => ErrorKind::TimedOut,
                _ => ErrorKind::Other,
            },
        };
        std::io::Error::new(kind, err)
    }
}

/// Type alias for transport results
pub type Result<T> = std::result::Result<T, TransportError>;
