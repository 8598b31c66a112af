//! Common utilities for fastboot-usb
//!
//! Shared error type and logging setup used by the command-line tool.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::{parse_filter, setup_logging, validate_filter};
