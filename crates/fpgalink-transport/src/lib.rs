//! Serial link abstraction for FPGA accelerator control.
//!
//! This is the lowest layer of fpgalink. It knows nothing about frames; it
//! only opens the device, moves bytes, and exposes the few control-line and
//! timeout knobs the upper layers need.
//!
//! Everything above builds on the [`LinkPort`] trait. [`SerialLink`] is the
//! production implementation backed by the `serialport` crate.

pub mod error;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use serial::{SerialLink, DEFAULT_BAUD_RATE, DEFAULT_PORT_TIMEOUT, UART_BITS_PER_BYTE};
pub use traits::{wire_time, LinkPort};
