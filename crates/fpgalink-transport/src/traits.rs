use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::serial::UART_BITS_PER_BYTE;

/// A byte-level link to the accelerator.
///
/// Reads block for at most [`LinkPort::timeout`] and report
/// `ErrorKind::TimedOut` when nothing arrived, which is how the serial driver
/// behaves. Implementations must be cloneable into an independent handle so
/// the reading and writing halves can be owned separately.
pub trait LinkPort: Read + Write + Send {
    /// Device name for diagnostics.
    fn name(&self) -> &str;

    /// Set the per-operation blocking timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Current per-operation blocking timeout.
    fn timeout(&self) -> Duration;

    /// Sample the clear-to-send control line.
    fn clear_to_send(&mut self) -> Result<bool>;

    /// Drop any bytes received but not yet read.
    fn discard_input(&mut self) -> Result<()>;

    /// Create a second handle to the same device.
    fn try_clone_port(&self) -> Result<Box<dyn LinkPort>>;
}

impl<P: LinkPort + ?Sized> LinkPort for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn clear_to_send(&mut self) -> Result<bool> {
        (**self).clear_to_send()
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }

    fn try_clone_port(&self) -> Result<Box<dyn LinkPort>> {
        (**self).try_clone_port()
    }
}

/// Time needed to shift `bytes` through a UART running at `baud`.
pub fn wire_time(bytes: usize, baud: u32) -> Duration {
    if baud == 0 {
        return Duration::ZERO;
    }
    let bits = bytes as u64 * UART_BITS_PER_BYTE as u64;
    Duration::from_micros(bits.saturating_mul(1_000_000) / baud as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_time_at_default_baud() {
        // 576 bytes * 10 bits / 576000 baud = 10ms
        assert_eq!(wire_time(576, 576_000), Duration::from_millis(10));
    }

    #[test]
    fn wire_time_zero_baud_is_zero() {
        assert_eq!(wire_time(1024, 0), Duration::ZERO);
    }

    #[test]
    fn wire_time_scales_linearly() {
        let one = wire_time(100, 115_200);
        let two = wire_time(200, 115_200);
        assert!(two >= one * 2 - Duration::from_micros(1));
        assert!(two <= one * 2 + Duration::from_micros(1));
    }
}
