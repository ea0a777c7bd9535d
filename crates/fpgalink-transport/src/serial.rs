use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::LinkPort;

/// Baud rate the accelerator's UART is synthesized for.
pub const DEFAULT_BAUD_RATE: u32 = 576_000;

/// Start bit + 8 data bits + stop bit.
pub const UART_BITS_PER_BYTE: u32 = 10;

/// Blocking timeout applied to a freshly opened port.
pub const DEFAULT_PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial transport to the accelerator (8N1, no flow control).
///
/// Wraps the platform port returned by `serialport`. The device name is kept
/// for diagnostics because not every platform reports it back.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    device: String,
    baud: u32,
}

impl SerialLink {
    /// Open `device` at `baud` with the default port timeout.
    pub fn open(device: &str, baud: u32) -> Result<Self> {
        Self::open_with_timeout(device, baud, DEFAULT_PORT_TIMEOUT)
    }

    /// Open `device` at `baud` with an explicit blocking timeout.
    pub fn open_with_timeout(device: &str, baud: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|source| TransportError::Open {
                device: device.to_string(),
                baud,
                source,
            })?;

        info!(device, baud, "opened serial link");

        Ok(Self {
            port,
            device: device.to_string(),
            baud,
        })
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "serial"
    }

    fn port_error(&self, source: serialport::Error) -> TransportError {
        TransportError::Port {
            device: self.device.clone(),
            source,
        }
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}

impl LinkPort for SerialLink {
    fn name(&self) -> &str {
        &self.device
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|err| self.port_error(err))
    }

    fn timeout(&self) -> Duration {
        self.port.timeout()
    }

    fn clear_to_send(&mut self) -> Result<bool> {
        self.port
            .read_clear_to_send()
            .map_err(|err| self.port_error(err))
    }

    fn discard_input(&mut self) -> Result<()> {
        debug!(device = %self.device, "discarding pending input");
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|err| self.port_error(err))
    }

    fn try_clone_port(&self) -> Result<Box<dyn LinkPort>> {
        let port = self.port.try_clone().map_err(|err| self.port_error(err))?;
        Ok(Box::new(Self {
            port,
            device: self.device.clone(),
            baud: self.baud,
        }))
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("device", &self.device)
            .field("baud", &self.baud)
            .finish()
    }
}
